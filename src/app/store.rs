use tokio::sync::watch;

use super::state::{reduce, Action, AppState};

/// Single owner of [`AppState`]. Changes go through [`Store::dispatch`];
/// observers follow along on a watch channel.
pub struct Store {
    tx: watch::Sender<AppState>,
}

impl Store {
    pub fn new(initial: AppState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn dispatch(&self, action: Action) {
        log::debug!("dispatch {:?}", action);
        self.tx.send_if_modified(|state| {
            let next = reduce(state, &action);
            if next == *state {
                return false;
            }
            *state = next;
            true
        });
    }

    pub fn state(&self) -> AppState {
        self.tx.borrow().clone()
    }

    /// Read a field without cloning the whole state.
    pub fn with<T>(&self, f: impl FnOnce(&AppState) -> T) -> T {
        f(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.tx.subscribe()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(AppState::default())
    }
}
