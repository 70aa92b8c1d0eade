use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::{Mixer, OutputError};

/// A running `cpal` output stream.
///
/// `cpal::Stream` is not `Send`, so the stream is built, played and dropped
/// on a thread of its own; this handle only signals that thread.
pub(super) struct DeviceStream {
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceStream {
    /// Open the default output device and start feeding it from `mixer`.
    /// Blocks until the stream is playing or has failed.
    pub(super) fn open(mixer: Mixer) -> Result<Self, OutputError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(u32, u16), OutputError>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("songloom-audio".to_string())
            .spawn(move || {
                let stream = match build_output_stream(&mixer) {
                    Ok((stream, sample_rate, channels)) => {
                        if let Err(e) = stream.play() {
                            let _ = ready_tx.send(Err(OutputError::Device(format!(
                                "Failed to start output: {}",
                                e
                            ))));
                            return;
                        }
                        let _ = ready_tx.send(Ok((sample_rate, channels)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns on shutdown or when the handle is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| OutputError::Device(format!("Failed to spawn audio thread: {}", e)))?;

        let mut handle = Self {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        };
        match ready_rx.recv() {
            Ok(Ok((sample_rate, channels))) => {
                log::info!("Output stream started: {}Hz {}ch", sample_rate, channels);
                Ok(handle)
            }
            Ok(Err(e)) => {
                handle.close();
                Err(e)
            }
            Err(_) => {
                handle.close();
                Err(OutputError::Device("audio thread exited during setup".to_string()))
            }
        }
    }

    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Audio thread panicked");
            }
        }
    }
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_output_stream(mixer: &Mixer) -> Result<(cpal::Stream, u32, u16), OutputError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(OutputError::NoDevice)?;

    let supported = device
        .default_output_config()
        .map_err(|e| OutputError::Device(format!("Failed to get output config: {}", e)))?;

    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let config: cpal::StreamConfig = supported.into();

    // Voices render at whatever rate the device runs at
    mixer.set_sample_rate(sample_rate);

    let mixer = mixer.clone();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                mixer.fill_interleaved(data, channels);
            },
            |err| {
                log::error!("Playback output error: {}", err);
            },
            None,
        )
        .map_err(|e| OutputError::Device(format!("Failed to build output stream: {}", e)))?;

    Ok((stream, sample_rate, channels))
}
