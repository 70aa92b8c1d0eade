/// Split lyrics into displayable lines, dropping blank ones.
pub fn split_lines(lyrics: &str) -> Vec<String> {
    lyrics
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Position in a lyric sheet. Advancing past the last line leaves the
/// cursor on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LyricCursor {
    lines: Vec<String>,
    index: usize,
}

impl LyricCursor {
    pub fn new(lyrics: Option<&str>) -> Self {
        Self {
            lines: lyrics.map(split_lines).unwrap_or_default(),
            index: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<&str> {
        self.lines.get(self.index).map(String::as_str)
    }

    /// Move to the next line and return it, or `None` once exhausted.
    pub fn advance(&mut self) -> Option<&str> {
        if self.index + 1 >= self.lines.len() {
            return None;
        }
        self.index += 1;
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_dropped() {
        assert_eq!(split_lines("line one\nline two\n\n"), vec!["line one", "line two"]);
        assert_eq!(split_lines("a\r\n\r\n  \r\nb"), vec!["a", "b"]);
        assert!(split_lines("").is_empty());
        assert!(split_lines("\n\n").is_empty());
    }

    #[test]
    fn inner_whitespace_is_kept() {
        assert_eq!(split_lines("  verse one  \n"), vec!["  verse one  "]);
    }

    #[test]
    fn cursor_walks_and_stops_on_last_line() {
        let mut cursor = LyricCursor::new(Some("one\ntwo\nthree"));
        assert_eq!(cursor.current(), Some("one"));
        assert_eq!(cursor.advance(), Some("two"));
        assert_eq!(cursor.advance(), Some("three"));
        assert_eq!(cursor.advance(), None);
        assert_eq!(cursor.current(), Some("three"));
        assert_eq!(cursor.index(), 2);
    }

    #[test]
    fn missing_lyrics_give_empty_cursor() {
        let mut cursor = LyricCursor::new(None);
        assert!(cursor.is_empty());
        assert_eq!(cursor.current(), None);
        assert_eq!(cursor.advance(), None);
    }
}
