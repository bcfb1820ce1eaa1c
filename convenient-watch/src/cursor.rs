//! Per-cell position in the watch service's change log

use std::sync::{Arc, Mutex, PoisonError};

/// Clock value meaning "from the beginning"
pub const NULL_CLOCK: &str = "c:0:0";

const CLOCK_PREFIX: &str = "c:";

/// Opaque position token sent as `since` with every query.
///
/// Clock cursors (`c:...`) are advanced locally from each reply. Named
/// cursors (`n:...`) are tracked by the service itself and never rewritten.
#[derive(Debug, Clone)]
pub struct Cursor {
    value: Arc<Mutex<String>>,
}

impl Cursor {
    /// Cursor starting at `value`
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Arc::new(Mutex::new(value.into())),
        }
    }

    /// Cursor at the null clock
    #[must_use]
    pub fn null() -> Self {
        Self::new(NULL_CLOCK)
    }

    /// Current token
    #[must_use]
    pub fn get(&self) -> String {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Move a clock cursor to `clock`. Returns whether the value changed.
    pub fn advance(&self, clock: &str) -> bool {
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        if !value.starts_with(CLOCK_PREFIX) || *value == clock {
            return false;
        }
        clock.clone_into(&mut value);
        true
    }

    /// Whether this cursor is a clock cursor
    #[must_use]
    pub fn is_clock(&self) -> bool {
        self.get().starts_with(CLOCK_PREFIX)
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_cursor_advances() {
        let cursor = Cursor::null();
        assert!(cursor.advance("c:123:4"));
        assert_eq!(cursor.get(), "c:123:4");
        assert!(!cursor.advance("c:123:4"));
    }

    #[test]
    fn test_named_cursor_is_left_alone() {
        let cursor = Cursor::new("n:bitzel_session");
        assert!(!cursor.is_clock());
        assert!(!cursor.advance("c:9:9"));
        assert_eq!(cursor.get(), "n:bitzel_session");
    }

    #[test]
    fn test_clones_share_position() {
        let cursor = Cursor::null();
        let other = cursor.clone();
        let _ = other.advance("c:1:1");
        assert_eq!(cursor.get(), "c:1:1");
    }
}
