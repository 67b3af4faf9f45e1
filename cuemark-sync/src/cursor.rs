//! Resume cursor: the id hint a client hands the feed when it (re)joins.

/// How live annotations move the cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CursorPolicy {
    /// Every live annotation overwrites the cursor, even with a lower id.
    /// A reconnect then resumes from the most recently *arrived* item.
    #[default]
    LastWrite,
    /// The cursor only ever moves forward (`max(current, id)`).
    Monotonic,
}

/// Tracks the annotation id a reconnecting client should resume after.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeCursor {
    last_seen_id: Option<u64>,
}

impl ResumeCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor positioned after `id`.
    pub fn at(id: u64) -> Self {
        Self {
            last_seen_id: Some(id),
        }
    }

    pub fn last_seen_id(&self) -> Option<u64> {
        self.last_seen_id
    }

    /// Seed from a join backlog: the largest id present, whatever order
    /// the backlog arrived in. An empty backlog leaves the cursor alone.
    pub fn seed<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = u64>,
    {
        if let Some(max) = ids.into_iter().max() {
            self.last_seen_id = Some(max);
        }
    }

    /// Record a live annotation id according to `policy`.
    pub fn observe(&mut self, id: u64, policy: CursorPolicy) {
        self.last_seen_id = match (policy, self.last_seen_id) {
            (CursorPolicy::Monotonic, Some(current)) => Some(current.max(id)),
            _ => Some(id),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cursor_is_unset() {
        assert_eq!(ResumeCursor::new().last_seen_id(), None);
    }

    #[test]
    fn test_seed_takes_max_not_last() {
        let mut cursor = ResumeCursor::new();
        cursor.seed([5, 2, 9, 4]);
        assert_eq!(cursor.last_seen_id(), Some(9));
    }

    #[test]
    fn test_seed_empty_keeps_value() {
        let mut cursor = ResumeCursor::new();
        cursor.seed(std::iter::empty());
        assert_eq!(cursor.last_seen_id(), None);

        let mut cursor = ResumeCursor::at(12);
        cursor.seed(Vec::new());
        assert_eq!(cursor.last_seen_id(), Some(12));
    }

    #[test]
    fn test_last_write_overwrites_downward() {
        let mut cursor = ResumeCursor::new();
        cursor.observe(9, CursorPolicy::LastWrite);
        cursor.observe(3, CursorPolicy::LastWrite);
        assert_eq!(cursor.last_seen_id(), Some(3));
    }

    #[test]
    fn test_monotonic_never_decreases() {
        let mut cursor = ResumeCursor::new();
        cursor.observe(9, CursorPolicy::Monotonic);
        cursor.observe(3, CursorPolicy::Monotonic);
        assert_eq!(cursor.last_seen_id(), Some(9));
        cursor.observe(11, CursorPolicy::Monotonic);
        assert_eq!(cursor.last_seen_id(), Some(11));
    }

    #[test]
    fn test_monotonic_from_unset() {
        let mut cursor = ResumeCursor::new();
        cursor.observe(4, CursorPolicy::Monotonic);
        assert_eq!(cursor.last_seen_id(), Some(4));
    }
}
