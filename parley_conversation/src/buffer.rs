//! Ordered turn storage for one conversation.

use std::ops::Range;

use parley_core::Turn;

/// The turns of one conversation, oldest first.
///
/// Appends go to the end. The only other mutation is [`splice_middle`],
/// used by compaction, which replaces a range after turn 0 in one step.
///
/// [`splice_middle`]: ConversationBuffer::splice_middle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationBuffer {
    turns: Vec<Turn>,
}

impl ConversationBuffer {
    #[must_use]
    pub const fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Start a buffer whose turn 0 is `first`.
    #[must_use]
    pub fn with_first(first: Turn) -> Self {
        Self { turns: vec![first] }
    }

    #[must_use]
    pub const fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Owned, ordered copy of the buffer for sending.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    #[must_use]
    pub fn first(&self) -> Option<&Turn> {
        self.turns.first()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[must_use]
    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    /// Replace `range` with at most one turn. Turn 0 is never touched and
    /// retained turns keep their relative order.
    pub(crate) fn splice_middle(&mut self, range: Range<usize>, replacement: Option<Turn>) {
        debug_assert!(range.start >= 1 && range.end <= self.turns.len());
        let start = range.start.max(1);
        let end = range.end.min(self.turns.len());
        if start > end {
            return;
        }
        self.turns.splice(start..end, replacement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(count: usize) -> ConversationBuffer {
        let mut buffer = ConversationBuffer::with_first(Turn::assistant("greeting"));
        for i in 1..count {
            buffer.append(Turn::user(format!("turn {i}")));
        }
        buffer
    }

    #[test]
    fn append_keeps_order() {
        let buffer = numbered(4);
        let texts: Vec<&str> = buffer.turns().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["greeting", "turn 1", "turn 2", "turn 3"]);
    }

    #[test]
    fn snapshot_is_detached() {
        let mut buffer = numbered(2);
        let snapshot = buffer.snapshot();
        buffer.append(Turn::user("later"));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn splice_replaces_range_with_one_turn() {
        let mut buffer = numbered(6);
        buffer.splice_middle(1..4, Some(Turn::assistant("summary")));
        let texts: Vec<&str> = buffer.turns().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["greeting", "summary", "turn 4", "turn 5"]);
    }

    #[test]
    fn splice_without_replacement_drops_range() {
        let mut buffer = numbered(6);
        buffer.splice_middle(1..3, None);
        assert_eq!(buffer.first().map(|t| t.text.as_str()), Some("greeting"));
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.turns()[1].text, "turn 3");
    }
}
