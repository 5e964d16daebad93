//! Per-area undo and redo stacks.
//!
//! Both stacks hold change ids, most recent last. The stack is only the
//! bookkeeping: callers peek, apply the change's effect, and only then
//! commit the move, so a failed apply leaves both stacks exactly as they
//! were.

use serde::{Deserialize, Serialize};
use territory_types::{ChangeId, UndoRedoStatus};

use crate::error::HistoryError;

/// Undo and redo stacks of one area.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoRedoStack {
    undo: Vec<ChangeId>,
    redo: Vec<ChangeId>,
}

impl UndoRedoStack {
    /// Empty stacks.
    pub const fn new() -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
        }
    }

    /// Rebuild from stored id lists (bottom first).
    pub const fn from_parts(undo: Vec<ChangeId>, redo: Vec<ChangeId>) -> Self {
        Self { undo, redo }
    }

    /// Undo stack, bottom first.
    pub fn undo_ids(&self) -> &[ChangeId] {
        &self.undo
    }

    /// Redo stack, bottom first.
    pub fn redo_ids(&self) -> &[ChangeId] {
        &self.redo
    }

    /// Record a new change: push it for undo and drop the redo history.
    pub fn push_new(&mut self, id: ChangeId) {
        self.undo.push(id);
        self.redo.clear();
    }

    /// The change the next undo would reverse.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::NoChangesToUndo`] when the stack is empty.
    pub fn peek_undo(&self) -> Result<ChangeId, HistoryError> {
        self.undo.last().copied().ok_or(HistoryError::NoChangesToUndo)
    }

    /// The change the next redo would re-apply.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::NoChangesToRedo`] when the stack is empty.
    pub fn peek_redo(&self) -> Result<ChangeId, HistoryError> {
        self.redo.last().copied().ok_or(HistoryError::NoChangesToRedo)
    }

    /// Move the top of the undo stack to the redo stack.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::NoChangesToUndo`] when the stack is empty.
    pub fn commit_undo(&mut self) -> Result<ChangeId, HistoryError> {
        let id = self.undo.pop().ok_or(HistoryError::NoChangesToUndo)?;
        self.redo.push(id);
        Ok(id)
    }

    /// Move the top of the redo stack to the undo stack.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::NoChangesToRedo`] when the stack is empty.
    pub fn commit_redo(&mut self) -> Result<ChangeId, HistoryError> {
        let id = self.redo.pop().ok_or(HistoryError::NoChangesToRedo)?;
        self.undo.push(id);
        Ok(id)
    }

    /// Empty both stacks.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Keep only ids matching the predicate, in both stacks.
    pub fn retain(&mut self, mut keep: impl FnMut(&ChangeId) -> bool) {
        self.undo.retain(|id| keep(id));
        self.redo.retain(|id| keep(id));
    }

    /// Whether both stacks are empty.
    pub fn is_empty(&self) -> bool {
        self.undo.is_empty() && self.redo.is_empty()
    }

    /// Availability summary.
    pub fn status(&self) -> UndoRedoStatus {
        UndoRedoStatus {
            can_undo: !self.undo.is_empty(),
            can_redo: !self.redo.is_empty(),
            undo_count: self.undo.len(),
            redo_count: self.redo.len(),
        }
    }

    /// Check the stacks against the undone flags of their records.
    ///
    /// `is_undone` looks up a change's flag and returns `None` when the
    /// record is missing. Every undo entry must be live, every redo entry
    /// undone, and no id may appear twice.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Inconsistent`] describing the first violation.
    pub fn verify(
        &self,
        mut is_undone: impl FnMut(ChangeId) -> Option<bool>,
    ) -> Result<(), HistoryError> {
        let mut seen = std::collections::BTreeSet::new();
        for (stack, expect_undone) in [(&self.undo, false), (&self.redo, true)] {
            for id in stack {
                if !seen.insert(*id) {
                    return Err(HistoryError::Inconsistent(format!(
                        "change {id} appears twice on the stacks"
                    )));
                }
                match is_undone(*id) {
                    None => {
                        return Err(HistoryError::Inconsistent(format!(
                            "stack references missing change {id}"
                        )));
                    }
                    Some(flag) if flag != expect_undone => {
                        return Err(HistoryError::Inconsistent(format!(
                            "change {id} has is_undone = {flag} but sits on the {} stack",
                            if expect_undone { "redo" } else { "undo" }
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_change_clears_redo() {
        let mut stack = UndoRedoStack::new();
        let first = ChangeId::new();
        stack.push_new(first);
        assert_eq!(stack.commit_undo().ok(), Some(first));
        assert_eq!(stack.status().redo_count, 1);

        stack.push_new(ChangeId::new());
        assert!(matches!(
            stack.peek_redo(),
            Err(HistoryError::NoChangesToRedo)
        ));
        assert_eq!(stack.status().undo_count, 1);
    }

    #[test]
    fn undo_and_redo_move_the_same_id() {
        let mut stack = UndoRedoStack::new();
        let a = ChangeId::new();
        let b = ChangeId::new();
        stack.push_new(a);
        stack.push_new(b);

        assert_eq!(stack.commit_undo().ok(), Some(b));
        assert_eq!(stack.commit_undo().ok(), Some(a));
        assert_eq!(stack.commit_redo().ok(), Some(a));
        assert_eq!(stack.undo_ids(), &[a]);
        assert_eq!(stack.redo_ids(), &[b]);
    }

    #[test]
    fn empty_stacks_report_errors() {
        let mut stack = UndoRedoStack::default();
        assert!(matches!(
            stack.commit_undo(),
            Err(HistoryError::NoChangesToUndo)
        ));
        assert!(matches!(
            stack.peek_redo(),
            Err(HistoryError::NoChangesToRedo)
        ));
        assert!(!stack.status().can_undo);
    }

    #[test]
    fn verify_catches_flag_mismatch() {
        let id = ChangeId::new();
        let stack = UndoRedoStack::from_parts(vec![id], vec![]);
        assert!(stack.verify(|_| Some(false)).is_ok());
        assert!(matches!(
            stack.verify(|_| Some(true)),
            Err(HistoryError::Inconsistent(_))
        ));
        assert!(stack.verify(|_| None).is_err());
    }

    #[test]
    fn verify_catches_duplicates() {
        let id = ChangeId::new();
        let stack = UndoRedoStack::from_parts(vec![id], vec![id]);
        assert!(stack.verify(|_| Some(false)).is_err());
    }
}
