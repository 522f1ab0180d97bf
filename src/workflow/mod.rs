//! # Scripted Workflows
//!
//! A workflow is the ordered list of prompts the AI walks the caller through
//! (for example "confirm the pickup time", then "confirm the number of
//! passengers"). Workflows are looked up per call through a [`WorkflowProvider`]
//! and then sequenced by a [`WorkflowCursor`] owned by the call bridge.

pub mod catalog;

pub use catalog::{WorkflowCatalog, WorkflowProvider};

use serde::{Deserialize, Serialize};

/// One scripted prompt in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: u64,
    pub prompt_text: String,
}

impl WorkflowStep {
    #[cfg(test)]
    pub fn new(id: u64, prompt_text: impl Into<String>) -> Self {
        Self {
            id,
            prompt_text: prompt_text.into(),
        }
    }
}

/// Position within an ordered list of workflow steps.
///
/// The position always stays within `0..=len`: `len` means the workflow is
/// exhausted and further calls to [`advance`](Self::advance) are no-ops.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCursor {
    steps: Vec<WorkflowStep>,
    position: usize,
}

impl WorkflowCursor {
    pub fn new(steps: Vec<WorkflowStep>) -> Self {
        Self { steps, position: 0 }
    }

    /// The step at the current position, or `None` once exhausted.
    pub fn next_prompt(&self) -> Option<&WorkflowStep> {
        self.steps.get(self.position)
    }

    /// Move to the following step. Returns false if already exhausted.
    pub fn advance(&mut self) -> bool {
        if self.position < self.steps.len() {
            self.position += 1;
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    pub fn is_exhausted(&self) -> bool {
        self.position >= self.steps.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_walks_steps_in_order() {
        let mut cursor = WorkflowCursor::new(vec![
            WorkflowStep::new(1, "Q1"),
            WorkflowStep::new(2, "Q2"),
        ]);

        assert_eq!(cursor.next_prompt().map(|s| s.prompt_text.as_str()), Some("Q1"));
        assert!(cursor.advance());
        assert_eq!(cursor.next_prompt().map(|s| s.prompt_text.as_str()), Some("Q2"));
        assert!(cursor.advance());
        assert!(cursor.is_exhausted());
        assert!(cursor.next_prompt().is_none());
    }

    #[test]
    fn test_cursor_never_passes_end() {
        let mut cursor = WorkflowCursor::new(vec![WorkflowStep::new(1, "only")]);
        for _ in 0..5 {
            cursor.advance();
        }
        assert_eq!(cursor.position(), 1);
        assert_eq!(cursor.len(), 1);
    }

    #[test]
    fn test_empty_cursor_is_exhausted() {
        let mut cursor = WorkflowCursor::new(Vec::new());
        assert!(cursor.is_empty());
        assert!(cursor.is_exhausted());
        assert!(cursor.next_prompt().is_none());
        assert!(!cursor.advance());
        assert_eq!(cursor.position(), 0);
    }
}
