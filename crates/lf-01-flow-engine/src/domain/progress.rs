//! # Progress Tracking
//!
//! A tree of named steps per flow. Sub-flow trackers hang under the step the
//! parent was on when it started the sub-flow. Purely advisory: nothing in
//! the engine reads it back to make a decision.

use serde::{Deserialize, Serialize};
use shared_types::FlowId;

/// One step and, if a sub-flow ran during it, that sub-flow's steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStep {
    pub label: String,
    pub child: Option<ProgressTracker>,
}

/// Ordered steps of one flow frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressTracker {
    steps: Vec<ProgressStep>,
    current: Option<usize>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to `label`, appending it if the flow has not been there before.
    pub fn set_current(&mut self, label: &str) {
        let index = match self.steps.iter().position(|s| s.label == label) {
            Some(index) => index,
            None => {
                self.steps.push(ProgressStep {
                    label: label.to_string(),
                    child: None,
                });
                self.steps.len() - 1
            }
        };
        self.current = Some(index);
    }

    pub fn current(&self) -> Option<&str> {
        self.current
            .and_then(|i| self.steps.get(i))
            .map(|s| s.label.as_str())
    }

    pub fn steps(&self) -> &[ProgressStep] {
        &self.steps
    }

    /// Nest a finished sub-flow's tracker under the current step.
    pub fn attach_child(&mut self, child: ProgressTracker) {
        if child.steps.is_empty() {
            return;
        }
        if let Some(step) = self.current.and_then(|i| self.steps.get_mut(i)) {
            step.child = Some(child);
        }
    }

    /// Depth-first `(depth, label)` listing of the whole tree.
    pub fn flatten(&self) -> Vec<(usize, String)> {
        let mut out = Vec::new();
        self.flatten_into(0, &mut out);
        out
    }

    fn flatten_into(&self, depth: usize, out: &mut Vec<(usize, String)>) {
        for step in &self.steps {
            out.push((depth, step.label.clone()));
            if let Some(child) = &step.child {
                child.flatten_into(depth + 1, out);
            }
        }
    }
}

/// Published on a flow's progress feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The flow entered a step. `path` holds the current step of each
    /// enclosing frame, outermost first, ending with the new step.
    Step { flow_id: FlowId, path: Vec<String> },
    Finished { flow_id: FlowId, success: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_are_appended_once() {
        let mut tracker = ProgressTracker::new();
        tracker.set_current("Signing");
        tracker.set_current("Notarising");
        tracker.set_current("Signing");
        assert_eq!(tracker.steps().len(), 2);
        assert_eq!(tracker.current(), Some("Signing"));
    }

    #[test]
    fn test_child_nests_under_current_step() {
        let mut parent = ProgressTracker::new();
        parent.set_current("Building");
        parent.set_current("Notarising");

        let mut child = ProgressTracker::new();
        child.set_current("Requesting signature");
        child.set_current("Validating response");
        parent.attach_child(child);

        assert_eq!(
            parent.flatten(),
            vec![
                (0, "Building".to_string()),
                (0, "Notarising".to_string()),
                (1, "Requesting signature".to_string()),
                (1, "Validating response".to_string()),
            ]
        );
    }
}
