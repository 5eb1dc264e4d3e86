//! Similarity between task types, used for warm starts.

use serde::{Deserialize, Serialize};

use super::key::TaskType;

/// Symmetric similarity in [0, 1] between two task types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSimilarityEntry {
    pub task_a: TaskType,
    pub task_b: TaskType,
    pub similarity: f64,
}

impl TaskSimilarityEntry {
    /// Build an entry with the pair in canonical order and the value clamped.
    pub fn new(task_a: TaskType, task_b: TaskType, similarity: f64) -> Self {
        let (task_a, task_b) = if task_a <= task_b {
            (task_a, task_b)
        } else {
            (task_b, task_a)
        };
        let similarity = if similarity.is_finite() {
            similarity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            task_a,
            task_b,
            similarity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_is_canonical_and_clamped() {
        let entry = TaskSimilarityEntry::new("testing".into(), "bug_fix".into(), 1.7);
        assert_eq!(entry.task_a.as_str(), "bug_fix");
        assert_eq!(entry.task_b.as_str(), "testing");
        assert_eq!(entry.similarity, 1.0);

        let entry = TaskSimilarityEntry::new("a".into(), "b".into(), f64::NAN);
        assert_eq!(entry.similarity, 0.0);
    }
}
