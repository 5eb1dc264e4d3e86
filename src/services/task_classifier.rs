//! Keyword-based task classification.
//!
//! Maps a free-text description plus file hints onto one of the task-type
//! labels. Each label owns a keyword vocabulary; matches are counted on word
//! boundaries and file hints add fixed boosts. The winning label must hold at
//! least `confidence_floor` of the total score, otherwise the request is
//! classified as `general`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ClassifierConfig, TaskType};

/// Score added to a label for each file hint that points at it.
const FILE_HINT_BOOST: f64 = 1.5;

/// Result of classifying one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub task_type: TaskType,
    /// Share of the total keyword score held by the winning label.
    pub confidence: f64,
    /// True when the request fell back to `general`.
    pub ambiguous: bool,
}

/// Classifies task descriptions into task-type labels.
#[derive(Debug, Clone)]
pub struct TaskClassifier {
    vocabulary: Vec<(TaskType, Vec<String>)>,
    confidence_floor: f64,
}

impl Default for TaskClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

fn builtin_keywords(label: &str) -> &'static [&'static str] {
    match label {
        TaskType::CODE_GENERATION => &[
            "implement", "create", "add", "build", "write", "generate", "new feature", "scaffold",
            "endpoint", "function",
        ],
        TaskType::BUG_FIX => &[
            "fix", "bug", "error", "crash", "broken", "issue", "regression", "panic", "fails",
            "failing", "exception",
        ],
        TaskType::REFACTORING => &[
            "refactor", "restructure", "clean up", "cleanup", "rename", "extract", "simplify",
            "reorganize", "deduplicate",
        ],
        TaskType::TESTING => &[
            "test", "tests", "unit test", "integration test", "coverage", "assert", "mock",
            "fixture", "spec",
        ],
        TaskType::DOCUMENTATION => &[
            "document", "documentation", "docs", "readme", "docstring", "comment", "comments",
            "changelog", "guide",
        ],
        TaskType::CODE_REVIEW => &[
            "review", "audit code", "feedback", "pull request", "pr", "code review", "critique",
        ],
        TaskType::ARCHITECTURE => &[
            "architecture", "design", "architect", "module boundaries", "system design",
            "interface", "layering", "migration plan",
        ],
        TaskType::PERFORMANCE => &[
            "performance", "optimize", "optimise", "slow", "latency", "throughput", "benchmark",
            "profile", "memory usage", "faster",
        ],
        TaskType::SECURITY => &[
            "security", "vulnerability", "cve", "auth", "authentication", "authorization",
            "injection", "xss", "secret", "encrypt", "sanitize",
        ],
        TaskType::DEVOPS => &[
            "deploy", "deployment", "ci", "pipeline", "docker", "kubernetes", "k8s", "terraform",
            "helm", "github actions", "infrastructure", "release",
        ],
        _ => &[],
    }
}

/// Lowercase word tokens joined by single spaces, padded on both ends so
/// that phrase lookups match on word boundaries.
fn normalize(text: &str) -> String {
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!(" {} ", tokens.join(" "))
}

/// Labels a single file hint points at.
fn hint_labels(hint: &str) -> Vec<&'static str> {
    let lower = hint.to_lowercase();
    let file_name = lower.rsplit('/').next().unwrap_or(&lower);
    let mut labels = Vec::new();

    if lower.contains("/tests/")
        || lower.starts_with("tests/")
        || file_name.contains("_test.")
        || file_name.contains(".test.")
        || file_name.contains(".spec.")
        || file_name.starts_with("test_")
    {
        labels.push(TaskType::TESTING);
    }
    if file_name.ends_with(".md") || file_name.ends_with(".rst") || lower.starts_with("docs/") {
        labels.push(TaskType::DOCUMENTATION);
    }
    if file_name == "dockerfile"
        || file_name.ends_with(".tf")
        || lower.contains(".github/workflows")
        || file_name.starts_with("docker-compose")
        || lower.contains("/helm/")
    {
        labels.push(TaskType::DEVOPS);
    }
    if file_name.contains("bench") {
        labels.push(TaskType::PERFORMANCE);
    }
    labels
}

impl TaskClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        let mut vocabulary: Vec<(TaskType, Vec<String>)> = TaskType::BUILTIN
            .iter()
            .filter(|label| **label != TaskType::GENERAL)
            .map(|label| {
                let words = builtin_keywords(label)
                    .iter()
                    .map(|k| normalize(k))
                    .collect();
                (TaskType::from(*label), words)
            })
            .collect();

        for (label, extra) in &config.extra_keywords {
            let normalized: Vec<String> = extra.iter().map(|k| normalize(k)).collect();
            match vocabulary.iter_mut().find(|(t, _)| t.as_str() == label) {
                Some((_, words)) => words.extend(normalized),
                None => vocabulary.push((TaskType::new(label.clone()), normalized)),
            }
        }

        Self {
            vocabulary,
            confidence_floor: config.confidence_floor,
        }
    }

    /// All labels this classifier can produce, `general` included.
    pub fn labels(&self) -> Vec<TaskType> {
        let mut labels: Vec<TaskType> = self.vocabulary.iter().map(|(t, _)| t.clone()).collect();
        labels.push(TaskType::general());
        labels
    }

    /// Raw per-label scores in vocabulary order.
    pub fn scores(&self, description: &str, file_hints: &[String]) -> Vec<(TaskType, f64)> {
        let text = normalize(description);
        let hinted: Vec<&'static str> = file_hints.iter().flat_map(|h| hint_labels(h)).collect();

        self.vocabulary
            .iter()
            .map(|(label, words)| {
                let keyword_hits = words
                    .iter()
                    .filter(|w| !w.trim().is_empty() && text.contains(w.as_str()))
                    .count() as f64;
                let boost = hinted.iter().filter(|h| **h == label.as_str()).count() as f64
                    * FILE_HINT_BOOST;
                (label.clone(), keyword_hits + boost)
            })
            .collect()
    }

    /// Classify, reporting `ClassificationAmbiguous` when no label clears the
    /// confidence floor.
    pub fn try_classify(
        &self,
        description: &str,
        file_hints: &[String],
    ) -> DomainResult<Classification> {
        let scores = self.scores(description, file_hints);
        let total: f64 = scores.iter().map(|(_, s)| s).sum();

        // First label in vocabulary order wins ties.
        let mut best: Option<&(TaskType, f64)> = None;
        for candidate in &scores {
            if best.is_none_or(|b| candidate.1 > b.1) {
                best = Some(candidate);
            }
        }

        let (best_label, best_score) = match best {
            Some((label, score)) if *score > 0.0 => (label.clone(), *score),
            _ => {
                return Err(DomainError::ClassificationAmbiguous {
                    best_label: TaskType::GENERAL.to_string(),
                    confidence: 0.0,
                })
            }
        };

        let confidence = best_score / total;
        if confidence < self.confidence_floor {
            return Err(DomainError::ClassificationAmbiguous {
                best_label: best_label.to_string(),
                confidence,
            });
        }

        Ok(Classification {
            task_type: best_label,
            confidence,
            ambiguous: false,
        })
    }

    /// Classify, degrading to `general` on ambiguity.
    pub fn classify(&self, description: &str, file_hints: &[String]) -> Classification {
        match self.try_classify(description, file_hints) {
            Ok(classification) => classification,
            Err(err) => {
                let confidence = match &err {
                    DomainError::ClassificationAmbiguous { confidence, .. } => *confidence,
                    _ => 0.0,
                };
                debug!(error = %err, "Falling back to general task type");
                Classification {
                    task_type: TaskType::general(),
                    confidence,
                    ambiguous: true,
                }
            }
        }
    }
}
