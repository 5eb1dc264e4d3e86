//! Context feature extraction for the contextual bandit.
//!
//! Layout (version 1, 16 dimensions):
//!
//! | index   | feature                                                     |
//! |---------|-------------------------------------------------------------|
//! | 0       | bias                                                        |
//! | 1       | complexity estimate in [0, 1]                               |
//! | 2..8    | file-type shares: rust, js/ts, python, go/java/c, docs, config |
//! | 8..13   | stack flags: frontend, backend/api, database, infra, ml/data |
//! | 13      | testing flag                                                |
//! | 14, 15  | sin and cos of the request's UTC time of day                |

use chrono::Timelike;
use std::f64::consts::TAU;

use crate::domain::models::TaskRequest;

pub const FEATURE_VERSION: u32 = 1;
pub const FEATURE_DIM: usize = 16;

const FILE_BUCKETS: [&[&str]; 6] = [
    &["rs"],
    &["js", "jsx", "ts", "tsx", "mjs", "cjs"],
    &["py", "pyi"],
    &["go", "java", "kt", "c", "h", "cc", "cpp", "hpp"],
    &["md", "rst", "txt", "adoc"],
    &["toml", "yaml", "yml", "json", "ini", "cfg", "env"],
];

const STACK_KEYWORDS: [&[&str]; 5] = [
    &["frontend", "react", "vue", "css", "html", "ui", "component", "tsx", "jsx"],
    &["api", "backend", "server", "endpoint", "rest", "grpc", "handler", "http"],
    &["database", "sql", "sqlite", "postgres", "query", "schema", "migration", "index"],
    &["docker", "kubernetes", "terraform", "deploy", "ci", "pipeline", "helm", "infra"],
    &["model", "training", "dataset", "pandas", "numpy", "tensor", "embedding", "ml"],
];

const TESTING_KEYWORDS: &[&str] = &["test", "tests", "testing", "coverage", "spec", "assert"];

const COMPLEX_KEYWORDS: &[&str] = &[
    "architecture",
    "redesign",
    "migrate",
    "migration",
    "distributed",
    "concurrency",
    "concurrent",
    "refactor",
    "security",
    "performance",
];

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn extension(hint: &str) -> Option<String> {
    let file_name = hint.rsplit('/').next()?;
    let (_, ext) = file_name.rsplit_once('.')?;
    Some(ext.to_lowercase())
}

/// Rough complexity estimate in [0, 1] from description length, the number of
/// files involved and a few complexity-laden keywords.
pub fn estimate_complexity(description: &str, file_hints: &[String]) -> f64 {
    let words = tokens(description);
    let length_part = (words.len() as f64 / 100.0).min(0.5);
    let files_part = (file_hints.len() as f64 / 10.0).min(0.3);
    let keyword_part = if words.iter().any(|w| COMPLEX_KEYWORDS.contains(&w.as_str())) {
        0.2
    } else {
        0.0
    };
    (length_part + files_part + keyword_part).clamp(0.0, 1.0)
}

/// Deterministic feature vector for a request.
pub fn extract_features(request: &TaskRequest) -> Vec<f64> {
    let mut x = vec![0.0; FEATURE_DIM];
    x[0] = 1.0;
    x[1] = estimate_complexity(&request.task_description, &request.file_hints);

    if !request.file_hints.is_empty() {
        let share = 1.0 / request.file_hints.len() as f64;
        for hint in &request.file_hints {
            let Some(ext) = extension(hint) else {
                continue;
            };
            if let Some(bucket) = FILE_BUCKETS
                .iter()
                .position(|exts| exts.contains(&ext.as_str()))
            {
                x[2 + bucket] += share;
            }
        }
    }

    let mut words = tokens(&request.task_description);
    for hint in &request.file_hints {
        words.extend(tokens(hint));
    }
    for (i, keywords) in STACK_KEYWORDS.iter().enumerate() {
        if words.iter().any(|w| keywords.contains(&w.as_str())) {
            x[8 + i] = 1.0;
        }
    }
    if words.iter().any(|w| TESTING_KEYWORDS.contains(&w.as_str())) {
        x[13] = 1.0;
    }

    let seconds = f64::from(request.requested_at.num_seconds_from_midnight());
    let angle = TAU * seconds / 86_400.0;
    x[14] = angle.sin();
    x[15] = angle.cos();
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn request(description: &str, hints: &[&str]) -> TaskRequest {
        TaskRequest::new("A", description)
            .with_file_hints(hints.iter().copied())
            .at(Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap())
    }

    #[test]
    fn test_vector_shape_and_bias() {
        let x = extract_features(&request("anything", &[]));
        assert_eq!(x.len(), FEATURE_DIM);
        assert_eq!(x[0], 1.0);
    }

    #[test]
    fn test_file_histogram_shares() {
        let x = extract_features(&request(
            "update",
            &["src/lib.rs", "src/main.rs", "README.md", "Makefile"],
        ));
        assert_eq!(x[2], 0.5);
        assert_eq!(x[6], 0.25);
        // Unknown extension contributes nothing.
        let histogram: f64 = x[2..8].iter().sum();
        assert!((histogram - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_stack_and_testing_flags() {
        let x = extract_features(&request(
            "add coverage for the sql query layer",
            &["tests/api.rs"],
        ));
        assert_eq!(x[9], 1.0, "backend flag from api hint");
        assert_eq!(x[10], 1.0, "database flag");
        assert_eq!(x[13], 1.0, "testing flag");
        assert_eq!(x[8], 0.0);
    }

    #[test]
    fn test_time_of_day_encoding() {
        // 06:00 UTC is a quarter of the day.
        let x = extract_features(&request("anything", &[]));
        assert!((x[14] - 1.0).abs() < 1e-12);
        assert!(x[15].abs() < 1e-12);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let req = request("refactor the concurrency model", &["src/a.rs"]);
        assert_eq!(extract_features(&req), extract_features(&req));
    }

    #[test]
    fn test_complexity_estimate_is_bounded() {
        let long = "word ".repeat(500) + "architecture";
        let hints: Vec<String> = (0..50).map(|i| format!("f{i}.rs")).collect();
        assert_eq!(estimate_complexity(&long, &hints), 1.0);
        assert_eq!(estimate_complexity("", &[]), 0.0);
    }
}
