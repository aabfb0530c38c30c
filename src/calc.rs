mod aggregate;
mod grade;
mod rank;
mod report;
mod trend;

pub use aggregate::{aggregate, aggregate_class};
pub use grade::{grade, letters, Grade, GradeScale};
pub use rank::{rank, RankMode};
pub use report::{compose_report, StudentReport};
pub use trend::{attendance_adjustment, forecast, predict_next, Forecast};

use serde::{Deserialize, Serialize};
use std::fmt;

/// VB6-compatible 1-decimal rounding: `Int(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Chronological position of a grading period. Term 1 < Term 2 < Term 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Term(i64);

impl Term {
    pub fn new(index: i64) -> Option<Self> {
        if index >= 1 {
            Some(Self(index))
        } else {
            None
        }
    }

    pub fn index(self) -> i64 {
        self.0
    }

    /// Accepts `"Term 2"`, `"term2"`, `"T2"` and `"2"`.
    pub fn parse_label(raw: &str) -> Option<Self> {
        let t = raw.trim().to_ascii_lowercase();
        let digits = t
            .strip_prefix("term")
            .or_else(|| t.strip_prefix('t'))
            .unwrap_or(&t)
            .trim();
        digits.parse::<i64>().ok().and_then(Self::new)
    }

    pub fn from_json(v: &serde_json::Value) -> Option<Self> {
        if let Some(n) = v.as_i64() {
            return Self::new(n);
        }
        v.as_str().and_then(Self::parse_label)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Term {}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRecord {
    pub student_id: String,
    pub class_id: String,
    pub term: Term,
    pub subject: String,
    pub mark: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermResult {
    pub student_id: String,
    pub class_id: String,
    pub term: Term,
    pub total: f64,
    pub average: f64,
    pub subject_count: usize,
    pub grade: String,
    pub points: Option<u8>,
    pub rank: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student_id: String,
    pub class_id: String,
    pub term: Term,
    pub days_present: i64,
    pub total_days: i64,
}

impl AttendanceRecord {
    /// `None` when no school days were recorded for the term.
    pub fn percent(&self) -> Option<f64> {
        if self.total_days <= 0 {
            return None;
        }
        Some(100.0 * self.days_present as f64 / self.total_days as f64)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CalcError {
    #[error("no marks recorded for student {student_id} in {term}")]
    EmptyInput { student_id: String, term: Term },
    #[error("student not found: {0}")]
    StudentNotFound(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl CalcError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyInput { .. } => "empty_input",
            Self::StudentNotFound(_) => "not_found",
            Self::Store(_) => "db_query_failed",
        }
    }
}
