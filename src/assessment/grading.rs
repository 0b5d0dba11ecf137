use super::domain::{Factor, FactorResult, Grade, SessionContext};
use super::table::{leading_number, ReferenceTable, RuleKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Raw inputs for one factor as entered by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorInput {
    pub event: String,
    pub record: String,
}

impl FactorInput {
    pub fn new(event: impl Into<String>, record: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            record: record.into(),
        }
    }

    pub fn parsed_record(&self) -> Option<f64> {
        parse_record(&self.record)
    }
}

/// Leading numeric prefix of the entry (`"8.5초"` is 8.5); `None` when there is none.
pub fn parse_record(raw: &str) -> Option<f64> {
    leading_number(raw)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingInput {
    SchoolStage,
    GradeLevel,
    Sex,
    Event,
    Record,
    NonNumericRecord,
}

/// Grading state for one factor. Incomplete and unmatched both project to
/// [`FactorResult::Unset`] but stay distinct for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum FactorOutcome {
    Incomplete { missing: Vec<MissingInput> },
    Unmatched { candidates: usize },
    Resolved { score: i32, grade: Grade },
}

impl Default for FactorOutcome {
    fn default() -> Self {
        Self::Incomplete {
            missing: vec![MissingInput::Record],
        }
    }
}

impl FactorOutcome {
    pub fn result(&self) -> FactorResult {
        match self {
            Self::Incomplete { .. } | Self::Unmatched { .. } => FactorResult::Unset,
            Self::Resolved { score, grade } => FactorResult::Resolved {
                score: *score,
                grade: grade.clone(),
            },
        }
    }

    pub const fn state_label(&self) -> &'static str {
        match self {
            Self::Incomplete { .. } => "incomplete",
            Self::Unmatched { .. } => "unmatched",
            Self::Resolved { .. } => "resolved",
        }
    }

    pub fn missing(&self) -> &[MissingInput] {
        match self {
            Self::Incomplete { missing } => missing,
            _ => &[],
        }
    }
}

fn missing_inputs(context: &SessionContext, input: &FactorInput) -> Vec<MissingInput> {
    let mut missing = Vec::new();
    if context.school_stage.trim().is_empty() {
        missing.push(MissingInput::SchoolStage);
    }
    if context.grade_level.trim().is_empty() {
        missing.push(MissingInput::GradeLevel);
    }
    if context.sex.trim().is_empty() {
        missing.push(MissingInput::Sex);
    }
    if input.event.trim().is_empty() {
        missing.push(MissingInput::Event);
    }
    if input.record.trim().is_empty() {
        missing.push(MissingInput::Record);
    } else if input.parsed_record().is_none() {
        missing.push(MissingInput::NonNumericRecord);
    }
    missing
}

/// Grades one factor against the table. Never fails: every miss degrades to an
/// unset outcome.
pub fn grade_factor(
    table: &ReferenceTable,
    context: &SessionContext,
    factor: Factor,
    input: &FactorInput,
) -> FactorOutcome {
    let missing = missing_inputs(context, input);
    let record = match input.parsed_record() {
        Some(record) if missing.is_empty() => record,
        _ => {
            debug!(%factor, ?missing, "factor inputs incomplete");
            return FactorOutcome::Incomplete { missing };
        }
    };

    let key = RuleKey::new(factor, &input.event, context);
    if let Some(rule) = table.resolve(&key, record) {
        debug!(%factor, event = %key.event, record, score = rule.score, grade = %rule.grade, "factor graded");
        return FactorOutcome::Resolved {
            score: rule.score,
            grade: rule.grade.clone(),
        };
    }

    let ranges: Vec<&str> = table
        .candidates(&key)
        .map(|rule| rule.record_range.as_str())
        .collect();
    warn!(
        %factor,
        event = %key.event,
        record,
        candidates = ranges.len(),
        "no reference rule matches the record"
    );
    debug!(%factor, ?ranges, "candidate ranges for unmatched record");

    FactorOutcome::Unmatched {
        candidates: ranges.len(),
    }
}
