mod loader;
mod range;

pub use loader::{wait_for_table, FileTableSource, RetryPolicy, TableError, TableFormat, TableSource};
pub use range::{in_range, leading_number, RecordRange};

use super::domain::{Factor, Grade, SessionContext};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

/// One row of the reference table, normalised at load time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRule {
    pub factor: Factor,
    pub event: String,
    pub school_stage: String,
    pub grade_level: String,
    pub sex: String,
    pub record_range: String,
    #[serde(skip)]
    pub range: Option<RecordRange>,
    pub score: i32,
    pub grade: Grade,
}

impl ScoreRule {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factor: Factor,
        event: &str,
        school_stage: &str,
        grade_level: &str,
        sex: &str,
        record_range: &str,
        score: &str,
        grade: &str,
    ) -> Self {
        let record_range = record_range.trim().to_string();
        Self {
            factor,
            event: event.trim().to_string(),
            school_stage: school_stage.trim().to_string(),
            grade_level: grade_level.trim().to_string(),
            sex: sex.trim().to_string(),
            range: RecordRange::parse(&record_range),
            record_range,
            score: parse_score(score),
            grade: Grade::from_label(grade),
        }
    }

    pub fn matches_key(&self, key: &RuleKey) -> bool {
        self.factor == key.factor
            && self.event == key.event
            && self.school_stage == key.school_stage
            && self.grade_level == key.grade_level
            && self.sex == key.sex
    }

    pub fn matches(&self, key: &RuleKey, record: f64) -> bool {
        self.matches_key(key) && self.range.is_some_and(|range| range.contains(record))
    }

    fn key(&self) -> (Factor, &str, &str, &str, &str) {
        (
            self.factor,
            &self.event,
            &self.school_stage,
            &self.grade_level,
            &self.sex,
        )
    }
}

/// Leading-integer parse: `"3"`, `"3점"` and `"3.7"` all yield 3; anything else 0.
fn parse_score(raw: &str) -> i32 {
    let trimmed = raw.trim();
    let (sign, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits: String = body.chars().take_while(char::is_ascii_digit).collect();
    digits.parse::<i32>().map(|value| sign * value).unwrap_or(0)
}

/// Full categorical lookup key for one factor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleKey {
    pub factor: Factor,
    pub event: String,
    pub school_stage: String,
    pub grade_level: String,
    pub sex: String,
}

impl RuleKey {
    pub fn new(factor: Factor, event: &str, context: &SessionContext) -> Self {
        Self {
            factor,
            event: event.trim().to_string(),
            school_stage: context.school_stage.trim().to_string(),
            grade_level: context.grade_level.trim().to_string(),
            sex: context.sex.trim().to_string(),
        }
    }
}

/// Pair of table rows (zero-based, table order) whose ranges overlap under the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleOverlap {
    pub first: usize,
    pub second: usize,
}

/// Immutable, ordered collection of scoring rules.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    rules: Vec<ScoreRule>,
}

impl ReferenceTable {
    pub fn new(rules: Vec<ScoreRule>) -> Self {
        let table = Self { rules };

        for (index, rule) in table.malformed_ranges() {
            warn!(
                row = index,
                factor = %rule.factor,
                event = %rule.event,
                range = %rule.record_range,
                "reference rule has an unparseable record range and will never match"
            );
        }

        for overlap in table.overlaps() {
            let first = &table.rules[overlap.first];
            let second = &table.rules[overlap.second];
            warn!(
                first_row = overlap.first,
                second_row = overlap.second,
                factor = %first.factor,
                event = %first.event,
                first_range = %first.record_range,
                second_range = %second.record_range,
                "overlapping reference rules; the earlier row wins"
            );
        }

        info!(rules = table.rules.len(), "reference table ready");
        table
    }

    pub fn rules(&self) -> &[ScoreRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule in table order matching the key and containing the record.
    pub fn resolve(&self, key: &RuleKey, record: f64) -> Option<&ScoreRule> {
        self.rules.iter().find(|rule| rule.matches(key, record))
    }

    /// Every rule sharing the categorical key, regardless of record.
    pub fn candidates<'a>(&'a self, key: &'a RuleKey) -> impl Iterator<Item = &'a ScoreRule> + 'a {
        self.rules.iter().filter(move |rule| rule.matches_key(key))
    }

    pub fn malformed_ranges(&self) -> impl Iterator<Item = (usize, &ScoreRule)> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.range.is_none())
    }

    pub fn overlaps(&self) -> Vec<RuleOverlap> {
        let mut groups: HashMap<(Factor, &str, &str, &str, &str), Vec<usize>> = HashMap::new();
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.range.is_some() {
                groups.entry(rule.key()).or_default().push(index);
            }
        }

        let mut overlaps = Vec::new();
        for rows in groups.values() {
            for (position, &first) in rows.iter().enumerate() {
                for &second in &rows[position + 1..] {
                    let (Some(a), Some(b)) = (self.rules[first].range, self.rules[second].range)
                    else {
                        continue;
                    };
                    if a.overlaps(&b) {
                        overlaps.push(RuleOverlap { first, second });
                    }
                }
            }
        }

        overlaps.sort_by_key(|overlap| (overlap.first, overlap.second));
        overlaps
    }
}
