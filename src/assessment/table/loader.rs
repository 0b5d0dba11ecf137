use super::{ReferenceTable, ScoreRule};
use crate::assessment::domain::Factor;
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, warn};

const JSON_ROOT_KEY: &str = "평가기준";

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("failed to read reference table: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid reference table CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid reference table JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("reference table JSON must be an array or an object with a '평가기준' array")]
    JsonShape,
    #[error("unsupported reference table format for '{0}' (expected .csv or .json)")]
    UnsupportedFormat(String),
    #[error("reference table unavailable from {source_name} after {attempts} attempts")]
    Unavailable { source_name: String, attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Json,
}

impl TableFormat {
    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("csv") => Ok(Self::Csv),
            Some("json") => Ok(Self::Json),
            _ => Err(TableError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRuleRow {
    #[serde(rename = "체력요인", default)]
    factor: String,
    #[serde(rename = "평가종목", default)]
    event: String,
    #[serde(rename = "학교과정", default)]
    school_stage: String,
    #[serde(rename = "학년", default)]
    grade_level: String,
    #[serde(rename = "성별", default)]
    sex: String,
    #[serde(rename = "기록", default)]
    record: String,
    #[serde(rename = "점수", default)]
    score: String,
    #[serde(rename = "등급", default)]
    grade: String,
}

impl RawRuleRow {
    fn into_rule(self, row: usize) -> Option<ScoreRule> {
        let Some(factor) = Factor::from_name(&self.factor) else {
            warn!(row, factor = %self.factor, "skipping reference row with unknown factor");
            return None;
        };

        Some(ScoreRule::new(
            factor,
            &self.event,
            &self.school_stage,
            &self.grade_level,
            &self.sex,
            &self.record,
            &self.score,
            &self.grade,
        ))
    }
}

impl ReferenceTable {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        let path = path.as_ref();
        let format = TableFormat::from_path(path)?;
        let file = File::open(path)?;
        match format {
            TableFormat::Csv => Self::from_csv_reader(file),
            TableFormat::Json => Self::from_json_reader(file),
        }
    }

    /// CSV with a Korean header row: `체력요인,평가종목,학교과정,학년,성별,기록,점수,등급`.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut rules = Vec::new();

        for (row, record) in csv_reader.deserialize::<RawRuleRow>().enumerate() {
            if let Some(rule) = record?.into_rule(row) {
                rules.push(rule);
            }
        }

        Ok(Self::new(rules))
    }

    /// Either a bare array of rows or `{"평가기준": [...]}`; numeric cells are accepted.
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let document: Value = serde_json::from_reader(reader)?;
        let rows = match document {
            Value::Array(rows) => rows,
            Value::Object(mut map) => match map.remove(JSON_ROOT_KEY) {
                Some(Value::Array(rows)) => rows,
                _ => return Err(TableError::JsonShape),
            },
            _ => return Err(TableError::JsonShape),
        };

        let mut rules = Vec::with_capacity(rows.len());
        for (row, value) in rows.into_iter().enumerate() {
            let raw: RawRuleRow = serde_json::from_value(stringify_cells(value))?;
            if let Some(rule) = raw.into_rule(row) {
                rules.push(rule);
            }
        }

        Ok(Self::new(rules))
    }
}

fn stringify_cells(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter_map(|(key, cell)| match cell {
                    Value::Null => None,
                    Value::Number(number) => Some((key, Value::String(number.to_string()))),
                    Value::Bool(flag) => Some((key, Value::String(flag.to_string()))),
                    other => Some((key, other)),
                })
                .collect(),
        ),
        other => other,
    }
}

/// Where the reference table comes from. `Ok(None)` means "not available yet".
pub trait TableSource {
    fn describe(&self) -> String;
    fn fetch(&self) -> Result<Option<ReferenceTable>, TableError>;
}

#[derive(Debug, Clone)]
pub struct FileTableSource {
    path: PathBuf,
}

impl FileTableSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TableSource for FileTableSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn fetch(&self) -> Result<Option<ReferenceTable>, TableError> {
        if !self.path.exists() {
            return Ok(None);
        }
        ReferenceTable::from_path(&self.path).map(Some)
    }
}

/// Bounded polling schedule for the initial table wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_millis(100),
        }
    }
}

/// Polls `source` until it yields a table. Parse failures abort immediately;
/// absence after the last attempt is fatal.
pub async fn wait_for_table<S>(source: &S, policy: RetryPolicy) -> Result<ReferenceTable, TableError>
where
    S: TableSource + ?Sized,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        if let Some(table) = source.fetch()? {
            return Ok(table);
        }
        debug!(attempt, source = %source.describe(), "reference table not available yet");
        if attempt < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    error!(attempts, source = %source.describe(), "reference table failed to load");
    Err(TableError::Unavailable {
        source_name: source.describe(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::domain::SessionContext;
    use crate::assessment::table::RuleKey;
    use std::cell::Cell;
    use std::io::Cursor;

    const CSV: &str = "체력요인,평가종목,학교과정,학년,성별,기록,점수,등급\n\
순발력, 50m달리기 ,중,1,남,8.0~9.0,3,3등급\n\
근력,악력,중,1,남,0~10,1,5등급\n";

    struct DelayedSource {
        ready_after: u32,
        calls: Cell<u32>,
    }

    impl TableSource for DelayedSource {
        fn describe(&self) -> String {
            "delayed".to_string()
        }

        fn fetch(&self) -> Result<Option<ReferenceTable>, TableError> {
            let calls = self.calls.get() + 1;
            self.calls.set(calls);
            if calls >= self.ready_after {
                ReferenceTable::from_csv_reader(Cursor::new(CSV)).map(Some)
            } else {
                Ok(None)
            }
        }
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn csv_rows_are_trimmed_and_unknown_factors_skipped() {
        let table = ReferenceTable::from_csv_reader(Cursor::new(CSV)).expect("csv parses");
        assert_eq!(table.len(), 1);

        let rule = &table.rules()[0];
        assert_eq!(rule.event, "50m달리기");
        assert_eq!(rule.score, 3);
        assert_eq!(rule.grade.label(), "3등급");

        let key = RuleKey::new(Factor::Power, "50m달리기", &SessionContext::new("중", "1", "남"));
        assert!(table.resolve(&key, 8.0).is_some());
    }

    #[test]
    fn json_accepts_wrapped_rows_with_numeric_cells() {
        let json = r#"{"평가기준": [
            {"체력요인": "비만", "평가종목": "체질량지수", "학교과정": "중", "학년": 1,
             "성별": "여", "기록": "18.5~22.9", "점수": 20, "등급": "1등급"},
            {"체력요인": "비만", "평가종목": "체질량지수", "학교과정": "중", "학년": "1",
             "성별": "여", "기록": "23.0~24.9", "점수": "15", "등급": null}
        ]}"#;

        let table = ReferenceTable::from_json_reader(Cursor::new(json)).expect("json parses");
        assert_eq!(table.len(), 2);
        assert_eq!(table.rules()[0].grade_level, "1");
        assert_eq!(table.rules()[0].score, 20);
        assert!(table.rules()[1].grade.is_unset());
    }

    #[test]
    fn json_rejects_unexpected_shape() {
        let error = ReferenceTable::from_json_reader(Cursor::new(r#"{"rules": []}"#))
            .expect_err("shape rejected");
        assert!(matches!(error, TableError::JsonShape));
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            TableFormat::from_path(Path::new("data/table.CSV")).expect("csv"),
            TableFormat::Csv
        );
        assert!(matches!(
            TableFormat::from_path(Path::new("table.xlsx")),
            Err(TableError::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn wait_for_table_retries_until_available() {
        let source = DelayedSource {
            ready_after: 3,
            calls: Cell::new(0),
        };

        let table = wait_for_table(&source, fast_policy(10))
            .await
            .expect("table loads");
        assert_eq!(table.len(), 1);
        assert_eq!(source.calls.get(), 3);
    }

    #[tokio::test]
    async fn wait_for_table_gives_up_after_bounded_attempts() {
        let source = DelayedSource {
            ready_after: u32::MAX,
            calls: Cell::new(0),
        };

        let error = wait_for_table(&source, fast_policy(4))
            .await
            .expect_err("gives up");
        assert!(matches!(error, TableError::Unavailable { attempts: 4, .. }));
        assert_eq!(source.calls.get(), 4);
    }

    #[tokio::test]
    async fn missing_file_is_reported_as_unavailable() {
        let source = FileTableSource::new("./does-not-exist.csv");
        let error = wait_for_table(&source, fast_policy(2))
            .await
            .expect_err("missing file");
        match error {
            TableError::Unavailable { source_name, .. } => {
                assert!(source_name.contains("does-not-exist"))
            }
            other => panic!("expected unavailable error, got {other:?}"),
        }
    }
}
