//! PAPS grading engine: reference-table lookup, per-factor grading, totals,
//! chart projection, session control and result relay.

pub mod aggregate;
pub mod domain;
pub mod grading;
pub mod projection;
pub mod relay;
pub mod session;
pub mod table;

pub use aggregate::{band_grade, total_score, TotalGrade, TotalResult};
pub use domain::{Factor, FactorResult, Grade, SessionContext, UnknownFactor};
pub use grading::{grade_factor, parse_record, FactorInput, FactorOutcome, MissingInput};
pub use projection::{chart_series, tick_label, to_chart_value, tooltip, ChartPoint};
pub use relay::{
    BroadcastPort, DeliveryOutcome, FactorReport, InMemoryStore, JsonFileStore, KeyValueStore,
    MessagePort, Relay, RelayChannel, RelayError, RelayMessage, RelayReport, RelayTarget,
    ResultsPayload, SharedResults, SharedResultsState,
};
pub use session::{Calculator, FactorView, SessionChange, SessionSnapshot};
pub use table::{
    in_range, wait_for_table, FileTableSource, RecordRange, ReferenceTable, RetryPolicy, RuleKey,
    RuleOverlap, ScoreRule, TableError, TableSource,
};
