use super::AppState;
use crate::assessment::{
    grade_factor, to_chart_value, tooltip, Calculator, Factor, FactorInput, FactorOutcome,
    Grade, MissingInput, ReferenceTable, RelayMessage, RelayReport, RuleKey, ScoreRule,
    SessionContext, SessionSnapshot,
};
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/paps/events", get(events_endpoint))
        .route("/api/v1/paps/ranges", get(ranges_endpoint))
        .route("/api/v1/paps/grade", post(grade_endpoint))
        .route("/api/v1/paps/session", post(session_endpoint))
        .route("/api/v1/paps/results", get(results_endpoint))
        .route("/api/v1/paps/results/next", get(next_results_endpoint))
        .with_state(state)
}

/// A record arrives either as a JSON number or as the raw text a user typed.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RecordValue {
    Number(f64),
    Text(String),
}

impl RecordValue {
    fn into_text(self) -> String {
        match self {
            Self::Number(value) => value.to_string(),
            Self::Text(text) => text,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GradeRequest {
    #[serde(default, alias = "session_context")]
    session_context: SessionContext,
    factor: Factor,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    record: Option<RecordValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GradeResponse {
    pub(crate) factor: Factor,
    pub(crate) event: String,
    pub(crate) record: Option<f64>,
    pub(crate) state: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) missing: Vec<MissingInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) candidates: Option<usize>,
    pub(crate) score: i32,
    pub(crate) grade: Grade,
    pub(crate) chart_value: u8,
    pub(crate) tooltip: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FactorEntry {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    record: Option<RecordValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionRequest {
    #[serde(default, alias = "session_context")]
    session_context: SessionContext,
    #[serde(default)]
    factors: BTreeMap<Factor, FactorEntry>,
    #[serde(default)]
    publish: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionResponse {
    #[serde(flatten)]
    snapshot: SessionSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    relay: Option<RelayReport>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RangesQuery {
    factor: Factor,
    #[serde(default)]
    event: Option<String>,
    #[serde(default, alias = "school_stage")]
    school_stage: String,
    #[serde(default, alias = "grade_level")]
    grade_level: String,
    #[serde(default)]
    sex: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RangesResponse {
    factor: Factor,
    event: String,
    session_context: SessionContext,
    rules: Vec<ScoreRule>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventCatalogEntry {
    factor: Factor,
    slug: &'static str,
    events: &'static [&'static str],
    default_event: &'static str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NextResultsQuery {
    #[serde(default, alias = "timeout_ms")]
    timeout_ms: Option<u64>,
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready", "rules": state.table.len() })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub(crate) async fn events_endpoint() -> Json<Vec<EventCatalogEntry>> {
    let catalog = Factor::ordered()
        .into_iter()
        .map(|factor| EventCatalogEntry {
            factor,
            slug: factor.slug(),
            events: factor.events(),
            default_event: factor.default_event(),
        })
        .collect();
    Json(catalog)
}

pub(crate) async fn ranges_endpoint(
    State(state): State<AppState>,
    Query(query): Query<RangesQuery>,
) -> Json<RangesResponse> {
    let RangesQuery {
        factor,
        event,
        school_stage,
        grade_level,
        sex,
    } = query;

    let event = event.unwrap_or_else(|| factor.default_event().to_string());
    let context = SessionContext::new(school_stage, grade_level, sex);
    let key = RuleKey::new(factor, &event, &context);
    let rules: Vec<ScoreRule> = state.table.candidates(&key).cloned().collect();
    debug!(%factor, event = %key.event, rules = rules.len(), "range hint requested");

    Json(RangesResponse {
        factor,
        event: key.event,
        session_context: context,
        rules,
    })
}

pub(crate) async fn grade_endpoint(
    State(state): State<AppState>,
    Json(request): Json<GradeRequest>,
) -> Json<GradeResponse> {
    let GradeRequest {
        session_context,
        factor,
        event,
        record,
    } = request;

    let record = record.map(RecordValue::into_text).unwrap_or_default();
    Json(grade_single(
        &state.table,
        &session_context,
        factor,
        event,
        record,
    ))
}

/// Grades one factor outside of any session; nothing is relayed.
pub(crate) fn grade_single(
    table: &ReferenceTable,
    context: &SessionContext,
    factor: Factor,
    event: Option<String>,
    record: String,
) -> GradeResponse {
    let event = event.unwrap_or_else(|| factor.default_event().to_string());
    let input = FactorInput::new(event, record);
    let outcome = grade_factor(table, context, factor, &input);
    let result = outcome.result();
    let candidates = match &outcome {
        FactorOutcome::Unmatched { candidates } => Some(*candidates),
        _ => None,
    };

    GradeResponse {
        factor,
        event: input.event.trim().to_string(),
        record: input.parsed_record(),
        state: outcome.state_label(),
        missing: outcome.missing().to_vec(),
        candidates,
        score: result.score(),
        chart_value: to_chart_value(result.grade()),
        tooltip: tooltip(&result),
        grade: result.grade().clone(),
    }
}

/// Replays the request as one session and relays the final state at most once.
pub(crate) async fn session_endpoint(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Json<SessionResponse> {
    let SessionRequest {
        session_context,
        factors,
        publish,
    } = request;

    let mut calculator = Calculator::new(state.table.clone());
    calculator.set_context(session_context);
    for (factor, entry) in factors {
        if let Some(event) = entry.event {
            calculator.select_event(factor, event);
        }
        if let Some(record) = entry.record {
            calculator.enter_record(factor, record.into_text());
        }
    }

    let mut calculator = calculator.with_relay(state.relay.clone());
    let relay = if publish || calculator.total().total_score > 0 {
        calculator.publish().cloned()
    } else {
        None
    };

    let snapshot = calculator.snapshot();
    info!(
        total_score = snapshot.total.total_score,
        total_grade = %snapshot.total.total_grade,
        relayed = relay.is_some(),
        "session graded"
    );

    Json(SessionResponse { snapshot, relay })
}

pub(crate) async fn results_endpoint(State(state): State<AppState>) -> Result<Response, AppError> {
    let snapshot = state.shared.snapshot()?;
    Ok(Json(snapshot).into_response())
}

/// Long-polls the message port; 204 when nothing arrives before the timeout.
pub(crate) async fn next_results_endpoint(
    State(state): State<AppState>,
    Query(query): Query<NextResultsQuery>,
) -> Result<Response, AppError> {
    let mut receiver = state.port.subscribe();
    let wait = query
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(state.poll_timeout);

    match tokio::time::timeout(wait, receiver.recv()).await {
        Ok(Ok(message)) => Ok(Json(message).into_response()),
        Ok(Err(RecvError::Lagged(skipped))) => {
            debug!(skipped, "results listener lagged; serving latest shared results");
            let latest = state.shared.snapshot()?.latest;
            Ok(match latest {
                Some(payload) => Json(RelayMessage::Results(payload)).into_response(),
                None => StatusCode::NO_CONTENT.into_response(),
            })
        }
        Ok(Err(RecvError::Closed)) | Err(_) => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}
