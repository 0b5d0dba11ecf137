use super::aggregate::TotalResult;
use super::domain::{Factor, FactorResult, Grade, SessionContext};
use super::grading::{grade_factor, FactorInput, FactorOutcome, MissingInput};
use super::projection::{chart_series, to_chart_value, tooltip, ChartPoint};
use super::relay::{FactorReport, Relay, RelayMessage, RelayReport, ResultsPayload};
use super::table::ReferenceTable;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// A user-facing change that triggers recomputation.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionChange {
    Context(SessionContext),
    Event { factor: Factor, event: String },
    Record { factor: Factor, record: String },
}

#[derive(Debug, Clone, Default)]
struct FactorSlot {
    input: FactorInput,
    outcome: FactorOutcome,
    result: FactorResult,
}

/// Owns one student's session: category, per-factor inputs and results.
#[derive(Debug, Clone)]
pub struct Calculator {
    table: Arc<ReferenceTable>,
    context: SessionContext,
    slots: [FactorSlot; 5],
    relay: Option<Arc<Relay>>,
    last_relay: Option<RelayReport>,
}

impl Calculator {
    pub fn new(table: Arc<ReferenceTable>) -> Self {
        let slots = Factor::ordered().map(|factor| FactorSlot {
            input: FactorInput::new(factor.default_event(), ""),
            ..FactorSlot::default()
        });

        Self {
            table,
            context: SessionContext::default(),
            slots,
            relay: None,
            last_relay: None,
        }
    }

    pub fn with_relay(mut self, relay: Arc<Relay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn input(&self, factor: Factor) -> &FactorInput {
        &self.slot(factor).input
    }

    pub fn outcome(&self, factor: Factor) -> &FactorOutcome {
        &self.slot(factor).outcome
    }

    pub fn result(&self, factor: Factor) -> &FactorResult {
        &self.slot(factor).result
    }

    pub fn last_relay(&self) -> Option<&RelayReport> {
        self.last_relay.as_ref()
    }

    pub fn apply(&mut self, change: SessionChange) {
        match change {
            SessionChange::Context(context) => self.set_context(context),
            SessionChange::Event { factor, event } => self.select_event(factor, event),
            SessionChange::Record { factor, record } => self.enter_record(factor, record),
        }
    }

    /// Resets every factor, then regrades all five against the new category.
    pub fn set_context(&mut self, context: SessionContext) {
        info!(
            school_stage = %context.school_stage,
            grade_level = %context.grade_level,
            sex = %context.sex,
            "session context changed"
        );
        self.context = context;
        for slot in &mut self.slots {
            slot.outcome = FactorOutcome::default();
            slot.result = FactorResult::Unset;
        }
        for factor in Factor::ordered() {
            self.regrade(factor);
        }
        self.after_recompute();
    }

    pub fn select_event(&mut self, factor: Factor, event: impl Into<String>) {
        self.slot_mut(factor).input.event = event.into();
        self.regrade(factor);
        self.after_recompute();
    }

    pub fn enter_record(&mut self, factor: Factor, record: impl Into<String>) {
        self.slot_mut(factor).input.record = record.into();
        self.regrade(factor);
        self.after_recompute();
    }

    pub fn total(&self) -> TotalResult {
        TotalResult::from_results(self.slots.iter().map(|slot| &slot.result))
    }

    pub fn chart(&self) -> Vec<ChartPoint> {
        chart_series(|factor| self.result(factor))
    }

    pub fn results_payload(&self) -> ResultsPayload {
        let total = self.total();
        let per_factor = self
            .factor_slots()
            .map(|(factor, slot)| {
                let report = FactorReport {
                    score: slot.result.score(),
                    grade: slot.result.grade().clone(),
                    record: slot.input.parsed_record(),
                    event: slot.input.event.trim().to_string(),
                };
                (factor, report)
            })
            .collect();

        ResultsPayload {
            session_context: self.context.clone(),
            per_factor,
            total_score: total.total_score,
            total_grade: total.total_grade,
        }
    }

    pub fn results_message(&self) -> RelayMessage {
        RelayMessage::Results(self.results_payload())
    }

    /// Delivers the current results regardless of score.
    pub fn publish(&mut self) -> Option<&RelayReport> {
        let relay = self.relay.clone()?;
        let report = relay.deliver(&self.results_payload());
        self.last_relay = Some(report);
        self.last_relay.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let factors = self
            .factor_slots()
            .map(|(factor, slot)| FactorView {
                factor,
                event: slot.input.event.clone(),
                record: slot.input.parsed_record(),
                state: slot.outcome.state_label(),
                missing: slot.outcome.missing().to_vec(),
                score: slot.result.score(),
                grade: slot.result.grade().clone(),
                chart_value: to_chart_value(slot.result.grade()),
                tooltip: tooltip(&slot.result),
            })
            .collect();

        SessionSnapshot {
            session_context: self.context.clone(),
            factors,
            chart: self.chart(),
            total: self.total(),
        }
    }

    fn regrade(&mut self, factor: Factor) {
        let outcome = grade_factor(&self.table, &self.context, factor, &self.slot(factor).input);
        let slot = self.slot_mut(factor);
        slot.result = outcome.result();
        slot.outcome = outcome;
    }

    fn after_recompute(&mut self) {
        let total = self.total();
        debug!(
            total_score = total.total_score,
            total_grade = %total.total_grade,
            answered = total.answered_factors,
            "session totals recomputed"
        );
        if total.total_score > 0 {
            self.publish();
        }
    }

    fn slot(&self, factor: Factor) -> &FactorSlot {
        &self.slots[factor.index()]
    }

    fn slot_mut(&mut self, factor: Factor) -> &mut FactorSlot {
        &mut self.slots[factor.index()]
    }

    fn factor_slots(&self) -> impl Iterator<Item = (Factor, &FactorSlot)> {
        Factor::ordered().into_iter().zip(self.slots.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorView {
    pub factor: Factor,
    pub event: String,
    pub record: Option<f64>,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<MissingInput>,
    pub score: i32,
    pub grade: Grade,
    pub chart_value: u8,
    pub tooltip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_context: SessionContext,
    pub factors: Vec<FactorView>,
    pub chart: Vec<ChartPoint>,
    pub total: TotalResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::aggregate::TotalGrade;
    use crate::assessment::relay::{
        BroadcastPort, InMemoryStore, KeyValueStore, RelayTarget, RESULTS_KEY,
    };
    use tokio::sync::broadcast::error::TryRecvError;
    use crate::assessment::table::ScoreRule;

    fn table() -> Arc<ReferenceTable> {
        Arc::new(ReferenceTable::new(vec![
            ScoreRule::new(Factor::Power, "50m달리기", "중", "1", "남", "8.0~9.0", "3", "3등급"),
            ScoreRule::new(Factor::Power, "50m달리기", "중", "1", "여", "8.0~9.0", "4", "2등급"),
            ScoreRule::new(
                Factor::BodyComposition,
                "체질량지수",
                "중",
                "1",
                "남",
                "18.5~22.9",
                "20",
                "1등급",
            ),
        ]))
    }

    #[test]
    fn new_session_starts_unset_with_default_events() {
        let calculator = Calculator::new(table());

        for factor in Factor::ordered() {
            assert_eq!(calculator.result(factor), &FactorResult::Unset);
            assert_eq!(calculator.input(factor).event, factor.default_event());
        }
        assert_eq!(calculator.total().total_score, 0);
        assert_eq!(calculator.total().total_grade, TotalGrade::Fifth);
    }

    #[test]
    fn end_to_end_single_factor_scenario() {
        let mut calculator = Calculator::new(table());
        calculator.set_context(SessionContext::new("중", "1", "남"));
        calculator.select_event(Factor::Power, "50m달리기");
        calculator.enter_record(Factor::Power, "8.5");

        assert_eq!(
            calculator.result(Factor::Power),
            &FactorResult::Resolved {
                score: 3,
                grade: Grade::from_label("3등급")
            }
        );
        let total = calculator.total();
        assert_eq!(total.total_score, 3);
        assert_eq!(total.total_grade, TotalGrade::Fifth);

        let chart: Vec<u8> = calculator.chart().iter().map(|point| point.value).collect();
        assert_eq!(chart, vec![0, 0, 0, 3, 0]);
    }

    #[test]
    fn context_change_regrades_every_factor() {
        let mut calculator = Calculator::new(table());
        calculator.set_context(SessionContext::new("중", "1", "남"));
        calculator.enter_record(Factor::Power, "8.5");
        calculator.enter_record(Factor::BodyComposition, "20.1");
        assert_eq!(calculator.total().total_score, 23);

        calculator.set_context(SessionContext::new("중", "1", "여"));

        assert_eq!(calculator.result(Factor::Power).score(), 4);
        assert_eq!(calculator.result(Factor::BodyComposition), &FactorResult::Unset);
        assert!(matches!(
            calculator.outcome(Factor::BodyComposition),
            FactorOutcome::Unmatched { candidates: 0 }
        ));
        assert_eq!(calculator.total().total_score, 4);
    }

    #[test]
    fn clearing_a_record_degrades_to_unset() {
        let mut calculator = Calculator::new(table());
        calculator.set_context(SessionContext::new("중", "1", "남"));
        calculator.enter_record(Factor::Power, "8.5");
        calculator.enter_record(Factor::Power, "");

        assert_eq!(calculator.result(Factor::Power), &FactorResult::Unset);
        assert_eq!(calculator.outcome(Factor::Power).missing(), &[MissingInput::Record]);
    }

    #[test]
    fn total_always_equals_sum_of_factor_scores() {
        let mut calculator = Calculator::new(table());
        let changes = vec![
            SessionChange::Record {
                factor: Factor::Power,
                record: "8.2".to_string(),
            },
            SessionChange::Context(SessionContext::new("중", "1", "남")),
            SessionChange::Record {
                factor: Factor::BodyComposition,
                record: "19".to_string(),
            },
            SessionChange::Event {
                factor: Factor::Power,
                event: "제자리멀리뛰기".to_string(),
            },
            SessionChange::Event {
                factor: Factor::Power,
                event: "50m달리기".to_string(),
            },
        ];

        for change in changes {
            calculator.apply(change);
            let sum: i32 = Factor::ordered()
                .into_iter()
                .map(|factor| calculator.result(factor).score())
                .sum();
            assert_eq!(calculator.total().total_score, sum);
        }
        assert_eq!(calculator.total().total_score, 23);
    }

    #[test]
    fn relays_only_once_scored() {
        let store = InMemoryStore::default();
        let relay = Arc::new(Relay::new().with_local_store(Arc::new(store.clone())));
        let mut calculator = Calculator::new(table()).with_relay(relay);

        calculator.set_context(SessionContext::new("중", "1", "남"));
        assert!(calculator.last_relay().is_none());
        assert!(store.get_item(RESULTS_KEY).expect("read").is_none());

        calculator.enter_record(Factor::Power, "8.5");
        assert!(calculator.last_relay().is_some_and(RelayReport::is_clean));

        let stored: ResultsPayload =
            serde_json::from_str(&store.get_item(RESULTS_KEY).expect("read").expect("stored"))
                .expect("payload decodes");
        assert_eq!(stored.total_score, 3);
        assert_eq!(stored.per_factor[&Factor::Power].record, Some(8.5));
        assert_eq!(stored.per_factor[&Factor::Flexibility].event, "앉아윗몸앞으로굽히기");
    }

    #[test]
    fn context_change_relays_once_for_all_factors() {
        let port = BroadcastPort::new(16);
        let mut receiver = port.subscribe();
        let relay = Relay::new().with_target(RelayTarget::new("parent").with_port(Arc::new(port)));
        let mut calculator = Calculator::new(table()).with_relay(Arc::new(relay));

        calculator.set_context(SessionContext::new("중", "1", "남"));
        assert_eq!(receiver.try_recv().err(), Some(TryRecvError::Empty));

        calculator.enter_record(Factor::Power, "8.5");
        calculator.enter_record(Factor::BodyComposition, "20.1");
        for expected_total in [3, 23] {
            let RelayMessage::Results(payload) = receiver.try_recv().expect("record relayed");
            assert_eq!(payload.total_score, expected_total);
        }
        assert_eq!(receiver.try_recv().err(), Some(TryRecvError::Empty));

        calculator.set_context(SessionContext::new("중", "1", "여"));

        let RelayMessage::Results(payload) = receiver.try_recv().expect("context change relayed");
        assert_eq!(payload.total_score, 4);
        assert_eq!(payload.session_context.sex, "여");
        assert_eq!(payload.per_factor[&Factor::Power].score, 4);
        assert_eq!(payload.per_factor[&Factor::BodyComposition].score, 0);
        assert_eq!(receiver.try_recv().err(), Some(TryRecvError::Empty));
    }

    #[test]
    fn publish_without_relay_is_a_no_op() {
        let mut calculator = Calculator::new(table());
        assert!(calculator.publish().is_none());
    }

    #[test]
    fn snapshot_reports_states_and_chart_values() {
        let mut calculator = Calculator::new(table());
        calculator.set_context(SessionContext::new("중", "1", "남"));
        calculator.enter_record(Factor::BodyComposition, "21");
        calculator.enter_record(Factor::Power, "12");

        let snapshot = calculator.snapshot();
        let body = snapshot
            .factors
            .iter()
            .find(|view| view.factor == Factor::BodyComposition)
            .expect("body composition view");
        assert_eq!(body.state, "resolved");
        assert_eq!(body.chart_value, 5);
        assert_eq!(body.tooltip, "1등급 (20점)");

        let power = &snapshot.factors[3];
        assert_eq!(power.factor, Factor::Power);
        assert_eq!(power.state, "unmatched");
        assert_eq!(power.grade, Grade::Unset);
        assert_eq!(snapshot.total.total_grade, TotalGrade::Fourth);
    }
}
