use super::domain::{Factor, FactorResult, Grade};
use serde::Serialize;

const INVERSION_BASE: u8 = 6;

/// Radar-chart magnitude: grade 1 plots as 5, grade 5 as 1, unset as 0.
pub fn to_chart_value(grade: &Grade) -> u8 {
    match grade.ordinal() {
        Some(ordinal @ 1..=5) => INVERSION_BASE - ordinal,
        _ => 0,
    }
}

/// Axis tick text for a chart value.
pub fn tick_label(value: u8) -> String {
    format!("{}등급", INVERSION_BASE.saturating_sub(value))
}

pub fn tooltip(result: &FactorResult) -> String {
    let grade = result.grade();
    match grade.ordinal() {
        Some(ordinal) => format!("{ordinal}등급 ({}점)", result.score()),
        None => format!("{} ({}점)", grade.label(), result.score()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    pub factor: Factor,
    pub value: u8,
    pub tooltip: String,
}

/// One point per factor in [`Factor::ordered`] order.
pub fn chart_series<'a, F>(mut result_for: F) -> Vec<ChartPoint>
where
    F: FnMut(Factor) -> &'a FactorResult,
{
    Factor::ordered()
        .into_iter()
        .map(|factor| {
            let result = result_for(factor);
            ChartPoint {
                factor,
                value: to_chart_value(result.grade()),
                tooltip: tooltip(result),
            }
        })
        .collect()
}
