use super::domain::FactorResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Five total-grade bands derived from the summed score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TotalGrade {
    #[serde(rename = "1등급")]
    First,
    #[serde(rename = "2등급")]
    Second,
    #[serde(rename = "3등급")]
    Third,
    #[serde(rename = "4등급")]
    Fourth,
    #[serde(rename = "5등급")]
    Fifth,
}

impl TotalGrade {
    pub const fn label(self) -> &'static str {
        match self {
            Self::First => "1등급",
            Self::Second => "2등급",
            Self::Third => "3등급",
            Self::Fourth => "4등급",
            Self::Fifth => "5등급",
        }
    }

    pub const fn band(self) -> u8 {
        match self {
            Self::First => 1,
            Self::Second => 2,
            Self::Third => 3,
            Self::Fourth => 4,
            Self::Fifth => 5,
        }
    }
}

impl fmt::Display for TotalGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const BANDS: [(i32, TotalGrade); 4] = [
    (80, TotalGrade::First),
    (60, TotalGrade::Second),
    (40, TotalGrade::Third),
    (20, TotalGrade::Fourth),
];

/// Unset factors already carry a zero score.
pub fn total_score<'a, I>(results: I) -> i32
where
    I: IntoIterator<Item = &'a FactorResult>,
{
    results.into_iter().map(FactorResult::score).sum()
}

/// Thresholds are checked top-down; the number of answered factors is ignored.
pub fn band_grade(total_score: i32) -> TotalGrade {
    BANDS
        .iter()
        .find(|(threshold, _)| total_score >= *threshold)
        .map(|(_, grade)| *grade)
        .unwrap_or(TotalGrade::Fifth)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalResult {
    pub total_score: i32,
    pub total_grade: TotalGrade,
    pub answered_factors: usize,
}

impl TotalResult {
    pub fn from_results<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a FactorResult>,
    {
        let (total_score, answered_factors) = results
            .into_iter()
            .fold((0, 0), |(sum, answered), result| {
                (
                    sum + result.score(),
                    answered + usize::from(result.is_resolved()),
                )
            });

        Self {
            total_score,
            total_grade: band_grade(total_score),
            answered_factors,
        }
    }
}
