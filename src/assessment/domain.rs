use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The five fitness dimensions measured by a PAPS session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Factor {
    #[serde(rename = "심폐지구력", alias = "cardio_endurance")]
    CardioEndurance,
    #[serde(rename = "유연성", alias = "flexibility")]
    Flexibility,
    #[serde(rename = "근력근지구력", alias = "muscular_endurance")]
    MuscularEndurance,
    #[serde(rename = "순발력", alias = "power")]
    Power,
    #[serde(rename = "비만", alias = "body_composition")]
    BodyComposition,
}

impl Factor {
    pub const fn ordered() -> [Self; 5] {
        [
            Self::CardioEndurance,
            Self::Flexibility,
            Self::MuscularEndurance,
            Self::Power,
            Self::BodyComposition,
        ]
    }

    /// Position in [`Factor::ordered`].
    pub const fn index(self) -> usize {
        match self {
            Self::CardioEndurance => 0,
            Self::Flexibility => 1,
            Self::MuscularEndurance => 2,
            Self::Power => 3,
            Self::BodyComposition => 4,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::CardioEndurance => "심폐지구력",
            Self::Flexibility => "유연성",
            Self::MuscularEndurance => "근력근지구력",
            Self::Power => "순발력",
            Self::BodyComposition => "비만",
        }
    }

    pub const fn slug(self) -> &'static str {
        match self {
            Self::CardioEndurance => "cardio_endurance",
            Self::Flexibility => "flexibility",
            Self::MuscularEndurance => "muscular_endurance",
            Self::Power => "power",
            Self::BodyComposition => "body_composition",
        }
    }

    /// Test events administered for this factor, in selector order.
    pub const fn events(self) -> &'static [&'static str] {
        match self {
            Self::CardioEndurance => &["왕복오래달리기", "스텝검사", "오래달리기-걷기"],
            Self::Flexibility => &["앉아윗몸앞으로굽히기", "종합유연성검사"],
            Self::MuscularEndurance => &["(무릎대고)팔굽혀펴기", "윗몸말아올리기", "악력"],
            Self::Power => &["50m달리기", "제자리멀리뛰기"],
            Self::BodyComposition => &["체질량지수"],
        }
    }

    /// The event preselected when nothing has been chosen yet.
    pub const fn default_event(self) -> &'static str {
        self.events()[0]
    }

    pub fn from_name(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        Self::ordered()
            .into_iter()
            .find(|factor| factor.label() == trimmed || factor.slug().eq_ignore_ascii_case(trimmed))
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown fitness factor '{0}'")]
pub struct UnknownFactor(pub String);

impl FromStr for Factor {
    type Err = UnknownFactor;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_name(value).ok_or_else(|| UnknownFactor(value.trim().to_string()))
    }
}

/// The student's category shared by all five factors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    #[serde(default, alias = "school_stage")]
    pub school_stage: String,
    #[serde(default, alias = "grade_level")]
    pub grade_level: String,
    #[serde(default)]
    pub sex: String,
}

impl SessionContext {
    pub fn new(
        school_stage: impl Into<String>,
        grade_level: impl Into<String>,
        sex: impl Into<String>,
    ) -> Self {
        Self {
            school_stage: school_stage.into().trim().to_string(),
            grade_level: grade_level.into().trim().to_string(),
            sex: sex.into().trim().to_string(),
        }
    }
}

const UNSET_LABEL: &str = "-";

/// Per-factor grade label such as `3등급`, or the unset sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Grade {
    #[default]
    Unset,
    Label(String),
}

impl Grade {
    pub fn from_label(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == UNSET_LABEL {
            Self::Unset
        } else {
            Self::Label(trimmed.to_string())
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Unset => UNSET_LABEL,
            Self::Label(label) => label,
        }
    }

    /// Leading digit of the label, `1` being the best grade.
    pub fn ordinal(&self) -> Option<u8> {
        match self {
            Self::Unset => None,
            Self::Label(label) => label
                .chars()
                .next()
                .and_then(|c| c.to_digit(10))
                .map(|digit| digit as u8),
        }
    }
}

impl From<String> for Grade {
    fn from(value: String) -> Self {
        Self::from_label(&value)
    }
}

impl From<Grade> for String {
    fn from(value: Grade) -> Self {
        value.label().to_string()
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

static UNSET_GRADE: Grade = Grade::Unset;

/// Graded result for one factor; always replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FactorResult {
    #[default]
    Unset,
    Resolved { score: i32, grade: Grade },
}

impl FactorResult {
    pub fn score(&self) -> i32 {
        match self {
            Self::Unset => 0,
            Self::Resolved { score, .. } => *score,
        }
    }

    pub fn grade(&self) -> &Grade {
        match self {
            Self::Unset => &UNSET_GRADE,
            Self::Resolved { grade, .. } => grade,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }
}
