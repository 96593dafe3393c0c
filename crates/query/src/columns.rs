//! Column allow-lists.
//!
//! Every column name spliced into SQL comes from here: either a variant of a
//! closed enum, or an [`Identifier`] that passed validation. Raw request
//! strings never reach the query text.

use std::fmt;
use std::sync::LazyLock;

use panorama_core::Error;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("identifier pattern is valid"));

/// A lowercase SQL identifier (table or value column name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
#[schemars(with = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn new(raw: impl Into<String>) -> Result<Self, Error> {
        let raw = raw.into();
        if IDENTIFIER_RE.is_match(&raw) {
            Ok(Self(raw))
        } else {
            Err(Error::InvalidInput(format!("not a valid identifier: {raw:?}")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for splicing into SQL.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identifier::new(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a long-form results table.
pub type TableName = Identifier;

/// Optional facility attributes an instance may enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FacilityColumn {
    FacilityName,
    FacilityType,
    FacilityOwnership,
    #[serde(rename = "facility_custom_1")]
    FacilityCustom1,
    #[serde(rename = "facility_custom_2")]
    FacilityCustom2,
    #[serde(rename = "facility_custom_3")]
    FacilityCustom3,
    #[serde(rename = "facility_custom_4")]
    FacilityCustom4,
    #[serde(rename = "facility_custom_5")]
    FacilityCustom5,
}

impl FacilityColumn {
    pub const ALL: [FacilityColumn; 8] = [
        FacilityColumn::FacilityName,
        FacilityColumn::FacilityType,
        FacilityColumn::FacilityOwnership,
        FacilityColumn::FacilityCustom1,
        FacilityColumn::FacilityCustom2,
        FacilityColumn::FacilityCustom3,
        FacilityColumn::FacilityCustom4,
        FacilityColumn::FacilityCustom5,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FacilityColumn::FacilityName => "facility_name",
            FacilityColumn::FacilityType => "facility_type",
            FacilityColumn::FacilityOwnership => "facility_ownership",
            FacilityColumn::FacilityCustom1 => "facility_custom_1",
            FacilityColumn::FacilityCustom2 => "facility_custom_2",
            FacilityColumn::FacilityCustom3 => "facility_custom_3",
            FacilityColumn::FacilityCustom4 => "facility_custom_4",
            FacilityColumn::FacilityCustom5 => "facility_custom_5",
        }
    }
}

/// Period columns that can be computed from `period_id` (YYYYMM).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PeriodColumn {
    Year,
    Month,
    QuarterId,
}

impl PeriodColumn {
    pub const ALL: [PeriodColumn; 3] = [PeriodColumn::Year, PeriodColumn::Month, PeriodColumn::QuarterId];

    pub fn as_str(self) -> &'static str {
        match self {
            PeriodColumn::Year => "year",
            PeriodColumn::Month => "month",
            PeriodColumn::QuarterId => "quarter_id",
        }
    }

    /// Arithmetic deriving this column from `period_id`.
    ///
    /// `quarter_id` is YYYYQ, e.g. 20233 for July–September 2023.
    pub fn derive_from_period_id(self) -> &'static str {
        match self {
            PeriodColumn::Year => "(period_id / 100)::int",
            PeriodColumn::Month => "(period_id % 100)::int",
            PeriodColumn::QuarterId => "((period_id / 100) * 10 + ((period_id % 100) - 1) / 3 + 1)::int",
        }
    }

    pub fn option(self) -> DisaggregationOption {
        match self {
            PeriodColumn::Year => DisaggregationOption::Year,
            PeriodColumn::Month => DisaggregationOption::Month,
            PeriodColumn::QuarterId => DisaggregationOption::QuarterId,
        }
    }
}

/// A dimension results may be grouped, filtered or enumerated by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DisaggregationOption {
    IndicatorCommonId,
    #[serde(rename = "admin_area_2")]
    AdminArea2,
    #[serde(rename = "admin_area_3")]
    AdminArea3,
    #[serde(rename = "admin_area_4")]
    AdminArea4,
    PeriodId,
    QuarterId,
    Year,
    Month,
    Denominator,
    DenominatorBestOrSurvey,
    SourceIndicator,
    TargetPopulation,
    RatioType,
    FacilityName,
    FacilityType,
    FacilityOwnership,
    #[serde(rename = "facility_custom_1")]
    FacilityCustom1,
    #[serde(rename = "facility_custom_2")]
    FacilityCustom2,
    #[serde(rename = "facility_custom_3")]
    FacilityCustom3,
    #[serde(rename = "facility_custom_4")]
    FacilityCustom4,
    #[serde(rename = "facility_custom_5")]
    FacilityCustom5,
}

impl DisaggregationOption {
    pub const ALL: [DisaggregationOption; 21] = [
        DisaggregationOption::IndicatorCommonId,
        DisaggregationOption::AdminArea2,
        DisaggregationOption::AdminArea3,
        DisaggregationOption::AdminArea4,
        DisaggregationOption::PeriodId,
        DisaggregationOption::QuarterId,
        DisaggregationOption::Year,
        DisaggregationOption::Month,
        DisaggregationOption::Denominator,
        DisaggregationOption::DenominatorBestOrSurvey,
        DisaggregationOption::SourceIndicator,
        DisaggregationOption::TargetPopulation,
        DisaggregationOption::RatioType,
        DisaggregationOption::FacilityName,
        DisaggregationOption::FacilityType,
        DisaggregationOption::FacilityOwnership,
        DisaggregationOption::FacilityCustom1,
        DisaggregationOption::FacilityCustom2,
        DisaggregationOption::FacilityCustom3,
        DisaggregationOption::FacilityCustom4,
        DisaggregationOption::FacilityCustom5,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DisaggregationOption::IndicatorCommonId => "indicator_common_id",
            DisaggregationOption::AdminArea2 => "admin_area_2",
            DisaggregationOption::AdminArea3 => "admin_area_3",
            DisaggregationOption::AdminArea4 => "admin_area_4",
            DisaggregationOption::PeriodId => "period_id",
            DisaggregationOption::QuarterId => PeriodColumn::QuarterId.as_str(),
            DisaggregationOption::Year => PeriodColumn::Year.as_str(),
            DisaggregationOption::Month => PeriodColumn::Month.as_str(),
            DisaggregationOption::Denominator => "denominator",
            DisaggregationOption::DenominatorBestOrSurvey => "denominator_best_or_survey",
            DisaggregationOption::SourceIndicator => "source_indicator",
            DisaggregationOption::TargetPopulation => "target_population",
            DisaggregationOption::RatioType => "ratio_type",
            DisaggregationOption::FacilityName => FacilityColumn::FacilityName.as_str(),
            DisaggregationOption::FacilityType => FacilityColumn::FacilityType.as_str(),
            DisaggregationOption::FacilityOwnership => FacilityColumn::FacilityOwnership.as_str(),
            DisaggregationOption::FacilityCustom1 => FacilityColumn::FacilityCustom1.as_str(),
            DisaggregationOption::FacilityCustom2 => FacilityColumn::FacilityCustom2.as_str(),
            DisaggregationOption::FacilityCustom3 => FacilityColumn::FacilityCustom3.as_str(),
            DisaggregationOption::FacilityCustom4 => FacilityColumn::FacilityCustom4.as_str(),
            DisaggregationOption::FacilityCustom5 => FacilityColumn::FacilityCustom5.as_str(),
        }
    }

    /// The facility attribute this option reads, if it comes from the facility join.
    pub fn facility_column(self) -> Option<FacilityColumn> {
        match self {
            DisaggregationOption::FacilityName => Some(FacilityColumn::FacilityName),
            DisaggregationOption::FacilityType => Some(FacilityColumn::FacilityType),
            DisaggregationOption::FacilityOwnership => Some(FacilityColumn::FacilityOwnership),
            DisaggregationOption::FacilityCustom1 => Some(FacilityColumn::FacilityCustom1),
            DisaggregationOption::FacilityCustom2 => Some(FacilityColumn::FacilityCustom2),
            DisaggregationOption::FacilityCustom3 => Some(FacilityColumn::FacilityCustom3),
            DisaggregationOption::FacilityCustom4 => Some(FacilityColumn::FacilityCustom4),
            DisaggregationOption::FacilityCustom5 => Some(FacilityColumn::FacilityCustom5),
            _ => None,
        }
    }

    /// The period column this option names, if it can be derived from `period_id`.
    pub fn period_column(self) -> Option<PeriodColumn> {
        match self {
            DisaggregationOption::Year => Some(PeriodColumn::Year),
            DisaggregationOption::Month => Some(PeriodColumn::Month),
            DisaggregationOption::QuarterId => Some(PeriodColumn::QuarterId),
            _ => None,
        }
    }

    pub fn is_admin_area(self) -> bool {
        matches!(
            self,
            DisaggregationOption::AdminArea2 | DisaggregationOption::AdminArea3 | DisaggregationOption::AdminArea4
        )
    }

    /// Integer-valued columns; filter values are parsed and bound as `int8[]`.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DisaggregationOption::PeriodId
                | DisaggregationOption::QuarterId
                | DisaggregationOption::Year
                | DisaggregationOption::Month
        )
    }

    /// Present on every results table.
    pub fn is_guaranteed(self) -> bool {
        matches!(self, DisaggregationOption::IndicatorCommonId)
    }
}

impl fmt::Display for DisaggregationOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
