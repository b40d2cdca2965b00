use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "moderate" => Ok(RiskLevel::Moderate),
            "high" => Ok(RiskLevel::High),
            other => Err(format!("unknown risk level: {other}")),
        }
    }
}

/// A stored AI judgment of risk for one named condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub id: String,
    pub user_id: String,
    pub condition: String,
    pub risk_level: RiskLevel,
    pub risk_score: u8,
    pub description: String,
    pub assessed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Where a single analyze run is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzeStage {
    Idle,
    Authenticating,
    Aggregating,
    NoData,
    Prompting,
    AwaitingCompletion,
    RateLimited,
    QuotaExhausted,
    UpstreamError,
    Parsed,
    Persisting,
    Done,
    PersistenceError,
}

impl AnalyzeStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AnalyzeStage::NoData
                | AnalyzeStage::RateLimited
                | AnalyzeStage::QuotaExhausted
                | AnalyzeStage::UpstreamError
                | AnalyzeStage::Done
                | AnalyzeStage::PersistenceError
        )
    }
}

/// Result of a successful analyze run, including the "no metrics" case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzeReport {
    pub stage: AnalyzeStage,
    pub metrics_analyzed: usize,
    pub assessments_created: usize,
    pub assessments: Vec<RiskAssessment>,
    pub message: String,
}

pub const NO_METRICS_MESSAGE: &str = "No recent health metrics found";

impl AnalyzeReport {
    pub fn no_data() -> Self {
        Self {
            stage: AnalyzeStage::NoData,
            metrics_analyzed: 0,
            assessments_created: 0,
            assessments: Vec::new(),
            message: NO_METRICS_MESSAGE.to_string(),
        }
    }

    pub fn done(metrics_analyzed: usize, assessments: Vec<RiskAssessment>) -> Self {
        let assessments_created = assessments.len();
        Self {
            stage: AnalyzeStage::Done,
            metrics_analyzed,
            assessments_created,
            message: format!(
                "Analyzed {metrics_analyzed} metrics and created {assessments_created} risk assessments"
            ),
            assessments,
        }
    }

    pub fn is_no_data(&self) -> bool {
        self.stage == AnalyzeStage::NoData
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_round_trip() {
        for level in [RiskLevel::Low, RiskLevel::Moderate, RiskLevel::High] {
            assert_eq!(level.as_str().parse::<RiskLevel>(), Ok(level));
        }
        assert!("medium".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn test_risk_level_serde_lowercase() {
        assert_eq!(serde_json::to_string(&RiskLevel::Moderate).unwrap(), "\"moderate\"");
    }

    #[test]
    fn test_report_messages() {
        let empty = AnalyzeReport::no_data();
        assert!(empty.is_no_data());
        assert_eq!(empty.message, "No recent health metrics found");

        let done = AnalyzeReport::done(12, Vec::new());
        assert_eq!(done.message, "Analyzed 12 metrics and created 0 risk assessments");
        assert!(done.stage.is_terminal());
        assert!(!AnalyzeStage::Parsed.is_terminal());
    }
}
