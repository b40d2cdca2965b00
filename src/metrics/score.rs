use serde::Serialize;

use super::types::HealthMetric;

/// Score shown when the user has not logged anything yet.
pub const DEFAULT_HEALTH_SCORE: u8 = 78;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    Excellent,
    Good,
    Fair,
    NeedsAttention,
}

impl ScoreBand {
    pub fn for_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => ScoreBand::Excellent,
            60..=79 => ScoreBand::Good,
            40..=59 => ScoreBand::Fair,
            _ => ScoreBand::NeedsAttention,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScoreBand::Excellent => "Excellent",
            ScoreBand::Good => "Good",
            ScoreBand::Fair => "Fair",
            ScoreBand::NeedsAttention => "Needs Attention",
        }
    }
}

/// Overall 0-100 score derived from the most recent metric row.
pub fn health_score(latest: Option<&HealthMetric>) -> u8 {
    let Some(m) = latest else {
        return DEFAULT_HEALTH_SCORE;
    };

    let mut score: i64 = 100;
    if let Some(hr) = m.heart_rate {
        if !(60..=100).contains(&hr) {
            score -= 10;
        }
    }
    if matches!(m.blood_pressure_systolic, Some(s) if s > 130) {
        score -= 15;
    }
    if matches!(m.hydration, Some(h) if h < 60) {
        score -= 10;
    }
    if matches!(m.stress_level, Some(s) if s > 70) {
        score -= 10;
    }
    if matches!(m.sleep_hours, Some(h) if h < 6.0) {
        score -= 15;
    }
    score.clamp(0, 100) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    Normal,
    Warning,
    Critical,
}

/// Classify a reading against its normal range. Outside the range, a
/// deviation of more than half the range width is critical.
pub fn metric_status(value: Option<f64>, normal: (f64, f64)) -> MetricStatus {
    let Some(v) = value else {
        return MetricStatus::Normal;
    };
    let (lo, hi) = normal;
    if v >= lo && v <= hi {
        return MetricStatus::Normal;
    }
    let deviation = (v - lo).abs().min((v - hi).abs());
    if deviation > (hi - lo) * 0.5 {
        MetricStatus::Critical
    } else {
        MetricStatus::Warning
    }
}

/// Status of one dashboard card.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReading {
    pub metric: &'static str,
    pub value: Option<f64>,
    pub unit: &'static str,
    pub status: MetricStatus,
}

/// Readings for the dashboard cards, each checked against its normal range.
pub fn readings(latest: Option<&HealthMetric>) -> Vec<MetricReading> {
    let pick = |f: fn(&HealthMetric) -> Option<f64>| latest.and_then(f);
    let cards: [(&'static str, &'static str, Option<f64>, (f64, f64)); 6] = [
        ("heart_rate", "bpm", pick(|m| m.heart_rate.map(|v| v as f64)), (60.0, 100.0)),
        (
            "blood_pressure_systolic",
            "mmHg",
            pick(|m| m.blood_pressure_systolic.map(|v| v as f64)),
            (90.0, 130.0),
        ),
        ("temperature", "°F", pick(|m| m.temperature), (97.0, 99.0)),
        ("stress_level", "%", pick(|m| m.stress_level.map(|v| v as f64)), (0.0, 50.0)),
        ("hydration", "%", pick(|m| m.hydration.map(|v| v as f64)), (60.0, 100.0)),
        ("energy_level", "%", pick(|m| m.energy_level.map(|v| v as f64)), (50.0, 100.0)),
    ];

    cards
        .into_iter()
        .map(|(metric, unit, value, range)| MetricReading {
            metric,
            value,
            unit,
            status: metric_status(value, range),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::test_support::blank;

    #[test]
    fn test_default_score_without_metric() {
        assert_eq!(health_score(None), 78);
    }

    #[test]
    fn test_perfect_metric_scores_100() {
        let m = HealthMetric {
            heart_rate: Some(72),
            blood_pressure_systolic: Some(118),
            hydration: Some(80),
            stress_level: Some(20),
            sleep_hours: Some(8.0),
            ..blank("u1")
        };
        assert_eq!(health_score(Some(&m)), 100);
    }

    #[test]
    fn test_all_penalties() {
        let m = HealthMetric {
            heart_rate: Some(120),
            blood_pressure_systolic: Some(150),
            hydration: Some(40),
            stress_level: Some(90),
            sleep_hours: Some(4.5),
            ..blank("u1")
        };
        assert_eq!(health_score(Some(&m)), 40);
        assert_eq!(ScoreBand::for_score(40), ScoreBand::Fair);
    }

    #[test]
    fn test_score_bands() {
        assert_eq!(ScoreBand::for_score(100), ScoreBand::Excellent);
        assert_eq!(ScoreBand::for_score(80), ScoreBand::Excellent);
        assert_eq!(ScoreBand::for_score(79), ScoreBand::Good);
        assert_eq!(ScoreBand::for_score(60), ScoreBand::Good);
        assert_eq!(ScoreBand::for_score(39), ScoreBand::NeedsAttention);
        assert_eq!(ScoreBand::NeedsAttention.label(), "Needs Attention");
    }

    #[test]
    fn test_metric_status() {
        assert_eq!(metric_status(None, (60.0, 100.0)), MetricStatus::Normal);
        assert_eq!(metric_status(Some(72.0), (60.0, 100.0)), MetricStatus::Normal);
        assert_eq!(metric_status(Some(110.0), (60.0, 100.0)), MetricStatus::Warning);
        assert_eq!(metric_status(Some(125.0), (60.0, 100.0)), MetricStatus::Critical);
        assert_eq!(metric_status(Some(40.0), (60.0, 100.0)), MetricStatus::Warning);
    }

    #[test]
    fn test_readings_cover_cards() {
        let m = HealthMetric {
            temperature: Some(101.5),
            ..blank("u1")
        };
        let cards = readings(Some(&m));
        assert_eq!(cards.len(), 6);
        let temp = cards.iter().find(|c| c.metric == "temperature").unwrap();
        assert_eq!(temp.status, MetricStatus::Critical);
        assert!(cards
            .iter()
            .filter(|c| c.metric != "temperature")
            .all(|c| c.status == MetricStatus::Normal));
    }
}
