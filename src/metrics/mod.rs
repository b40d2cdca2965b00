pub mod score;
pub mod types;

pub use types::*;

use chrono::{DateTime, Utc};

use crate::date_util::{window_start, AGGREGATE_WINDOW_DAYS};
use crate::error::{Error, Result};
use crate::storage::repository;
use crate::storage::Database;

/// Compute per-field averages for a user's window of metrics.
///
/// Returns `None` when there are no rows, which callers treat as "no
/// metrics". Each field averages only its own non-null readings; a field
/// with no readings stays `None` rather than averaging to 0.
pub fn aggregate(metrics: &[HealthMetric]) -> Option<MetricAggregate> {
    if metrics.is_empty() {
        return None;
    }

    let mut agg = MetricAggregate {
        sample_count: metrics.len(),
        ..Default::default()
    };
    for field in MetricField::AGGREGATED {
        agg.set(field, field_average(metrics, field));
    }
    Some(agg)
}

/// Rounded mean of the non-null values of one field.
pub fn field_average(metrics: &[HealthMetric], field: MetricField) -> Option<i64> {
    let values: Vec<f64> = metrics.iter().filter_map(|m| field.value(m)).collect();
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some(round_half_up(mean))
}

/// Round to the nearest integer, halves toward positive infinity.
pub fn round_half_up(v: f64) -> i64 {
    (v + 0.5).floor() as i64
}

/// Load the user's metrics recorded within the trailing aggregate window,
/// newest first.
pub async fn load_window(
    db: &Database,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<HealthMetric>> {
    let since = window_start(now, AGGREGATE_WINDOW_DAYS);
    let user_id = user_id.to_string();
    db.reader()
        .call(move |conn| repository::list_metrics_since(conn, &user_id, &since, true))
        .await
        .map_err(|e| Error::FetchMetrics(e.to_string()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::date_util::now_millis;

    /// A metric row with every signal empty.
    pub fn blank(user_id: &str) -> HealthMetric {
        let now = now_millis();
        HealthMetric {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            heart_rate: None,
            blood_pressure_systolic: None,
            blood_pressure_diastolic: None,
            temperature: None,
            stress_level: None,
            hydration: None,
            energy_level: None,
            steps: None,
            sleep_hours: None,
            sleep_quality: None,
            recorded_at: now,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::blank;
    use super::*;

    #[test]
    fn test_empty_input_signals_no_metrics() {
        assert_eq!(aggregate(&[]), None);
    }

    #[test]
    fn test_heart_rate_average_example() {
        let a = HealthMetric {
            heart_rate: Some(110),
            ..blank("u1")
        };
        let b = HealthMetric {
            heart_rate: Some(90),
            ..blank("u1")
        };
        let agg = aggregate(&[a, b]).unwrap();
        assert_eq!(agg.heart_rate, Some(100));
        assert_eq!(agg.sample_count, 2);
    }

    #[test]
    fn test_nulls_do_not_skew_average() {
        let rows = vec![
            HealthMetric {
                heart_rate: Some(80),
                steps: Some(1000),
                ..blank("u1")
            },
            HealthMetric {
                steps: Some(3000),
                ..blank("u1")
            },
            HealthMetric {
                steps: Some(5000),
                ..blank("u1")
            },
        ];
        let agg = aggregate(&rows).unwrap();
        // Only one heart-rate reading; the two empty rows must not pull it toward 0.
        assert_eq!(agg.heart_rate, Some(80));
        assert_eq!(agg.steps, Some(3000));
    }

    #[test]
    fn test_all_null_field_is_absent_not_zero() {
        let rows = vec![
            HealthMetric {
                hydration: Some(70),
                ..blank("u1")
            },
            HealthMetric {
                hydration: Some(60),
                ..blank("u1")
            },
        ];
        let agg = aggregate(&rows).unwrap();
        assert_eq!(agg.hydration, Some(65));
        assert_eq!(agg.heart_rate, None);
        assert_eq!(agg.blood_pressure_systolic, None);
        assert_eq!(agg.energy_level, None);
    }

    #[test]
    fn test_rounding_halves_up() {
        let rows = vec![
            HealthMetric {
                stress_level: Some(3),
                ..blank("u1")
            },
            HealthMetric {
                stress_level: Some(4),
                ..blank("u1")
            },
        ];
        assert_eq!(aggregate(&rows).unwrap().stress_level, Some(4));
        assert_eq!(round_half_up(2.49), 2);
        assert_eq!(round_half_up(0.0), 0);
    }

    #[test]
    fn test_fractional_sleep_hours_rounded() {
        let rows = vec![
            HealthMetric {
                sleep_hours: Some(6.5),
                ..blank("u1")
            },
            HealthMetric {
                sleep_hours: Some(7.25),
                ..blank("u1")
            },
        ];
        // mean 6.875
        assert_eq!(aggregate(&rows).unwrap().sleep_hours, Some(7));
    }

    #[test]
    fn test_temperature_not_aggregated() {
        let rows = vec![HealthMetric {
            temperature: Some(98.6),
            ..blank("u1")
        }];
        let agg = aggregate(&rows).unwrap();
        for field in MetricField::AGGREGATED {
            assert_eq!(agg.get(field), None);
        }
    }
}
