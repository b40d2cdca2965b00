use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One logged observation of one or more health signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetric {
    pub id: String,
    pub user_id: String,
    pub heart_rate: Option<i64>,
    pub blood_pressure_systolic: Option<i64>,
    pub blood_pressure_diastolic: Option<i64>,
    pub temperature: Option<f64>,
    pub stress_level: Option<i64>,
    pub hydration: Option<i64>,
    pub energy_level: Option<i64>,
    pub steps: Option<i64>,
    pub sleep_hours: Option<f64>,
    pub sleep_quality: Option<i64>,
    pub recorded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Payload for logging a metric. Every signal is optional, but at least one
/// must be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewHealthMetric {
    pub heart_rate: Option<i64>,
    pub blood_pressure_systolic: Option<i64>,
    pub blood_pressure_diastolic: Option<i64>,
    pub temperature: Option<f64>,
    pub stress_level: Option<i64>,
    pub hydration: Option<i64>,
    pub energy_level: Option<i64>,
    pub steps: Option<i64>,
    pub sleep_hours: Option<f64>,
    pub sleep_quality: Option<i64>,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl NewHealthMetric {
    pub fn validate(&self) -> Result<()> {
        let ints = [
            ("heart_rate", self.heart_rate),
            ("blood_pressure_systolic", self.blood_pressure_systolic),
            ("blood_pressure_diastolic", self.blood_pressure_diastolic),
            ("stress_level", self.stress_level),
            ("hydration", self.hydration),
            ("energy_level", self.energy_level),
            ("steps", self.steps),
            ("sleep_quality", self.sleep_quality),
        ];
        let floats = [
            ("temperature", self.temperature),
            ("sleep_hours", self.sleep_hours),
        ];

        let present = ints.iter().filter(|(_, v)| v.is_some()).count()
            + floats.iter().filter(|(_, v)| v.is_some()).count();
        if present == 0 {
            return Err(Error::Validation(
                "at least one metric value is required".into(),
            ));
        }

        for (name, value) in ints {
            if matches!(value, Some(v) if v < 0) {
                return Err(Error::Validation(format!("{name} must not be negative")));
            }
        }
        for (name, value) in floats {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(Error::Validation(format!(
                        "{name} must be a non-negative number"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The signals averaged for risk analysis. Temperature is stored and scored
/// but never part of the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    HeartRate,
    BloodPressureSystolic,
    BloodPressureDiastolic,
    SleepHours,
    SleepQuality,
    StressLevel,
    Steps,
    Hydration,
    EnergyLevel,
}

impl MetricField {
    pub const AGGREGATED: [MetricField; 9] = [
        MetricField::HeartRate,
        MetricField::BloodPressureSystolic,
        MetricField::BloodPressureDiastolic,
        MetricField::SleepHours,
        MetricField::SleepQuality,
        MetricField::StressLevel,
        MetricField::Steps,
        MetricField::Hydration,
        MetricField::EnergyLevel,
    ];

    pub fn column(self) -> &'static str {
        match self {
            MetricField::HeartRate => "heart_rate",
            MetricField::BloodPressureSystolic => "blood_pressure_systolic",
            MetricField::BloodPressureDiastolic => "blood_pressure_diastolic",
            MetricField::SleepHours => "sleep_hours",
            MetricField::SleepQuality => "sleep_quality",
            MetricField::StressLevel => "stress_level",
            MetricField::Steps => "steps",
            MetricField::Hydration => "hydration",
            MetricField::EnergyLevel => "energy_level",
        }
    }

    pub fn value(self, metric: &HealthMetric) -> Option<f64> {
        match self {
            MetricField::HeartRate => metric.heart_rate.map(|v| v as f64),
            MetricField::BloodPressureSystolic => metric.blood_pressure_systolic.map(|v| v as f64),
            MetricField::BloodPressureDiastolic => {
                metric.blood_pressure_diastolic.map(|v| v as f64)
            }
            MetricField::SleepHours => metric.sleep_hours,
            MetricField::SleepQuality => metric.sleep_quality.map(|v| v as f64),
            MetricField::StressLevel => metric.stress_level.map(|v| v as f64),
            MetricField::Steps => metric.steps.map(|v| v as f64),
            MetricField::Hydration => metric.hydration.map(|v| v as f64),
            MetricField::EnergyLevel => metric.energy_level.map(|v| v as f64),
        }
    }
}

/// Per-field rounded averages over a window. `None` means the field had no
/// readings at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricAggregate {
    pub sample_count: usize,
    pub heart_rate: Option<i64>,
    pub blood_pressure_systolic: Option<i64>,
    pub blood_pressure_diastolic: Option<i64>,
    pub sleep_hours: Option<i64>,
    pub sleep_quality: Option<i64>,
    pub stress_level: Option<i64>,
    pub steps: Option<i64>,
    pub hydration: Option<i64>,
    pub energy_level: Option<i64>,
}

impl MetricAggregate {
    pub fn get(&self, field: MetricField) -> Option<i64> {
        match field {
            MetricField::HeartRate => self.heart_rate,
            MetricField::BloodPressureSystolic => self.blood_pressure_systolic,
            MetricField::BloodPressureDiastolic => self.blood_pressure_diastolic,
            MetricField::SleepHours => self.sleep_hours,
            MetricField::SleepQuality => self.sleep_quality,
            MetricField::StressLevel => self.stress_level,
            MetricField::Steps => self.steps,
            MetricField::Hydration => self.hydration,
            MetricField::EnergyLevel => self.energy_level,
        }
    }

    pub(crate) fn set(&mut self, field: MetricField, value: Option<i64>) {
        let slot = match field {
            MetricField::HeartRate => &mut self.heart_rate,
            MetricField::BloodPressureSystolic => &mut self.blood_pressure_systolic,
            MetricField::BloodPressureDiastolic => &mut self.blood_pressure_diastolic,
            MetricField::SleepHours => &mut self.sleep_hours,
            MetricField::SleepQuality => &mut self.sleep_quality,
            MetricField::StressLevel => &mut self.stress_level,
            MetricField::Steps => &mut self.steps,
            MetricField::Hydration => &mut self.hydration,
            MetricField::EnergyLevel => &mut self.energy_level,
        };
        *slot = value;
    }
}
