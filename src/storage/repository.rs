use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::assess::{RiskAssessment, RiskLevel};
use crate::date_util::{format_timestamp, optional_timestamp_column, timestamp_column};
use crate::metrics::HealthMetric;

// ── Health Metrics ─────────────────────────────────────────────────

const METRIC_COLUMNS: &str = "id, user_id, heart_rate, blood_pressure_systolic, blood_pressure_diastolic,
     temperature, stress_level, hydration, energy_level, steps, sleep_hours, sleep_quality,
     recorded_at, created_at";

pub fn insert_metric(conn: &Connection, metric: &HealthMetric) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO health_metrics (
            id, user_id, heart_rate, blood_pressure_systolic, blood_pressure_diastolic,
            temperature, stress_level, hydration, energy_level, steps, sleep_hours,
            sleep_quality, recorded_at, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            metric.id,
            metric.user_id,
            metric.heart_rate,
            metric.blood_pressure_systolic,
            metric.blood_pressure_diastolic,
            metric.temperature,
            metric.stress_level,
            metric.hydration,
            metric.energy_level,
            metric.steps,
            metric.sleep_hours,
            metric.sleep_quality,
            format_timestamp(&metric.recorded_at),
            format_timestamp(&metric.created_at),
        ],
    )?;
    Ok(())
}

/// Metrics recorded at or after `since`, ordered by `recorded_at`.
pub fn list_metrics_since(
    conn: &Connection,
    user_id: &str,
    since: &DateTime<Utc>,
    newest_first: bool,
) -> Result<Vec<HealthMetric>, rusqlite::Error> {
    let order = if newest_first { "DESC" } else { "ASC" };
    let sql = format!(
        "SELECT {METRIC_COLUMNS} FROM health_metrics
         WHERE user_id = ?1 AND recorded_at >= ?2
         ORDER BY recorded_at {order}, created_at {order}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id, format_timestamp(since)], metric_from_row)?;
    rows.collect()
}

pub fn latest_metric(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<HealthMetric>, rusqlite::Error> {
    let sql = format!(
        "SELECT {METRIC_COLUMNS} FROM health_metrics
         WHERE user_id = ?1
         ORDER BY recorded_at DESC, created_at DESC
         LIMIT 1"
    );
    conn.query_row(&sql, params![user_id], metric_from_row)
        .optional()
}

fn metric_from_row(row: &Row<'_>) -> Result<HealthMetric, rusqlite::Error> {
    Ok(HealthMetric {
        id: row.get(0)?,
        user_id: row.get(1)?,
        heart_rate: row.get(2)?,
        blood_pressure_systolic: row.get(3)?,
        blood_pressure_diastolic: row.get(4)?,
        temperature: row.get(5)?,
        stress_level: row.get(6)?,
        hydration: row.get(7)?,
        energy_level: row.get(8)?,
        steps: row.get(9)?,
        sleep_hours: row.get(10)?,
        sleep_quality: row.get(11)?,
        recorded_at: timestamp_column(row, 12)?,
        created_at: timestamp_column(row, 13)?,
    })
}

// ── Risk Assessments ───────────────────────────────────────────────

const ASSESSMENT_COLUMNS: &str =
    "id, user_id, condition, risk_level, risk_score, description, assessed_at, created_at";

/// Insert one run's assessments in a single transaction. Either every row is
/// stored or none is.
pub fn insert_risk_assessments(
    conn: &Connection,
    assessments: &[RiskAssessment],
) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO risk_assessments (
                id, user_id, condition, risk_level, risk_score, description,
                assessed_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for a in assessments {
            stmt.execute(params![
                a.id,
                a.user_id,
                a.condition,
                a.risk_level.as_str(),
                a.risk_score,
                a.description,
                format_timestamp(&a.assessed_at),
                format_timestamp(&a.created_at),
            ])?;
        }
    }
    tx.commit()
}

/// All of a user's assessments, newest first.
pub fn list_risk_assessments(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<RiskAssessment>, rusqlite::Error> {
    let sql = format!(
        "SELECT {ASSESSMENT_COLUMNS} FROM risk_assessments
         WHERE user_id = ?1
         ORDER BY assessed_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id], assessment_from_row)?;
    rows.collect()
}

/// The most recent assessment per condition, highest risk first.
pub fn current_risk_assessments(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<RiskAssessment>, rusqlite::Error> {
    let sql = format!(
        "SELECT {ASSESSMENT_COLUMNS} FROM risk_assessments r
         WHERE r.user_id = ?1
           AND NOT EXISTS (
               SELECT 1 FROM risk_assessments n
               WHERE n.user_id = r.user_id
                 AND n.condition = r.condition
                 AND (n.assessed_at > r.assessed_at
                      OR (n.assessed_at = r.assessed_at AND n.rowid > r.rowid))
           )
         ORDER BY r.risk_score DESC, r.condition"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id], assessment_from_row)?;
    rows.collect()
}

pub fn count_risk_assessments(conn: &Connection, user_id: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        "SELECT COUNT(*) FROM risk_assessments WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )
}

fn assessment_from_row(row: &Row<'_>) -> Result<RiskAssessment, rusqlite::Error> {
    let level: String = row.get(3)?;
    let risk_level = RiskLevel::from_str(&level).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(RiskAssessment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        condition: row.get(2)?,
        risk_level,
        risk_score: row.get(4)?,
        description: row.get(5)?,
        assessed_at: timestamp_column(row, 6)?,
        created_at: timestamp_column(row, 7)?,
    })
}

// ── Alerts ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(AlertSeverity::Info),
            "warning" => Ok(AlertSeverity::Warning),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(format!("unknown alert severity: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

pub fn insert_alert(conn: &Connection, alert: &Alert) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO alerts (id, user_id, title, message, severity, is_read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            alert.id,
            alert.user_id,
            alert.title,
            alert.message,
            alert.severity.as_str(),
            alert.is_read as i32,
            format_timestamp(&alert.created_at),
        ],
    )?;
    Ok(())
}

/// A user's newest alerts.
pub fn list_alerts(
    conn: &Connection,
    user_id: &str,
    limit: u32,
) -> Result<Vec<Alert>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, title, message, severity, is_read, created_at
         FROM alerts
         WHERE user_id = ?1
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![user_id, limit], |row| {
        let severity: String = row.get(4)?;
        let severity = AlertSeverity::from_str(&severity).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
        })?;
        Ok(Alert {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            message: row.get(3)?,
            severity,
            is_read: row.get::<_, i32>(5)? != 0,
            created_at: timestamp_column(row, 6)?,
        })
    })?;
    rows.collect()
}

/// Mark one of the user's alerts read. Returns false when the alert does not
/// exist or belongs to someone else.
pub fn mark_alert_read(
    conn: &Connection,
    user_id: &str,
    alert_id: &str,
) -> Result<bool, rusqlite::Error> {
    let changed = conn.execute(
        "UPDATE alerts SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
        params![alert_id, user_id],
    )?;
    Ok(changed > 0)
}

pub fn count_unread_alerts(conn: &Connection, user_id: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        "SELECT COUNT(*) FROM alerts WHERE user_id = ?1 AND is_read = 0",
        params![user_id],
        |row| row.get(0),
    )
}

// ── API Tokens ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiToken {
    pub token: String,
    pub user_id: String,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

pub fn insert_api_token(conn: &Connection, token: &ApiToken) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO api_tokens (token, user_id, label, created_at, revoked_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            token.token,
            token.user_id,
            token.label,
            format_timestamp(&token.created_at),
            token.revoked_at.as_ref().map(format_timestamp),
        ],
    )?;
    Ok(())
}

/// Owner of a token that has not been revoked.
pub fn find_token_user(conn: &Connection, token: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT user_id FROM api_tokens WHERE token = ?1 AND revoked_at IS NULL",
        params![token],
        |row| row.get(0),
    )
    .optional()
}

pub fn revoke_api_token(
    conn: &Connection,
    token: &str,
    at: &DateTime<Utc>,
) -> Result<bool, rusqlite::Error> {
    let changed = conn.execute(
        "UPDATE api_tokens SET revoked_at = ?2 WHERE token = ?1 AND revoked_at IS NULL",
        params![token, format_timestamp(at)],
    )?;
    Ok(changed > 0)
}

pub fn list_api_tokens(conn: &Connection) -> Result<Vec<ApiToken>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT token, user_id, label, created_at, revoked_at
         FROM api_tokens ORDER BY created_at, rowid",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(ApiToken {
            token: row.get(0)?,
            user_id: row.get(1)?,
            label: row.get(2)?,
            created_at: timestamp_column(row, 3)?,
            revoked_at: optional_timestamp_column(row, 4)?,
        })
    })?;
    rows.collect()
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date_util::now_millis;
    use crate::metrics::test_support::blank;
    use crate::storage::Database;
    use chrono::Duration;

    fn assessment(user_id: &str, condition: &str, score: u8, at: DateTime<Utc>) -> RiskAssessment {
        RiskAssessment {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            condition: condition.to_string(),
            risk_level: RiskLevel::Moderate,
            risk_score: score,
            description: format!("{condition} note"),
            assessed_at: at,
            created_at: at,
        }
    }

    fn alert(user_id: &str, title: &str, at: DateTime<Utc>) -> Alert {
        Alert {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            message: "check in".to_string(),
            severity: AlertSeverity::Warning,
            is_read: false,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_metric_window_and_latest() {
        let db = Database::open_memory().await.unwrap();
        let now = now_millis();

        db.writer()
            .call(move |conn| {
                let old = HealthMetric {
                    heart_rate: Some(50),
                    recorded_at: now - Duration::days(10),
                    ..blank("u1")
                };
                let recent = HealthMetric {
                    heart_rate: Some(70),
                    recorded_at: now - Duration::days(2),
                    ..blank("u1")
                };
                let newest = HealthMetric {
                    sleep_hours: Some(7.5),
                    recorded_at: now - Duration::hours(1),
                    ..blank("u1")
                };
                let other_user = HealthMetric {
                    heart_rate: Some(99),
                    ..blank("u2")
                };
                for m in [&old, &recent, &newest, &other_user] {
                    insert_metric(conn, m)?;
                }

                let since = now - Duration::days(7);
                let window = list_metrics_since(conn, "u1", &since, true)?;
                assert_eq!(window.len(), 2);
                assert_eq!(window[0], newest);
                assert_eq!(window[1], recent);

                let ascending = list_metrics_since(conn, "u1", &since, false)?;
                assert_eq!(ascending[0], recent);

                assert_eq!(latest_metric(conn, "u1")?, Some(newest));
                assert_eq!(latest_metric(conn, "nobody")?, None);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_insert_risk_assessments_round_trip() {
        let db = Database::open_memory().await.unwrap();
        let now = now_millis();
        let batch = vec![
            assessment("u1", "Sleep Quality", 40, now),
            assessment("u1", "Stress Management", 65, now),
        ];
        let expected = batch.clone();

        db.writer()
            .call(move |conn| {
                insert_risk_assessments(conn, &batch)?;
                let stored = list_risk_assessments(conn, "u1")?;
                assert_eq!(stored.len(), 2);
                for a in &expected {
                    assert!(stored.contains(a));
                }
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_insert_risk_assessments_is_atomic() {
        let db = Database::open_memory().await.unwrap();
        let now = now_millis();
        let first = assessment("u1", "Cardiovascular Health", 30, now);
        let mut duplicate = assessment("u1", "Hydration", 20, now);
        duplicate.id = first.id.clone();
        let batch = vec![first, duplicate];

        let count = db
            .writer()
            .call(move |conn| {
                assert!(insert_risk_assessments(conn, &batch).is_err());
                count_risk_assessments(conn, "u1")
            })
            .await
            .unwrap();
        assert_eq!(count, 0, "a failed batch must leave no rows behind");
    }

    #[tokio::test]
    async fn test_out_of_range_score_rejected_by_schema() {
        let db = Database::open_memory().await.unwrap();
        let bad = vec![assessment("u1", "Sleep", 0, now_millis())];
        let result = db
            .writer()
            .call(move |conn| insert_risk_assessments(conn, &bad))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_current_assessments_latest_per_condition() {
        let db = Database::open_memory().await.unwrap();
        let now = now_millis();
        let earlier = now - Duration::days(1);

        let current = db
            .writer()
            .call(move |conn| {
                insert_risk_assessments(
                    conn,
                    &[
                        assessment("u1", "Sleep Quality", 80, earlier),
                        assessment("u1", "Stress Management", 50, earlier),
                    ],
                )?;
                insert_risk_assessments(conn, &[assessment("u1", "Sleep Quality", 35, now)])?;
                insert_risk_assessments(conn, &[assessment("u2", "Sleep Quality", 99, now)])?;
                current_risk_assessments(conn, "u1")
            })
            .await
            .unwrap();

        assert_eq!(current.len(), 2);
        assert_eq!(current[0].condition, "Stress Management");
        assert_eq!(current[1].condition, "Sleep Quality");
        assert_eq!(current[1].risk_score, 35);
    }

    #[tokio::test]
    async fn test_alerts_listing_and_owner_scoped_read() {
        let db = Database::open_memory().await.unwrap();
        let now = now_millis();

        db.writer()
            .call(move |conn| {
                for i in 0..12 {
                    let at = now + Duration::seconds(i);
                    insert_alert(conn, &alert("u1", &format!("alert {i}"), at))?;
                }
                let foreign = alert("u2", "not yours", now);
                insert_alert(conn, &foreign)?;

                let listed = list_alerts(conn, "u1", 10)?;
                assert_eq!(listed.len(), 10);
                assert_eq!(listed[0].title, "alert 11");
                assert_eq!(count_unread_alerts(conn, "u1")?, 12);

                assert!(mark_alert_read(conn, "u1", &listed[0].id)?);
                assert!(!mark_alert_read(conn, "u1", &foreign.id)?);
                assert!(!mark_alert_read(conn, "u1", "missing")?);
                assert_eq!(count_unread_alerts(conn, "u1")?, 11);
                assert_eq!(count_unread_alerts(conn, "u2")?, 1);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_token_lifecycle() {
        let db = Database::open_memory().await.unwrap();
        let now = now_millis();

        db.writer()
            .call(move |conn| {
                insert_api_token(
                    conn,
                    &ApiToken {
                        token: "hp_abc".into(),
                        user_id: "u1".into(),
                        label: Some("laptop".into()),
                        created_at: now,
                        revoked_at: None,
                    },
                )?;
                assert_eq!(find_token_user(conn, "hp_abc")?, Some("u1".to_string()));
                assert_eq!(find_token_user(conn, "hp_nope")?, None);

                assert!(revoke_api_token(conn, "hp_abc", &now)?);
                assert!(!revoke_api_token(conn, "hp_abc", &now)?);
                assert_eq!(find_token_user(conn, "hp_abc")?, None);

                let tokens = list_api_tokens(conn)?;
                assert_eq!(tokens.len(), 1);
                assert_eq!(tokens[0].revoked_at, Some(now));
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                assert_eq!(get_config(conn, "llm_model")?, None);
                set_config(conn, "llm_model", "a")?;
                set_config(conn, "llm_model", "b")?;
                set_config(conn, "listen_addr", "0.0.0.0:9000")?;
                assert_eq!(get_config(conn, "llm_model")?, Some("b".to_string()));
                assert_eq!(list_config(conn)?.len(), 2);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }
}
