pub mod assess;
pub mod auth;
pub mod config;
pub mod date_util;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod server;
pub mod storage;

use std::sync::Arc;

use serde::Serialize;

pub use assess::{AnalyzeReport, AnalyzeStage, RiskAssessment, RiskLevel};
pub use auth::{Identity, IdentityProvider};
pub use config::Settings;
pub use error::{Error, Result};
pub use llm::CompletionClient;
pub use metrics::score::{MetricReading, MetricStatus, ScoreBand};
pub use metrics::{HealthMetric, MetricAggregate, NewHealthMetric};
pub use storage::{ChangeEvent, ChangeKind, Database, Subscription, Table};

// Re-export repository types needed by the binary crate, but not the module itself
pub use storage::repository::{Alert, AlertSeverity, ApiToken};

use date_util::{now_millis, window_start};
use storage::repository;

/// Alerts shown to a user at once.
pub const ALERT_LIST_LIMIT: u32 = 10;
pub const DEFAULT_TREND_DAYS: u32 = 7;
const MAX_TREND_DAYS: u32 = 365;

/// Everything the dashboard renders for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub health_score: u8,
    pub band: ScoreBand,
    pub band_label: &'static str,
    pub latest: Option<HealthMetric>,
    pub readings: Vec<MetricReading>,
    pub current_assessments: Vec<RiskAssessment>,
    pub unread_alerts: i64,
}

/// Main entry point for HealthPulse.
pub struct HealthPulse {
    db: Database,
    completion: Arc<dyn CompletionClient>,
    identities: Arc<dyn IdentityProvider>,
}

impl HealthPulse {
    pub fn new(
        db: Database,
        completion: Arc<dyn CompletionClient>,
        identities: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            db,
            completion,
            identities,
        }
    }

    /// Wire the HTTP completion client and the configured identity provider.
    /// Without an API key, analysis fails with a configuration error while
    /// every other operation works.
    pub fn from_settings(db: Database, settings: &Settings) -> Result<Self> {
        let completion: Arc<dyn CompletionClient> = match llm::create_client(settings) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                log::warn!("Risk analysis disabled: {e}");
                Arc::new(llm::DisabledCompletion::new(e.to_string()))
            }
        };
        let identities = auth::create_provider(settings, db.clone())?;
        Ok(Self::new(db, completion, identities))
    }

    /// For maintenance commands: local tokens and no completion service.
    pub fn offline(db: Database) -> Self {
        let identities = Arc::new(auth::LocalTokenProvider::new(db.clone()));
        let completion = Arc::new(llm::DisabledCompletion::new("risk analysis is not configured"));
        Self::new(db, completion, identities)
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Resolve an `Authorization` header value to the caller.
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<Identity> {
        let token = auth::bearer_token(authorization)?;
        self.identities.verify(token).await
    }

    // ── Metrics ────────────────────────────────────────────────────

    pub async fn log_metric(&self, user_id: &str, new: NewHealthMetric) -> Result<HealthMetric> {
        new.validate()?;
        let created_at = now_millis();
        let recorded_at = new.recorded_at.unwrap_or(created_at);
        if recorded_at > created_at {
            log::warn!("Metric for user {user_id} is recorded in the future: {recorded_at}");
        }

        let metric = HealthMetric {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            heart_rate: new.heart_rate,
            blood_pressure_systolic: new.blood_pressure_systolic,
            blood_pressure_diastolic: new.blood_pressure_diastolic,
            temperature: new.temperature,
            stress_level: new.stress_level,
            hydration: new.hydration,
            energy_level: new.energy_level,
            steps: new.steps,
            sleep_hours: new.sleep_hours,
            sleep_quality: new.sleep_quality,
            recorded_at,
            created_at,
        };

        self.db
            .writer()
            .call({
                let metric = metric.clone();
                move |conn| repository::insert_metric(conn, &metric)
            })
            .await?;
        self.db
            .publish(ChangeEvent::insert(Table::HealthMetrics, user_id, &metric.id));
        Ok(metric)
    }

    /// Metrics of the last `days` days, oldest first.
    pub async fn recent_metrics(&self, user_id: &str, days: u32) -> Result<Vec<HealthMetric>> {
        if days == 0 || days > MAX_TREND_DAYS {
            return Err(Error::Validation(format!(
                "days must be between 1 and {MAX_TREND_DAYS}"
            )));
        }
        let since = window_start(now_millis(), i64::from(days));
        let user_id = user_id.to_string();
        self.db
            .reader()
            .call(move |conn| repository::list_metrics_since(conn, &user_id, &since, false))
            .await
            .map_err(|e| Error::FetchMetrics(e.to_string()))
    }

    pub async fn latest_metric(&self, user_id: &str) -> Result<Option<HealthMetric>> {
        let user_id = user_id.to_string();
        self.db
            .reader()
            .call(move |conn| repository::latest_metric(conn, &user_id))
            .await
            .map_err(|e| Error::FetchMetrics(e.to_string()))
    }

    // ── Assessments ────────────────────────────────────────────────

    pub async fn assessments(&self, user_id: &str) -> Result<Vec<RiskAssessment>> {
        let user_id = user_id.to_string();
        self.db
            .reader()
            .call(move |conn| repository::list_risk_assessments(conn, &user_id))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Newest assessment per condition, highest score first.
    pub async fn current_assessments(&self, user_id: &str) -> Result<Vec<RiskAssessment>> {
        let user_id = user_id.to_string();
        self.db
            .reader()
            .call(move |conn| repository::current_risk_assessments(conn, &user_id))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn calculate_risk(&self, authorization: Option<&str>) -> Result<AnalyzeReport> {
        assess::calculate_risk(
            &self.db,
            self.completion.as_ref(),
            self.identities.as_ref(),
            authorization,
        )
        .await
    }

    pub async fn calculate_risk_for(&self, identity: &Identity) -> Result<AnalyzeReport> {
        assess::calculate_risk_for(&self.db, self.completion.as_ref(), identity).await
    }

    // ── Alerts ─────────────────────────────────────────────────────

    pub async fn alerts(&self, user_id: &str) -> Result<Vec<Alert>> {
        let user_id = user_id.to_string();
        self.db
            .reader()
            .call(move |conn| repository::list_alerts(conn, &user_id, ALERT_LIST_LIMIT))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Mark one of the caller's alerts read. Someone else's alert is
    /// reported as not found.
    pub async fn mark_alert_read(&self, user_id: &str, alert_id: &str) -> Result<()> {
        let updated = self
            .db
            .writer()
            .call({
                let user_id = user_id.to_string();
                let alert_id = alert_id.to_string();
                move |conn| repository::mark_alert_read(conn, &user_id, &alert_id)
            })
            .await?;
        if !updated {
            return Err(Error::NotFound(format!("alert {alert_id}")));
        }
        self.db
            .publish(ChangeEvent::update(Table::Alerts, user_id, alert_id));
        Ok(())
    }

    pub async fn raise_alert(
        &self,
        user_id: &str,
        title: &str,
        message: &str,
        severity: AlertSeverity,
    ) -> Result<Alert> {
        if title.trim().is_empty() {
            return Err(Error::Validation("alert title must not be empty".into()));
        }
        let alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.trim().to_string(),
            message: message.to_string(),
            severity,
            is_read: false,
            created_at: now_millis(),
        };
        self.db
            .writer()
            .call({
                let alert = alert.clone();
                move |conn| repository::insert_alert(conn, &alert)
            })
            .await?;
        self.db
            .publish(ChangeEvent::insert(Table::Alerts, user_id, &alert.id));
        Ok(alert)
    }

    // ── Dashboard ──────────────────────────────────────────────────

    pub async fn dashboard(&self, user_id: &str) -> Result<DashboardSummary> {
        let latest = self.latest_metric(user_id).await?;
        let current_assessments = self.current_assessments(user_id).await?;
        let unread_alerts = self
            .db
            .reader()
            .call({
                let user_id = user_id.to_string();
                move |conn| repository::count_unread_alerts(conn, &user_id)
            })
            .await?;

        let health_score = metrics::score::health_score(latest.as_ref());
        let band = ScoreBand::for_score(health_score);
        Ok(DashboardSummary {
            health_score,
            band,
            band_label: band.label(),
            readings: metrics::score::readings(latest.as_ref()),
            latest,
            current_assessments,
            unread_alerts,
        })
    }

    /// Committed writes that belong to `user_id`.
    pub fn subscribe(&self, user_id: &str) -> Subscription {
        let user_id = user_id.to_string();
        self.db.subscribe(move |event| event.user_id == user_id)
    }

    // ── Tokens ─────────────────────────────────────────────────────

    pub async fn issue_token(&self, user_id: &str, label: Option<&str>) -> Result<ApiToken> {
        auth::issue_token(&self.db, user_id, label).await
    }

    pub async fn revoke_token(&self, token: &str) -> Result<bool> {
        auth::revoke_token(&self.db, token).await
    }

    pub async fn list_tokens(&self) -> Result<Vec<ApiToken>> {
        self.db
            .reader()
            .call(|conn| repository::list_api_tokens(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.db
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Store a setting after checking it parses. Takes effect on the next
    /// start.
    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        Settings::validate_value(key, value)?;
        self.db
            .writer()
            .call({
                let key = key.to_string();
                let value = value.to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}
