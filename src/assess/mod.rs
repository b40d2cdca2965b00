pub mod types;

pub use types::*;

use chrono::{DateTime, Utc};

use crate::auth::{bearer_token, Identity, IdentityProvider};
use crate::date_util::now_millis;
use crate::error::{Error, Result};
use crate::llm::agents::risk::{self, AssessmentDraft};
use crate::llm::CompletionClient;
use crate::metrics;
use crate::storage::repository;
use crate::storage::{ChangeEvent, Database, Table};

/// Bookkeeping for one analyze request. Owns the stage so concurrent runs
/// never share state.
#[derive(Debug)]
pub struct AnalyzeRun {
    run_id: String,
    started_at: DateTime<Utc>,
    stage: AnalyzeStage,
}

impl AnalyzeRun {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().simple().to_string(),
            started_at: now_millis(),
            stage: AnalyzeStage::Idle,
        }
    }

    pub fn stage(&self) -> AnalyzeStage {
        self.stage
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    fn advance(&mut self, next: AnalyzeStage) {
        log::debug!("analyze {}: {:?} -> {:?}", self.run_id, self.stage, next);
        self.stage = next;
    }
}

impl Default for AnalyzeRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Authenticate the caller from an `Authorization` header value, then run
/// [`calculate_risk_for`].
pub async fn calculate_risk(
    db: &Database,
    completion: &dyn CompletionClient,
    identities: &dyn IdentityProvider,
    authorization: Option<&str>,
) -> Result<AnalyzeReport> {
    let mut run = AnalyzeRun::new();
    run.advance(AnalyzeStage::Authenticating);
    let token = bearer_token(authorization)?;
    let identity = identities.verify(token).await?;
    analyze(db, completion, &identity, run).await
}

/// Aggregate the caller's last week of metrics, ask the completion service
/// for assessments and store them.
///
/// "No metrics" is a successful report without a completion call. Every
/// call appends a new batch; nothing is deduplicated.
pub async fn calculate_risk_for(
    db: &Database,
    completion: &dyn CompletionClient,
    identity: &Identity,
) -> Result<AnalyzeReport> {
    analyze(db, completion, identity, AnalyzeRun::new()).await
}

async fn analyze(
    db: &Database,
    completion: &dyn CompletionClient,
    identity: &Identity,
    mut run: AnalyzeRun,
) -> Result<AnalyzeReport> {
    run.advance(AnalyzeStage::Aggregating);
    let window = metrics::load_window(db, &identity.user_id, run.started_at).await?;
    let Some(aggregate) = metrics::aggregate(&window) else {
        run.advance(AnalyzeStage::NoData);
        log::info!("No recent metrics for user {}", identity.user_id);
        return Ok(AnalyzeReport::no_data());
    };

    run.advance(AnalyzeStage::Prompting);
    let request = risk::build_request(completion.model(), &aggregate);

    run.advance(AnalyzeStage::AwaitingCompletion);
    let response = match completion.complete(&request).await {
        Ok(response) => response,
        Err(e) => {
            run.advance(match e {
                Error::RateLimited => AnalyzeStage::RateLimited,
                Error::QuotaExhausted => AnalyzeStage::QuotaExhausted,
                _ => AnalyzeStage::UpstreamError,
            });
            return Err(e);
        }
    };

    let drafts = risk::parse_assessments(&response);
    run.advance(AnalyzeStage::Parsed);

    let assessments = tag_assessments(drafts, &identity.user_id, now_millis());
    if !assessments.is_empty() {
        run.advance(AnalyzeStage::Persisting);
        if let Err(e) = persist(db, &assessments).await {
            run.advance(AnalyzeStage::PersistenceError);
            return Err(e);
        }
    }

    run.advance(AnalyzeStage::Done);
    let report = AnalyzeReport::done(window.len(), assessments);
    log::info!("User {}: {}", identity.user_id, report.message);
    Ok(report)
}

fn tag_assessments(
    drafts: Vec<AssessmentDraft>,
    user_id: &str,
    at: DateTime<Utc>,
) -> Vec<RiskAssessment> {
    drafts
        .into_iter()
        .map(|d| RiskAssessment {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            condition: d.condition,
            risk_level: d.risk_level,
            risk_score: d.risk_score,
            description: d.description,
            assessed_at: at,
            created_at: at,
        })
        .collect()
}

/// Store one batch atomically and announce each row on the change feed.
pub async fn persist(db: &Database, assessments: &[RiskAssessment]) -> Result<()> {
    let rows = assessments.to_vec();
    db.writer()
        .call(move |conn| repository::insert_risk_assessments(conn, &rows))
        .await
        .map_err(|e| {
            log::error!("Failed to store assessments: {e}");
            Error::Persistence(e.to_string())
        })?;

    for a in assessments {
        db.publish(ChangeEvent::insert(Table::RiskAssessments, &a.user_id, &a.id));
    }
    Ok(())
}
