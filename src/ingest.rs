//! Job-state events in, work items out.
//!
//! The message bus delivers job state changes; only terminal states lead to a
//! usage computation. How many CPU hours an analysis consumed is decided by a
//! [`UsageCalculator`] supplied by the embedding service.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::Result;
use crate::model::{NewWorkItem, WorkItem};
use crate::store::Store;

/// State reported for a job by the execution platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Queued,
    Running,
    Impending,
    Succeeded,
    Failed,
    Canceled,
}

impl JobState {
    /// Whether this state means the job stopped consuming CPU and should be
    /// billed.
    pub fn triggers_usage(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Submitted => "Submitted",
            JobState::Queued => "Queued",
            JobState::Running => "Running",
            JobState::Impending => "Impending",
            JobState::Succeeded => "Completed",
            JobState::Failed => "Failed",
            JobState::Canceled => "Canceled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobState {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "submitted" => Ok(JobState::Submitted),
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "impending" => Ok(JobState::Impending),
            "completed" | "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            "canceled" | "cancelled" => Ok(JobState::Canceled),
            other => Err(crate::error::Error::Other(format!("unknown job state: {other}"))),
        }
    }
}

/// Computes the ledger mutation for a finished analysis.
#[async_trait]
pub trait UsageCalculator: Send + Sync {
    /// `None` when the analysis consumed nothing worth recording.
    async fn compute_usage_for_analysis(&self, external_id: &str) -> Result<Option<NewWorkItem>>;
}

/// Turns job-state callbacks into queued work items.
#[derive(Clone)]
pub struct UsageIngest {
    store: Arc<dyn Store>,
    calculator: Arc<dyn UsageCalculator>,
    clock: Arc<dyn Clock>,
}

impl UsageIngest {
    pub fn new(
        store: Arc<dyn Store>,
        calculator: Arc<dyn UsageCalculator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            calculator,
            clock,
        }
    }

    /// Handle one job-state notification. Returns the enqueued work item, if
    /// any.
    pub async fn on_job_state(&self, external_id: &str, state: JobState) -> Result<Option<WorkItem>> {
        if !state.triggers_usage() {
            debug!(external_id, %state, "job state does not trigger usage, ignoring");
            return Ok(None);
        }

        debug!(external_id, %state, "calculating CPU hours for analysis");
        let Some(new) = self.calculator.compute_usage_for_analysis(external_id).await? else {
            debug!(external_id, "no usage to record");
            return Ok(None);
        };

        let item = self.store.enqueue_work_item(new, self.clock.now()).await?;
        info!(
            external_id,
            work_id = %item.id,
            user_id = %item.user_id,
            operation = %item.operation,
            value = %item.value,
            "usage work item enqueued"
        );
        Ok(Some(item))
    }
}
