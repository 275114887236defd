//! Sink execution discovery.
//!
//! A pipeline run schedules its sink node at some point after submission;
//! the locator polls until the sub-execution bound to the sink shows up.
//! The run status is always fetched *before* listing sub-executions: the
//! run may finish between the two calls, and checking the status second
//! would misreport a real answer as missing.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::models::job::{JobTarget, RunStatus, SubmittedJob};
use crate::platform::ExecutionPlatform;
use crate::{AppError, Result};

/// Outcome of a single discovery poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatePoll {
    /// The sink execution is known.
    Found(String),
    /// Not scheduled yet; poll again.
    Waiting {
        /// Run status observed in this poll.
        run_status: RunStatus,
    },
}

/// Polls for the sub-execution carrying a job's final answer.
///
/// Once an execution id is found it is cached; later calls return it
/// without touching the platform.
pub struct ExecutionLocator {
    platform: Arc<dyn ExecutionPlatform>,
    job: SubmittedJob,
    poll_interval: Duration,
    empty_terminal_threshold: u32,
    empty_terminal_polls: u32,
    located: Option<String>,
}

impl ExecutionLocator {
    /// Create a locator for a submitted job.
    #[must_use]
    pub fn new(
        platform: Arc<dyn ExecutionPlatform>,
        job: SubmittedJob,
        poll_interval: Duration,
        empty_terminal_threshold: u32,
    ) -> Self {
        Self {
            platform,
            job,
            poll_interval,
            empty_terminal_threshold,
            empty_terminal_polls: 0,
            located: None,
        }
    }

    /// Execution id, if already located.
    #[must_use]
    pub fn located(&self) -> Option<&str> {
        self.located.as_deref()
    }

    /// Consecutive polls that saw a terminal run with no sink execution.
    #[must_use]
    pub fn empty_terminal_polls(&self) -> u32 {
        self.empty_terminal_polls
    }

    /// Poll until the sink execution is found.
    ///
    /// Has no deadline of its own; callers bound it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NoResponseProduced` once the run has been seen
    /// terminal without a sink execution for the configured number of
    /// consecutive polls, and propagates platform failures.
    pub async fn locate(&mut self) -> Result<String> {
        loop {
            match self.poll_once().await? {
                LocatePoll::Found(execution_id) => return Ok(execution_id),
                LocatePoll::Waiting { .. } => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    /// Run one discovery iteration.
    ///
    /// # Errors
    ///
    /// See [`locate`](Self::locate).
    pub async fn poll_once(&mut self) -> Result<LocatePoll> {
        if let Some(ref id) = self.located {
            return Ok(LocatePoll::Found(id.clone()));
        }

        let sink_node_id = match self.job.target {
            JobTarget::Model => {
                // A prediction is its own sink execution.
                self.located = Some(self.job.run_id.clone());
                return Ok(LocatePoll::Found(self.job.run_id.clone()));
            }
            JobTarget::Pipeline { ref sink_node_id } => sink_node_id.clone(),
        };

        let run = self
            .platform
            .get_pipeline_run(&self.job.job_id, &self.job.run_id)
            .await?;
        let executions = self
            .platform
            .list_sub_executions(&self.job.job_id, &self.job.run_id, &sink_node_id)
            .await?;
        debug!(
            run_id = %self.job.run_id,
            status = ?run.status,
            found = executions.len(),
            "sink discovery poll"
        );

        if let Some(last) = executions.last() {
            info!(run_id = %self.job.run_id, execution_id = %last.id, "sink execution located");
            self.located = Some(last.id.clone());
            return Ok(LocatePoll::Found(last.id.clone()));
        }

        if run.status.is_terminal() {
            self.empty_terminal_polls += 1;
            if self.empty_terminal_polls >= self.empty_terminal_threshold {
                return Err(AppError::NoResponseProduced(format!(
                    "Pipeline cycle finished without response, pipeline ex id {}",
                    self.job.run_id
                )));
            }
        } else {
            self.empty_terminal_polls = 0;
        }

        Ok(LocatePoll::Waiting {
            run_status: run.status,
        })
    }
}
