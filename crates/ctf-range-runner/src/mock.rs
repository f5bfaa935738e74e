//! Scripted playbook executor for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Result, RunnerError};
use crate::executor::PlaybookExecutor;
use crate::types::{ExecutorReport, PlaybookJob, RunStatus};

enum Response {
    Report(ExecutorReport),
    Fail(String),
}

struct MockState {
    response: Response,
    delay: Option<Duration>,
    jobs: Vec<PlaybookJob>,
}

/// Records every job and answers with a scripted report.
///
/// Defaults to a successful run with return code 0.
#[derive(Clone)]
pub struct MockExecutor {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                response: Response::Report(ExecutorReport {
                    status: RunStatus::Successful,
                    return_code: Some(0),
                    stdout: String::new(),
                }),
                delay: None,
                jobs: Vec::new(),
            })),
        }
    }
}

impl MockExecutor {
    /// A mock that reports success.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every later job with `report`.
    pub fn respond_with(&self, report: ExecutorReport) {
        self.state.lock().response = Response::Report(report);
    }

    /// Fail every later job with a spawn error carrying `reason`.
    pub fn fail_with(&self, reason: &str) {
        self.state.lock().response = Response::Fail(reason.to_string());
    }

    /// Sleep before answering.
    pub fn delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    /// Jobs received so far.
    #[must_use]
    pub fn jobs(&self) -> Vec<PlaybookJob> {
        self.state.lock().jobs.clone()
    }
}

#[async_trait]
impl PlaybookExecutor for MockExecutor {
    async fn execute(&self, job: &PlaybookJob) -> Result<ExecutorReport> {
        let delay = {
            let mut state = self.state.lock();
            state.jobs.push(job.clone());
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();
        match &state.response {
            Response::Report(report) => Ok(report.clone()),
            Response::Fail(reason) => Err(RunnerError::Spawn {
                program: "mock".to_string(),
                reason: reason.clone(),
            }),
        }
    }
}
