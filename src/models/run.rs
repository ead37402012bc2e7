//! Per-run bookkeeping: rendition jobs, the run state machine and its report.

use super::{
    event::{SourceAsset, StorageEvent},
    object::{ObjectLocation, StoredObject},
    rendition::RenditionSpec,
};
use serde::Serialize;
use std::mem;
use thiserror::Error;
use uuid::Uuid;

/// Why a single rendition branch failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// The shared source stream failed; every pending branch gets this.
    #[error("source read failed: {0}")]
    SourceRead(String),
    /// The source turned out larger than the admission limit while streaming.
    #[error("source too large: {0}")]
    Oversized(String),
    #[error("transform failed: {0}")]
    Transform(String),
    #[error("write failed: {0}")]
    Write(String),
    /// The branch task died without reporting.
    #[error("branch aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone)]
pub enum JobState {
    Pending,
    Succeeded(StoredObject),
    Failed(JobError),
}

/// One in-flight branch of the fan-out.
#[derive(Debug, Clone)]
pub struct RenditionJob {
    pub spec: RenditionSpec,
    pub destination: ObjectLocation,
    pub state: JobState,
}

impl RenditionJob {
    pub fn new(spec: RenditionSpec, asset: &SourceAsset) -> Self {
        let destination = spec.destination_for(asset);
        Self {
            spec,
            destination,
            state: JobState::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.state, JobState::Pending)
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.state, JobState::Succeeded(_))
    }

    /// Record the terminal state. The first terminal state sticks.
    pub fn finish(&mut self, result: Result<StoredObject, JobError>) {
        if self.is_terminal() {
            return;
        }
        self.state = match result {
            Ok(object) => JobState::Succeeded(object),
            Err(err) => JobState::Failed(err),
        };
    }
}

/// `Dispatched -> AwaitingJobs -> {AllSucceeded | PartialSuccess | AllFailed} -> Cleanup -> Terminal`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Dispatched,
    AwaitingJobs,
    AllSucceeded,
    PartialSuccess,
    AllFailed,
    Cleanup,
    Terminal,
}

impl RunState {
    fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Dispatched, AwaitingJobs)
                | (AwaitingJobs, AllSucceeded | PartialSuccess | AllFailed)
                | (AllSucceeded | PartialSuccess | AllFailed, Cleanup)
                | (Cleanup, Terminal)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunStateError {
    #[error("invalid run transition {from:?} -> {to:?}")]
    InvalidTransition { from: RunState, to: RunState },
    #[error("{0} rendition job(s) still pending")]
    PendingJobs(usize),
}

/// Settled result of the fan-out.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    AllSucceeded,
    PartialSuccess,
    AllFailed,
}

impl RunOutcome {
    fn state(self) -> RunState {
        match self {
            RunOutcome::AllSucceeded => RunState::AllSucceeded,
            RunOutcome::PartialSuccess => RunState::PartialSuccess,
            RunOutcome::AllFailed => RunState::AllFailed,
        }
    }
}

/// Aggregate of one source asset's processing.
#[derive(Debug)]
pub struct PipelineRun {
    pub id: Uuid,
    pub asset: SourceAsset,
    pub jobs: Vec<RenditionJob>,
    state: RunState,
    outcome: Option<RunOutcome>,
}

impl PipelineRun {
    pub fn dispatch(asset: SourceAsset, specs: &[RenditionSpec]) -> Self {
        let jobs = specs
            .iter()
            .cloned()
            .map(|spec| RenditionJob::new(spec, &asset))
            .collect();
        Self {
            id: Uuid::new_v4(),
            asset,
            jobs,
            state: RunState::Dispatched,
            outcome: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome
    }

    fn transition(&mut self, next: RunState) -> Result<(), RunStateError> {
        if !self.state.can_transition_to(next) {
            return Err(RunStateError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Hand the pending jobs to the fan-out engine.
    pub fn await_jobs(&mut self) -> Result<Vec<RenditionJob>, RunStateError> {
        self.transition(RunState::AwaitingJobs)?;
        Ok(mem::take(&mut self.jobs))
    }

    /// Take the jobs back once every branch is terminal and settle the outcome.
    pub fn settle(&mut self, jobs: Vec<RenditionJob>) -> Result<RunOutcome, RunStateError> {
        let pending = jobs.iter().filter(|job| !job.is_terminal()).count();
        if pending > 0 {
            return Err(RunStateError::PendingJobs(pending));
        }

        let succeeded = jobs.iter().filter(|job| job.succeeded()).count();
        let outcome = if succeeded == jobs.len() {
            RunOutcome::AllSucceeded
        } else if succeeded == 0 {
            RunOutcome::AllFailed
        } else {
            RunOutcome::PartialSuccess
        };

        self.transition(outcome.state())?;
        self.jobs = jobs;
        self.outcome = Some(outcome);
        Ok(outcome)
    }

    pub fn begin_cleanup(&mut self) -> Result<(), RunStateError> {
        self.transition(RunState::Cleanup)
    }

    pub fn finish(&mut self) -> Result<(), RunStateError> {
        self.transition(RunState::Terminal)
    }

    pub fn succeeded_jobs(&self) -> impl Iterator<Item = &RenditionJob> {
        self.jobs.iter().filter(|job| job.succeeded())
    }

    /// True when every job failed because the source itself could not be
    /// read, i.e. nothing is known to be wrong with the upload.
    pub fn source_unreadable(&self) -> bool {
        !self.jobs.is_empty()
            && self
                .jobs
                .iter()
                .all(|job| matches!(job.state, JobState::Failed(JobError::SourceRead(_))))
    }
}

/// What the invoking collaborator gets back for one delivery.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Skipped,
    AllSucceeded,
    PartialSuccess,
    AllFailed,
}

impl From<RunOutcome> for RunStatus {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::AllSucceeded => RunStatus::AllSucceeded,
            RunOutcome::PartialSuccess => RunStatus::PartialSuccess,
            RunOutcome::AllFailed => RunStatus::AllFailed,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub rendition: String,
    pub destination: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    pub bucket: String,
    pub path: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub jobs: Vec<JobSummary>,
    pub metadata_written: bool,
    pub source_deleted: bool,
    pub cleanup_errors: Vec<String>,
}

impl RunReport {
    pub fn skipped(event: &StorageEvent, reason: impl Into<String>) -> Self {
        Self {
            run_id: None,
            bucket: event.bucket.clone(),
            path: event.name.clone(),
            status: RunStatus::Skipped,
            reason: Some(reason.into()),
            jobs: Vec::new(),
            metadata_written: false,
            source_deleted: false,
            cleanup_errors: Vec::new(),
        }
    }

    pub fn for_run(run: &PipelineRun, outcome: RunOutcome) -> Self {
        let jobs = run
            .jobs
            .iter()
            .map(|job| JobSummary {
                rendition: job.spec.name.clone(),
                destination: job.destination.to_string(),
                succeeded: job.succeeded(),
                error: match &job.state {
                    JobState::Failed(err) => Some(err.to_string()),
                    _ => None,
                },
            })
            .collect();

        Self {
            run_id: Some(run.id),
            bucket: run.asset.location.bucket.clone(),
            path: run.asset.location.path.clone(),
            status: outcome.into(),
            reason: None,
            jobs,
            metadata_written: false,
            source_deleted: false,
            cleanup_errors: Vec::new(),
        }
    }
}
