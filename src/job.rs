//! Job records and the retry state machine.
//!
//! ```text
//! Pending -> Retrieving -> Drafting -> Validating -> Accepted
//!                              ^            |------> Exhausted
//!                              |            v
//!                              +------- Revising
//! any non-terminal state -> Failed | Cancelled
//! ```
//!
//! Every transition goes through a method on [`Job`] that checks the current
//! state, so an out-of-order call is an error rather than a silently
//! corrupted record. Once a terminal state is set the job accepts no further
//! attempts.

use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    config::{SectionSettings, Settings, check_threshold},
    error::{Error, Result},
    router::Degradation,
    rules::ValidationReport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(JobId)
            .map_err(|_| Error::NotFound {
                kind: "job",
                name: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Pending,
    Retrieving,
    Drafting,
    Validating,
    Revising,
    Accepted,
    Exhausted,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Retrieving => "retrieving",
            JobState::Drafting => "drafting",
            JobState::Validating => "validating",
            JobState::Revising => "revising",
            JobState::Accepted => "accepted",
            JobState::Exhausted => "exhausted",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Accepted | JobState::Exhausted | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationAttempt {
    /// Zero-based.
    pub index: usize,
    pub draft: String,
    pub report: ValidationReport,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCause {
    RetrievalUnavailable,
    EmbeddingUnavailable,
    GenerationUnavailable,
    TimedOut,
    /// The job record rejected a transition; a bug, never a provider fault.
    Internal,
}

impl FailureCause {
    /// Cause reported for an error raised while a job runs.
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::RetrievalUnavailable | Error::CollectionUnavailable { .. } => {
                FailureCause::RetrievalUnavailable
            }
            Error::EmbeddingUnavailable(_) => FailureCause::EmbeddingUnavailable,
            Error::GenerationUnavailable(_) => FailureCause::GenerationUnavailable,
            _ => FailureCause::Internal,
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureCause::RetrievalUnavailable => "retrieval-unavailable",
            FailureCause::EmbeddingUnavailable => "embedding-unavailable",
            FailureCause::GenerationUnavailable => "generation-unavailable",
            FailureCause::TimedOut => "timed-out",
            FailureCause::Internal => "internal",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum JobOutcome {
    Accepted {
        draft: String,
        score: f64,
        attempt: usize,
    },
    /// Best draft across all attempts; none reached the threshold.
    Exhausted {
        draft: String,
        score: f64,
        attempt: usize,
        low_confidence: bool,
    },
    Failed {
        cause: FailureCause,
        detail: String,
    },
    Cancelled,
}

impl JobOutcome {
    pub fn draft(&self) -> Option<&str> {
        match self {
            JobOutcome::Accepted { draft, .. } | JobOutcome::Exhausted { draft, .. } => {
                Some(draft)
            }
            JobOutcome::Failed { .. } | JobOutcome::Cancelled => None,
        }
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            JobOutcome::Accepted { score, .. } | JobOutcome::Exhausted { score, .. } => {
                Some(*score)
            }
            JobOutcome::Failed { .. } | JobOutcome::Cancelled => None,
        }
    }
}

/// Effective per-job limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub section: SectionSettings,
    pub acceptance_threshold: f64,
    pub max_attempts: usize,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl JobConfig {
    /// Request overrides win over section overrides, which win over the
    /// global job defaults.
    pub fn resolve(
        settings: &Settings,
        section: &str,
        acceptance_threshold: Option<f64>,
        max_attempts: Option<usize>,
    ) -> Result<Self> {
        let section = settings.section(section);
        let acceptance_threshold = acceptance_threshold
            .or(section.acceptance_threshold)
            .unwrap_or(settings.job.acceptance_threshold);
        let max_attempts = max_attempts
            .or(section.max_attempts)
            .unwrap_or(settings.job.max_attempts);

        check_threshold(acceptance_threshold)?;
        if max_attempts == 0 {
            return Err(Error::Config("max attempts must be at least 1".into()));
        }

        Ok(Self {
            section,
            acceptance_threshold,
            max_attempts,
            timeout: settings.timeouts.job(),
        })
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// What the controller does after an attempt is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Revise,
    Exhaust,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub section: String,
    pub requirement: String,
    pub config: JobConfig,
    pub state: JobState,
    pub attempts: Vec<GenerationAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
    pub degraded: Vec<Degradation>,
    /// Chunks in the context package.
    pub context_hits: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(section: &str, requirement: &str, config: JobConfig) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            section: section.to_string(),
            requirement: requirement.to_string(),
            config,
            state: JobState::Pending,
            attempts: Vec::new(),
            outcome: None,
            degraded: Vec::new(),
            context_hits: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn start_retrieval(&mut self) -> Result<()> {
        self.transition(&[JobState::Pending], JobState::Retrieving)
    }

    /// Record the context package summary and begin the first draft.
    pub fn context_ready(&mut self, degraded: Vec<Degradation>, hits: usize) -> Result<()> {
        self.transition(&[JobState::Retrieving], JobState::Drafting)?;
        self.degraded = degraded;
        self.context_hits = hits;
        Ok(())
    }

    pub fn start_validating(&mut self) -> Result<()> {
        self.transition(&[JobState::Drafting], JobState::Validating)
    }

    pub fn start_revision(&mut self) -> Result<()> {
        self.transition(&[JobState::Revising], JobState::Drafting)
    }

    /// Append the attempt and decide what happens next.
    pub fn record_attempt(
        &mut self,
        draft: String,
        report: ValidationReport,
    ) -> Result<Decision> {
        if self.state != JobState::Validating {
            return Err(self.invalid(JobState::Validating));
        }
        if self.attempts.len() >= self.config.max_attempts {
            return Err(self.invalid(JobState::Drafting));
        }

        let score = report.score;
        let index = self.attempts.len();
        self.attempts.push(GenerationAttempt {
            index,
            draft: draft.clone(),
            report,
            timestamp: Utc::now(),
        });

        if score >= self.config.acceptance_threshold {
            self.finish(
                JobState::Accepted,
                JobOutcome::Accepted {
                    draft,
                    score,
                    attempt: index,
                },
            );
            return Ok(Decision::Accept);
        }

        if self.attempts.len() < self.config.max_attempts {
            self.set_state(JobState::Revising);
            return Ok(Decision::Revise);
        }

        let best = self.best_attempt().map(|a| (a.draft.clone(), a.report.score, a.index));
        if let Some((draft, score, attempt)) = best {
            self.finish(
                JobState::Exhausted,
                JobOutcome::Exhausted {
                    draft,
                    score,
                    attempt,
                    low_confidence: true,
                },
            );
        }
        Ok(Decision::Exhaust)
    }

    pub fn fail(&mut self, cause: FailureCause, detail: impl Into<String>) -> Result<()> {
        if self.is_terminal() {
            return Err(self.invalid(JobState::Failed));
        }
        self.finish(
            JobState::Failed,
            JobOutcome::Failed {
                cause,
                detail: detail.into(),
            },
        );
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        if self.is_terminal() {
            return Err(self.invalid(JobState::Cancelled));
        }
        self.finish(JobState::Cancelled, JobOutcome::Cancelled);
        Ok(())
    }

    /// Highest-scoring attempt; the earliest wins a tie.
    pub fn best_attempt(&self) -> Option<&GenerationAttempt> {
        self.attempts.iter().fold(None, |best, a| match best {
            Some(b) if b.report.score >= a.report.score => Some(b),
            _ => Some(a),
        })
    }

    pub fn last_attempt(&self) -> Option<&GenerationAttempt> {
        self.attempts.last()
    }

    fn transition(&mut self, from: &[JobState], to: JobState) -> Result<()> {
        if !from.contains(&self.state) {
            return Err(self.invalid(to));
        }
        self.set_state(to);
        Ok(())
    }

    fn finish(&mut self, state: JobState, outcome: JobOutcome) {
        self.outcome = Some(outcome);
        self.set_state(state);
    }

    fn set_state(&mut self, state: JobState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    fn invalid(&self, to: JobState) -> Error {
        Error::InvalidTransition {
            from: self.state.as_str(),
            to: to.as_str(),
        }
    }
}

/// Shared handle to a running job.
///
/// The lock is held only inside [`JobHandle::update`] and
/// [`JobHandle::snapshot`], never across an await.
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    job: Arc<Mutex<Job>>,
    state: Arc<watch::Sender<JobState>>,
}

impl JobHandle {
    pub fn new(job: Job) -> Self {
        let (state, _) = watch::channel(job.state);
        Self {
            id: job.id,
            job: Arc::new(Mutex::new(job)),
            state: Arc::new(state),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    pub fn snapshot(&self) -> Job {
        self.job
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `f` to the job and publish the resulting state.
    pub fn update<T>(&self, f: impl FnOnce(&mut Job) -> T) -> T {
        let mut job = self.job.lock().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut job);
        self.state.send_replace(job.state);
        result
    }

    /// Resolve once the job reaches a terminal state.
    pub async fn wait(&self) -> Job {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(JobState::is_terminal).await;
        self.snapshot()
    }
}
