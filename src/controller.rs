//! Drives one job from retrieval to a terminal outcome.
//!
//! Suspension points are the retrieval fan-out and each generation call.
//! Every state change is applied atomically through [`JobHandle::update`]
//! between awaits, so dropping the driving future on cancellation or job
//! timeout never leaves a half-applied transition behind.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    assembler::assemble,
    error::Result,
    generation::{Feedback, GenerationGateway, SectionSpec},
    job::{Decision, FailureCause, Job, JobHandle},
    router::{CollectionRouter, RetrievalRequest},
    rules::RuleSet,
};

/// An existing draft to revise instead of writing from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    pub draft: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub section: String,
    pub requirement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<Seed>,
}

impl JobRequest {
    pub fn new(section: &str, requirement: &str) -> Self {
        Self {
            section: section.to_string(),
            requirement: requirement.to_string(),
            acceptance_threshold: None,
            max_attempts: None,
            seed: None,
        }
    }
}

pub struct RetryController {
    router: CollectionRouter,
    gateway: GenerationGateway,
    rules: Arc<RuleSet>,
}

impl RetryController {
    pub fn new(router: CollectionRouter, gateway: GenerationGateway, rules: Arc<RuleSet>) -> Self {
        Self {
            router,
            gateway,
            rules,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Run the job to a terminal state. Never returns an error: every
    /// failure is recorded on the job.
    pub async fn run(&self, handle: &JobHandle, seed: Option<Seed>, cancel: CancellationToken) {
        let timeout = handle.snapshot().config.timeout;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Stop::Cancelled),
            result = tokio::time::timeout(timeout, self.drive(handle, seed)) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(Stop::Failed(FailureCause::from_error(&e), e.to_string())),
                Err(_) => Err(Stop::Failed(
                    FailureCause::TimedOut,
                    format!("job exceeded {}s", timeout.as_secs_f64()),
                )),
            },
        };

        let job = handle.update(|job| {
            if let Err(stop) = result
                && !job.is_terminal()
            {
                // Terminal was checked above, so neither call can fail.
                let _ = match stop {
                    Stop::Cancelled => job.cancel(),
                    Stop::Failed(cause, detail) => job.fail(cause, detail),
                };
            }
            job.clone()
        });

        log_outcome(&job);
    }

    async fn drive(&self, handle: &JobHandle, seed: Option<Seed>) -> Result<()> {
        let job = handle.snapshot();
        let section = &job.config.section;

        handle.update(Job::start_retrieval)?;
        let request = RetrievalRequest {
            section: job.section.clone(),
            requirement: job.requirement.clone(),
        };
        let routed = self.router.route(&request, section).await?;
        let package = assemble(&routed, self.router.collections(), section);
        debug!(
            job = %job.id,
            hits = package.hits.len(),
            chars = package.total_chars,
            duplicates = package.dropped_duplicates,
            over_budget = package.dropped_over_budget,
            "context assembled"
        );
        if package.is_degraded() {
            warn!(job = %job.id, degraded = package.degraded.len(), "generating with degraded context");
        }
        handle.update(|j| j.context_ready(package.degraded.clone(), package.hits.len()))?;

        let spec = SectionSpec {
            name: job.section.clone(),
            instructions: section.instructions.clone(),
            requirement: job.requirement.clone(),
        };
        let notes = seed.as_ref().map(|s| s.notes.clone());
        let mut feedback = seed.map(|s| Feedback {
            revision: 0,
            previous_draft: s.draft,
            report: None,
            notes: Some(s.notes),
        });

        loop {
            let draft = self
                .gateway
                .generate(&spec, &package, &self.rules, feedback.as_ref())
                .await?;

            handle.update(Job::start_validating)?;
            let report = self.rules.validate(&draft, &spec.name);
            debug!(job = %job.id, score = report.score, violations = report.violations.len(), "draft validated");

            let (decision, attempts) = handle.update(|j| {
                j.record_attempt(draft.clone(), report.clone())
                    .map(|d| (d, j.attempts.len()))
            })?;

            match decision {
                Decision::Accept | Decision::Exhaust => return Ok(()),
                Decision::Revise => {
                    info!(
                        job = %job.id,
                        attempt = attempts,
                        score = report.score,
                        threshold = job.config.acceptance_threshold,
                        "score below threshold, revising"
                    );
                    handle.update(Job::start_revision)?;
                    feedback = Some(Feedback {
                        revision: attempts,
                        previous_draft: draft,
                        report: Some(report),
                        notes: notes.clone(),
                    });
                }
            }
        }
    }
}

enum Stop {
    Cancelled,
    Failed(FailureCause, String),
}

fn log_outcome(job: &Job) {
    match &job.outcome {
        Some(outcome) => match outcome.score() {
            Some(score) => info!(
                job = %job.id,
                section = %job.section,
                state = %job.state,
                score,
                attempts = job.attempts.len(),
                degraded = job.is_degraded(),
                "job finished"
            ),
            None => info!(job = %job.id, section = %job.section, state = %job.state, "job finished"),
        },
        None => warn!(job = %job.id, state = %job.state, "job ended without an outcome"),
    }
}
