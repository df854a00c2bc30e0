//! In-memory job registry: submit, poll, cancel, wait and take.
//!
//! Jobs run as independent tokio tasks sharing only the immutable settings,
//! the rule set and the read-only vector store.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::Settings,
    controller::{JobRequest, RetryController},
    embedding::{Embedder, OpenAiEmbedder},
    error::{Error, Result},
    generation::{CompletionProvider, GenerationGateway, OpenAiCompletions},
    job::{Job, JobConfig, JobHandle, JobId, JobState},
    provider::OpenAiClient,
    router::CollectionRouter,
    rules::RuleSet,
    vector_store::VectorStore,
};

struct Entry {
    handle: JobHandle,
    cancel: CancellationToken,
}

pub struct JobManager {
    settings: Arc<Settings>,
    controller: Arc<RetryController>,
    jobs: Mutex<HashMap<JobId, Entry>>,
}

/// Outcome of a full application: one job per section.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationSummary {
    pub jobs: Vec<Job>,
    /// Mean score over sections that produced a draft.
    pub mean_score: Option<f64>,
}

impl ApplicationSummary {
    pub fn new(jobs: Vec<Job>) -> Self {
        let scores: Vec<f64> = jobs
            .iter()
            .filter_map(|j| j.outcome.as_ref().and_then(|o| o.score()))
            .collect();
        let mean_score = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        };
        Self { jobs, mean_score }
    }
}

impl JobManager {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        completions: Arc<dyn CompletionProvider>,
    ) -> Self {
        let router = CollectionRouter::new(store, embedder, &settings);
        let gateway = GenerationGateway::new(completions, &settings);
        let rules = Arc::new(RuleSet::new(settings.rules.clone()));
        Self {
            controller: Arc::new(RetryController::new(router, gateway, rules)),
            settings,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Manager backed by the configured OpenAI-compatible provider.
    pub fn with_openai(settings: Arc<Settings>, store: Arc<dyn VectorStore>) -> Self {
        let client = Arc::new(OpenAiClient::new(&settings.provider));
        let embedder = Arc::new(OpenAiEmbedder::new(
            client.clone(),
            &settings.provider.embedding_model,
        ));
        let completions = Arc::new(OpenAiCompletions::new(
            client,
            &settings.provider.completion_model,
        ));
        Self::new(settings, store, embedder, completions)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn rules(&self) -> &RuleSet {
        self.controller.rules()
    }

    /// Start a job in the background. Must be called inside a tokio
    /// runtime.
    pub fn submit(&self, request: JobRequest) -> Result<JobId> {
        if request.requirement.trim().is_empty() {
            return Err(Error::Config("requirement must not be empty".into()));
        }
        let config = JobConfig::resolve(
            &self.settings,
            &request.section,
            request.acceptance_threshold,
            request.max_attempts,
        )?;
        let section = config.section.name.clone();
        let job = Job::new(&section, &request.requirement, config);
        let id = job.id;
        let handle = JobHandle::new(job);
        let cancel = CancellationToken::new();

        info!(
            job = %id,
            section = %request.section,
            seeded = request.seed.is_some(),
            "job submitted"
        );

        self.entries().insert(
            id,
            Entry {
                handle: handle.clone(),
                cancel: cancel.clone(),
            },
        );

        let controller = self.controller.clone();
        let seed = request.seed;
        tokio::spawn(async move {
            controller.run(&handle, seed, cancel).await;
        });

        Ok(id)
    }

    /// Current state and attempts so far.
    pub fn poll(&self, id: JobId) -> Result<Job> {
        Ok(self.handle(id)?.snapshot())
    }

    /// Request cancellation. A finished job is left as it is. Returns the
    /// state at the time of the call.
    pub fn cancel(&self, id: JobId) -> Result<JobState> {
        let entries = self.entries();
        let entry = entries.get(&id).ok_or_else(|| not_found(id))?;
        let state = entry.handle.state();
        if !state.is_terminal() {
            info!(job = %id, state = %state, "cancelling job");
            entry.cancel.cancel();
        }
        Ok(state)
    }

    pub async fn wait(&self, id: JobId) -> Result<Job> {
        let handle = self.handle(id)?;
        Ok(handle.wait().await)
    }

    /// Remove a finished job and return its final record.
    pub fn take(&self, id: JobId) -> Result<Job> {
        let mut entries = self.entries();
        let entry = entries.get(&id).ok_or_else(|| not_found(id))?;
        if !entry.handle.state().is_terminal() {
            return Err(Error::JobNotFinished(id.to_string()));
        }
        let job = entry.handle.snapshot();
        entries.remove(&id);
        Ok(job)
    }

    /// Snapshots of every known job, oldest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .entries()
            .values()
            .map(|e| e.handle.snapshot())
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Run one job per section (every configured section when `sections`
    /// is empty), wait for all of them and consume their records.
    pub async fn submit_application(
        &self,
        requirement: &str,
        sections: &[String],
    ) -> Result<ApplicationSummary> {
        let names: Vec<String> = if sections.is_empty() {
            self.settings
                .section_names()
                .into_iter()
                .map(str::to_string)
                .collect()
        } else {
            sections.to_vec()
        };

        let mut ids = Vec::with_capacity(names.len());
        for name in &names {
            match self.submit(JobRequest::new(name, requirement)) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in &ids {
                        let _ = self.cancel(*id);
                    }
                    return Err(e);
                }
            }
        }

        let finished = join_all(ids.iter().map(|id| self.wait(*id))).await;
        let mut jobs = Vec::with_capacity(ids.len());
        for (id, result) in ids.iter().zip(finished) {
            jobs.push(result?);
            self.take(*id)?;
        }

        let summary = ApplicationSummary::new(jobs);
        info!(
            sections = summary.jobs.len(),
            mean_score = summary.mean_score.unwrap_or(0.0),
            "application finished"
        );
        Ok(summary)
    }

    /// Cancel every unfinished job.
    pub fn cancel_all(&self) {
        for entry in self.entries().values() {
            if !entry.handle.state().is_terminal() {
                entry.cancel.cancel();
            }
        }
    }

    fn handle(&self, id: JobId) -> Result<JobHandle> {
        self.entries()
            .get(&id)
            .map(|e| e.handle.clone())
            .ok_or_else(|| not_found(id))
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, Entry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_found(id: JobId) -> Error {
    Error::NotFound {
        kind: "job",
        name: id.to_string(),
    }
}
