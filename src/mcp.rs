use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::{
    controller::{JobRequest, Seed},
    error,
    job::{Job, JobId, JobState},
    jobs::JobManager,
    report,
};

#[derive(Clone)]
pub struct GrantforgeMcpServer {
    jobs: Arc<JobManager>,
    tool_router: ToolRouter<Self>,
}

impl GrantforgeMcpServer {
    pub fn new(jobs: Arc<JobManager>) -> Self {
        Self {
            jobs,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl GrantforgeMcpServer {
    /// Start a section generation job.
    #[tool(
        name = "grantforge_submit",
        description = "Start generating one grant section. Returns a job id; poll it until the state is accepted, exhausted, failed or cancelled. Pass draft and notes to revise an existing draft."
    )]
    pub async fn grantforge_submit(
        &self,
        params: Parameters<SubmitParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let seed = params.draft.map(|draft| Seed {
            draft,
            notes: params.notes.unwrap_or_default(),
        });
        let request = JobRequest {
            section: params.section,
            requirement: params.requirement,
            acceptance_threshold: params.acceptance_threshold,
            max_attempts: params.max_attempts,
            seed,
        };

        let id = self
            .jobs
            .submit(request)
            .map_err(|e| invalid_params("cannot submit job", e))?;
        let job = self
            .jobs
            .poll(id)
            .map_err(|e| mcp_error("job vanished after submit", e))?;

        let summary = format!("Submitted job {id} for {}", job.section);
        state_result(summary, id, job.state)
    }

    /// Current state of a job, with every attempt so far.
    #[tool(
        name = "grantforge_poll",
        description = "Get the state, attempts and outcome of a job. Finished jobs are removed after polling unless keep is true."
    )]
    pub async fn grantforge_poll(
        &self,
        params: Parameters<PollParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let id = parse_id(&params.job_id)?;
        let job = self
            .jobs
            .poll(id)
            .map_err(|e| invalid_params("unknown job", e))?;

        if job.is_terminal() && !params.keep.unwrap_or(false) {
            // A concurrent poll may already have taken it.
            if let Err(e) = self.jobs.take(id) {
                debug!(job = %id, error = %e, "finished job already taken");
            }
        }

        let summary = report::format_job(&job, true);
        let structured = job_value(&job)?;
        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Request cancellation of a running job.
    #[tool(
        name = "grantforge_cancel",
        description = "Cancel a running job. Finished jobs are left unchanged."
    )]
    pub async fn grantforge_cancel(
        &self,
        params: Parameters<CancelParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let id = parse_id(&params.0.job_id)?;
        let state = self
            .jobs
            .cancel(id)
            .map_err(|e| invalid_params("unknown job", e))?;

        let summary = if state.is_terminal() {
            format!("Job {id} already finished ({state})")
        } else {
            format!("Cancellation requested for job {id}")
        };
        state_result(summary, id, state)
    }

    /// Score a draft against the guideline rules without generating.
    #[tool(
        name = "grantforge_validate",
        description = "Score a draft section against the voice and content guidelines. Returns the score, grade and every violation with a remediation hint."
    )]
    pub async fn grantforge_validate(
        &self,
        params: Parameters<ValidateParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let report = self.jobs.rules().validate(&params.draft, &params.section);
        let summary = report::format_report(&report);
        let structured = serde_json::to_value(&report)
            .map_err(|e| mcp_error("failed to serialize report", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for GrantforgeMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("grantforge", env!("CARGO_PKG_VERSION"))
                    .with_title("grantforge MCP"),
            )
            .with_instructions(
                "Use grantforge_submit to draft a section, then grantforge_poll until the job finishes. Use grantforge_validate to score text you already have.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitParams {
    /// Section name, e.g. "Need Statement"
    pub section: String,
    /// Funder requirement or RFP text the section must answer
    pub requirement: String,
    /// Minimum score to accept a draft (0-100)
    pub acceptance_threshold: Option<f64>,
    /// Maximum number of drafts
    pub max_attempts: Option<usize>,
    /// Existing draft to revise
    pub draft: Option<String>,
    /// Reviewer notes for the existing draft
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PollParams {
    pub job_id: String,
    /// Keep a finished job registered after this call
    pub keep: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancelParams {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateParams {
    pub section: String,
    pub draft: String,
}

fn parse_id(raw: &str) -> Result<JobId, rmcp::ErrorData> {
    raw.parse::<JobId>()
        .map_err(|e| invalid_params("invalid job id", e))
}

fn job_value(job: &Job) -> Result<serde_json::Value, rmcp::ErrorData> {
    serde_json::to_value(job).map_err(|e| mcp_error("failed to serialize job", e))
}

fn state_result(
    summary: String,
    id: JobId,
    state: JobState,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let mut result = CallToolResult::success(vec![Content::text(summary)]);
    result.structured_content = Some(json!({ "jobId": id.to_string(), "state": state }));
    Ok(result)
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

fn invalid_params(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::invalid_params(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(jobs: JobManager) -> error::Result<()> {
    let jobs = Arc::new(jobs);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let server = GrantforgeMcpServer::new(jobs.clone());
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        let result = running.waiting().await;
        jobs.cancel_all();
        result.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        chunk_id::ChunkId,
        collection::Chunk,
        config::Settings,
        embedding::Embedder,
        error::Result,
        generation::{CompletionProvider, Prompt},
        vector_store::{ScoredChunk, VectorStore},
    };

    struct NoStore;

    #[async_trait]
    impl VectorStore for NoStore {
        async fn search(
            &self,
            collection: &str,
            _query: &[f32],
            _top_k: usize,
            _timeout: Duration,
        ) -> Result<Vec<ScoredChunk>> {
            Err(error::Error::CollectionUnavailable {
                collection: collection.into(),
                reason: "offline".into(),
            })
        }

        async fn load_chunks(&self, _collection: &str, _ids: &[ChunkId]) -> Result<Vec<Chunk>> {
            Ok(Vec::new())
        }
    }

    struct Unit;

    #[async_trait]
    impl Embedder for Unit {
        async fn embed(&self, _text: &str, _timeout: Duration) -> Result<Vec<f32>> {
            Ok(vec![1.0])
        }
    }

    #[async_trait]
    impl CompletionProvider for Unit {
        async fn complete(&self, _prompt: &Prompt, _timeout: Duration) -> Result<String> {
            Ok("unused".into())
        }
    }

    fn server() -> GrantforgeMcpServer {
        let jobs = JobManager::new(
            Arc::new(Settings::default()),
            Arc::new(NoStore),
            Arc::new(Unit),
            Arc::new(Unit),
        );
        GrantforgeMcpServer::new(Arc::new(jobs))
    }

    #[tokio::test]
    async fn validate_tool_returns_structured_report() {
        let result = server()
            .grantforge_validate(Parameters(ValidateParams {
                section: "Need Statement".into(),
                draft: "We leverage synergy for underserved youth.".into(),
            }))
            .await
            .unwrap();

        let structured = result.structured_content.expect("structured");
        let score = structured.get("score").and_then(|v| v.as_f64()).unwrap();
        assert!(score < 85.0);
        let violations = structured
            .get("violations")
            .and_then(|v| v.as_array())
            .expect("violations array");
        assert!(violations.iter().any(|v| {
            v.get("rule_id").and_then(|r| r.as_str()) == Some("terminology:underserved")
        }));
    }

    #[tokio::test]
    async fn submit_then_poll_until_failed() {
        let server = server();
        let submitted = server
            .grantforge_submit(Parameters(SubmitParams {
                section: "Need Statement".into(),
                requirement: "Youth entrepreneurship".into(),
                acceptance_threshold: None,
                max_attempts: None,
                draft: None,
                notes: None,
            }))
            .await
            .unwrap();
        let job_id = submitted
            .structured_content
            .and_then(|v| v.get("jobId").and_then(|id| id.as_str()).map(str::to_string))
            .expect("job id");

        let id: JobId = job_id.parse().unwrap();
        server.jobs.wait(id).await.unwrap();

        let polled = server
            .grantforge_poll(Parameters(PollParams {
                job_id: job_id.clone(),
                keep: None,
            }))
            .await
            .unwrap();
        let structured = polled.structured_content.expect("structured");
        assert_eq!(structured["state"], "failed");
        assert_eq!(structured["outcome"]["cause"], "retrieval-unavailable");

        // Finished jobs are consumed by the poll.
        assert!(
            server
                .grantforge_poll(Parameters(PollParams { job_id, keep: None }))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn keep_leaves_finished_job_for_the_next_poll() {
        let server = server();
        let id = server
            .jobs
            .submit(crate::controller::JobRequest::new("Need Statement", "Youth entrepreneurship"))
            .unwrap();
        server.jobs.wait(id).await.unwrap();

        let poll = |keep| {
            server.grantforge_poll(Parameters(PollParams {
                job_id: id.to_string(),
                keep,
            }))
        };
        assert!(poll(Some(true)).await.is_ok());
        assert!(poll(Some(true)).await.is_ok());
        assert!(poll(None).await.is_ok());
        assert!(poll(None).await.is_err());
        assert!(server.jobs.list().is_empty());
    }

    #[tokio::test]
    async fn bad_job_ids_are_invalid_params() {
        let err = server()
            .grantforge_cancel(Parameters(CancelParams {
                job_id: "nope".into(),
            }))
            .await
            .unwrap_err();
        assert!(err.message.contains("invalid job id"));
    }
}
