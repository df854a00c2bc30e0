//! grantforge - retrieval-grounded drafting of grant sections behind a
//! voice quality gate.
//!
//! A job fans a funder requirement out across several evidence collections
//! (past content, voice phrases, data points, participant quotes, co-design
//! examples, program descriptions), assembles a bounded context package,
//! asks a completion provider for a draft and scores it against declarative
//! guideline rules. Drafts below the acceptance threshold are revised with
//! the violations as feedback until one passes or the attempt budget runs
//! out.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use grantforge::{ChunkStore, DataDir, JobManager, Settings};
//! use grantforge::controller::JobRequest;
//!
//! # async fn run() -> grantforge::Result<()> {
//! let data_dir = DataDir::resolve(None)?;
//! let settings = Settings::load(None, &data_dir)?;
//! let store = ChunkStore::open(&data_dir.chunks_db())?;
//! let jobs = JobManager::with_openai(Arc::new(settings), Arc::new(store));
//!
//! let id = jobs.submit(JobRequest::new(
//!     "Need Statement",
//!     "Describe the need for youth entrepreneurship programs in public housing.",
//! ))?;
//! let job = jobs.wait(id).await?;
//! if let Some(draft) = job.outcome.as_ref().and_then(|o| o.draft()) {
//!     println!("{draft}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Validation alone needs no provider:
//!
//! ```
//! use grantforge::{RuleSet, rules::default_guidelines};
//!
//! let rules = RuleSet::new(default_guidelines());
//! let report = rules.validate("We leverage synergies for underserved youth.", "Need Statement");
//! assert!(report.score < 85.0);
//! ```

pub mod assembler;
pub mod chunk_id;
pub mod collection;
pub mod config;
pub mod controller;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod job;
pub mod jobs;
pub mod mcp;
pub mod provider;
pub mod report;
pub mod router;
pub mod rules;
pub mod text_util;
pub mod vector_store;

pub use chunk_id::ChunkId;
pub use config::Settings;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use jobs::JobManager;
pub use rules::RuleSet;
pub use vector_store::ChunkStore;
