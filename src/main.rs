use std::{
    io::Read,
    path::Path,
    process::ExitCode,
    sync::Arc,
};

use clap::Parser;
use grantforge::{
    ChunkStore,
    DataDir,
    Error,
    JobManager,
    Result,
    RuleSet,
    Settings,
    collection::ChunkRecord,
    controller::{JobRequest, Seed},
    job::{Job, JobState},
    mcp,
    report::{self, CollectionStatus},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{CollectionAction, Command, GenerateArgs, RefineArgs, ValidateArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("GRANTFORGE_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = cli::Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(ExitCode::SUCCESS);
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let settings = Settings::load(cli.config.as_deref(), &data_dir)?;

    match cli.command {
        Command::Collection { action } => match action {
            CollectionAction::List(args) => {
                collection_list(&settings, &data_dir, args.json)?;
            }
            CollectionAction::Import { file, collection } => {
                collection_import(&settings, &data_dir, &file, collection.as_deref())?;
            }
            CollectionAction::Clear { id } => {
                collection_clear(&data_dir, &id)?;
            }
        },
        Command::Generate(args) => return cmd_generate(settings, &data_dir, &args),
        Command::Refine(args) => return cmd_refine(settings, &data_dir, &args),
        Command::Validate(args) => cmd_validate(&settings, &args)?,
        Command::Sections(args) => {
            if args.json {
                println!("{}", report::to_json(&settings.sections)?);
            } else {
                print!("{}", report::format_sections(&settings.sections));
            }
        }
        Command::Status(args) => cmd_status(&settings, &data_dir, args.json)?,
        Command::Mcp => {
            let jobs = job_manager(settings, &data_dir)?;
            mcp::run_mcp(jobs)?;
        }
        Command::Completions(_) => {}
    }

    Ok(ExitCode::SUCCESS)
}

fn job_manager(settings: Settings, data_dir: &DataDir) -> Result<JobManager> {
    let store = ChunkStore::open(&data_dir.chunks_db())?;
    Ok(JobManager::with_openai(Arc::new(settings), Arc::new(store)))
}

fn collection_statuses(
    settings: &Settings,
    store: &ChunkStore,
) -> Result<Vec<CollectionStatus>> {
    settings
        .collections
        .iter()
        .map(|c| {
            Ok(CollectionStatus {
                collection: c.clone(),
                chunks: store.count(&c.id)?,
            })
        })
        .collect()
}

fn collection_list(settings: &Settings, data_dir: &DataDir, json: bool) -> Result<()> {
    let store = ChunkStore::open(&data_dir.chunks_db())?;
    let statuses = collection_statuses(settings, &store)?;
    if json {
        println!("{}", report::to_json(&statuses)?);
    } else {
        print!("{}", report::format_collections(&statuses));
    }
    Ok(())
}

fn collection_import(
    settings: &Settings,
    data_dir: &DataDir,
    file: &Path,
    collection: Option<&str>,
) -> Result<()> {
    if let Some(id) = collection
        && settings.collection(id).is_none()
    {
        return Err(Error::NotFound {
            kind: "collection",
            name: id.to_string(),
        });
    }

    let text = std::fs::read_to_string(file)?;
    let records = ChunkRecord::parse_jsonl(&text)?;
    eprintln!("Read {} record(s) from {}", records.len(), file.display());

    let store = ChunkStore::open(&data_dir.chunks_db())?;
    let stats = store.import(&records, collection)?;

    for (id, count) in &stats.imported {
        if settings.collection(id).is_none() {
            warn!(collection = %id, "imported into a collection that is not configured; it will not be queried");
        }
        println!("Imported {count} chunk(s) into '{id}'");
    }
    if stats.skipped > 0 {
        eprintln!(
            "Skipped {} record(s) with no collection or an empty embedding",
            stats.skipped
        );
    }
    Ok(())
}

fn collection_clear(data_dir: &DataDir, id: &str) -> Result<()> {
    let store = ChunkStore::open(&data_dir.chunks_db())?;
    if store.clear(id)? {
        println!("Cleared collection '{id}'");
    } else {
        println!("Collection '{id}' has no stored chunks");
    }
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Config(format!("failed to start tokio runtime: {e}")))
}

/// Cancel every job on Ctrl-C.
fn cancel_on_interrupt(manager: &Arc<JobManager>) -> tokio::task::JoinHandle<()> {
    let manager = manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling jobs");
            manager.cancel_all();
        }
    })
}

fn read_requirement(args: &GenerateArgs) -> Result<String> {
    match (&args.requirement, &args.requirement_file) {
        (Some(text), _) => Ok(text.clone()),
        (None, Some(path)) => Ok(std::fs::read_to_string(path)?),
        (None, None) => Err(Error::Config(
            "--requirement or --requirement-file is required".into(),
        )),
    }
}

fn cmd_generate(settings: Settings, data_dir: &DataDir, args: &GenerateArgs) -> Result<ExitCode> {
    let requirement = read_requirement(args)?;
    let manager = Arc::new(job_manager(settings, data_dir)?);

    runtime()?.block_on(async {
        let interrupt = cancel_on_interrupt(&manager);

        if args.all {
            let summary = manager.submit_application(&requirement, &[]).await?;
            interrupt.abort();
            if args.json {
                println!("{}", report::to_json(&summary)?);
            } else {
                print!("{}", report::format_application(&summary, args.full));
            }
            let all_failed = summary.jobs.iter().all(|j| j.state == JobState::Failed);
            return Ok(exit_code(!all_failed));
        }

        let section = args.section.clone().unwrap_or_default();
        let request = JobRequest {
            acceptance_threshold: args.limits.threshold,
            max_attempts: args.limits.max_attempts,
            ..JobRequest::new(&section, &requirement)
        };
        let job = run_one(&manager, request).await?;
        interrupt.abort();
        print_job(&job, args.json, args.full)
    })
}

fn cmd_refine(settings: Settings, data_dir: &DataDir, args: &RefineArgs) -> Result<ExitCode> {
    let draft = std::fs::read_to_string(&args.draft_file)?;
    let manager = Arc::new(job_manager(settings, data_dir)?);

    runtime()?.block_on(async {
        let interrupt = cancel_on_interrupt(&manager);
        let request = JobRequest {
            acceptance_threshold: args.limits.threshold,
            max_attempts: args.limits.max_attempts,
            seed: Some(Seed {
                draft,
                notes: args.notes.clone(),
            }),
            ..JobRequest::new(&args.section, &args.requirement)
        };
        let job = run_one(&manager, request).await?;
        interrupt.abort();
        print_job(&job, args.json, args.full)
    })
}

async fn run_one(manager: &JobManager, request: JobRequest) -> Result<Job> {
    let id = manager.submit(request)?;
    info!(job = %id, "waiting for job");
    manager.wait(id).await?;
    manager.take(id)
}

fn print_job(job: &Job, json: bool, full: bool) -> Result<ExitCode> {
    if json {
        println!("{}", report::to_json(job)?);
    } else {
        print!("{}", report::format_job(job, full));
    }
    Ok(exit_code(matches!(
        job.state,
        JobState::Accepted | JobState::Exhausted
    )))
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn cmd_validate(settings: &Settings, args: &ValidateArgs) -> Result<()> {
    let draft = if args.draft_file.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        text
    } else {
        std::fs::read_to_string(&args.draft_file)?
    };

    let rules = RuleSet::new(settings.rules.clone());
    let report = rules.validate(&draft, &args.section);
    if args.json {
        println!("{}", report::to_json(&report)?);
    } else {
        print!("{}", report::format_report(&report));
    }
    Ok(())
}

fn cmd_status(settings: &Settings, data_dir: &DataDir, json: bool) -> Result<()> {
    let store = ChunkStore::open(&data_dir.chunks_db())?;
    let statuses = collection_statuses(settings, &store)?;
    let root = data_dir.root();
    if json {
        let value = report::status_json(root, &statuses, settings.sections.len(), settings.rules.len());
        println!("{value}");
    } else {
        print!(
            "{}",
            report::format_status(root, &statuses, settings.sections.len(), settings.rules.len())
        );
    }
    Ok(())
}
