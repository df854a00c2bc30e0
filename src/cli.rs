use std::path::PathBuf;

use clap::{ArgGroup, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "grantforge",
    about = "Retrieval-grounded grant section drafting with a voice quality gate"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Settings file (default: <data-dir>/grantforge.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect and load evidence collections
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },
    /// Draft one section, or every section with --all
    Generate(GenerateArgs),
    /// Revise an existing draft using reviewer notes
    Refine(RefineArgs),
    /// Score a draft against the guideline rules
    Validate(ValidateArgs),
    /// List configured sections
    Sections(JsonArgs),
    /// Show data directory and store statistics
    Status(JsonArgs),
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Collection subcommands --

#[derive(Debug, Subcommand)]
pub enum CollectionAction {
    /// List configured collections with stored chunk counts
    List(JsonArgs),
    /// Import pre-embedded chunks from a JSON Lines file
    Import {
        /// JSON Lines file, one chunk record per line
        file: PathBuf,
        /// Collection for records that do not name one
        #[arg(short = 'c', long)]
        collection: Option<String>,
    },
    /// Delete every stored chunk of a collection
    Clear {
        /// Collection id
        id: String,
    },
}

// -- Generate --

#[derive(Debug, Parser)]
#[command(group(
    ArgGroup::new("requirement_source")
        .required(true)
        .args(["requirement", "requirement_file"])
))]
#[command(group(
    ArgGroup::new("target")
        .required(true)
        .args(["section", "all"])
))]
pub struct GenerateArgs {
    /// Section to draft
    #[arg(short, long)]
    pub section: Option<String>,

    /// Draft every configured section concurrently
    #[arg(long)]
    pub all: bool,

    /// Funder requirement text
    #[arg(short, long)]
    pub requirement: Option<String>,

    /// Read the requirement from a file
    #[arg(long)]
    pub requirement_file: Option<PathBuf>,

    #[command(flatten)]
    pub limits: LimitArgs,

    /// Print the full draft instead of a preview
    #[arg(long)]
    pub full: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Parser)]
pub struct LimitArgs {
    /// Minimum score to accept a draft (0-100)
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Maximum number of drafts per job
    #[arg(long)]
    pub max_attempts: Option<usize>,
}

// -- Refine --

#[derive(Debug, Parser)]
pub struct RefineArgs {
    /// Section the draft belongs to
    #[arg(short, long)]
    pub section: String,

    /// File holding the draft to revise
    #[arg(long)]
    pub draft_file: PathBuf,

    /// Reviewer notes
    #[arg(short, long)]
    pub notes: String,

    /// Funder requirement text
    #[arg(short, long)]
    pub requirement: String,

    #[command(flatten)]
    pub limits: LimitArgs,

    /// Print the full draft instead of a preview
    #[arg(long)]
    pub full: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Validate --

#[derive(Debug, Parser)]
pub struct ValidateArgs {
    /// Section the draft belongs to
    #[arg(short, long)]
    pub section: String,

    /// Draft file ("-" reads stdin)
    pub draft_file: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "grantforge",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_generate_section() {
        let cli = Cli::parse_from([
            "grantforge",
            "generate",
            "--section",
            "Need Statement",
            "--requirement",
            "Youth programs",
            "--threshold",
            "90",
        ]);
        match cli.command {
            Command::Generate(args) => {
                assert_eq!(args.section.as_deref(), Some("Need Statement"));
                assert_eq!(args.requirement.as_deref(), Some("Youth programs"));
                assert_eq!(args.limits.threshold, Some(90.0));
                assert_eq!(args.limits.max_attempts, None);
                assert!(!args.all);
                assert!(!args.json);
            }
            _ => panic!("expected generate command"),
        }
    }

    #[test]
    fn generate_requires_a_target_and_a_requirement() {
        assert!(Cli::try_parse_from(["grantforge", "generate", "--requirement", "x"]).is_err());
        assert!(Cli::try_parse_from(["grantforge", "generate", "--all"]).is_err());
        assert!(
            Cli::try_parse_from([
                "grantforge", "generate", "--all", "--section", "Methodology", "-r", "x"
            ])
            .is_err()
        );
        assert!(Cli::try_parse_from(["grantforge", "generate", "--all", "-r", "x"]).is_ok());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["grantforge", "status", "--json", "-vv", "--data-dir", "/tmp/x"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
        assert!(matches!(cli.command, Command::Status(JsonArgs { json: true })));
    }

    #[test]
    fn parse_collection_import() {
        let cli = Cli::parse_from(["grantforge", "collection", "import", "chunks.jsonl", "-c", "voice_phrases"]);
        match cli.command {
            Command::Collection {
                action: CollectionAction::Import { file, collection },
            } => {
                assert_eq!(file, PathBuf::from("chunks.jsonl"));
                assert_eq!(collection.as_deref(), Some("voice_phrases"));
            }
            _ => panic!("expected collection import"),
        }
    }
}
