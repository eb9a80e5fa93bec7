//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use longform_core::{Orchestrator, Phase, ProgressEvent, progress_channel, write_document};
use longform_knowledge::KnowledgeBase;
use longform_shared::{
    AppConfig, GenerationOptions, ResearchDepth, init_config, load_config, validate_api_key,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::output;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Longform: research and write long-form articles.
#[derive(Parser)]
#[command(
    name = "longform",
    version,
    about = "Research a subject and write a long-form Markdown article with a team of model roles.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Plan, research, write and edit an article.
    Write(WriteArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags for `longform write`. Each overrides the matching config value.
#[derive(clap::Args, Debug)]
pub(crate) struct WriteArgs {
    /// Subject of the article.
    #[arg(short, long, env = "LONGFORM_SUBJECT")]
    pub subject: String,

    /// Target length of the whole article in words.
    #[arg(long, env = "LONGFORM_TARGET_WORDS")]
    pub target_words: Option<u32>,

    /// File with style guidelines for every role.
    #[arg(long, env = "LONGFORM_STYLE_GUIDE")]
    pub style_guide: Option<PathBuf>,

    /// Directory the roles may browse and read.
    #[arg(long, env = "LONGFORM_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// File with extra context for the planner and writers.
    #[arg(long, env = "LONGFORM_ADDITIONAL_CONTEXT")]
    pub additional_context: Option<PathBuf>,

    /// Output file (defaults to `<slug of title>.md`).
    #[arg(short, long, env = "LONGFORM_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Maximum number of sections written concurrently.
    #[arg(long, env = "LONGFORM_MAX_WRITERS")]
    pub max_writers: Option<usize>,

    /// Whole-run deadline in minutes.
    #[arg(long, env = "LONGFORM_TIMEOUT_MINS")]
    pub timeout_mins: Option<u64>,

    /// Research depth: basic, deep, deep_web or academic.
    #[arg(long, env = "LONGFORM_RESEARCH_DEPTH")]
    pub research_depth: Option<ResearchDepth>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "longform=info",
        1 => "longform=debug",
        _ => "longform=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Write(args) => cmd_write(args).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

fn read_text(path: &Path, what: &str) -> Result<String> {
    std::fs::read_to_string(path)
        .wrap_err_with(|| format!("cannot read {what} file {}", path.display()))
}

/// Config defaults overridden by whatever flags were given.
fn generation_options(config: &AppConfig, args: &WriteArgs) -> Result<GenerationOptions> {
    let mut options = GenerationOptions::from(config);
    if let Some(words) = args.target_words {
        options.target_word_count = words;
    }
    if let Some(writers) = args.max_writers {
        options.max_concurrent_writers = writers;
    }
    if let Some(mins) = args.timeout_mins {
        options.timeout = Duration::from_secs(mins.saturating_mul(60));
    }
    if let Some(depth) = args.research_depth {
        options.research_depth = depth;
    }
    if let Some(path) = &args.style_guide {
        options.style_guidelines = Some(read_text(path, "style guide")?);
    }
    if let Some(path) = &args.additional_context {
        options.additional_context = Some(read_text(path, "additional context")?);
    }
    options.validate()?;
    Ok(options)
}

/// Append the workspace listing to the additional context.
fn with_workspace_tree(context: Option<String>, tree: &str) -> String {
    let listing = format!("**Workspace:**\n\n{tree}");
    match context {
        Some(existing) if !existing.trim().is_empty() => format!("{}\n\n{listing}", existing.trim_end()),
        _ => listing,
    }
}

async fn cmd_write(args: WriteArgs) -> Result<()> {
    let config = load_config()?;
    let mut options = generation_options(&config, &args)?;
    let api_key = validate_api_key(&config)?;

    let mut forwarded = longform_shared::ToolSet::new();
    if let Some(root) = &args.workspace {
        if !root.is_dir() {
            color_eyre::eyre::bail!("workspace '{}' is not a directory", root.display());
        }
        forwarded.extend(&longform_tools::workspace_tools(root));
        if let Some(tree) = longform_tools::directory_tree(root) {
            options.additional_context = Some(with_workspace_tree(options.additional_context, &tree));
        }
    }

    let knowledge = Arc::new(KnowledgeBase::open(args.subject.as_str()).await?);
    let research = longform_tools::research_tools(&config)?;
    let roles = longform_agents::build_roles(&config, &api_key, research)?;

    info!(
        subject = %args.subject,
        target_words = options.target_word_count,
        writers = roles.writers.len(),
        max_concurrent = options.max_concurrent_writers,
        research_depth = %options.research_depth,
        model = %config.completion.model,
        "starting article"
    );

    let (sink, events) = progress_channel();
    let bar = progress_bar();
    let render = spawn_progress(bar.clone(), events);

    let orchestrator = Orchestrator::new(roles.planner, roles.writers, roles.editor, options)?
        .with_tools(forwarded)
        .with_knowledge(Arc::clone(&knowledge))
        .with_progress(sink);

    let result = write_document(&orchestrator, &args.subject).await;
    drop(orchestrator);
    if tokio::time::timeout(Duration::from_secs(1), render).await.is_err() {
        warn!("progress renderer did not finish");
    }
    bar.finish_and_clear();

    if let Err(e) = knowledge.close().await {
        warn!(error = %e, "failed to close knowledge base");
    }

    let document = result?;
    let path = args
        .output
        .unwrap_or_else(|| output::default_output_path(&document));
    let rendered = output::render_document(&document, &args.subject)?;
    output::write_document_file(&path, &rendered)?;

    println!();
    println!("  Article written!");
    println!("  Title:    {}", document.metadata.title);
    println!("  Words:    {}", document.metadata.word_count);
    println!("  Sections: {}", document.sections.len());
    println!("  Sources:  {}", document.metadata.sources.len());
    println!("  Path:     {}", path.display());
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress rendering
// ---------------------------------------------------------------------------

const BAR_LENGTH: u64 = 1000;

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(BAR_LENGTH);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.cyan} [{elapsed_precise}] [{bar:30.cyan/blue}] {percent:>3}% {msg}",
    ) {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Bar position for an event; never moves backwards.
fn bar_position(current: u64, event: &ProgressEvent) -> u64 {
    let target = (event.progress.clamp(0.0, 1.0) * BAR_LENGTH as f64).round() as u64;
    current.max(target)
}

fn spawn_progress(bar: ProgressBar, mut events: mpsc::Receiver<ProgressEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            bar.set_position(bar_position(bar.position(), &event));
            bar.set_message(format!("{}: {}", event.phase, event.step));
            if event.phase == Phase::Completed {
                break;
            }
        }
    })
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
