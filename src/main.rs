//! niupepa is a CLI tool that harvests Māori-language text from the Niupepa
//! newspaper collection of the New Zealand Digital Library.
//!
//! The tool has three main commands:
//! 1. `ingest` - Walks the archive, caching pages and staging articles and paragraphs
//! 2. `classify` - Scores a text for Māori content
//! 3. `export` - Writes stored paragraphs or pages to a JSON file

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Builder;
use log::{LevelFilter, info, warn};

use niupepa::{
    ExportLevel, FragmentPolicy, Ingestor, WordClassifier,
    cache::{BodyStore, PersistentFetchCache},
    captcha::TwoCaptchaSolver,
    checkpoint::ProgressCheckpoint,
    config::{CacheConfig, FetchConfig, IngestConfig},
    constants::{
        CAPTCHA_API_KEY_ENV_NAME, DEFAULT_CACHE_DIR, DEFAULT_DB_PATH, DEFAULT_LISTING_URL,
        DEFAULT_NAMESPACE, DEFAULT_SAVE_FREQUENCY,
    },
    export::{ParagraphExport, export, write_json},
    fetch::FaultTolerantFetcher,
    notify::{CommandNotifier, LogNotifier, OperatorNotifier},
    page_fetcher::PageFetcher,
    session::HttpSession,
    storage::Storage,
};

/// A CLI tool to harvest Māori text from the Niupepa archive
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The command to execute (ingest, classify or export)
    #[command(subcommand)]
    command: Command,

    #[arg(long, short, action = clap::ArgAction::Count, help = "Output v(v...)erbosity: error (0), warn (1), info (2), debug (3), trace (4)", global = true, default_value_t = 2)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Walk the archive, extract and classify text and stage it for the database
    Ingest {
        /// File with one listing URL per line (default: the archive's newspaper listing)
        #[arg(long, short)]
        file: Option<PathBuf>,
        /// Directory holding the page cache and progress checkpoint
        #[arg(long, short)]
        dir: Option<PathBuf>,
        /// Fetch every page again instead of reading cached copies
        #[arg(long)]
        no_cache: bool,
        /// Write staged records to the database (dry run otherwise)
        #[arg(long)]
        commit: bool,
        /// Path to database file to store records
        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db: String,
        /// Path to a JSON file receiving the extracted paragraphs
        #[arg(long, short)]
        output: Option<String>,
        /// Unfinished paragraph followed by a heading: "discard" (default) or "attach"
        #[arg(long, default_value = "discard")]
        policy: FragmentPolicy,
        /// Wait for an operator to solve captchas instead of using the solving service
        #[arg(long)]
        manual_captcha: bool,
        /// Program run with a title and message to notify the operator
        #[arg(long)]
        notify_command: Option<String>,
    },
    /// Print the Māori word counts of a text as JSON
    Classify {
        /// File to classify (default: standard input)
        #[arg(long, short)]
        file: Option<PathBuf>,
    },
    /// Export stored records to a JSON file
    Export {
        /// Path to database file to read records from
        db: String,
        /// Path to output file to export records to
        output_file: String,
        /// Record granularity: "paragraph" (default) or "page"
        #[arg(long, short, default_value = "paragraph")]
        level: ExportLevel,
    },
}

struct IngestArgs {
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    no_cache: bool,
    commit: bool,
    db: String,
    output: Option<String>,
    policy: FragmentPolicy,
    manual_captcha: bool,
    notify_command: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    Builder::new()
        .filter_level(match cli.verbose {
            0 => LevelFilter::Error,
            1 => LevelFilter::Warn,
            2 => LevelFilter::Info,
            3 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        })
        .init();

    match cli.command {
        Command::Ingest {
            file,
            dir,
            no_cache,
            commit,
            db,
            output,
            policy,
            manual_captcha,
            notify_command,
        } => {
            handle_ingest_command(IngestArgs {
                file,
                dir,
                no_cache,
                commit,
                db,
                output,
                policy,
                manual_captcha,
                notify_command,
            })
            .await
        }
        Command::Classify { file } => handle_classify_command(file),
        Command::Export {
            db,
            output_file,
            level,
        } => export(&db, &output_file, level).map(|_| ()),
    }
}

async fn handle_ingest_command(args: IngestArgs) -> Result<()> {
    let listing_urls = match &args.file {
        Some(file) => read_listing_urls(file)?,
        None => vec![DEFAULT_LISTING_URL.to_owned()],
    };
    let config = IngestConfig {
        listing_urls,
        use_cache: !args.no_cache,
        commit: args.commit,
        fragment_policy: args.policy,
        save_frequency: DEFAULT_SAVE_FREQUENCY,
    };

    let cache_config = CacheConfig::new(
        args.dir.unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
        DEFAULT_NAMESPACE,
    );
    let cache = PersistentFetchCache::open(&cache_config, config.save_frequency)
        .context("Unable to open page cache")?;
    let bodies = BodyStore::open(&cache_config).context("Unable to open body store")?;
    let checkpoint = ProgressCheckpoint::open(&cache_config)
        .context("Unable to open progress checkpoint")?;
    info!("Using page cache {} with {} entries", cache_config.namespace_dir().display(), cache.len());

    let api_key = std::env::var(CAPTCHA_API_KEY_ENV_NAME).ok();
    let mut fetch_config = FetchConfig {
        auto_solve_captcha: !args.manual_captcha,
        ..FetchConfig::default()
    };
    if fetch_config.auto_solve_captcha && api_key.is_none() {
        warn!("{CAPTCHA_API_KEY_ENV_NAME} is not set, captchas have to be solved by hand");
        fetch_config.auto_solve_captcha = false;
    }

    let solver = TwoCaptchaSolver::new(
        api_key.unwrap_or_default(),
        fetch_config.poll_interval,
        fetch_config.captcha_timeout,
    );
    let notifier = match args
        .notify_command
        .as_deref()
        .and_then(CommandNotifier::from_command_line)
    {
        Some(notifier) => OperatorNotifier::Command(notifier),
        None => OperatorNotifier::Log(LogNotifier),
    };
    let session = HttpSession::new(fetch_config.user_agent.clone());
    let fetcher = FaultTolerantFetcher::new(session, solver, notifier, fetch_config)?;
    let pages = PageFetcher::new(cache, bodies, fetcher, config.use_cache);

    let store = if args.commit {
        Storage::new(&args.db)?
    } else {
        info!("Dry run, nothing is written to {}", args.db);
        Storage::open_in_memory()?
    };

    let mut ingestor = Ingestor::new(config, pages, store, checkpoint, WordClassifier::default());
    let outcome = ingestor.run().await;

    if let Some(output) = &args.output {
        let rows: Vec<ParagraphExport> = ingestor
            .records()
            .iter()
            .map(ParagraphExport::from)
            .collect();
        write_json(output, &rows)?;
        info!("Wrote {} paragraphs to {output}", rows.len());
    }

    let report = outcome?;
    info!(
        "Ingested {} issues ({} skipped), {} pages, {} articles, {} paragraphs",
        report.issues, report.skipped_issues, report.pages, report.articles, report.paragraphs
    );
    info!(
        "Fetched {} pages from the network",
        ingestor.source().network_fetches()
    );
    Ok(())
}

fn handle_classify_command(file: Option<PathBuf>) -> Result<()> {
    let text = if let Some(file) = file {
        fs::read_to_string(&file).with_context(|| format!("Failed to read {}", file.display()))?
    } else {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read standard input")?;
        text
    };

    let stats = WordClassifier::default().classify(&text);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn read_listing_urls(file: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read listing file: {}", file.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect())
}
