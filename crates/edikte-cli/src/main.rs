use std::fs;
use std::process;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use edikte::appraisal::{document_text, extract_facts};
use edikte::config::{AppraisalMode, FetchConfig, RunConfig};
use edikte::filter::ObjectTypeFilter;
use edikte::notify::{LogNotifier, Notifier, TelegramNotifier};
use edikte::parser::parse_listing;
use edikte::scraper::{EdikteClient, SourceSite};
use edikte::store::{MemoryStore, NotionStore, RecordStore};
use edikte::types::Region;
use edikte::Pipeline;
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "edikte-monitor")]
#[command(about = "An edikte.justiz.gv.at auction monitor", long_about = None)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        global = true,
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(clap::Args)]
struct FetchArgs {
    #[arg(
        long,
        env = "EDIKTE_RETRIES",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..=10),
        help = "Attempts per request before giving up"
    )]
    retries: u32,

    #[arg(
        long,
        env = "EDIKTE_TIMEOUT",
        value_name = "SECONDS",
        default_value_t = 30,
        help = "Timeout per page request"
    )]
    timeout: u64,

    #[arg(
        long,
        env = "EDIKTE_DOCUMENT_TIMEOUT",
        value_name = "SECONDS",
        default_value_t = 60,
        help = "Timeout per appraisal document download"
    )]
    document_timeout: u64,
}

impl FetchArgs {
    fn client(&self) -> EdikteClient {
        let defaults = FetchConfig::default();
        let fetch = FetchConfig {
            pages: defaults
                .pages
                .with_attempts(self.retries)
                .with_timeout(Duration::from_secs(self.timeout)),
            documents: defaults
                .documents
                .with_attempts(self.retries)
                .with_timeout(Duration::from_secs(self.document_timeout)),
        };

        EdikteClient::new(fetch.pages, fetch.documents).unwrap_or_else(|e| {
            log::error!("Error creating source client: {}", e);
            process::exit(1);
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest notices, reconcile them with the record store and send the digest
    Run {
        #[arg(
            long,
            env = "EDIKTE_REGIONS",
            value_delimiter = ',',
            value_parser = parse_region,
            help = "Regions to harvest (default: all nine)"
        )]
        regions: Vec<Region>,

        #[arg(
            long = "exclude",
            env = "EDIKTE_EXCLUSIONS",
            value_delimiter = ',',
            help = "Object-type keywords to exclude, replacing the built-in list"
        )]
        exclusions: Vec<String>,

        #[arg(
            long,
            env = "EDIKTE_CONCURRENCY",
            default_value_t = 4,
            value_parser = clap::value_parser!(u16).range(1..=32),
            help = "Maximum concurrent fetches"
        )]
        concurrency: u16,

        #[command(flatten)]
        fetch: FetchArgs,

        #[arg(long, env = "NOTION_TOKEN", hide_env_values = true)]
        notion_token: Option<String>,

        #[arg(
            long,
            env = "NOTION_DATABASE_ID",
            help = "Notion database id or share URL"
        )]
        notion_database_id: Option<String>,

        #[arg(
            long,
            value_name = "FILE",
            help = "Keep records in a local JSON snapshot instead of Notion"
        )]
        snapshot: Option<String>,

        #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
        telegram_token: Option<String>,

        #[arg(long, env = "TELEGRAM_CHAT_ID")]
        telegram_chat_id: Option<String>,

        #[arg(long, help = "Plan and report, but write nothing to the store")]
        dry_run: bool,

        #[arg(long, help = "Do not download appraisal documents")]
        skip_appraisals: bool,

        #[arg(
            long,
            conflicts_with = "skip_appraisals",
            help = "Analyze appraisals even for records not flagged for download"
        )]
        all_appraisals: bool,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// List the current notices of one region
    List {
        #[arg(long, value_parser = parse_region, help = "Region to list")]
        region: Region,

        #[command(flatten)]
        fetch: FetchArgs,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// Extract owner and claim facts from an appraisal document
    Extract {
        #[arg(help = "Path or URL of the appraisal document (PDF or text)")]
        source: String,

        #[command(flatten)]
        fetch: FetchArgs,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
}

fn parse_region(s: &str) -> Result<Region, String> {
    Region::from_str(s).map_err(|e| e.to_string())
}

fn serialize_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}

fn open_store(
    snapshot: Option<String>,
    notion_token: Option<String>,
    notion_database_id: Option<String>,
) -> Arc<dyn RecordStore> {
    if let Some(path) = snapshot {
        let store = MemoryStore::open(&path).unwrap_or_else(|e| {
            log::error!("Error opening snapshot {}: {}", path, e);
            process::exit(1);
        });
        return Arc::new(store);
    }

    let (Some(token), Some(database_id)) = (notion_token, notion_database_id) else {
        log::error!(
            "Invalid args: NOTION_TOKEN and NOTION_DATABASE_ID are required without --snapshot"
        );
        process::exit(1);
    };
    let store = NotionStore::new(token, &database_id).unwrap_or_else(|e| {
        log::error!("Error creating Notion store: {}", e);
        process::exit(1);
    });
    Arc::new(store)
}

fn open_notifier(token: Option<String>, chat_id: Option<String>) -> Arc<dyn Notifier> {
    match (token, chat_id) {
        (Some(token), Some(chat_id)) => {
            let notifier = TelegramNotifier::new(token, chat_id).unwrap_or_else(|e| {
                log::error!("Error creating Telegram notifier: {}", e);
                process::exit(1);
            });
            Arc::new(notifier)
        }
        _ => {
            log::warn!("Telegram not configured, the digest goes to the log");
            Arc::new(LogNotifier)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.clone().into())
        .init();

    match cli.command {
        Commands::Run {
            regions,
            exclusions,
            concurrency,
            fetch,
            notion_token,
            notion_database_id,
            snapshot,
            telegram_token,
            telegram_chat_id,
            dry_run,
            skip_appraisals,
            all_appraisals,
            format,
        } => {
            let appraisals = if skip_appraisals {
                AppraisalMode::Off
            } else if all_appraisals {
                AppraisalMode::All
            } else {
                AppraisalMode::Flagged
            };
            let mut config = RunConfig {
                concurrency: concurrency.into(),
                appraisals,
                dry_run,
                ..RunConfig::default()
            };
            if !regions.is_empty() {
                config.regions = regions;
            }
            if !exclusions.is_empty() {
                config.filter = ObjectTypeFilter::new(&exclusions);
            }
            config.validate().unwrap_or_else(|e| {
                log::error!("Invalid args: {e}");
                process::exit(1);
            });

            let source = Arc::new(fetch.client());
            let store = open_store(snapshot, notion_token, notion_database_id);
            let notifier = open_notifier(telegram_token, telegram_chat_id);

            log::info!("Harvesting {} regions...", config.regions.len());

            let pipeline = Pipeline::new(source, store, notifier, config);
            let outcome = pipeline
                .run(chrono::Local::now().naive_local())
                .await
                .unwrap_or_else(|e| {
                    log::error!("Run aborted: {}", e);
                    process::exit(1);
                });

            match format {
                OutputFormat::Json => serialize_json(&outcome),
                OutputFormat::Text => {
                    let changes: Vec<_> = outcome
                        .plan
                        .actions
                        .iter()
                        .filter(|a| !a.is_noop())
                        .collect();
                    if changes.is_empty() {
                        println!("No changes.");
                    } else {
                        for (i, action) in changes.iter().enumerate() {
                            println!("{:>3}. {}", i + 1, action);
                        }
                    }
                    print!("{}", outcome.summary);
                }
            }
        }

        Commands::List {
            region,
            fetch,
            format,
        } => {
            let client = fetch.client();
            let url = client.listing_url(region);
            log::info!("Fetching notices for {} from {}...", region, url);

            let html = client.listing_page(region).await.unwrap_or_else(|e| {
                log::error!("Error fetching listing: {}", e);
                process::exit(1);
            });
            let summaries = parse_listing(&html, region, &url).unwrap_or_else(|e| {
                log::error!("Error parsing listing: {}", e);
                process::exit(1);
            });

            match format {
                OutputFormat::Json => serialize_json(&summaries),
                OutputFormat::Text => {
                    if summaries.is_empty() {
                        println!("No entries to display.");
                    } else {
                        for (i, summary) in summaries.iter().enumerate() {
                            println!("{:>3}. {}", i + 1, summary);
                        }
                    }
                }
            }
        }

        Commands::Extract {
            source,
            fetch,
            format,
        } => {
            let is_url = source.starts_with("http://") || source.starts_with("https://");
            let bytes = if is_url {
                log::info!("Downloading appraisal from {}...", source);
                fetch.client().document(&source).await.unwrap_or_else(|e| {
                    log::error!("Error downloading document: {}", e);
                    process::exit(1);
                })
            } else {
                fs::read(&source).unwrap_or_else(|e| {
                    log::error!("Error reading {}: {}", source, e);
                    process::exit(1);
                })
            };

            let text = document_text(&source, bytes).await.unwrap_or_else(|e| {
                log::error!("{}", e);
                process::exit(1);
            });
            let extraction = extract_facts(&text, is_url.then_some(source.as_str()));

            match format {
                OutputFormat::Json => serialize_json(&extraction),
                OutputFormat::Text => {
                    println!("{}", source);
                    print!("{}", extraction.facts);
                    for group in &extraction.missing {
                        println!("  Not found: {}", group);
                    }
                }
            }
        }
    }
}
