use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hauler_client::{CatalogConfig, CatalogDriver, EgressProxy, JqTransform, PagedApiDriver, ReqwestTransport};
use hauler_core::error::{ErrorCategory, ErrorPolicy};
use hauler_core::persistence::PersistenceWorker;
use hauler_core::pipeline::{Pipeline, PipelineConfig, PipelineReport};
use hauler_core::preflight::{DEFAULT_DENIED_COUNTRY, DEFAULT_EGRESS_CHECK_URL, EgressCheckConfig};
use hauler_core::rate_limiter::RateLimiterConfig;
use hauler_core::source::SourceDriver;
use hauler_core::traits::Transform;
use hauler_core::util::derive_collection_name;
use hauler_db::{Database, DatabaseConfig, RecordRepository};

#[derive(Parser)]
#[command(name = "hauler", version, about = "Rate-limited crawler that stores what it finds")]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by every crawling command.
#[derive(Args)]
struct RunArgs {
    /// Minimum pause between two outbound requests, in milliseconds
    #[arg(long, global = true, env = "HAULER_INTERVAL_MS", default_value_t = 1000)]
    interval_ms: u64,

    /// Random extra pause added to the interval, up to this many milliseconds
    #[arg(long, global = true, env = "HAULER_JITTER_MS", default_value_t = 0)]
    jitter_ms: u64,

    /// Per-request timeout, in seconds
    #[arg(long, global = true, env = "HAULER_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Endpoint reporting the egress IP and its country code
    #[arg(long, global = true, env = "HAULER_EGRESS_CHECK_URL", default_value = DEFAULT_EGRESS_CHECK_URL)]
    egress_check_url: String,

    /// Abort when traffic leaves from this country
    #[arg(long, global = true, env = "HAULER_DENY_COUNTRY", default_value = DEFAULT_DENIED_COUNTRY)]
    deny_country: String,

    /// Do not verify the egress path before starting
    #[arg(long, global = true, default_value_t = false)]
    skip_preflight: bool,

    /// Log and skip errors of this category instead of aborting
    /// (transport, parse, transform, store). Repeatable.
    #[arg(long = "reportable", global = true, value_name = "CATEGORY", value_parser = parse_reportable)]
    reportable: Vec<ErrorCategory>,
}

/// Config and internal errors always abort, so only these can be demoted.
fn parse_reportable(raw: &str) -> std::result::Result<ErrorCategory, String> {
    match raw.parse::<ErrorCategory>()? {
        category @ (ErrorCategory::Transport
        | ErrorCategory::Parse
        | ErrorCategory::Transform
        | ErrorCategory::Store) => Ok(category),
        other => Err(format!(
            "'{other}' errors are always fatal; expected one of transport, parse, transform, store"
        )),
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl an HTML catalogue described by a JSON source definition
    Catalog {
        /// Site root every path is resolved against
        #[arg(short, long)]
        base_url: String,

        /// Path to the JSON source definition
        #[arg(short, long)]
        source: PathBuf,

        /// Collection to store records in (defaults to the source file name)
        #[arg(short, long)]
        collection: Option<String>,

        /// jq script applied to every record before it is stored
        #[arg(short, long)]
        transform: Option<PathBuf>,

        /// JSON Schema every record must satisfy
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Stop after this many products (overrides the definition)
        #[arg(short, long)]
        limit: Option<u64>,
    },

    /// Page through a GraphQL-style API
    Paged {
        /// Endpoint receiving the POSTed query
        #[arg(short, long)]
        endpoint: String,

        /// File holding the query text
        #[arg(short, long)]
        query: PathBuf,

        /// jq script turning {"response_body": ...} into an array of items
        #[arg(short, long)]
        transform: PathBuf,

        /// Collection to store items in
        #[arg(short, long)]
        collection: String,

        /// Items requested per page
        #[arg(long, default_value_t = 100)]
        page_size: u32,
    },

    /// Count the records stored in a collection
    Count {
        #[arg(short, long)]
        collection: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hauler=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Catalog {
            base_url,
            source,
            collection,
            transform,
            schema,
            limit,
        } => {
            let collection = collection.unwrap_or_else(|| derive_collection_name(&source));
            cmd_catalog(
                &cli.run,
                &base_url,
                &source,
                &collection,
                transform.as_deref(),
                schema.as_deref(),
                limit,
            )
            .await?;
        }
        Commands::Paged {
            endpoint,
            query,
            transform,
            collection,
            page_size,
        } => {
            cmd_paged(&cli.run, &endpoint, &query, &transform, &collection, page_size).await?;
        }
        Commands::Count { collection } => {
            let db = connect_db().await?;
            let count = db.records(collection.as_str()).count().await?;
            println!(
                "{}",
                serde_json::json!({ "collection": collection, "count": count })
            );
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

fn build_transport(args: &RunArgs) -> Result<ReqwestTransport> {
    ReqwestTransport::builder()
        .timeout(Duration::from_secs(args.timeout_secs))
        .proxy(EgressProxy::from_env())
        .build()
        .context("Failed to create HTTP client")
}

fn pipeline_config(args: &RunArgs) -> PipelineConfig {
    let rate = RateLimiterConfig::new(Duration::from_millis(args.interval_ms))
        .with_jitter(Duration::from_millis(args.jitter_ms));

    let egress = if args.skip_preflight {
        EgressCheckConfig::disabled()
    } else {
        EgressCheckConfig::default()
            .with_endpoint(args.egress_check_url.as_str())
            .with_denied_country(args.deny_country.as_str())
    };

    let policy = args
        .reportable
        .iter()
        .fold(ErrorPolicy::strict(), |policy, category| {
            policy.with_reportable(*category)
        });

    PipelineConfig::default()
        .with_rate(rate)
        .with_egress(egress)
        .with_policy(policy)
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

async fn cmd_catalog(
    args: &RunArgs,
    base_url: &str,
    source: &Path,
    collection: &str,
    transform: Option<&Path>,
    schema: Option<&Path>,
    limit: Option<u64>,
) -> Result<()> {
    let definition = CatalogConfig::from_file(source)?.with_limit(limit);
    let driver = CatalogDriver::new(base_url, definition)?.with_name(collection);

    let transport = build_transport(args)?;
    let db = connect_db().await?;

    let mut worker = PersistenceWorker::new(db.records(collection));
    if let Some(path) = schema {
        worker = worker.with_schema(&read_json(path)?)?;
    }

    tracing::info!(%base_url, %collection, "Starting catalog crawl");

    let report = match transform {
        Some(path) => {
            let jq = JqTransform::from_file(path)?;
            run(transport, worker.with_transform(jq), args, driver).await?
        }
        None => run(transport, worker, args, driver).await?,
    };
    print_report(&report)
}

async fn cmd_paged(
    args: &RunArgs,
    endpoint: &str,
    query: &Path,
    transform: &Path,
    collection: &str,
    page_size: u32,
) -> Result<()> {
    let items = JqTransform::from_file(transform)?;
    let driver = PagedApiDriver::from_query_file(endpoint, query, items)?
        .with_page_size(page_size)
        .with_name(collection);

    let transport = build_transport(args)?;
    let db = connect_db().await?;
    let worker = PersistenceWorker::new(db.records(collection));

    tracing::info!(%endpoint, %collection, page_size, "Starting paged crawl");

    let report = run(transport, worker, args, driver).await?;
    print_report(&report)
}

async fn run<X, D>(
    transport: ReqwestTransport,
    worker: PersistenceWorker<RecordRepository, X>,
    args: &RunArgs,
    driver: D,
) -> Result<PipelineReport>
where
    X: Transform,
    D: SourceDriver,
{
    let report = Pipeline::new(transport, worker, pipeline_config(args))
        .run(driver)
        .await?;
    Ok(report)
}

fn print_report(report: &PipelineReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
