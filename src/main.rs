//! Estate Concierge - conversational real-estate assistant
//!
//! Serves a chat API that turns buyer messages into SQL searches,
//! semantic lookups, investment estimates and viewing bookings, either
//! through a deterministic routing graph or an LLM tool-calling agent.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (config, database, bind failure, etc.)

mod agent;
mod analysis;
mod api;
mod booking;
mod cli;
mod config;
mod db;
mod error;
mod intent;
mod llm;
mod models;
mod monitor;
mod progress;
mod rag;
mod report;
mod sql;

use agent::Concierge;
use anyhow::{Context, Result};
use cli::{Args, AskArgs, Command, SeedArgs};
use config::{Config, CONFIG_FILE};
use db::Database;
use llm::{ChatModel, OpenAiClient};
use rag::RagIndex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before clap reads env fallbacks
    dotenvy::dotenv().ok();

    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if let Command::InitConfig = args.command {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("Estate Concierge v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(args).await {
        error!("Command failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle init-config: generate a default .concierge.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize the server, database, LLM deployment and agent.");
    println!("   API keys are read from AZURE_OPENAI_API_KEY or OPENAI_API_KEY.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Dispatch the subcommand.
async fn run(args: Args) -> Result<()> {
    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.llm.apply_env(|key| std::env::var(key).ok());

    let db = Database::open(&config.database.path)
        .with_context(|| format!("Failed to open database {}", config.database.path.display()))?;
    info!("Database: {}", config.database.path.display());

    match &args.command {
        Command::Seed(seed) => run_seed(&db, seed, args.show_progress()),
        Command::Ingest(_) => run_ingest(db, &config, args.show_progress()).await,
        Command::Serve(_) => run_serve(db, &config).await,
        Command::Ask(ask) => run_ask(db, &config, ask).await,
        Command::InitConfig => Ok(()),
    }
}

/// Build the LLM client, or `None` to run offline.
fn build_model(config: &Config) -> Result<Option<Arc<dyn ChatModel>>> {
    let Some(provider) = config.llm.provider(|key| std::env::var(key).ok()) else {
        warn!("No AZURE_OPENAI_API_KEY or OPENAI_API_KEY set, running without an LLM");
        return Ok(None);
    };

    let client = OpenAiClient::new(provider, config.llm.timeout_seconds)?;
    Ok(Some(Arc::new(client)))
}

fn run_seed(db: &Database, seed: &SeedArgs, show_progress: bool) -> Result<()> {
    println!("🌱 Seeding projects from {}", seed.csv.display());
    let report = db::seed::seed_from_csv(db, &seed.csv, seed.force, show_progress)?;

    match report.existing {
        Some(existing) => {
            println!(
                "ℹ️  Database already contains {} projects. Use --force to import anyway.",
                existing
            );
        }
        None => {
            println!("\n✅ Seeding complete!");
            println!("   Created: {}", report.created);
            println!("   Errors: {}", report.errors);
        }
    }
    Ok(())
}

async fn run_ingest(db: Database, config: &Config, show_progress: bool) -> Result<()> {
    let model = build_model(config)?;
    if model.is_none() {
        println!("   Embeddings need an LLM key; indexing documents for keyword search only.");
    }

    println!("📚 Building search index...");
    let started = Instant::now();
    let index = RagIndex::new(db, model, &config.rag);
    let report = index.ingest(show_progress).await?;

    println!("\n✅ Ingestion complete!");
    println!("   Documents: {}", report.documents);
    println!("   Embedded: {} ({} batches)", report.embedded, report.batches);
    println!("   Duration: {:.1}s", started.elapsed().as_secs_f64());
    Ok(())
}

async fn run_serve(db: Database, config: &Config) -> Result<()> {
    let projects = db.count_projects()?;
    if projects == 0 {
        warn!("Database has no projects; run `concierge seed <csv>` first");
    }

    let model = build_model(config)?;
    let llm_label = model
        .as_ref()
        .map_or_else(|| "none (offline)".to_string(), |m| m.name().to_string());
    let concierge = Concierge::new(db, model, config)?;

    println!("🏠 Estate Concierge");
    println!("   Projects: {}", projects);
    println!("   Agent: {:?}", concierge.default_mode());
    println!("   LLM: {}", llm_label);
    println!("   Listening: http://{}:{}", config.server.host, config.server.port);

    api::serve(api::AppState::new(concierge), &config.server.host, config.server.port).await
}

async fn run_ask(db: Database, config: &Config, ask: &AskArgs) -> Result<()> {
    let model = build_model(config)?;
    let concierge = Concierge::new(db, model, config)?;

    let outcome = concierge
        .run_turn(None, &ask.message, concierge.default_mode(), None)
        .await?;

    if ask.json {
        let payload = outcome.into_response(None);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("\n{}", outcome.response);
    if let Some(preview) = &outcome.preview_markdown {
        println!("\n{}", preview);
    }
    if !outcome.tools_used.is_empty() {
        println!("\n🔧 Tools: {}", outcome.tools_used.join(", "));
    }
    Ok(())
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
