use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use lituk::auth::AuthService;
use lituk::config::Config;
use lituk::content::import_questions_csv;
use lituk::embeddings::create_embedder;
use lituk::games::populate_games;
use lituk::http::{AppState, start_http_server};
use lituk::ingest::{IngestSettings, Pipeline};
use lituk::llm::create_chat_model;
use lituk::storage::Database;

const TOKEN_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Parser)]
#[command(name = "lituk", version, about = "Life in the UK test preparation backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve,
    /// Ingest one or more handbook PDFs
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Re-run documents that already completed
        #[arg(long)]
        force: bool,
    },
    /// Import a CSV of questions as one practice test
    ImportQuestions { csv: PathBuf },
    /// Rebuild flashcard and matching games from the question bank
    PopulateGames,
    /// Create an admin account, or promote and re-password an existing one
    CreateAdmin { email: String, password: String },
    /// Print row counts and document status
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.runtime.log_level))
        .with_ansi(false)
        .init();

    let db = Database::open(&config.system.database_path)
        .with_context(|| format!("opening {}", config.system.database_path.display()))?;

    match cli.command {
        Command::Serve => serve(config, db).await,
        Command::Ingest { files, force } => ingest(&config, db, &files, force).await,
        Command::ImportQuestions { csv } => {
            let report = import_questions_csv(&db, &csv)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::PopulateGames => {
            let report = populate_games(&db)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::CreateAdmin { email, password } => {
            let auth = AuthService::new(db, &config.runtime);
            let user = auth.ensure_admin(&email, &password)?;
            println!("{} is an admin ({})", user.email, user.id);
            Ok(())
        }
        Command::Verify => verify(&config, &db),
    }
}

async fn serve(config: Config, db: Database) -> Result<()> {
    let embedder = create_embedder(&config)?;
    let chat_model = create_chat_model(&config)?;
    info!(
        "Starting lituk: embedding={} ({} dims), chat={}",
        embedder.model(),
        embedder.dimensions(),
        chat_model.model()
    );
    if db.user_count()? == 0 {
        warn!("No users yet; the first account to register becomes admin");
    }
    let interrupted = db.fail_interrupted_documents()?;
    if interrupted > 0 {
        warn!("Marked {} interrupted documents as failed", interrupted);
    }

    let state = AppState::new(config, db, embedder, chat_model);
    let auth = state.auth.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TOKEN_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            match auth.purge_expired() {
                Ok(0) => {}
                Ok(n) => info!("Purged {} expired tokens", n),
                Err(e) => warn!("Token purge failed: {}", e),
            }
        }
    });

    start_http_server(state).await
}

async fn ingest(config: &Config, db: Database, files: &[PathBuf], force: bool) -> Result<()> {
    let pipeline = Pipeline::new(
        db,
        create_embedder(config)?,
        create_chat_model(config)?,
        IngestSettings::from_config(&config.ingest),
    );
    let mut failures = 0;
    for path in files {
        match pipeline.ingest_pdf_file(path, force).await {
            Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            Err(e) => {
                failures += 1;
                error!("Ingesting {} failed: {}", path.display(), e);
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{} of {} files failed", failures, files.len());
    }
    Ok(())
}

fn verify(config: &Config, db: &Database) -> Result<()> {
    let counts = db.counts()?;
    let by_status: serde_json::Map<String, serde_json::Value> = db
        .documents_by_status()?
        .into_iter()
        .map(|(status, n)| (status, json!(n)))
        .collect();
    let report = json!({
        "database": config.system.database_path.display().to_string(),
        "counts": counts,
        "documents_by_status": by_status,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    if counts.chunks > counts.embedded_chunks {
        warn!(
            "{} chunks have no embedding; reprocess their documents",
            counts.chunks - counts.embedded_chunks
        );
    }
    Ok(())
}
