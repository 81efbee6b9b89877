//! Docent CLI — retrieval-augmented handbook assistant.
//!
//! Provides the HTTP server, a one-shot ingestion command, and a one-shot
//! question command for scripting and smoke tests.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use docent_core::{
    create_embedder, create_provider, ChatSession, Chunker, DocentConfig, DocumentStore, Mediator,
    VectorIndex,
};

/// Docent: chat with your handbook
#[derive(Parser, Debug)]
#[command(name = "docent", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (defaults to ./docent.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve,
    /// Build the vector index from the configured handbook
    Ingest,
    /// Ask a single question and stream the answer to stdout
    Ask {
        /// The question to ask
        question: String,

        /// Answer directly from the model, without retrieval
        #[arg(long)]
        no_rag: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "docent", "docent")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "docent.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let config = docent_core::load_config(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    for warning in config.validate() {
        tracing::warn!("Config: {}", warning);
    }
    config.ensure_directories()?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Ingest => ingest(config).await,
        Commands::Ask { question, no_rag } => ask(config, &question, !no_rag).await,
    }
}

fn build_mediator(config: &DocentConfig) -> Arc<Mediator> {
    let provider = create_provider(&config.llm);
    let embedder: Arc<dyn docent_core::Embedder> = Arc::from(create_embedder(&config.embedding));
    Arc::new(Mediator::new(provider, embedder, config.rag.clone()))
}

async fn serve(config: DocentConfig) -> anyhow::Result<()> {
    let mediator = build_mediator(&config);

    // Eager initialization; a degraded start still serves direct chat
    if let Err(e) = mediator.initialize_resources().await {
        tracing::warn!(error = %e, "Starting without RAG; direct chat remains available");
    }

    let state = Arc::new(docent_core::AppState {
        session: Arc::new(ChatSession::new(Arc::clone(&mediator))),
        mediator,
        documents: Arc::new(DocumentStore::new(&config.uploads)),
    });

    docent_core::server::run(state, &config.server).await?;
    Ok(())
}

async fn ingest(config: DocentConfig) -> anyhow::Result<()> {
    let source = config.rag.knowledge_dir.join(&config.rag.source_document);
    let pages = docent_core::extract::extract_pages(&source)?;
    println!("Extracted {} pages from {}", pages.len(), source.display());

    let chunker = Chunker::new(config.rag.chunk_size, config.rag.chunk_overlap);
    let chunks = chunker.split_pages(&config.rag.source_document, &pages);
    println!("Split into {} chunks", chunks.len());

    let embedder: Arc<dyn docent_core::Embedder> = Arc::from(create_embedder(&config.embedding));
    let index = VectorIndex::build(&config.rag.collection, chunks, embedder.as_ref()).await?;
    index.save(&config.rag.index_dir)?;
    println!(
        "Indexed {} entries into {}",
        index.len(),
        config.rag.index_dir.display()
    );
    Ok(())
}

async fn ask(config: DocentConfig, question: &str, use_rag: bool) -> anyhow::Result<()> {
    use std::io::Write;

    let mediator = build_mediator(&config);
    if use_rag {
        if let Err(e) = mediator.initialize_resources().await {
            tracing::warn!(error = %e, "RAG unavailable; the response will carry an error");
        }
    }

    let session = ChatSession::new(mediator);
    let mut rx = session.submit(question, use_rag).await?;

    let mut stdout = std::io::stdout().lock();
    while let Some(fragment) = rx.recv().await {
        stdout.write_all(&fragment)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}
