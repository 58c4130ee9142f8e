//! Chatty application binary - composition root.
//!
//! Every collaborator is built here and handed to the orchestrator:
//! 1. Load configuration from TOML and apply CLI overrides
//! 2. Open SQLite and hydrate the in-memory vector index
//! 3. Build the embedding service (ONNX model or hash fallback)
//! 4. Run the requested subcommand

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chatty_chain::{
    ChainConfig, ChainOrchestrator, ChainResponse, ConversationMemory, GenerationClient,
    OpenAiCompatibleClient, PromptAssembler,
};
use chatty_core::config::{expand_home, RetrievalConfig};
use chatty_core::ChattyConfig;
use chatty_storage::{ConversationRepository, Database, PassageRepository};
use chatty_vector::{
    DocumentIndexer, DynEmbeddingService, HashEmbedding, IndexOutcome, OnnxEmbeddingService,
    Retriever, VectorIndex, VectorStore,
};

use cli::{CliArgs, Command};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Shared handles every subcommand works against.
struct Engine {
    db: Arc<Database>,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn DynEmbeddingService>,
}

impl Engine {
    fn open(config: &ChattyConfig) -> AppResult<Self> {
        let db_path = config.database_path();
        if let Some(parent) = db_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::error!(path = %parent.display(), error = %e, "Failed to create data directory");
                return Err(e.into());
            }
        }

        let db = Arc::new(Database::new(&db_path)?);

        let embedder = build_embedder(&config.retrieval)?;

        let index = Arc::new(VectorIndex::new());
        index.hydrate(&PassageRepository::new(Arc::clone(&db)), embedder.model_id())?;

        Ok(Self {
            db,
            index,
            embedder,
        })
    }

    fn store(&self) -> Arc<dyn VectorStore> {
        Arc::clone(&self.index) as Arc<dyn VectorStore>
    }

    fn memory(&self) -> ConversationMemory {
        ConversationMemory::new(Arc::new(ConversationRepository::new(Arc::clone(&self.db))))
    }
}

fn build_embedder(retrieval: &RetrievalConfig) -> AppResult<Arc<dyn DynEmbeddingService>> {
    match &retrieval.model_dir {
        Some(dir) => {
            let dir = expand_home(dir);
            let service = OnnxEmbeddingService::from_directory(&dir, &retrieval.embedding_model)?;
            info!(model = %retrieval.embedding_model, dir = %dir.display(), "ONNX embedding model loaded");
            Ok(Arc::new(service))
        }
        None => {
            warn!(
                dimensions = retrieval.embedding_dim,
                "No embedding model directory configured, using hash embeddings"
            );
            Ok(Arc::new(HashEmbedding::new(retrieval.embedding_dim)))
        }
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let loaded = ChattyConfig::load(&config_file);
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => ChattyConfig::default(),
    };
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    init_tracing(&config.general.log_level);
    match loaded {
        Ok(_) => info!(path = %config_file.display(), "Configuration loaded"),
        Err(e) => warn!(path = %config_file.display(), error = %e, "Using default configuration"),
    }

    match args.command {
        Command::Ask {
            conversation,
            deadline_secs,
            sources,
            json,
            question,
        } => {
            let engine = Engine::open(&config)?;
            let generator: Arc<dyn GenerationClient> =
                Arc::new(OpenAiCompatibleClient::from_config(&config.generation)?);

            let mut chain_config = ChainConfig::from_config(&config);
            chain_config.return_sources |= sources;

            let chain = ChainOrchestrator::new(
                engine.memory(),
                Retriever::new(engine.store(), Arc::clone(&engine.embedder)),
                PromptAssembler::new(config.prompt.assistant_name.clone()),
                generator,
                chain_config,
            );

            let id = conversation.unwrap_or_else(|| chain.start_conversation());
            let result = match deadline_secs {
                Some(secs) => {
                    chain
                        .handle_within(&id, &question, Duration::from_secs(secs))
                        .await
                }
                None => chain.handle(&id, &question).await,
            };
            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    if e.user_turn_persisted() {
                        eprintln!("Question saved; retry with --conversation {}", id);
                    }
                    return Err(e.into());
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
        }

        Command::History { id } => {
            let engine = Engine::open(&config)?;
            let memory = engine.memory();
            if memory.conversation(&id).await?.is_none() {
                eprintln!("No conversation with id {}", id);
            } else {
                println!("{}", memory.load(&id).await?);
            }
        }

        Command::Index { files } => {
            let engine = Engine::open(&config)?;
            let indexer = DocumentIndexer::new(engine.store(), Arc::clone(&engine.embedder))
                .with_repository(PassageRepository::new(Arc::clone(&engine.db)))
                .with_dedup_threshold(Some(config.retrieval.dedup_threshold));

            for file in &files {
                index_file(&indexer, file).await?;
            }
            info!(passages = engine.index.len(), "Indexing finished");
        }

        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn index_file(indexer: &DocumentIndexer, path: &Path) -> AppResult<()> {
    let document = std::fs::read_to_string(path)?;
    let outcomes = indexer.index_document(&document).await?;

    let (mut stored, mut duplicates, mut skipped) = (0usize, 0usize, 0usize);
    for outcome in &outcomes {
        match outcome {
            IndexOutcome::Stored { .. } => stored += 1,
            IndexOutcome::Deduplicated { .. } => duplicates += 1,
            IndexOutcome::Skipped { .. } => skipped += 1,
        }
    }

    println!(
        "{}: {} stored, {} duplicate, {} skipped",
        path.display(),
        stored,
        duplicates,
        skipped
    );
    Ok(())
}

fn print_response(response: &ChainResponse) {
    println!("{}", response.answer);

    if let Some(sources) = &response.sources {
        println!();
        for passage in sources {
            println!("[{}] ({:.3}) {}", passage.rank, passage.score, passage.text);
        }
    }

    for warning in &response.warnings {
        eprintln!("warning: {}", warning);
    }
    eprintln!("conversation: {}", response.conversation_id);
}
