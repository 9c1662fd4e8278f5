use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use expert_rag_core::{
    ingest_path, ChatMessage, ChatTurnService, ChunkStore, Credentials, EmbeddingProvider,
    ExpertRepository, GeminiEmbedder, HashingEmbedder, JsonExpertRepository, ModelProvider,
    OpenAiEmbedder, RemoteChatProviders, RetrievalConfig, RetrievalService, SqliteChunkStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "expert-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite file holding documents, chunks and embeddings.
    #[arg(long, env = "EXPERT_RAG_DATABASE", default_value = "expert-rag.db")]
    database: PathBuf,

    /// JSON file with expert definitions.
    #[arg(long, env = "EXPERT_RAG_EXPERTS", default_value = "experts.json")]
    experts: PathBuf,

    /// Embedding backend. A database keeps the dimensions it was created with.
    #[arg(long, value_enum, default_value_t = EmbedderKind::Openai)]
    embedder: EmbedderKind,

    /// Characters per chunk.
    #[arg(long, default_value = "1000")]
    chunk_size: usize,

    /// Characters shared by consecutive chunks.
    #[arg(long, default_value = "200")]
    chunk_overlap: usize,

    /// Deadline for a single ingest or retrieval, in seconds.
    #[arg(long, default_value = "30")]
    deadline_secs: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    Openai,
    Google,
    /// Offline trigram hashing, useful for trying things out without keys.
    Local,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a text file or a folder of .txt/.md files for an expert.
    Ingest {
        #[arg(long)]
        expert: String,
        /// File or folder.
        #[arg(long)]
        path: PathBuf,
    },
    /// Show the chunks most similar to a query.
    Search {
        #[arg(long)]
        expert: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// Chat with an expert. Reads messages from stdin unless --message is given.
    Chat {
        #[arg(long)]
        expert: String,
        /// Send a single message and exit.
        #[arg(long)]
        message: Option<String>,
    },
    /// List an expert's documents.
    Documents {
        #[arg(long)]
        expert: String,
    },
    /// Delete one document and its chunks.
    DeleteDocument {
        #[arg(long)]
        id: String,
    },
    /// Delete every document of an expert.
    ForgetExpert {
        #[arg(long)]
        expert: String,
    },
}

fn build_embedder(
    kind: EmbedderKind,
    credentials: &Credentials,
) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let embedder: Arc<dyn EmbeddingProvider> = match kind {
        EmbedderKind::Openai => Arc::new(OpenAiEmbedder::new(
            credentials.key_for(ModelProvider::OpenAi)?,
        )?),
        EmbedderKind::Google => Arc::new(GeminiEmbedder::new(
            credentials.key_for(ModelProvider::Google)?,
        )?),
        EmbedderKind::Local => Arc::new(HashingEmbedder::default()),
    };
    Ok(embedder)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let credentials = Credentials::from_env();

    let embedder = build_embedder(cli.embedder, &credentials)?;
    let dimensions = embedder.dimensions();
    let config = RetrievalConfig::builder()
        .chunk_size(cli.chunk_size)
        .chunk_overlap(cli.chunk_overlap)
        .embedding_dimensions(dimensions)
        .deadline(Duration::from_secs(cli.deadline_secs))
        .build()?;

    let store: Arc<dyn ChunkStore> = Arc::new(
        SqliteChunkStore::open(&cli.database, dimensions)
            .with_context(|| format!("opening {}", cli.database.display()))?,
    );
    let retrieval = Arc::new(RetrievalService::new(config, embedder.clone(), store.clone())?);

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        embedder = embedder.name(),
        dimensions,
        database = %cli.database.display(),
        "expert-rag boot"
    );

    match cli.command {
        Command::Ingest { expert, path } => {
            let report = ingest_path(&retrieval, &expert, &path).await?;

            for skipped in &report.skipped {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
            }
            for file in &report.ingested {
                println!("{}  {}", file.document_id, file.path.display());
            }
            println!(
                "{} document(s) ingested, {} skipped",
                report.ingested.len(),
                report.skipped.len()
            );
        }
        Command::Search {
            expert,
            query,
            top_k,
        } => {
            let hits = retrieval.retrieve_context(&expert, &query, top_k).await?;
            if hits.is_empty() {
                println!("no matching chunks for expert {expert}");
            }
            for hit in hits {
                println!(
                    "similarity={:.4} chunk={} document={}",
                    hit.similarity, hit.chunk_id, hit.document_id
                );
                println!("{}\n", hit.content);
            }
        }
        Command::Chat { expert, message } => {
            let experts: Arc<dyn ExpertRepository> = Arc::new(JsonExpertRepository::new(&cli.experts));
            let chat = ChatTurnService::new(
                retrieval.clone(),
                experts,
                Arc::new(RemoteChatProviders::new(credentials.clone())),
            );
            match message {
                Some(message) => {
                    let reply = chat.respond(&expert, &[ChatMessage::user(message)]).await?;
                    println!("{}", reply.content);
                }
                None => run_chat_loop(&chat, &expert).await?,
            }
        }
        Command::Documents { expert } => {
            let documents = store.list_documents(&expert).await?;
            if documents.is_empty() {
                println!("no documents for expert {expert}");
            }
            for document in documents {
                let chunks = store.document_chunks(&document.id).await?;
                println!(
                    "{}  {}  chunks={}  created_at={}",
                    document.id,
                    document.filename,
                    chunks.len(),
                    document.created_at.to_rfc3339()
                );
            }
        }
        Command::DeleteDocument { id } => {
            if retrieval.remove_document(&id).await? {
                println!("deleted document {id}");
            } else {
                println!("document {id} not found");
            }
        }
        Command::ForgetExpert { expert } => {
            let removed = retrieval.forget_expert(&expert).await?;
            println!("deleted {removed} document(s) of expert {expert}");
        }
    }

    Ok(())
}

/// Line-by-line conversation on stdin; an empty line or EOF ends it.
async fn run_chat_loop(chat: &ChatTurnService, expert: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut history: Vec<ChatMessage> = Vec::new();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        history.push(ChatMessage::user(line));
        match chat.respond(expert, &history).await {
            Ok(reply) => {
                if !reply.context.is_empty() {
                    info!(chunks = reply.context.len(), "answer used document context");
                }
                println!("{}\n", reply.content);
                history.push(ChatMessage::assistant(reply.content));
            }
            Err(error) => {
                history.pop();
                eprintln!("error: {error}");
            }
        }
    }

    Ok(())
}
