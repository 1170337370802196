//! Command-line front end: store documents, query them, inspect neighbors
//! and clear caches.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use sentence_store::{
    CacheKey, DocumentType, Embedder, KnnGraph, StoreConfig, TextSentenceSource, Timings, clear,
    local_document_key, stage_upload,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sentence-store", version, about = "Embed documents and query similar sentences")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the cache root directory.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Embed a document unless it is already cached.
    Store(DocumentArgs),

    /// Store a document if needed, then print the sentences closest to a question.
    Query {
        #[command(flatten)]
        document: DocumentArgs,

        /// The question to match against the document.
        question: String,

        /// Number of answers.
        #[arg(short = 'k', long, default_value_t = 4)]
        top_k: usize,
    },

    /// Print every sentence's nearest neighbors.
    Knns {
        #[command(flatten)]
        document: DocumentArgs,

        /// Neighbors per sentence.
        #[arg(short = 'k', long, default_value_t = 3)]
        top_k: usize,

        /// Print neighbor positions without similarity weights.
        #[arg(long)]
        indices: bool,
    },

    /// Delete the cache root and the upload staging directory.
    Clear,
}

#[derive(Debug, Args)]
struct DocumentArgs {
    /// Path or URL of the document.
    doc: String,

    /// Cache name to use instead of one derived from the document.
    #[arg(long)]
    name: Option<String>,

    /// Document type (pdf, txt or url); inferred when omitted.
    #[arg(long = "type")]
    doc_type: Option<DocumentType>,
}

/// A document ready to hand to the embedder.
#[derive(Debug, PartialEq)]
struct ResolvedDocument {
    doc_type: DocumentType,
    reference: String,
    key: CacheKey,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut stdout = std::io::stdout().lock();
    run(cli, &mut stdout).await
}

async fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(cache_dir) = cli.cache_dir {
        config.cache_dir = cache_dir;
    }

    match cli.command {
        Command::Store(document) => {
            let embedder = open_store(&config, &document).await?;
            writeln!(out, "Stored {}", embedder.key())?;
            print_times(out, &embedder.get_times())?;
        }
        Command::Query {
            document,
            question,
            top_k,
        } => {
            if question.trim().is_empty() {
                bail!("please enter a query");
            }
            let mut embedder = open_store(&config, &document).await?;
            let answers = embedder.query(&question, top_k).await?;
            writeln!(out, "MATCHING SENTENCES:")?;
            for answer in &answers {
                writeln!(out, "{:.4}\t{}", answer.score, answer.sentence)?;
            }
            print_times(out, &embedder.get_times())?;
        }
        Command::Knns {
            document,
            top_k,
            indices,
        } => {
            let mut embedder = open_store(&config, &document).await?;
            let graph = embedder.knns(top_k, !indices).await?;
            print_graph(out, &graph)?;
            print_times(out, &embedder.get_times())?;
        }
        Command::Clear => {
            clear(&config.cache_dir).await?;
            clear(&config.upload_dir).await?;
            writeln!(out, "Cleared caches")?;
        }
    }

    Ok(())
}

/// Work out the type, extraction reference and cache key of a document.
///
/// Local files are keyed by their canonical path, then staged under that
/// key in the upload directory.
async fn resolve_document(config: &StoreConfig, args: &DocumentArgs) -> Result<ResolvedDocument> {
    let doc_type = match args.doc_type.or_else(|| DocumentType::infer(&args.doc)) {
        Some(doc_type) => doc_type,
        None => bail!(
            "cannot tell the type of {}; use a .txt or .pdf file or pass --type",
            args.doc
        ),
    };

    let key = match (&args.name, doc_type) {
        (Some(name), _) => CacheKey::new(name.as_str())?,
        (None, DocumentType::Url) => CacheKey::for_document(&args.doc)?,
        (None, DocumentType::Pdf | DocumentType::Txt) => local_document_key(&args.doc)
            .await
            .with_context(|| format!("cannot read {}", args.doc))?,
    };

    let reference = match doc_type {
        DocumentType::Url => args.doc.clone(),
        DocumentType::Pdf | DocumentType::Txt => stage_upload(&config.upload_dir, &args.doc, &key)
            .await?
            .to_string_lossy()
            .into_owned(),
    };

    Ok(ResolvedDocument {
        doc_type,
        reference,
        key,
    })
}

async fn open_store(config: &StoreConfig, args: &DocumentArgs) -> Result<Embedder> {
    let document = resolve_document(config, args).await?;
    info!(
        "Using cache {} for {} document {}",
        document.key, document.doc_type, document.reference
    );

    let mut embedder = Embedder::from_config(config, document.key)?;
    embedder
        .store(
            document.doc_type,
            &document.reference,
            &TextSentenceSource::new(),
        )
        .await?;
    Ok(embedder)
}

fn print_graph(out: &mut impl Write, graph: &KnnGraph) -> Result<()> {
    match graph {
        KnnGraph::Indices(rows) => {
            for (i, row) in rows.iter().enumerate() {
                writeln!(out, "{i}: {row:?}")?;
            }
        }
        KnnGraph::Weighted(rows) => {
            for (i, row) in rows.iter().enumerate() {
                let cells: Vec<String> = row.iter().map(|(j, w)| format!("{j}:{w:.4}")).collect();
                writeln!(out, "{i}: {}", cells.join(" "))?;
            }
        }
    }
    Ok(())
}

fn print_times(out: &mut impl Write, times: &Timings) -> Result<()> {
    writeln!(out, "TIMES:")?;
    for (phase, seconds) in times.as_seconds() {
        writeln!(out, "  {phase}: {seconds:.6}s")?;
    }
    Ok(())
}
