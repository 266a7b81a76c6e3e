use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use datalive::api::{ApiServer, AppState};
use datalive::search::{DocumentType, FastEmbedder, SearchDocument, VectorSearch};
use datalive::{
    CacheBackend, CliCompletion, CombinerConfig, QueryMetrics, QueryRequest, ResultCombiner,
    Settings, StrategyPlanner,
};
use datalive_kg::{
    cache::start_auto_cleanup, AdaptiveCache, GraphSearch, HealthCheckConfig, KeyValueStore,
    MemoryStore, Neo4jClient, Neo4jKnowledgeGraph, OfflineGraph, SqliteStore, TemporalSearch,
};

#[derive(Parser)]
#[command(name = "datalive")]
#[command(about = "Query orchestration over documents, a knowledge graph and an answer cache", long_about = None)]
struct Cli {
    /// Data directory (overrides DATA_DIR)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Host to bind to (overrides API_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides API_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Answer a single query
    Ask {
        query: String,

        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        session: Option<String>,

        /// Skip the answer cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Add a plain-text document to the vector store
    Index {
        file: PathBuf,

        /// Defaults to the file name
        #[arg(long)]
        title: Option<String>,

        /// Defaults to the file path
        #[arg(long)]
        source: Option<String>,

        /// Document type (text, markdown, pdf, ...); guessed from the extension
        #[arg(short = 't', long = "type")]
        doc_type: Option<String>,
    },

    /// Inspect or invalidate the answer cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Check the knowledge graph connection
    Health,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Key counts per namespace and memory usage
    Stats,

    /// Remove keys matching a glob pattern, e.g. `user:42:*`
    Invalidate { pattern: String },
}

/// Everything the commands need, wired from [`Settings`]
struct Services {
    combiner: Arc<ResultCombiner>,
    metrics: Arc<QueryMetrics>,
    graph_client: Option<Arc<Neo4jClient>>,
    vectors: Arc<VectorSearch>,
    embedder: Arc<FastEmbedder>,
}

async fn connect_graph(settings: &Settings) -> Option<Arc<Neo4jClient>> {
    let client = match Neo4jClient::connect(&settings.graph, HealthCheckConfig::default()).await {
        Ok(client) => client,
        Err(e) => {
            warn!("Knowledge graph unavailable, continuing without it: {}", e);
            return None;
        }
    };

    let health = client.health_check_with_retry().await;
    if health.status.is_operational() {
        Some(Arc::new(client))
    } else {
        warn!(
            "Knowledge graph unhealthy, continuing without it: {}",
            health.error.unwrap_or_default()
        );
        None
    }
}

async fn build_services(settings: &Settings) -> Result<Services> {
    let embedder = Arc::new(
        tokio::task::spawn_blocking(FastEmbedder::new)
            .await
            .context("Embedding model initialisation panicked")??,
    );

    let store: Arc<dyn KeyValueStore> = match settings.cache_backend {
        CacheBackend::Sqlite => Arc::new(
            SqliteStore::open(settings.cache_db_path(), settings.cache.clone())
                .context("Failed to open the cache database")?,
        ),
        CacheBackend::Memory => {
            warn!("Using the in-memory cache store; cached answers are lost on exit");
            Arc::new(MemoryStore::new(settings.cache.clone()))
        }
    };
    if settings.cache.enable_auto_cleanup {
        tokio::spawn(start_auto_cleanup(store.clone(), settings.cache.cleanup_interval));
    }

    let cache = Arc::new(AdaptiveCache::new(
        settings.cache.clone(),
        store,
        embedder.clone(),
    ));
    let warmed = cache.warm_semantic_index().await?;
    info!("Semantic cache index warmed with {} entries", warmed);

    let vectors = Arc::new(
        VectorSearch::with_dimension(&settings.vector_dir(), embedder.clone(), embedder.dimension() as i32)
            .await?,
    );

    let graph_client = connect_graph(settings).await;
    let (graph, temporal): (Arc<dyn GraphSearch>, Arc<dyn TemporalSearch>) = match graph_client {
        Some(ref client) => {
            let kg = Arc::new(Neo4jKnowledgeGraph::new(client.clone()));
            (kg.clone() as Arc<dyn GraphSearch>, kg as Arc<dyn TemporalSearch>)
        }
        None => {
            let offline = Arc::new(OfflineGraph::new(settings.graph.uri.clone()));
            (offline.clone() as Arc<dyn GraphSearch>, offline as Arc<dyn TemporalSearch>)
        }
    };

    let completion = Arc::new(CliCompletion::new(
        settings.llm_program.clone(),
        settings.llm_model,
    ));
    let planner =
        StrategyPlanner::new(completion.clone()).with_default_rag_limit(settings.default_rag_limit);

    let metrics = Arc::new(QueryMetrics::new());
    let combiner = ResultCombiner::new(cache, planner, vectors.clone(), graph, temporal, completion)
        .with_metrics(metrics.clone())
        .with_config(CombinerConfig {
            cache_confidence_threshold: settings.cache_confidence_threshold,
            max_query_length: settings.max_query_length,
            vector_threshold: settings.vector_threshold,
            enable_caching: settings.enable_caching,
            ..CombinerConfig::default()
        });

    Ok(Services {
        combiner: Arc::new(combiner),
        metrics,
        graph_client,
        vectors,
        embedder,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "datalive=info,datalive_kg=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::from_env()?;
    if let Some(ref dir) = cli.data_dir {
        settings.data_dir = dir.clone();
    }

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.port = port;
            }

            let services = build_services(&settings).await?;
            let mut state = AppState::new(services.combiner, services.metrics);
            if let Some(client) = services.graph_client {
                state = state.with_graph_client(client);
            }

            ApiServer::new(settings.bind_addr(), settings.jwt_secret.clone(), state)
                .start()
                .await?;
        }

        Commands::Ask { ref query, ref user, ref session, no_cache } => {
            let services = build_services(&settings).await?;

            let mut request = QueryRequest::new(query.clone());
            if let Some(user) = user {
                request = request.with_user(user.clone());
            }
            if let Some(session) = session {
                request = request.with_session(session.clone());
            }
            if no_cache {
                request = request.without_cache();
            }

            let cancel = async {
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            let response = services.combiner.process_query_until(request, cancel).await?;
            services.combiner.flush_cache_writes().await;

            println!("{}", response.answer);
            println!();
            println!("Strategies: {}", response.strategies_used.join(", "));
            println!("Confidence: {:.2}", response.confidence);
            println!("Sources:    {}", response.sources.len());
            println!(
                "Time:       {:.2}s{}",
                response.processing_time_seconds,
                if response.cached { " (cached)" } else { "" }
            );
            if !response.metadata.failures.is_empty() {
                for (source, error) in &response.metadata.failures {
                    println!("  {} unavailable: {}", source.label(), error);
                }
            }
        }

        Commands::Index { ref file, ref title, ref source, ref doc_type } => {
            let content = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read {:?}", file))?;

            let document_type = match doc_type {
                Some(t) => DocumentType::parse(t)
                    .with_context(|| format!("Unknown document type: {}", t))?,
                None => DocumentType::from_path(file),
            };
            let title = title.clone().unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "Untitled".to_string())
            });
            let source = source
                .clone()
                .unwrap_or_else(|| file.to_string_lossy().to_string());

            let services = build_services(&settings).await?;
            let document = SearchDocument::new(title, content, source, document_type);
            let embedding = services.embedder.embed_passage(&document.content).await?;
            services.vectors.index_document(&document, embedding).await?;

            println!("Indexed {} as {} ({})", file.display(), document.id, document_type.as_str());
            println!("Documents in store: {}", services.vectors.count().await?);
        }

        Commands::Cache { ref action } => {
            let services = build_services(&settings).await?;
            match action {
                CacheAction::Stats => {
                    let stats = services.combiner.cache_stats().await?;
                    println!("Cache Statistics:");
                    for (namespace, count) in &stats.namespaces {
                        println!("  {:<20} {}", namespace, count);
                    }
                    println!("  Memory used:         {} bytes", stats.memory.used_bytes);
                    println!("  Memory peak:         {} bytes", stats.memory.peak_bytes);
                }
                CacheAction::Invalidate { pattern } => {
                    let removed = services.combiner.invalidate_cache_pattern(pattern).await?;
                    println!("Removed {} keys matching {}", removed, pattern);
                }
            }
        }

        Commands::Health => {
            let client = Neo4jClient::connect(&settings.graph, HealthCheckConfig::default())
                .await
                .with_context(|| format!("Failed to connect to {}", settings.graph.uri))?;
            let result = client.health_check_with_retry().await;

            println!("Knowledge graph: {}", settings.graph.uri);
            println!("  Status:        {:?}", result.status);
            println!("  Response time: {}ms", result.response_time_ms);
            println!("  Method:        {:?}", result.check_method);
            if let Some(ref db) = result.database_name {
                println!("  Database:      {}", db);
            }
            if let Some(ref error) = result.error {
                println!("  Error:         {}", error);
            }
            if !result.status.is_operational() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
