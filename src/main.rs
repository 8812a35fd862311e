use lectern::cli::{Cli, Commands, ConfigAction, QueryArgs};
use lectern::config::Config;
use lectern::embedding::{
    read_passages_jsonl, BatchIndexer, Embedder, FastEmbedProvider, KeywordIndex, VectorIndex,
};
use lectern::error::{LecternError, Result};
use lectern::retrieval::{
    Highlighter, RankedPassage, SearchEngine, SuggestionIndex,
};
use lectern::storage::{StorageManager, StorageStats};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_unavailable() => {
            eprintln!("Search temporarily unavailable: {}", e);
            ExitCode::from(3)
        }
        Err(e) if e.is_invalid_input() => {
            eprintln!("Error: {}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "lectern=debug" } else { "lectern=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr so JSON output on stdout stays parseable
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Config { action } = cli.command {
        return cmd_config(cli.config, cli.profile, action);
    }

    let config = load_config(cli.config, cli.profile)?;
    let workspace = Workspace::open(config)?;

    match cli.command {
        Commands::Index { file } => block_on(cmd_index(&workspace, &file)),
        Commands::Remove { source_id } => cmd_remove(&workspace, &source_id),
        Commands::Search { query, options } => block_on(cmd_search(&workspace, &query, &options)),
        Commands::Hybrid {
            query,
            options,
            semantic_weight,
            lexical_weight,
        } => block_on(cmd_hybrid(
            &workspace,
            &query,
            &options,
            semantic_weight,
            lexical_weight,
        )),
        Commands::Context {
            query,
            options,
            budget,
        } => block_on(cmd_context(&workspace, &query, &options, budget)),
        Commands::Suggest { prefix, limit } => cmd_suggest(&workspace, &prefix, limit),
        Commands::Stats { json } => cmd_stats(&workspace, json),
        Commands::Config { .. } => Ok(()),
    }
}

fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
    let rt = tokio::runtime::Runtime::new().map_err(|e| LecternError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })?;
    rt.block_on(future)
}

/// Opened storage plus lazily built search components
struct Workspace {
    config: Config,
    storage: StorageManager,
    keyword_index: Arc<KeywordIndex>,
}

impl Workspace {
    fn open(config: Config) -> Result<Self> {
        let data_dir = expand_path(&config.storage.data_dir)?;
        let storage = StorageManager::new(data_dir)?;
        let keyword_index = Arc::new(KeywordIndex::open(&storage.keyword_index_dir())?);

        Ok(Self {
            config,
            storage,
            keyword_index,
        })
    }

    fn embedder(&self) -> Result<Arc<dyn Embedder>> {
        let provider = FastEmbedProvider::new(&self.config.embedding.model)?;
        if provider.dimension() != self.config.indexing.vector_dim {
            return Err(LecternError::Config(format!(
                "Model {} produces {}-dimensional vectors but indexing.vector_dim is {}",
                provider.model_name(),
                provider.dimension(),
                self.config.indexing.vector_dim
            )));
        }
        Ok(Arc::new(provider))
    }

    fn vector_index(&self, embedder: &dyn Embedder) -> Result<Arc<VectorIndex>> {
        let embeddings = self.storage.database.load_embeddings(embedder.model_name())?;
        Ok(Arc::new(VectorIndex::rebuild(&self.config.indexing, embeddings)?))
    }

    fn suggestions(&self) -> Result<SuggestionIndex> {
        let history = self
            .storage
            .database
            .query_history(self.config.suggestions.history_limit)?;
        Ok(SuggestionIndex::from_history(
            self.config.suggestions.max_entries,
            history,
        ))
    }

    fn indexer(&self) -> Result<BatchIndexer> {
        let embedder = self.embedder()?;
        let vector_index = self.vector_index(embedder.as_ref())?;
        Ok(BatchIndexer::new(
            embedder,
            Arc::clone(&self.storage.database),
            vector_index,
            Arc::clone(&self.keyword_index),
            self.config.embedding.batch_size,
        ))
    }

    fn engine(&self) -> Result<SearchEngine> {
        let embedder = self.embedder()?;
        let vector_index = self.vector_index(embedder.as_ref())?;

        Ok(SearchEngine::new(
            &self.config,
            embedder,
            vector_index,
            self.storage.database.clone(),
        )
        .with_lexical(self.keyword_index.clone())
        .with_suggestions(Arc::new(self.suggestions()?)))
    }

    fn record_query(&self, query: &str) {
        if let Err(e) = self.storage.database.record_query(query) {
            tracing::warn!("Failed to record query history: {}", e);
        }
    }

    fn top_k(&self, options: &QueryArgs) -> usize {
        options
            .top_k
            .unwrap_or(self.config.retrieval.default_top_k)
    }
}

async fn cmd_index(workspace: &Workspace, file: &Path) -> Result<()> {
    let passages = read_passages_jsonl(file)?;
    if passages.is_empty() {
        println!("No passages found in {}", file.display());
        return Ok(());
    }

    let result = workspace.indexer()?.index(passages).await?;

    println!("✓ Indexed {}", file.display());
    println!("  Processed: {}", result.processed);
    println!("  Unchanged: {}", result.skipped);
    if result.failed > 0 {
        println!("  Failed:    {} (run again to retry)", result.failed);
    }
    println!("  Duration:  {}ms", result.duration_ms);
    Ok(())
}

fn cmd_remove(workspace: &Workspace, source_id: &str) -> Result<()> {
    let removed = workspace.storage.database.remove_source(source_id)?;
    for id in &removed {
        workspace.keyword_index.delete(*id)?;
    }
    workspace.keyword_index.commit()?;

    if removed.is_empty() {
        println!("No passages found for source {}", source_id);
    } else {
        println!("✓ Removed {} passages of {}", removed.len(), source_id);
    }
    Ok(())
}

async fn cmd_search(workspace: &Workspace, query: &str, options: &QueryArgs) -> Result<()> {
    let engine = workspace.engine()?;
    let results = engine
        .semantic_search(query, workspace.top_k(options), &options.constraints())
        .await?;
    workspace.record_query(query);

    print_results(&engine, &results, options.json, |c| {
        format!("{:.3}", c.adjusted_score)
    })
}

async fn cmd_hybrid(
    workspace: &Workspace,
    query: &str,
    options: &QueryArgs,
    semantic_weight: Option<f32>,
    lexical_weight: Option<f32>,
) -> Result<()> {
    let engine = workspace.engine()?;
    let retrieval = &workspace.config.retrieval;
    let results = engine
        .hybrid_search(
            query,
            workspace.top_k(options),
            &options.constraints(),
            semantic_weight.unwrap_or(retrieval.semantic_weight),
            lexical_weight.unwrap_or(retrieval.lexical_weight),
        )
        .await?;
    workspace.record_query(query);

    print_results(&engine, &results, options.json, |c| {
        let lists = match (c.semantic_rank, c.lexical_rank) {
            (Some(s), Some(l)) => format!("semantic #{}, keyword #{}", s, l),
            (Some(s), None) => format!("semantic #{}", s),
            (None, Some(l)) => format!("keyword #{}", l),
            (None, None) => String::new(),
        };
        format!("{:.4} | {}", c.fused_score, lists)
    })
}

async fn cmd_context(
    workspace: &Workspace,
    query: &str,
    options: &QueryArgs,
    budget: usize,
) -> Result<()> {
    let engine = workspace.engine()?;
    let block = engine
        .retrieve_context(query, workspace.top_k(options), budget, &options.constraints())
        .await?;
    workspace.record_query(query);

    if options.json {
        return print_json(&block);
    }

    if block.is_empty() {
        println!("No relevant passages fit the budget");
        return Ok(());
    }

    println!("{}", block.text);
    println!();
    println!(
        "--- {} passages, ~{} tokens of {}{}",
        block.included_passage_ids.len(),
        block.token_estimate,
        budget,
        if block.truncated { ", last passage truncated" } else { "" }
    );
    for citation in &block.citations {
        let title = citation
            .source_title
            .as_deref()
            .unwrap_or(&citation.source_id);
        match citation.page_number {
            Some(page) => println!("  [{}] {}, p. {}", citation.passage_id, title, page),
            None => println!("  [{}] {}", citation.passage_id, title),
        }
    }
    Ok(())
}

fn cmd_suggest(workspace: &Workspace, prefix: &str, limit: usize) -> Result<()> {
    let suggestions = workspace.suggestions()?.suggest(prefix, limit);
    if suggestions.is_empty() {
        println!("No suggestions for \"{}\"", prefix);
    }
    for suggestion in suggestions {
        println!("{}", suggestion);
    }
    Ok(())
}

fn cmd_stats(workspace: &Workspace, json: bool) -> Result<()> {
    let stats = workspace.storage.stats()?;

    if json {
        #[derive(Serialize)]
        struct Output {
            passages: usize,
            sources: usize,
            embeddings: usize,
            keyword_documents: u64,
            distinct_queries: usize,
            total_bytes: u64,
        }

        return print_json(&Output {
            passages: stats.db.passage_count,
            sources: stats.db.source_count,
            embeddings: stats.db.embedding_count,
            keyword_documents: workspace.keyword_index.len(),
            distinct_queries: stats.db.distinct_queries,
            total_bytes: stats.total_size(),
        });
    }

    println!("Lectern Index");
    println!("=============");
    println!("Data dir:          {}", workspace.storage.base_path().display());
    println!("Passages:          {}", stats.db.passage_count);
    println!("Sources:           {}", stats.db.source_count);
    println!("Embeddings:        {}", stats.db.embedding_count);
    println!("Keyword documents: {}", workspace.keyword_index.len());
    println!("Distinct queries:  {}", stats.db.distinct_queries);
    println!(
        "Storage:           {}",
        StorageStats::format_size(stats.total_size())
    );

    let sources = workspace.storage.database.sources()?;
    if !sources.is_empty() {
        println!("\nSources:");
        for (source, count) in sources.iter().take(20) {
            println!("  {} ({} passages)", source, count);
        }
        if sources.len() > 20 {
            println!("  ... and {} more", sources.len() - 20);
        }
    }
    Ok(())
}

fn print_results<T, F>(engine: &SearchEngine, results: &[T], json: bool, score: F) -> Result<()>
where
    T: RankedPassage + Serialize,
    F: Fn(&T) -> String,
{
    if json {
        return print_json(&results);
    }

    if results.is_empty() {
        println!("No results");
        return Ok(());
    }

    let highlighter: &Highlighter = engine.highlighter();
    for (index, result) in results.iter().enumerate() {
        let passage = result.passage();
        let location = match passage.metadata.page_number {
            Some(page) => format!("{}, p. {}", passage.display_source(), page),
            None => passage.display_source().to_string(),
        };

        println!("{}. [{}] {}", index + 1, score(result), location);
        if let Some(section) = &passage.metadata.section_title {
            println!("   § {}", section);
        }
        let text = match result.highlighted() {
            Some(highlighted) => highlighter.render(highlighted, "**", "**"),
            None => passage.text.clone(),
        };
        println!("   {}", text.replace('\n', "\n   "));
        println!();
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| LecternError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })?;
    println!("{}", json);
    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = serde_json::to_value(&config).map_err(|e| LecternError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            match section {
                Some(section) => {
                    let part = value.get(&section).ok_or_else(|| {
                        LecternError::Config(format!("Unknown config section: {}", section))
                    })?;
                    print_json(part)?;
                }
                None => print_json(&value)?,
            }
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!("  Embedding model: {}", config.embedding.model);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| LecternError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::debug!(
            "Config file not found, using defaults. Run 'lectern config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        lectern::config::ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| LecternError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| LecternError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
