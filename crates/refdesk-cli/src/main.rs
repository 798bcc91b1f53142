use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use refdesk_core::{
    CatalogService, MemoryStore, PageRequest, PaperDetail, SearchQuery, SortMode,
};

mod output;

use output::ColorMode;

/// Refdesk catalog exerciser - run ranked searches against a paper dataset
/// and watch the result cache work
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search the paper catalog with the ranked query engine
    Search {
        /// Free-text query
        query: String,

        /// Path to a JSON dataset of papers (falls back to $REFDESK_DATA,
        /// then demos/papers.sample.json)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Restrict results to one field id
        #[arg(long)]
        field: Option<u64>,

        /// Minimum average review rating (inclusive)
        #[arg(long)]
        min_rating: Option<f64>,

        /// Earliest publication date (inclusive, YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Latest publication date (inclusive, YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Sort order for results
        #[arg(long, value_enum, default_value = "relevance")]
        sort: SortArg,

        /// Result page, 1-based
        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Results per page (defaults to the configured page size)
        #[arg(long)]
        limit: Option<u32>,

        /// Run the same query this many times to exercise the cache
        #[arg(long, default_value_t = 1)]
        repeat: u32,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Show one paper's aggregate detail view
    Show {
        /// Paper id
        id: u64,

        /// Path to a JSON dataset of papers
        #[arg(long)]
        data: Option<PathBuf>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Warm the caches with a scripted exercise and print the counters
    Stats {
        /// Path to a JSON dataset of papers
        #[arg(long)]
        data: Option<PathBuf>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Relevance,
    Date,
    Rating,
    Downloads,
}

impl From<SortArg> for SortMode {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Relevance => SortMode::Relevance,
            SortArg::Date => SortMode::Date,
            SortArg::Rating => SortMode::Rating,
            SortArg::Downloads => SortMode::Downloads,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();

    match cli.command {
        Command::Search {
            query,
            data,
            field,
            min_rating,
            from,
            to,
            sort,
            page,
            limit,
            repeat,
            no_color,
        } => {
            search(
                query, data, field, min_rating, from, to, sort, page, limit, repeat, no_color,
            )
            .await
        }
        Command::Show { id, data, no_color } => show(id, data, no_color).await,
        Command::Stats { data, no_color } => stats(data, no_color).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn search(
    query_text: String,
    data: Option<PathBuf>,
    field: Option<u64>,
    min_rating: Option<f64>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    sort: SortArg,
    page: u32,
    limit: Option<u32>,
    repeat: u32,
    no_color: bool,
) -> anyhow::Result<()> {
    let color = ColorMode(!no_color);
    let papers = load_dataset(data)?;
    let config = refdesk_core::load_runtime_config();

    let store = Arc::new(MemoryStore::with_papers(papers));
    let service = CatalogService::new(store, &config);

    let mut query = SearchQuery::parse(&query_text)?;
    query.field_id = field;
    query.min_rating = min_rating;
    query.published_from = from;
    query.published_to = to;
    query.sort = sort.into();
    let page = PageRequest::new(page, limit.unwrap_or(config.default_page_size))?;

    let mut writer = std::io::stdout();
    let mut last = None;
    for run in 1..=repeat.max(1) {
        let start = Instant::now();
        let result = service.search(&query, page).await?;
        let elapsed = start.elapsed();
        if repeat > 1 {
            output::print_run_timing(&mut writer, run, elapsed, color)?;
        }
        last = Some(result);
    }

    if let Some(result) = last {
        if repeat > 1 {
            writeln!(writer)?;
        }
        output::print_search_page(&mut writer, &result, color)?;
    }

    if repeat > 1 {
        let snapshot = service.cache_stats();
        output::print_cache_stats(&mut writer, &snapshot, color)?;
    }

    Ok(())
}

async fn show(id: u64, data: Option<PathBuf>, no_color: bool) -> anyhow::Result<()> {
    let color = ColorMode(!no_color);
    let papers = load_dataset(data)?;
    let config = refdesk_core::load_runtime_config();
    let service = CatalogService::new(Arc::new(MemoryStore::with_papers(papers)), &config);

    let mut writer = std::io::stdout();
    match service.paper_detail(id).await? {
        Some(detail) => output::print_detail(&mut writer, &detail, color)?,
        None => anyhow::bail!("Paper {} not found in the dataset", id),
    }
    Ok(())
}

/// Run a fixed exercise over the dataset (every query and detail twice, one
/// invalidation) so the printed counters show hits, misses, and sweeps.
async fn stats(data: Option<PathBuf>, no_color: bool) -> anyhow::Result<()> {
    let color = ColorMode(!no_color);
    let papers = load_dataset(data)?;
    let config = refdesk_core::load_runtime_config();

    let targets: Vec<(u64, u64)> = papers
        .iter()
        .take(3)
        .map(|p| (p.record.id, p.submitted_by))
        .collect();
    let phrases: Vec<String> = papers
        .iter()
        .take(3)
        .filter_map(|p| p.record.title.split_whitespace().next())
        .map(str::to_string)
        .collect();

    let service = CatalogService::new(Arc::new(MemoryStore::with_papers(papers)), &config);
    let page = PageRequest::new(1, config.default_page_size)?;

    for phrase in &phrases {
        let query = SearchQuery::parse(phrase)?;
        service.search(&query, page).await?;
        service.search(&query, page).await?;
    }
    for (id, _) in &targets {
        service.paper_detail(*id).await?;
        service.paper_detail(*id).await?;
    }
    if let Some((id, owner)) = targets.first() {
        service.invalidate_after_review(*id, *owner);
        service.paper_detail(*id).await?;
    }

    let mut writer = std::io::stdout();
    let snapshot = service.cache_stats();
    output::print_cache_stats(&mut writer, &snapshot, color)?;
    Ok(())
}

/// Resolve and parse the paper dataset: `--data` flag, then $REFDESK_DATA,
/// then the bundled sample.
fn load_dataset(data: Option<PathBuf>) -> anyhow::Result<Vec<PaperDetail>> {
    let path = data
        .or_else(|| std::env::var("REFDESK_DATA").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("demos/papers.sample.json"));
    if !path.exists() {
        anyhow::bail!("Dataset not found: {}", path.display());
    }
    let content = std::fs::read_to_string(&path)?;
    let papers: Vec<PaperDetail> = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
    Ok(papers)
}
