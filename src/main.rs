use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

use brand_normalizer::io::{read_json, write_json};
use brand_normalizer::llm::RetryPolicy;
use brand_normalizer::models::index_dialogues;
use brand_normalizer::{
    aggregate, filter_candidates, generate_synonyms, match_synonyms, read_catalog,
    read_dialogues, render_reports, CandidateDetection, Catalog, ChatCompletionClient,
    CompletionConfig, Dialogue, FilterConfig, MatchConfig, ReportConfig, ScoredDetection,
    SynonymCache, SynonymConfig, SynonymSet,
};

const CANDIDATES_FILE: &str = "candidates.json";
const SCORED_FILE: &str = "scored.json";

#[derive(Parser)]
#[command(name = "brand-normalizer")]
#[command(author, version, about = "Brand mention detection and evaluation pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate synonyms, match, filter and score brand mentions
    Run {
        /// Brand catalog (single-column CSV, no header)
        #[arg(short, long)]
        catalog: PathBuf,

        /// Annotated dialogues (CSV with header)
        #[arg(short, long)]
        dialogues: PathBuf,

        /// Synonym cache file
        #[arg(long, default_value = "synonyms_cache.json")]
        cache: PathBuf,

        /// Directory for intermediate and final outputs
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Run a single step (1-4) using the previous step's saved output
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=4))]
        step: Option<u8>,

        /// Use the synonym cache as is, without generating
        #[arg(long)]
        skip_synonyms: bool,

        /// Regenerate synonyms for brands that are already cached
        #[arg(long)]
        force_regenerate: bool,

        /// Maximum concurrent confidence judgments
        #[arg(long, default_value = "8")]
        max_concurrent: usize,

        /// Timeout per judgment request in seconds
        #[arg(long, default_value = "180")]
        timeout_secs: u64,

        /// Retries per judgment after transport failures or timeouts
        #[arg(long, default_value = "2")]
        max_retries: u32,

        /// Confidence above which a candidate is confirmed
        #[arg(long, default_value = "0.5")]
        threshold: f64,

        /// Number of brands in the low-precision report
        #[arg(long, default_value = "10")]
        top_n: usize,

        /// JSON file mapping annotation spellings to catalog names
        #[arg(long)]
        aliases: Option<PathBuf>,

        /// Stop admitting new judgments after this many seconds
        #[arg(long)]
        run_timeout_secs: Option<u64>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Inspect or clear the synonym cache
    Cache {
        /// Synonym cache file
        #[arg(long, default_value = "synonyms_cache.json")]
        cache: PathBuf,

        /// Report how many catalog brands are still missing
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Delete the cache file
        #[arg(long)]
        clear: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

/// Options shared by the steps of one run
struct RunOptions {
    catalog: PathBuf,
    dialogues: PathBuf,
    cache: PathBuf,
    output_dir: PathBuf,
    step: Option<u8>,
    skip_synonyms: bool,
    synonym_config: SynonymConfig,
    filter_config: FilterConfig,
    report_config: ReportConfig,
}

impl RunOptions {
    fn runs(&self, step: u8) -> bool {
        self.step.is_none_or(|only| only == step)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            catalog,
            dialogues,
            cache,
            output_dir,
            step,
            skip_synonyms,
            force_regenerate,
            max_concurrent,
            timeout_secs,
            max_retries,
            threshold,
            top_n,
            aliases,
            run_timeout_secs,
            verbose,
        } => {
            setup_logging(verbose);

            let mut report_config = ReportConfig {
                top_n,
                ..Default::default()
            };
            if let Some(path) = aliases {
                report_config = report_config
                    .with_aliases_file(&path)
                    .with_context(|| format!("Failed to load aliases from {:?}", path))?;
            }

            let options = RunOptions {
                catalog,
                dialogues,
                cache,
                output_dir,
                step,
                skip_synonyms,
                synonym_config: SynonymConfig {
                    force_regenerate,
                    ..Default::default()
                },
                filter_config: FilterConfig {
                    max_concurrent,
                    retry: RetryPolicy {
                        timeout: Duration::from_secs(timeout_secs),
                        max_retries,
                        ..Default::default()
                    },
                    acceptance_threshold: threshold,
                    deadline: run_timeout_secs
                        .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs)),
                    ..Default::default()
                },
                report_config,
            };
            run_pipeline(options).await
        }
        Commands::Cache {
            cache,
            catalog,
            clear,
            verbose,
        } => {
            setup_logging(verbose);
            inspect_cache(&cache, catalog.as_deref(), clear)
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn completion_client() -> Result<ChatCompletionClient> {
    let config = CompletionConfig::from_env().context("Completion provider is not configured")?;
    let client = ChatCompletionClient::new(config);
    info!("Using model {}", client.model());
    Ok(client)
}

async fn run_pipeline(options: RunOptions) -> Result<()> {
    let run_id = Uuid::new_v4().to_string();
    info!("Run {} starting", run_id);

    std::fs::create_dir_all(&options.output_dir)
        .with_context(|| format!("Failed to create {:?}", options.output_dir))?;
    let candidates_path = options.output_dir.join(CANDIDATES_FILE);
    let scored_path = options.output_dir.join(SCORED_FILE);

    info!("Loading catalog from {:?}", options.catalog);
    let catalog = read_catalog(&options.catalog).context("Failed to read brand catalog")?;
    info!("Loaded {} brands", catalog.len());

    // Step 1: synonyms
    let mut synonyms: Option<SynonymSet> = None;
    if options.runs(1) {
        synonyms = Some(step_synonyms(&options, &catalog).await?);
    }

    info!("Loading dialogues from {:?}", options.dialogues);
    let dialogues = read_dialogues(&options.dialogues).context("Failed to read dialogues")?;
    info!("Loaded {} dialogues", dialogues.len());

    // Step 2: lexical matching
    let mut candidates: Option<Vec<CandidateDetection>> = None;
    if options.runs(2) {
        let synonyms = match synonyms {
            Some(synonyms) => synonyms,
            None => SynonymCache::load(&options.cache)
                .context("Failed to load synonym cache")?
                .synonym_set(&catalog),
        };
        let found = match_synonyms(&dialogues, &synonyms, &MatchConfig::default());
        write_json(&candidates_path, &found).context("Failed to save candidates")?;
        candidates = Some(found);
    }

    // Step 3: confidence filter
    let mut scored: Option<Vec<ScoredDetection>> = None;
    if options.runs(3) {
        let candidates = match candidates {
            Some(candidates) => candidates,
            None => read_json(&candidates_path)
                .with_context(|| format!("Failed to read {:?}; run step 2 first", candidates_path))?,
        };
        let judged = step_filter(&options, &candidates, &dialogues).await?;
        write_json(&scored_path, &judged).context("Failed to save scored detections")?;
        scored = Some(judged);
    }

    // Step 4: metrics and reports
    if options.runs(4) {
        let scored = match scored {
            Some(scored) => scored,
            None => read_json(&scored_path)
                .with_context(|| format!("Failed to read {:?}; run step 3 first", scored_path))?,
        };
        let report = aggregate(&scored, &dialogues, &catalog, &options.report_config)?;
        let paths = render_reports(&options.output_dir, &scored, &report, &run_id, Utc::now())
            .context("Failed to write reports")?;

        info!(
            "Complete: precision={:.4} recall={:.4} f1={:.4}",
            report.metrics.precision, report.metrics.recall, report.metrics.f1
        );
        info!("Reports written to {:?}", paths.workbook);
    }

    info!("Run {} finished", run_id);
    Ok(())
}

async fn step_synonyms(options: &RunOptions, catalog: &Catalog) -> Result<SynonymSet> {
    let mut cache = SynonymCache::load(&options.cache).context("Failed to load synonym cache")?;

    if options.skip_synonyms {
        info!("Skipping synonym generation (--skip-synonyms)");
        let missing = cache.missing(catalog).len();
        if missing > 0 {
            warn!("{} brands have no cached synonyms and will match by name only", missing);
        }
        return Ok(cache.synonym_set(catalog));
    }

    if !options.synonym_config.force_regenerate && cache.missing(catalog).is_empty() {
        info!("Stage 1: all {} brands cached", catalog.len());
        return Ok(cache.synonym_set(catalog));
    }

    let client = completion_client()?;
    let result = generate_synonyms(
        &client,
        catalog,
        &mut cache,
        &options.cache,
        &options.synonym_config,
    )
    .await?;

    info!(
        "Stage 1: {} generated, {} cached, {} degraded batches, {} synonyms total",
        result.brands_generated,
        result.brands_cached,
        result.degraded_batches,
        result.synonyms.synonym_count()
    );
    Ok(result.synonyms)
}

async fn step_filter(
    options: &RunOptions,
    candidates: &[CandidateDetection],
    dialogues: &[Dialogue],
) -> Result<Vec<ScoredDetection>> {
    if candidates.is_empty() {
        info!("Stage 3: no candidates to judge");
        return Ok(Vec::new());
    }

    let client = completion_client()?;
    let index = index_dialogues(dialogues);
    let result = filter_candidates(&client, candidates, &index, &options.filter_config).await?;
    Ok(result.scored)
}

fn inspect_cache(path: &Path, catalog: Option<&Path>, clear: bool) -> Result<()> {
    if clear {
        if SynonymCache::clear(path)? {
            println!("Removed {:?}", path);
        } else {
            println!("No cache at {:?}", path);
        }
        return Ok(());
    }

    let cache = SynonymCache::load(path).context("Failed to load synonym cache")?;

    println!("Synonym Cache");
    println!("=============");
    println!("Path: {:?}", path);
    println!("Brands: {}", cache.len());

    if let Some(catalog_path) = catalog {
        let catalog = read_catalog(catalog_path).context("Failed to read brand catalog")?;
        let synonyms = cache.synonym_set(&catalog);
        println!("Catalog brands: {}", catalog.len());
        println!("Missing from cache: {}", cache.missing(&catalog).len());
        println!("Synonyms for catalog: {}", synonyms.synonym_count());
    }

    Ok(())
}
