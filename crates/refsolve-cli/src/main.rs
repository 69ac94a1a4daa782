use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod output;

use output::{ColorMode, print_item, print_occurrences, print_progress, print_summary};
use refsolve_core::client::build_pacer;
use refsolve_core::config_file::load_config;
use refsolve_core::extract::extract_occurrences;
use refsolve_core::sources::MetadataSource;
use refsolve_core::sources::crossref::CrossRef;
use refsolve_core::sources::preprint::Arxiv;
use refsolve_core::{
    Config, Grammar, LibrarySnapshot, LookupCache, LookupClient, ProgressEvent, Resolver,
    run_pipeline,
};

/// Resolve document citations against a reference-manager library export
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GrammarArg {
    /// Structured-record output (entity escaping)
    Record,
    /// Typeset markup output (TeX-family escaping)
    Typeset,
}

impl From<GrammarArg> for Grammar {
    fn from(arg: GrammarArg) -> Self {
        match arg {
            GrammarArg::Record => Grammar::StructuredRecord,
            GrammarArg::Typeset => Grammar::TypesetMarkup,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve citations in a document against a library snapshot
    Resolve {
        /// Path to the source text to scan for citations
        input: PathBuf,

        /// Path to the library snapshot (JSON export)
        #[arg(short, long)]
        library: PathBuf,

        /// Target emission grammar
        #[arg(long, value_enum, default_value = "record")]
        grammar: GrammarArg,

        /// Write the emitted items as JSON to this path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the failure report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Print the full run output as JSON to stdout
        #[arg(long)]
        json: bool,

        /// Print each outcome as it completes
        #[arg(short, long)]
        verbose: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,

        /// Skip remote metadata lookups (library-only matching)
        #[arg(long)]
        offline: bool,

        /// Exit nonzero if any occurrence failed (after the full report)
        #[arg(long)]
        strict: bool,

        /// Worker pool size
        #[arg(long)]
        workers: Option<usize>,

        /// Fuzzy-match confidence threshold (0..1)
        #[arg(long)]
        threshold: Option<f64>,

        /// Persistent cache database path
        #[arg(long)]
        cache_path: Option<PathBuf>,
    },

    /// Extract citation occurrences without resolving them
    Extract {
        /// Path to the source text to scan
        input: PathBuf,

        /// Print occurrences as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or maintain the persistent lookup cache
    Cache {
        /// Cache database path (defaults to the configured one)
        #[arg(long)]
        cache_path: Option<PathBuf>,

        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Show entry counts and TTL
    Stats,
    /// Remove entries older than the given number of days
    Prune {
        #[arg(long, default_value_t = 7)]
        days: u64,
    },
    /// Remove all entries
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Resolve {
            input,
            library,
            grammar,
            output,
            report,
            json,
            verbose,
            no_color,
            offline,
            strict,
            workers,
            threshold,
            cache_path,
        } => {
            resolve(ResolveArgs {
                input,
                library,
                grammar: grammar.into(),
                output,
                report,
                json,
                verbose,
                no_color,
                offline,
                strict,
                workers,
                threshold,
                cache_path,
            })
            .await
        }
        Command::Extract { input, json } => extract(input, json),
        Command::Cache { cache_path, action } => cache_admin(cache_path, action),
    }
}

struct ResolveArgs {
    input: PathBuf,
    library: PathBuf,
    grammar: Grammar,
    output: Option<PathBuf>,
    report: Option<PathBuf>,
    json: bool,
    verbose: bool,
    no_color: bool,
    offline: bool,
    strict: bool,
    workers: Option<usize>,
    threshold: Option<f64>,
    cache_path: Option<PathBuf>,
}

/// Assemble the run configuration: defaults, config files, then CLI flags.
fn build_config(args: &ResolveArgs) -> anyhow::Result<Config> {
    let mut config = Config::default();
    load_config().apply(&mut config);

    if let Some(workers) = args.workers {
        config.num_workers = workers;
    }
    if let Some(threshold) = args.threshold {
        config.fuzzy_threshold = threshold;
    }
    if let Some(ref path) = args.cache_path {
        config.cache_path = Some(path.clone());
    }
    if args.strict {
        config.strict = true;
    }
    if args.offline {
        config.augment_from_remote = false;
    }

    config.validate()?;
    Ok(config)
}

async fn resolve(args: ResolveArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;
    let color = ColorMode(!args.no_color && !args.json);

    let text = std::fs::read_to_string(&args.input)?;
    let occurrences = extract_occurrences(&text);
    if occurrences.is_empty() {
        eprintln!("No citation occurrences found in {}", args.input.display());
    }

    let library = Arc::new(LibrarySnapshot::load(&args.library)?);

    let cache = match config.cache_path {
        Some(ref path) => Arc::new(LookupCache::open(path, config.cache_ttl())?),
        None => Arc::new(LookupCache::new(config.cache_ttl())),
    };

    let resolver = if args.offline {
        Arc::new(Resolver::new(&config))
    } else {
        let mailto = std::env::var("REFSOLVE_MAILTO").ok();
        let sources: Vec<Arc<dyn MetadataSource>> =
            vec![Arc::new(CrossRef { mailto }), Arc::new(Arxiv)];
        let client = Arc::new(LookupClient::new(
            sources,
            build_pacer(config.rate_limit_interval()),
            cache.clone(),
            config.max_retries,
            config.fetch_timeout(),
        ));
        Arc::new(Resolver::with_client(&config, client))
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, finishing in-flight work...");
                cancel.cancel();
            }
        });
    }

    let total = occurrences.len() as u64;
    let bar = if args.verbose || args.json {
        None
    } else {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Some(bar)
    };

    let progress_bar = bar.clone();
    let progress_verbose = args.verbose;
    let progress = move |event: ProgressEvent| {
        if let Some(ref bar) = progress_bar {
            match event {
                ProgressEvent::Resolved { .. } | ProgressEvent::Failed { .. } => bar.inc(1),
                _ => {}
            }
        } else if progress_verbose {
            let mut stdout = std::io::stdout();
            let _ = print_progress(&mut stdout, &event, ColorMode(true));
        }
    };

    let run = run_pipeline(
        occurrences,
        library,
        resolver,
        args.grammar,
        config.num_workers,
        progress,
        cancel,
    )
    .await;

    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    if let Some(ref path) = args.output {
        std::fs::write(path, serde_json::to_string_pretty(&run.items)?)?;
        eprintln!("Wrote {} items to {}", run.items.len(), path.display());
    }
    if let Some(ref path) = args.report {
        std::fs::write(path, serde_json::to_string_pretty(&run.report)?)?;
        eprintln!(
            "Wrote failure report ({} entries) to {}",
            run.report.len(),
            path.display()
        );
    }

    let mut stdout = std::io::stdout();
    if args.json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&run)?)?;
    } else {
        if args.verbose {
            for item in &run.items {
                print_item(&mut stdout, item, color)?;
            }
        }
        print_summary(&mut stdout, &run, color)?;
    }

    // Strict mode turns accumulated failures into a hard failure, but only
    // after the full report has been produced.
    if config.strict && run.has_failures() {
        anyhow::bail!(
            "strict mode: {} of {} occurrences failed",
            run.stats.failed(),
            run.stats.total
        );
    }
    Ok(())
}

fn extract(input: PathBuf, json: bool) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&input)?;
    let occurrences = extract_occurrences(&text);

    let mut stdout = std::io::stdout();
    if json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&occurrences)?)?;
    } else {
        print_occurrences(&mut stdout, &occurrences)?;
    }
    Ok(())
}

fn cache_admin(cache_path: Option<PathBuf>, action: CacheAction) -> anyhow::Result<()> {
    let mut config = Config::default();
    load_config().apply(&mut config);
    let cache_ttl = config.cache_ttl();
    let path = cache_path
        .or(config.cache_path)
        .ok_or_else(|| anyhow::anyhow!("no cache path configured; pass --cache-path"))?;

    let cache = LookupCache::open(&path, cache_ttl)?;
    match action {
        CacheAction::Stats => {
            println!("cache: {}", path.display());
            println!("entries: {}", cache.disk_len());
            println!("ttl: {}s", cache.ttl().as_secs());
        }
        CacheAction::Prune { days } => {
            let removed = cache.prune(Duration::from_secs(days * 24 * 60 * 60));
            println!("pruned {} entries older than {} days", removed, days);
        }
        CacheAction::Clear => {
            cache.clear();
            println!("cache cleared");
        }
    }
    Ok(())
}
