use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use pre2pub_core::{
    Backends, BatchStatus, Config, ProgressEvent, RateLimiters, ResolveRequest, Resolver, Server,
    SimilarityScorer, TextEmbeddingsServer, config_file, doi::normalize_doi,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod output;

use output::ColorMode;

/// Pre2Pub - Find the published journal version of a preprint
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a single preprint DOI
    Resolve {
        /// DOI of the preprint, e.g. 10.1101/2020.07.25.20161844
        doi: String,

        /// Preprint server: biorxiv, medrxiv or other
        #[arg(long, default_value = "other")]
        server: String,

        #[command(flatten)]
        opts: CommonArgs,
    },

    /// Resolve every preprint listed in a file (one `doi[,server]` per line)
    Batch {
        /// Path to the list of preprints
        file: PathBuf,

        /// Number of preprints resolved concurrently
        #[arg(long)]
        workers: Option<usize>,

        #[command(flatten)]
        opts: CommonArgs,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Contact email sent to NCBI E-utilities
    #[arg(long)]
    email: Option<String>,

    /// NCBI API key (raises the PubMed rate limit)
    #[arg(long)]
    ncbi_api_key: Option<String>,

    /// Contact email for the Crossref polite pool
    #[arg(long)]
    mailto: Option<String>,

    /// Base URL of the text-embeddings inference server
    #[arg(long)]
    embedding_url: Option<String>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::Resolve { doi, server, opts } => {
            let doi = normalize_doi(&doi)
                .with_context(|| format!("not a DOI: {}", doi.trim()))?;
            let server: Server = server.parse().unwrap_or(Server::Other);
            let config = build_config(&opts, None);
            resolve(&doi, server, config, &opts).await
        }
        Command::Batch {
            file,
            workers,
            opts,
        } => {
            let requests = read_batch_file(&file)?;
            let config = build_config(&opts, workers);
            batch(requests, config, &opts).await
        }
    }
}

/// Resolve configuration: CLI flags > env vars > config file > defaults.
fn build_config(opts: &CommonArgs, workers: Option<usize>) -> Config {
    let mut config = Config::default();
    config_file::load_config().apply_to(&mut config);

    let env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

    if let Some(v) = opts.mailto.clone().or_else(|| env("CROSSREF_MAILTO")) {
        config.crossref_mailto = Some(v);
    }
    if let Some(v) = opts.email.clone().or_else(|| env("NCBI_EMAIL")) {
        config.ncbi_email = Some(v);
    }
    if let Some(v) = opts.ncbi_api_key.clone().or_else(|| env("NCBI_API_KEY")) {
        config.ncbi_api_key = Some(v);
    }
    if let Some(v) = opts.embedding_url.clone().or_else(|| env("EMBEDDING_URL")) {
        config.embedding_url = v;
    }
    if let Some(secs) = env("SOURCE_TIMEOUT").and_then(|v| v.parse().ok()) {
        config.source_timeout_secs = secs;
    }
    if let Some(n) = workers {
        config.num_workers = n.max(1);
    }

    config.rate_limiters = Arc::new(RateLimiters::new(
        config.crossref_mailto.is_some(),
        config.ncbi_api_key.is_some(),
    ));
    tracing::debug!(?config, "configuration");
    config
}

/// Load the embedding model once and wire up the resolver. The model being
/// unavailable is fatal.
async fn build_resolver(config: Config) -> anyhow::Result<Arc<Resolver>> {
    let model = TextEmbeddingsServer::connect(
        &config.embedding_url,
        &config.embedding_model,
        reqwest::Client::new(),
        Duration::from_secs(config.source_timeout_secs.max(30)),
    )
    .await
    .context("cannot start without the embedding model")?;

    let backends = Backends::from_config(&config);
    Ok(Arc::new(Resolver::new(
        Arc::new(config),
        backends,
        SimilarityScorer::new(Arc::new(model)),
    )))
}

async fn resolve(
    doi: &str,
    server: Server,
    config: Config,
    opts: &CommonArgs,
) -> anyhow::Result<ExitCode> {
    let color = ColorMode(!opts.no_color && !opts.json);
    let resolver = build_resolver(config).await?;
    let result = resolver.resolve_doi(doi, server).await;

    let mut stdout = std::io::stdout();
    if opts.json {
        let json = output::result_json(doi, &result);
        writeln!(stdout, "{}", serde_json::to_string_pretty(&json)?)?;
    } else {
        match &result {
            Ok(verdict) => output::print_verdict(&mut stdout, verdict, color)?,
            Err(e) => output::print_error(&mut stdout, doi, e, color)?,
        }
    }

    Ok(if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn batch(
    requests: Vec<ResolveRequest>,
    config: Config,
    opts: &CommonArgs,
) -> anyhow::Result<ExitCode> {
    use indicatif::{ProgressBar, ProgressStyle};

    let color = ColorMode(!opts.no_color && !opts.json);
    let total = requests.len();
    if total == 0 {
        anyhow::bail!("no preprint DOIs in input");
    }

    let resolver = build_resolver(config).await?;

    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.green/dim}] {pos}/{len} {msg} (eta {eta})",
        )?
        .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let progress_cb = {
        let bar = bar.clone();
        move |event: ProgressEvent| match event {
            ProgressEvent::Started { doi, .. } => bar.set_message(doi),
            ProgressEvent::Finished { status, .. } => {
                if status == BatchStatus::Failed {
                    bar.println("resolution failed, see summary");
                }
                bar.inc(1);
            }
        }
    };

    let cancel = CancellationToken::new();

    // Set up Ctrl+C handler
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });

    let outcomes = pre2pub_core::resolve_preprints(requests, resolver, progress_cb, cancel).await;
    bar.finish_and_clear();

    let mut stdout = std::io::stdout();
    if opts.json {
        let json: Vec<serde_json::Value> = outcomes
            .iter()
            .map(|o| output::result_json(&o.doi, &o.result))
            .collect();
        writeln!(stdout, "{}", serde_json::to_string_pretty(&json)?)?;
    } else {
        for outcome in &outcomes {
            output::print_outcome(&mut stdout, outcome, color)?;
        }
        output::print_summary(&mut stdout, &outcomes, total, color)?;
    }

    let failed = outcomes.iter().any(|o| o.status() == BatchStatus::Failed);
    Ok(if failed || outcomes.len() < total {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn read_batch_file(path: &Path) -> anyhow::Result<Vec<ResolveRequest>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    Ok(content.lines().filter_map(parse_batch_line).collect())
}

/// Parse `doi[,server]`. Blank lines and `#` comments yield `None`.
fn parse_batch_line(line: &str) -> Option<ResolveRequest> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (doi, server) = match line.split_once(',') {
        Some((doi, server)) => (doi.trim(), server.parse().unwrap_or(Server::Other)),
        None => (line, Server::Other),
    };
    if doi.is_empty() {
        return None;
    }
    match normalize_doi(doi) {
        Some(doi) => Some(ResolveRequest::new(doi, server)),
        None => {
            tracing::warn!(line, "skipping line without a DOI");
            None
        }
    }
}
