//! reltriage - release payload CI triage CLI
//!
//! The `reltriage` command condenses release-controller and prow status
//! into a failure report a human can scan.
//!
//! ## Commands
//!
//! - `payload`: summarize every payload of a release version and stream
//! - `analysis`: analyze one payload or prow job url

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use regex::Regex;
use std::sync::Arc;
use tracing::{info, Level};

use reltriage_core::{
    validate_selector, AggregationCoordinator, AggregationDbSource, BodyFetcher, HttpFetcher,
    JobRunEnumerator, JunitExtractor, KnownJobs, PayloadProcessor, PayloadSource,
    ProcessOptions, ReleaseApiSource, ReleasePageSource, ReleasePayload, ReportLine, Reporter,
    Severity, SummarizeOptions,
};

#[derive(Parser)]
#[command(name = "reltriage")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Release payload and prow job triage", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored report output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize every payload of a release version and stream
    Payload {
        /// Release version (4.13 through 4.16)
        version: String,

        /// Release stream (nightly or ci)
        stream: String,

        /// Where to list the payloads from
        #[arg(short = 'd', long, value_enum, default_value_t = SourceKind::Webpage)]
        source: SourceKind,

        /// Suppress urls for payloads that were not rejected
        #[arg(short = 'a', long)]
        hide_passing_urls: bool,

        /// Skip the per-run duration table for aggregated jobs
        #[arg(short = 's', long)]
        no_durations: bool,

        /// Also show jobs that succeeded
        #[arg(short = 'c', long)]
        show_success: bool,

        /// Print per-test failure detail text
        #[arg(short = 't', long)]
        test_detail: bool,

        /// Show per-run failure detail for aggregated jobs
        #[arg(short = 'j', long)]
        job_detail: bool,
    },

    /// Analyze one payload or prow job url
    Analysis {
        /// Payload url, aggregated job url, or plain prow job url
        url: String,

        /// Print per-run failure detail
        #[arg(short = 'd', long)]
        add_details: bool,
    },
}

/// Payload listing strategies.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceKind {
    /// Scrape the release-controller index page
    Webpage,
    /// The aggregation database REST API
    Db,
    /// The release-controller API
    Api,
}

/// Renders severity tags as terminal colors, one line at a time.
struct ColorReporter;

impl Reporter for ColorReporter {
    fn emit(&mut self, line: ReportLine) {
        match line.severity {
            Severity::Info => println!("{}", line.text),
            Severity::Warning => println!("{}", line.text.yellow()),
            Severity::Failure => println!("{}", line.text.red()),
            Severity::Disruption => println!("{}", line.text.truecolor(255, 135, 0)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    reltriage_core::init_tracing(cli.json, level);

    if cli.no_color {
        colored::control::set_override(false);
    }

    let fetcher: Arc<dyn BodyFetcher> =
        Arc::new(HttpFetcher::new().context("Failed to build the HTTP client")?);

    match cli.command {
        Commands::Payload {
            version,
            stream,
            source,
            hide_passing_urls,
            no_durations,
            show_success,
            test_detail,
            job_detail,
        } => {
            let opts = ProcessOptions {
                show_all_urls: !hide_passing_urls,
                show_aggr_times: !no_durations,
                show_success,
                show_test_detail: test_detail,
                show_run_detail: job_detail,
            };
            cmd_payload(fetcher, &version, &stream, source, &opts).await
        }
        Commands::Analysis { url, add_details } => cmd_analysis(fetcher, &url, add_details).await,
    }
}

async fn cmd_payload(
    fetcher: Arc<dyn BodyFetcher>,
    version: &str,
    stream: &str,
    kind: SourceKind,
    opts: &ProcessOptions,
) -> Result<()> {
    validate_selector(version, stream)?;

    let source: Box<dyn PayloadSource> = match kind {
        SourceKind::Webpage => Box::new(ReleasePageSource::new(Arc::clone(&fetcher))),
        SourceKind::Db => Box::new(AggregationDbSource::new(Arc::clone(&fetcher))),
        SourceKind::Api => Box::new(ReleaseApiSource::new(Arc::clone(&fetcher))),
    };

    info!("getting payloads for {} {}", version, stream);
    let payloads = source
        .payloads(version, stream)
        .await
        .with_context(|| format!("Failed to list payloads for {version} {stream}"))?;

    let processor = PayloadProcessor::new(Arc::clone(&fetcher));
    let mut reporter = ColorReporter;
    for payload in &payloads {
        processor
            .process(payload, opts, &mut reporter)
            .await
            .with_context(|| format!("Failed processing {}", payload.release_url))?;
    }
    info!("finished listing {} payloads", payloads.len());
    Ok(())
}

async fn cmd_analysis(fetcher: Arc<dyn BodyFetcher>, url: &str, add_details: bool) -> Result<()> {
    // The url shape tells us what we are looking at.
    if url.contains("aggregated") {
        analyze_aggregated(fetcher, url, add_details).await
    } else if url.contains("releasestream") {
        analyze_payload(fetcher, url).await
    } else {
        analyze_plain_job(fetcher, url).await
    }
}

/// Aggregated job: summarize it, then list the aggregate and run urls as
/// a paste-ready block.
async fn analyze_aggregated(
    fetcher: Arc<dyn BodyFetcher>,
    url: &str,
    add_details: bool,
) -> Result<()> {
    let job_regex = Regex::new(r"logs/(?P<name>.*?)-4\.(?:16|15|14|13).*?/(?P<id>\d+)$")
        .expect("static regex");
    let Some(caps) = job_regex.captures(url) else {
        bail!("cannot determine the aggregated job name from {url}");
    };
    let job_name = caps["name"].to_string();
    let job_id = caps["id"].to_string();

    let known = KnownJobs::default();
    let Some(short_name) = known.short_name(&job_name) else {
        bail!("no short name known for aggregated job {job_name} (needed to locate junit files)");
    };

    let coordinator = AggregationCoordinator::new(Arc::clone(&fetcher));
    let opts = SummarizeOptions {
        show_run_durations: true,
        show_run_detail: add_details,
        show_test_detail: true,
    };
    let mut reporter = ColorReporter;
    coordinator
        .summarize(url, short_name, &opts, &mut reporter)
        .await?;

    let enumerator = JobRunEnumerator::new(fetcher);
    let enumeration = enumerator.enumerate(url).await?;
    // The aggregate url leads the list for convenience.
    let mut urls = vec![url.to_string()];
    urls.extend(enumeration.runs.iter().map(|run| run.url.clone()));

    reporter.emit(ReportLine::info(format!("\"aggr-{short_name}-{job_id}\": [")));
    let last = urls.len() - 1;
    for (i, u) in urls.iter().enumerate() {
        let comma = if i == last { "" } else { "," };
        reporter.emit(ReportLine::info(format!("   \"{u}\"{comma}")));
    }
    reporter.emit(ReportLine::info("],"));
    Ok(())
}

/// Single payload url: same processing as the payload command, detail on.
async fn analyze_payload(fetcher: Arc<dyn BodyFetcher>, url: &str) -> Result<()> {
    let processor = PayloadProcessor::new(fetcher);
    let opts = ProcessOptions {
        show_all_urls: true,
        show_aggr_times: true,
        show_success: false,
        show_test_detail: true,
        show_run_detail: true,
    };
    let mut reporter = ColorReporter;
    processor
        .process(&ReleasePayload::from_url(url), &opts, &mut reporter)
        .await?;
    Ok(())
}

/// Plain prow job url: classify its junit artifacts directly.
async fn analyze_plain_job(fetcher: Arc<dyn BodyFetcher>, url: &str) -> Result<()> {
    let job_regex = Regex::new(r"-4\.(?:16|15|14|13)-(?P<name>.*?)/\d+$").expect("static regex");
    let Some(caps) = job_regex.captures(url) else {
        bail!("cannot determine the job name from {url}");
    };
    let job_name = caps["name"].to_string();

    let known = KnownJobs::default();
    let Some(short_name) = known.short_name(&job_name) else {
        bail!("no short name known for job {job_name} (needed to locate junit files)");
    };

    let extractor = JunitExtractor::new(fetcher);
    let mut reporter = ColorReporter;
    reporter.emit(ReportLine::info(format!("    {url}")));
    match extractor.extract(url, short_name, true).await {
        Ok(failures) => {
            for failure in &failures {
                for line in failure.report_lines("") {
                    reporter.emit(line);
                }
            }
            Ok(())
        }
        Err(err) if err.is_timeout() => {
            reporter.emit(ReportLine::warning(format!("    {err}")));
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
