//! Per-payload processing.
//!
//! [`PayloadProcessor`] scrapes one release payload's status page,
//! reconciles the derived acceptance phase with the recorded one, and
//! walks the blocking jobs: aggregated jobs go through the aggregation
//! coordinator, plain jobs straight through the JUnit extractor.

use crate::aggregate::{AggregationCoordinator, SummarizeOptions};
use crate::error::Result;
use crate::extract::JunitExtractor;
use crate::fetch::{BodyFetcher, PAYLOAD_PAGE_TIMEOUT};
use crate::payload::{PayloadPhase, ReleasePayload};
use crate::report::{ReportLine, Reporter, Severity};
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

/// Visual separator between payload sections.
const SEPARATOR_WIDTH: usize = 175;

/// Options controlling how much of each payload is shown.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Show urls for passing payloads too, not only rejected ones.
    pub show_all_urls: bool,
    /// Show per-run durations for aggregated jobs.
    pub show_aggr_times: bool,
    /// Show jobs that succeeded, not only the failed ones.
    pub show_success: bool,
    /// Attach per-test failure detail text.
    pub show_test_detail: bool,
    /// Show per-run failure detail for aggregated jobs.
    pub show_run_detail: bool,
}

/// Scrapes and reports one release payload.
pub struct PayloadProcessor {
    fetcher: Arc<dyn BodyFetcher>,
    coordinator: AggregationCoordinator,
    extractor: Arc<JunitExtractor>,
    title_regex: Regex,
    job_regex: Regex,
}

impl PayloadProcessor {
    pub fn new(fetcher: Arc<dyn BodyFetcher>) -> Self {
        Self {
            coordinator: AggregationCoordinator::new(Arc::clone(&fetcher)),
            extractor: Arc::new(JunitExtractor::new(Arc::clone(&fetcher))),
            title_regex: Regex::new(r"<.*title>(?P<title>.*)</title>").expect("static regex"),
            job_regex: Regex::new(
                r#"href="(?P<url>.*)">(?P<name>.*) (?P<status>Pending.*|Succeeded.*|Failed.*)</a>.*"#,
            )
            .expect("static regex"),
            fetcher,
        }
    }

    /// Substitute the coordinator and extractor, e.g. for sandboxed tests.
    pub fn with_coordinator(mut self, coordinator: AggregationCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_extractor(mut self, extractor: JunitExtractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// Scrape one payload's page and report its blocking-job outcomes.
    pub async fn process(
        &self,
        payload: &ReleasePayload,
        opts: &ProcessOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        let body = match self.fetcher.fetch(&payload.release_url, PAYLOAD_PAGE_TIMEOUT).await {
            Ok(body) => body,
            Err(err) if err.is_timeout() => {
                reporter.emit(ReportLine::warning(format!("{err}; skipping payload")));
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let text = String::from_utf8_lossy(&body);

        // "Release 4.14.0-0.nightly-..." with the leading word dropped.
        let title = self
            .title_regex
            .captures(&text)
            .map(|caps| {
                let full = &caps["title"];
                full.get(8..).unwrap_or(full).to_string()
            })
            .unwrap_or_else(|| "No release".to_string());

        // Everything we care about sits under "Blocking jobs"; a page
        // without that marker has aged out of the release controller.
        let Some(after_blocking) = text.split("Blocking jobs").nth(1) else {
            self.emit_aged_out(payload, &text, reporter);
            return Ok(());
        };
        let blocking = after_blocking.split("Informing jobs").next().unwrap_or_default();
        let entries: Vec<&str> = blocking.split("<li>").collect();

        // First pass: derive the payload phase from the job statuses.
        let mut derived = PayloadPhase::Accepted;
        for entry in &entries {
            let Some(caps) = self.job_regex.captures(entry) else {
                continue;
            };
            match &caps["status"] {
                "Failed" => derived = PayloadPhase::Rejected,
                "Pending" => derived = PayloadPhase::Pending,
                _ => {}
            }
        }
        if derived != payload.phase {
            // Force-rejected payloads keep Pending jobs forever; the
            // recorded phase is the truthful one.
            debug!(
                "derived phase {derived} disagrees with recorded {}; trusting the record",
                payload.phase
            );
            derived = payload.phase.clone();
        }

        self.emit_banner(&title, &derived, payload, opts.show_all_urls, reporter);

        // Second pass: report the jobs, failed ones first-class.
        for entry in &entries {
            let Some(caps) = self.job_regex.captures(entry) else {
                continue;
            };
            let name = caps["name"].trim().to_string();
            let status = &caps["status"];
            let job_url = caps["url"].to_string();
            if status != "Failed" && !opts.show_success {
                continue;
            }
            match status {
                "Failed" => reporter.emit(ReportLine::failure(format!("  {name}  Failed"))),
                "Succeeded" => reporter.emit(ReportLine::info(format!("  {name}  Succeeded"))),
                _ => {}
            }

            if name.starts_with("aggregated") {
                let summarize_opts = SummarizeOptions {
                    show_run_durations: opts.show_aggr_times,
                    show_run_detail: opts.show_run_detail,
                    show_test_detail: opts.show_test_detail,
                };
                self.coordinator
                    .summarize(&job_url, &name, &summarize_opts, reporter)
                    .await?;
            } else {
                self.report_plain_job(&job_url, &name, opts.show_test_detail, reporter)
                    .await?;
            }
        }
        Ok(())
    }

    /// Plain (non-aggregated) job: url line plus its classified failures.
    async fn report_plain_job(
        &self,
        job_url: &str,
        job_name: &str,
        show_test_detail: bool,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        reporter.emit(ReportLine::info(format!("    {job_url}")));
        match self.extractor.extract(job_url, job_name, show_test_detail).await {
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
            Err(crate::error::TriageError::UnsupportedJob(name)) => {
                reporter.emit(ReportLine::warning(format!(
                    "    junit extraction not supported for {name}"
                )));
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Banner above one payload's job list.
    fn emit_banner(
        &self,
        title: &str,
        phase: &PayloadPhase,
        payload: &ReleasePayload,
        show_all_urls: bool,
        reporter: &mut dyn Reporter,
    ) {
        let severity = match phase {
            PayloadPhase::Rejected => Severity::Failure,
            PayloadPhase::Accepted | PayloadPhase::Pending | PayloadPhase::Ready => Severity::Info,
            PayloadPhase::Unknown(_) => Severity::Warning,
        };
        // Rejected payloads always carry their url; healthy ones only on
        // request.
        let url = match phase {
            PayloadPhase::Rejected => payload.release_url.as_str(),
            _ if show_all_urls => payload.release_url.as_str(),
            _ => "",
        };
        let mut status = phase.to_string();
        if payload.forced {
            status.push_str("(f)");
        }

        reporter.emit(ReportLine::info(""));
        reporter.emit(ReportLine::info("=".repeat(SEPARATOR_WIDTH)));
        reporter.emit(ReportLine::info(""));
        reporter.emit(ReportLine::new(
            severity,
            format!(
                "{}  {} {:>11} {:>16}   {}",
                title, status, payload.time, payload.time_detail, url
            ),
        ));
    }

    /// A payload whose page aged out of the release controller: report
    /// what the record still knows and move on.
    fn emit_aged_out(
        &self,
        payload: &ReleasePayload,
        body: &str,
        reporter: &mut dyn Reporter,
    ) {
        reporter.emit(ReportLine::info(""));
        reporter.emit(ReportLine::info("=".repeat(SEPARATOR_WIDTH)));
        let title = payload
            .release_url
            .rsplit('/')
            .next()
            .unwrap_or(&payload.release_url);
        let mut status = payload.phase.to_string();
        if payload.forced {
            status.push_str("(f)");
        }
        reporter.emit(ReportLine::warning(format!(
            "{title} {status}, {}",
            payload.release_url
        )));
        reporter.emit(ReportLine::info(format!(
            "   {}",
            body.lines().next().unwrap_or_default()
        )));
    }
}
