//! Aggregated-job summarization.
//!
//! [`AggregationCoordinator`] condenses one aggregated job into report
//! lines: decode the job-level testrun summary, enumerate the underlying
//! runs and resolve their build farms concurrently (phase A), and
//! optionally fan out JUnit extraction for the failing runs under a
//! global deadline (phase B). Partial failure in one run never aborts the
//! aggregated-job report.

use crate::classify::ClassifierConfig;
use crate::enumerate::{testrun_summary_url, Enumeration, JobRunEnumerator, RunOutcome, MAX_JOBS};
use crate::error::Result;
use crate::extract::JunitExtractor;
use crate::fetch::{BodyFetcher, BODY_TIMEOUT};
use crate::report::{ReportLine, Reporter, Severity};
use crate::summary::SummaryGrammar;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Stop printing failures past this count; a longer list is not something
/// a human will read.
pub const MAX_PRINTED_FAILURES: usize = 20;

/// Failure names and raw summary text are clamped to this many chars.
pub const MAX_LINE_CHARS: usize = 175;

/// Global deadline for the per-run detail fan-in (phase B).
pub const DETAIL_DEADLINE: std::time::Duration = std::time::Duration::from_secs(60);

/// Storage placeholder page shown when an artifact never materialized.
const NOT_SERVING: &str = "The application is currently not serving requests at this endpoint. It may not have been started or is still starting";

/// Options for one aggregated-job summarization.
#[derive(Debug, Clone, Default)]
pub struct SummarizeOptions {
    /// Enumerate the runs and print their durations (phase A).
    pub show_run_durations: bool,
    /// Fan out JUnit extraction for failing runs (phase B).
    pub show_run_detail: bool,
    /// Attach per-test failure detail text to disruption failures.
    pub show_test_detail: bool,
}

/// What one aggregated-job summarization found.
#[derive(Debug, Clone)]
pub struct AggregationSummary {
    pub total_failures: usize,
    pub disruption_failures: usize,
    /// The failure list hit [`MAX_PRINTED_FAILURES`] and was cut short.
    pub truncated: bool,
    /// Neither failures nor pass/skip markers were present; the summary
    /// document most likely never got written.
    pub summary_missing: bool,
    pub generated_at: DateTime<Utc>,
}

impl AggregationSummary {
    fn empty() -> Self {
        Self {
            total_failures: 0,
            disruption_failures: 0,
            truncated: false,
            summary_missing: false,
            generated_at: Utc::now(),
        }
    }
}

/// Orchestrates summary decoding, run enumeration and per-run extraction
/// for one aggregated job.
pub struct AggregationCoordinator {
    fetcher: Arc<dyn BodyFetcher>,
    enumerator: JobRunEnumerator,
    extractor: Arc<JunitExtractor>,
    grammar: SummaryGrammar,
    classifier: ClassifierConfig,
}

impl AggregationCoordinator {
    pub fn new(fetcher: Arc<dyn BodyFetcher>) -> Self {
        Self {
            enumerator: JobRunEnumerator::new(Arc::clone(&fetcher)),
            extractor: Arc::new(JunitExtractor::new(Arc::clone(&fetcher))),
            grammar: SummaryGrammar::new(),
            classifier: ClassifierConfig::default(),
            fetcher,
        }
    }

    /// Substitute the extractor, e.g. to sandbox its scratch directories.
    pub fn with_extractor(mut self, extractor: JunitExtractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// Summarize one aggregated job into `reporter`.
    ///
    /// `job_short_name` is the displayed job name; the extractor
    /// normalizes it to locate JUnit artifacts.
    pub async fn summarize(
        &self,
        aggr_job_url: &str,
        job_short_name: &str,
        opts: &SummarizeOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<AggregationSummary> {
        let mut summary = AggregationSummary::empty();
        reporter.emit(ReportLine::info(format!("    {aggr_job_url}")));

        let summary_url = testrun_summary_url(aggr_job_url);
        let body = match self.fetcher.fetch(&summary_url, BODY_TIMEOUT).await {
            Ok(body) => body,
            Err(err) if err.is_timeout() => {
                reporter.emit(ReportLine::warning(format!(
                    "    {err}; skipping aggregation summary"
                )));
                return Ok(summary);
            }
            Err(err) => return Err(err),
        };

        self.scan_testrun_summary(&String::from_utf8_lossy(&body), &mut summary, reporter);

        if !opts.show_run_durations {
            return Ok(summary);
        }

        if summary.disruption_failures > 0 {
            reporter.emit(ReportLine::failure(format!(
                "    Disruption failure count: {}/{}",
                summary.disruption_failures, summary.total_failures
            )));
        }

        // Phase A: enumerate the runs and resolve farms concurrently.
        let enumeration = match self.enumerator.enumerate(aggr_job_url).await {
            Ok(enumeration) => enumeration,
            Err(err) if err.is_timeout() => {
                reporter.emit(ReportLine::warning(format!(
                    "    {err}; skipping job run listing"
                )));
                return Ok(summary);
            }
            Err(err) => return Err(err),
        };
        let Enumeration { mut runs, shortfall } = enumeration;
        if shortfall {
            reporter.emit(ReportLine::warning(format!(
                "    Warning: Got {} of {} jobs",
                runs.len(),
                MAX_JOBS
            )));
        }
        self.enumerator.resolve_build_farms(&mut runs).await;

        // Phase B: fan out extraction for the failing runs, bounded by a
        // global deadline, and re-sequence into enumeration order.
        let mut detail_lines: BTreeMap<usize, Vec<ReportLine>> = BTreeMap::new();
        if opts.show_run_detail {
            detail_lines = self
                .collect_run_details(&runs, job_short_name, opts.show_test_detail, reporter)
                .await?;
        }

        for (idx, run) in runs.iter().enumerate() {
            reporter.emit(ReportLine::info(run.display_line()));
            if let Some(lines) = detail_lines.remove(&idx) {
                for line in lines {
                    reporter.emit(line);
                }
            }
        }

        Ok(summary)
    }

    /// Scan the testrun summary document for `Failed:` entries and decode
    /// each entry's arithmetic line with the phrase grammar.
    fn scan_testrun_summary(
        &self,
        text: &str,
        summary: &mut AggregationSummary,
        reporter: &mut dyn Reporter,
    ) {
        let lines: Vec<&str> = text.lines().collect();
        let mut found_failures = false;
        let mut found_pass_or_skip = false;
        let mut counted = 0usize;

        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];
            if line.starts_with("Failed: ") {
                found_failures = true;
                let name_line = clamp_chars(
                    &line.replacen("<b>", "", 1).replacen("</b>", "", 1),
                    MAX_LINE_CHARS,
                );
                let disruption = self.classifier.is_disruption(&name_line);
                let severity = if disruption {
                    Severity::Disruption
                } else {
                    Severity::Failure
                };
                reporter.emit(ReportLine::new(severity, format!("    {name_line}")));
                summary.total_failures += 1;
                if disruption {
                    summary.disruption_failures += 1;
                }

                // The next line carries the pass/fail arithmetic.
                if let Some(raw) = lines.get(i + 1) {
                    let raw = raw.replacen("<p>", "", 1).replacen("</p>", "", 1);
                    let decoded = self.grammar.decode(&raw);
                    if decoded.unknown_shape && decoded.disruption {
                        summary.disruption_failures += 1;
                    }
                    let severity = if decoded.unknown_shape {
                        Severity::Warning
                    } else {
                        Severity::Info
                    };
                    reporter.emit(ReportLine::new(
                        severity,
                        format!("      {}", clamp_chars(&decoded.rendered, MAX_LINE_CHARS)),
                    ));
                }

                if counted > MAX_PRINTED_FAILURES {
                    reporter.emit(ReportLine::warning(format!(
                        "    THERE ARE MORE THAN {MAX_PRINTED_FAILURES} FAILURES; see the job page for the rest"
                    )));
                    summary.truncated = true;
                    break;
                }
                // Disruption failures are exempt from the cap so a report
                // that is all disruption noise stays fully visible.
                if !disruption {
                    counted += 1;
                }
                i += 2;
                continue;
            }
            if line.starts_with("Skipped:") || line.starts_with("Passed") {
                found_pass_or_skip = true;
            }
            if line.contains(NOT_SERVING) {
                reporter.emit(ReportLine::info("    Aggregated job summary unavailable"));
            }
            i += 1;
        }

        if !found_failures && !found_pass_or_skip {
            reporter.emit(ReportLine::warning(
                "    No failures found (aggregation-testrun-summary.html is probably missing)",
            ));
            summary.summary_missing = true;
        }
    }

    /// Spawn extraction for every failing run and gather results through
    /// a completion channel until done or [`DETAIL_DEADLINE`] passes.
    ///
    /// Each result carries its originating run index so the caller can
    /// re-sequence into enumeration order. Tasks still running at the
    /// deadline are aborted.
    async fn collect_run_details(
        &self,
        runs: &[crate::enumerate::JobRun],
        job_short_name: &str,
        show_test_detail: bool,
        reporter: &mut dyn Reporter,
    ) -> Result<BTreeMap<usize, Vec<ReportLine>>> {
        let failing: Vec<(usize, String)> = runs
            .iter()
            .enumerate()
            .filter(|(_, run)| run.outcome == RunOutcome::Failure)
            .map(|(idx, run)| (idx, run.url.clone()))
            .collect();

        let mut collected = BTreeMap::new();
        if failing.is_empty() {
            return Ok(collected);
        }

        let (tx, mut rx) = mpsc::channel(failing.len());
        let mut join_set = JoinSet::new();
        for (idx, run_url) in failing.iter().cloned() {
            let extractor = Arc::clone(&self.extractor);
            let short_name = job_short_name.to_string();
            let tx = tx.clone();
            join_set.spawn(async move {
                let result = extractor.extract(&run_url, &short_name, show_test_detail).await;
                let _ = tx.send((idx, result)).await;
            });
        }
        drop(tx);

        let deadline = Instant::now() + DETAIL_DEADLINE;
        let mut outstanding = failing.len();
        while outstanding > 0 {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((idx, Ok(failures)))) => {
                    outstanding -= 1;
                    let mut lines = Vec::new();
                    for failure in &failures {
                        lines.extend(failure.report_lines("  "));
                    }
                    collected.insert(idx, lines);
                }
                Ok(Some((idx, Err(err)))) if err.is_timeout() || recoverable(&err) => {
                    outstanding -= 1;
                    collected.insert(
                        idx,
                        vec![ReportLine::warning(format!("      {err}"))],
                    );
                }
                Ok(Some((_, Err(err)))) => {
                    // Genuine transport breakage is fatal for the whole
                    // command; stop the remaining tasks first.
                    join_set.abort_all();
                    return Err(err);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("phase B deadline hit with {outstanding} run(s) outstanding");
                    reporter.emit(ReportLine::warning(format!(
                        "Took greater than {}s to show job details; skipping ...",
                        DETAIL_DEADLINE.as_secs()
                    )));
                    join_set.abort_all();
                    break;
                }
            }
        }
        while join_set.join_next().await.is_some() {}
        debug!("collected detail for {} of {} failing runs", collected.len(), failing.len());
        Ok(collected)
    }
}

/// Whether a per-run extraction error is reportable rather than fatal.
fn recoverable(err: &crate::error::TriageError) -> bool {
    use crate::error::TriageError;
    matches!(
        err,
        TriageError::Parse(_) | TriageError::UnsupportedJob(_) | TriageError::UnrecognizedJob(_)
    )
}

/// Truncate to a character budget without splitting a code point.
fn clamp_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerate::{job_run_summary_url, storage_url};
    use crate::error::TriageError;
    use crate::report::BufferReporter;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    const AGGR_URL: &str = "https://prow.ci.openshift.org/view/gs/origin-ci-test/logs/aggregated-aws-ovn-upgrade-4.14-micro-release-openshift-release-analysis-aggregator/1633606765071306752";

    struct CannedFetcher {
        bodies: HashMap<String, Vec<u8>>,
        /// Urls that hang until well past any deadline.
        stalled: Vec<String>,
    }

    #[async_trait]
    impl BodyFetcher for CannedFetcher {
        async fn fetch(&self, url: &str, _timeout: Duration) -> crate::error::Result<Vec<u8>> {
            if self.stalled.iter().any(|s| url.starts_with(s)) {
                tokio::time::sleep(Duration::from_secs(7200)).await;
            }
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| TriageError::Transport(format!("no canned body for {url}")))
        }
    }

    fn run_url(n: u64) -> String {
        format!(
            "https://prow.ci.openshift.org/view/gs/origin-ci-test/logs/periodic-upgrade/16494043786851164{n:02}"
        )
    }

    fn run_line(url: &str, outcome: &str) -> String {
        format!(
            r#"<li><a target="_blank" href="{url}">{url}</a> build02 {outcome} after 1h2m3s"#
        )
    }

    /// A world with one aggregated job, three runs (two failing), and
    /// junit artifacts for the failing runs.
    fn canned_world() -> HashMap<String, Vec<u8>> {
        let mut bodies = HashMap::new();

        let testrun_summary = concat!(
            "<html>\n",
            "Failed: <b>[sig-api] watch restarts</b>\n",
            "<p>Passed 3 times, failed 7 times, skipped 0 times: we require at least one pass to consider it a success</p>\n",
            "Failed: backend disruption of openshift-api\n",
            "<p>suite=[BackendDisruption] novel text nobody can parse</p>\n",
            "Passed 42 tests\n",
            "</html>\n"
        );
        bodies.insert(
            testrun_summary_url(AGGR_URL),
            testrun_summary.as_bytes().to_vec(),
        );

        let run_summary = [
            run_line(&run_url(1), "failure"),
            run_line(&run_url(2), "success"),
            run_line(&run_url(3), "failure"),
        ]
        .join("\n");
        bodies.insert(job_run_summary_url(AGGR_URL), run_summary.into_bytes());

        for n in 1..=3u64 {
            bodies.insert(
                format!("{}/prowjob.json", storage_url(&run_url(n))),
                format!(r#"{{"spec": {{"cluster": "build0{n}"}}}}"#).into_bytes(),
            );
        }

        // Junit artifacts for the failing runs.
        for n in [1u64, 3] {
            let junit_dir = format!(
                "{}/artifacts/e2e-aws-ovn-upgrade/openshift-e2e-test/artifacts/junit",
                storage_url(&run_url(n))
            );
            let href = format!("/gcs/origin-ci-test/logs/periodic-upgrade/16494043786851164{n:02}/junit_e2e.xml");
            bodies.insert(
                junit_dir,
                format!(r#"<a href="{href}"><span>junit</span></a>"#).into_bytes(),
            );
            bodies.insert(
                format!("https://gcsweb-ci.apps.ci.l2s4.p1.openshiftapps.com{href}"),
                format!(
                    r#"<testsuite name="t"><testcase name="case from run {n}"><failure message="m"/></testcase></testsuite>"#
                )
                .into_bytes(),
            );
        }
        bodies
    }

    fn coordinator(bodies: HashMap<String, Vec<u8>>, stalled: Vec<String>) -> (AggregationCoordinator, tempfile::TempDir) {
        let sandbox = tempfile::tempdir().unwrap();
        let fetcher: Arc<dyn BodyFetcher> = Arc::new(CannedFetcher { bodies, stalled });
        let coordinator = AggregationCoordinator::new(Arc::clone(&fetcher)).with_extractor(
            JunitExtractor::new(fetcher).with_scratch_root(sandbox.path()),
        );
        (coordinator, sandbox)
    }

    #[tokio::test]
    async fn test_summarize_decodes_and_resequences() {
        let (coordinator, _sandbox) = coordinator(canned_world(), Vec::new());
        let opts = SummarizeOptions {
            show_run_durations: true,
            show_run_detail: true,
            show_test_detail: false,
        };
        let mut reporter = BufferReporter::new();
        let summary = coordinator
            .summarize(AGGR_URL, "aggregated-aws-ovn-upgrade-4.14-micro", &opts, &mut reporter)
            .await
            .unwrap();

        assert_eq!(summary.total_failures, 2);
        // One disruption-named failure plus the unknown BackendDisruption line.
        assert_eq!(summary.disruption_failures, 2);
        assert!(!summary.truncated);
        assert!(!summary.summary_missing);

        let joined = reporter.joined();
        assert!(joined.contains("pass=3/fail=7/skip=0"));
        assert!(joined.contains("novel text nobody can parse (?disruption)"));
        // Shortfall warning (3 of 10 runs) appears exactly once.
        assert_eq!(joined.matches("Warning: Got 3 of 10 jobs").count(), 1);

        // Run rows in enumeration order, with each failing run's detail
        // directly after its row.
        let texts: Vec<&str> = reporter.lines.iter().map(|l| l.text.as_str()).collect();
        let row1 = texts.iter().position(|t| t.contains("1649404378685116401")).unwrap();
        let row2 = texts.iter().position(|t| t.contains("1649404378685116402")).unwrap();
        let row3 = texts.iter().position(|t| t.contains("1649404378685116403")).unwrap();
        assert!(row1 < row2 && row2 < row3);
        assert!(texts[row1 + 1].contains("case from run 1"));
        assert!(texts[row3 + 1].contains("case from run 3"));
        assert!(joined.contains("build01"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_b_deadline_keeps_partial_results_in_order() {
        let mut bodies = canned_world();
        // Run 3's junit listing never answers; run 1 still resolves.
        let stalled_prefix = format!("{}/artifacts", storage_url(&run_url(3)));
        bodies.retain(|k, _| !k.starts_with(&stalled_prefix));
        let (coordinator, _sandbox) = coordinator(bodies, vec![stalled_prefix]);

        let opts = SummarizeOptions {
            show_run_durations: true,
            show_run_detail: true,
            show_test_detail: false,
        };
        let mut reporter = BufferReporter::new();
        coordinator
            .summarize(AGGR_URL, "aggregated-aws-ovn-upgrade-4.14-micro", &opts, &mut reporter)
            .await
            .unwrap();

        let joined = reporter.joined();
        assert!(joined.contains("Took greater than 60s to show job details; skipping ..."));
        // The result that arrived before the deadline is still there, in
        // enumeration order.
        assert!(joined.contains("case from run 1"));
        assert!(!joined.contains("case from run 3"));
        let texts: Vec<&str> = reporter.lines.iter().map(|l| l.text.as_str()).collect();
        let row1 = texts.iter().position(|t| t.contains("1649404378685116401")).unwrap();
        assert!(texts[row1 + 1].contains("case from run 1"));
    }

    #[tokio::test]
    async fn test_missing_summary_is_reported() {
        let mut bodies = HashMap::new();
        bodies.insert(
            testrun_summary_url(AGGR_URL),
            b"<html>placeholder with no markers</html>".to_vec(),
        );
        let (coordinator, _sandbox) = coordinator(bodies, Vec::new());

        let mut reporter = BufferReporter::new();
        let summary = coordinator
            .summarize(AGGR_URL, "x", &SummarizeOptions::default(), &mut reporter)
            .await
            .unwrap();
        assert!(summary.summary_missing);
        assert!(reporter.joined().contains("No failures found"));
    }

    #[tokio::test]
    async fn test_summary_fetch_timeout_is_reported_not_fatal() {
        struct TimeoutFetcher;
        #[async_trait]
        impl BodyFetcher for TimeoutFetcher {
            async fn fetch(&self, url: &str, timeout: Duration) -> crate::error::Result<Vec<u8>> {
                Err(TriageError::DownloadTimeout {
                    url: url.to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
        let coordinator = AggregationCoordinator::new(Arc::new(TimeoutFetcher));
        let mut reporter = BufferReporter::new();
        let summary = coordinator
            .summarize(AGGR_URL, "x", &SummarizeOptions::default(), &mut reporter)
            .await
            .unwrap();
        assert_eq!(summary.total_failures, 0);
        assert!(reporter.joined().contains("took longer than"));
    }

    #[tokio::test]
    async fn test_failure_cap_truncates_with_notice() {
        let mut doc = String::from("<html>\n");
        for n in 0..30 {
            doc.push_str(&format!("Failed: test number {n}\n"));
            doc.push_str("<p>Passed 0 times, failed 10 times, skipped 0 times: we require at least one pass to consider it a success</p>\n");
        }
        doc.push_str("</html>\n");
        let bodies = HashMap::from([(testrun_summary_url(AGGR_URL), doc.into_bytes())]);
        let (coordinator, _sandbox) = coordinator(bodies, Vec::new());

        let mut reporter = BufferReporter::new();
        let summary = coordinator
            .summarize(AGGR_URL, "x", &SummarizeOptions::default(), &mut reporter)
            .await
            .unwrap();
        assert!(summary.truncated);
        assert!(reporter
            .joined()
            .contains(&format!("MORE THAN {MAX_PRINTED_FAILURES}")));
        assert!(summary.total_failures < 30);
    }

    #[test]
    fn test_clamp_chars_is_code_point_safe() {
        let text = "é".repeat(200);
        assert_eq!(clamp_chars(&text, MAX_LINE_CHARS).chars().count(), MAX_LINE_CHARS);
    }
}
