//! Job-run enumeration for aggregated jobs.
//!
//! An aggregated job repeats one underlying test job up to [`MAX_JOBS`]
//! times; the aggregator leaves a `job-run-summary.html` next to its
//! artifacts listing every run's url, outcome and duration. We derive the
//! storage address of that document from the viewer url, scan it with a
//! fixed line grammar, and resolve each run's build-farm identity from
//! its per-run `prowjob.json` companion.

use crate::error::Result;
use crate::fetch::{BodyFetcher, BODY_TIMEOUT};
use regex::Regex;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// An aggregated job always schedules this many underlying runs.
pub const MAX_JOBS: usize = 10;

/// Placeholder build-farm identity when prowjob.json is unreachable.
pub const UNKNOWN_FARM: &str = "build??";

/// Storage-bucket prefix the viewer prefixes are rewritten to.
const STORAGE_PREFIX: &str =
    "https://gcsweb-ci.apps.ci.l2s4.p1.openshiftapps.com/gcs/origin-ci-test/logs/";

/// Recognized viewer-UI prefixes, one per bucket naming scheme.
const VIEWER_PREFIXES: [&str; 2] = [
    "https://prow.ci.openshift.org/view/gs/test-platform-results/logs/",
    "https://prow.ci.openshift.org/view/gs/origin-ci-test/logs/",
];

/// Artifact subdirectory holding the aggregator's two summary documents.
const AGGREGATOR_DIR: &str = "artifacts/release-analysis-aggregator/openshift-release-analysis-aggregator/artifacts/release-analysis-aggregator";

/// Rewrite a viewer url to its storage-bucket address.
///
/// Both recognized bucket schemes map into the `origin-ci-test` storage
/// tree. A url carrying neither prefix is returned unchanged.
pub fn storage_url(job_url: &str) -> String {
    for prefix in VIEWER_PREFIXES {
        if let Some(rest) = job_url.strip_prefix(prefix) {
            return format!("{STORAGE_PREFIX}{rest}");
        }
    }
    job_url.to_string()
}

/// Address of the aggregated job's per-run summary document.
pub fn job_run_summary_url(aggr_job_url: &str) -> String {
    format!("{}/{}/job-run-summary.html", storage_url(aggr_job_url), AGGREGATOR_DIR)
}

/// Address of the aggregated job's testrun summary document.
pub fn testrun_summary_url(aggr_job_url: &str) -> String {
    format!(
        "{}/{}/aggregation-testrun-summary.html",
        storage_url(aggr_job_url),
        AGGREGATOR_DIR
    )
}

/// Raw outcome token of one job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Pending,
    Success,
    Failure,
}

impl RunOutcome {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "pending" => Some(RunOutcome::Pending),
            "success" => Some(RunOutcome::Success),
            "failure" => Some(RunOutcome::Failure),
            _ => None,
        }
    }

    /// Four-character column form for the run table.
    pub fn abbrev(&self) -> &'static str {
        match self {
            RunOutcome::Pending => "pend",
            RunOutcome::Success => "succ",
            RunOutcome::Failure => "fail",
        }
    }
}

/// One execution of an aggregated job's underlying test.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub url: String,
    pub outcome: RunOutcome,
    /// Raw duration phrase from the summary line, e.g. `3h42m10.5s`.
    pub duration: String,
    /// Resolved lazily from prowjob.json; independent per run.
    pub build_farm: Option<String>,
}

impl JobRun {
    /// The unique trailing path segment, i.e. the run id.
    pub fn run_id(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(&self.url)
    }

    /// One formatted table row: run id, farm, outcome, duration and an
    /// asterisk bar (one star per 1000 seconds) for eyeballing relative
    /// run time.
    pub fn display_line(&self) -> String {
        let stars_count = parse_go_duration(&self.duration)
            .map(|secs| (secs / 1000.0) as usize)
            .unwrap_or(0);
        let stars = "*".repeat(stars_count);
        format!(
            "    {} {} {:>4} {:>8} {}",
            self.run_id(),
            self.build_farm.as_deref().unwrap_or(UNKNOWN_FARM),
            self.outcome.abbrev(),
            self.duration,
            stars
        )
    }
}

/// Parse a Go-style duration phrase (`1h2m3.5s`) into seconds.
pub fn parse_go_duration(input: &str) -> Option<f64> {
    let mut total = 0.0;
    let mut number = String::new();
    let mut matched = false;
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let value: f64 = number.parse().ok()?;
        number.clear();
        let unit = match c {
            'h' => 3600.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                0.001
            }
            'm' => 60.0,
            's' => 1.0,
            _ => return None,
        };
        total += value * unit;
        matched = true;
    }
    if !number.is_empty() || !matched {
        return None;
    }
    Some(total)
}

/// Result of enumerating an aggregated job.
#[derive(Debug, Clone)]
pub struct Enumeration {
    /// Runs in document order, at most [`MAX_JOBS`].
    pub runs: Vec<JobRun>,
    /// Fewer than [`MAX_JOBS`] runs were present.
    pub shortfall: bool,
}

/// Scans job-run summaries and resolves per-run build farms.
pub struct JobRunEnumerator {
    fetcher: Arc<dyn BodyFetcher>,
    line_regex: Regex,
    cluster_regex: Regex,
}

impl JobRunEnumerator {
    pub fn new(fetcher: Arc<dyn BodyFetcher>) -> Self {
        Self {
            fetcher,
            // The fixed list-item shape of job-run-summary.html: link,
            // build number, outcome token, trailing duration phrase.
            line_regex: Regex::new(
                r#"<li><a target="_blank" href="(?P<url>.*)">.*</a> build[0-9]+ (?P<outcome>pending|success|failure) after (?P<duration>.*)"#,
            )
            .expect("static regex"),
            cluster_regex: Regex::new(r#""cluster":\s*"(?P<farm>[^"]+)""#).expect("static regex"),
        }
    }

    /// Enumerate the runs of one aggregated job, in document order.
    ///
    /// Stops at [`MAX_JOBS`] matches; a shorter document sets the
    /// shortfall flag instead of failing.
    pub async fn enumerate(&self, aggr_job_url: &str) -> Result<Enumeration> {
        let summary_url = job_run_summary_url(aggr_job_url);
        let body = self.fetcher.fetch(&summary_url, BODY_TIMEOUT).await?;
        let text = String::from_utf8_lossy(&body);

        let mut runs = Vec::new();
        for line in text.lines() {
            let Some(caps) = self.line_regex.captures(line) else {
                continue;
            };
            let Some(outcome) = RunOutcome::parse(&caps["outcome"]) else {
                continue;
            };
            runs.push(JobRun {
                url: caps["url"].to_string(),
                outcome,
                duration: caps["duration"].trim().to_string(),
                build_farm: None,
            });
            if runs.len() == MAX_JOBS {
                break;
            }
        }

        let shortfall = runs.len() < MAX_JOBS;
        if shortfall {
            warn!("got {} of {} job runs for {}", runs.len(), MAX_JOBS, aggr_job_url);
        }
        Ok(Enumeration { runs, shortfall })
    }

    /// Resolve every run's build-farm identity concurrently.
    ///
    /// Each run is independent; a failed metadata fetch leaves that run
    /// with the [`UNKNOWN_FARM`] placeholder and never fails enumeration.
    pub async fn resolve_build_farms(&self, runs: &mut [JobRun]) {
        let mut join_set = JoinSet::new();
        for (idx, run) in runs.iter().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let cluster_regex = self.cluster_regex.clone();
            let metadata_url = format!("{}/prowjob.json", storage_url(&run.url));
            join_set.spawn(async move {
                let farm = match fetcher.fetch(&metadata_url, BODY_TIMEOUT).await {
                    Ok(body) => {
                        let text = String::from_utf8_lossy(&body);
                        cluster_regex
                            .captures(&text)
                            .map(|caps| caps["farm"].to_string())
                            .unwrap_or_else(|| UNKNOWN_FARM.to_string())
                    }
                    Err(err) => {
                        debug!("prowjob.json fetch failed for {}: {}", metadata_url, err);
                        UNKNOWN_FARM.to_string()
                    }
                };
                (idx, farm)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            if let Ok((idx, farm)) = joined {
                runs[idx].build_farm = Some(farm);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TriageError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    struct CannedFetcher {
        bodies: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl BodyFetcher for CannedFetcher {
        async fn fetch(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>> {
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| TriageError::Transport(format!("no canned body for {url}")))
        }
    }

    fn run_line(url: &str, outcome: &str, duration: &str) -> String {
        format!(
            r#"<li><a target="_blank" href="{url}">{url}</a> build01 {outcome} after {duration}"#
        )
    }

    const AGGR_URL: &str = "https://prow.ci.openshift.org/view/gs/origin-ci-test/logs/aggregated-aws-ovn-upgrade-4.14-micro-release-openshift-release-analysis-aggregator/1633606765071306752";

    #[test]
    fn test_storage_url_rewrites_both_buckets() {
        assert_eq!(
            storage_url("https://prow.ci.openshift.org/view/gs/origin-ci-test/logs/some-job/123"),
            "https://gcsweb-ci.apps.ci.l2s4.p1.openshiftapps.com/gcs/origin-ci-test/logs/some-job/123"
        );
        assert_eq!(
            storage_url(
                "https://prow.ci.openshift.org/view/gs/test-platform-results/logs/some-job/123"
            ),
            "https://gcsweb-ci.apps.ci.l2s4.p1.openshiftapps.com/gcs/origin-ci-test/logs/some-job/123"
        );
    }

    #[test]
    fn test_summary_urls_end_in_the_aggregator_documents() {
        assert!(job_run_summary_url(AGGR_URL).ends_with("/release-analysis-aggregator/job-run-summary.html"));
        assert!(testrun_summary_url(AGGR_URL)
            .ends_with("/release-analysis-aggregator/aggregation-testrun-summary.html"));
    }

    #[test]
    fn test_parse_go_duration() {
        assert_eq!(parse_go_duration("90s"), Some(90.0));
        assert_eq!(parse_go_duration("1h30m"), Some(5400.0));
        assert_eq!(parse_go_duration("2h0m3.5s"), Some(7203.5));
        assert_eq!(parse_go_duration("three hours"), None);
        assert_eq!(parse_go_duration(""), None);
    }

    #[test]
    fn test_display_line_scales_stars() {
        let run = JobRun {
            url: "https://prow.ci.openshift.org/view/gs/origin-ci-test/logs/job/1234567890123456789"
                .to_string(),
            outcome: RunOutcome::Failure,
            duration: "3h20m0s".to_string(),
            build_farm: Some("build05".to_string()),
        };
        let line = run.display_line();
        assert!(line.contains("1234567890123456789"));
        assert!(line.contains("build05"));
        assert!(line.contains("fail"));
        // 12000 seconds => 12 stars.
        assert!(line.ends_with("************"));
    }

    #[tokio::test]
    async fn test_enumerate_caps_at_max_jobs() {
        let mut doc = String::from("<html><ul>\n");
        for i in 0..14 {
            doc.push_str(&run_line(
                &format!("https://prow.ci.openshift.org/view/gs/origin-ci-test/logs/job/{i:019}"),
                "success",
                "1h2m3s",
            ));
            doc.push('\n');
        }
        doc.push_str("</ul></html>\n");

        let fetcher = CannedFetcher {
            bodies: HashMap::from([(job_run_summary_url(AGGR_URL), doc.into_bytes())]),
        };
        let enumerator = JobRunEnumerator::new(Arc::new(fetcher));
        let enumeration = enumerator.enumerate(AGGR_URL).await.unwrap();
        assert_eq!(enumeration.runs.len(), MAX_JOBS);
        assert!(!enumeration.shortfall);
    }

    #[tokio::test]
    async fn test_enumerate_flags_shortfall_and_keeps_order() {
        let doc = [
            run_line("https://x/logs/job/0000000000000000001", "failure", "1h0m0s"),
            run_line("https://x/logs/job/0000000000000000002", "success", "2h0m0s"),
            run_line("https://x/logs/job/0000000000000000003", "pending", "5m0s"),
        ]
        .join("\n");

        let fetcher = CannedFetcher {
            bodies: HashMap::from([(job_run_summary_url(AGGR_URL), doc.into_bytes())]),
        };
        let enumerator = JobRunEnumerator::new(Arc::new(fetcher));
        let enumeration = enumerator.enumerate(AGGR_URL).await.unwrap();
        assert_eq!(enumeration.runs.len(), 3);
        assert!(enumeration.shortfall);
        assert_eq!(enumeration.runs[0].outcome, RunOutcome::Failure);
        assert_eq!(enumeration.runs[1].outcome, RunOutcome::Success);
        assert_eq!(enumeration.runs[2].outcome, RunOutcome::Pending);
        assert_eq!(enumeration.runs[2].run_id(), "0000000000000000003");
    }

    #[tokio::test]
    async fn test_resolve_build_farms_defaults_on_fetch_failure() {
        let run_url =
            "https://prow.ci.openshift.org/view/gs/origin-ci-test/logs/job/0000000000000000001";
        let metadata_url = format!("{}/prowjob.json", storage_url(run_url));

        let fetcher = CannedFetcher {
            bodies: HashMap::from([(
                metadata_url,
                br#"{"spec": {"cluster": "build09"}}"#.to_vec(),
            )]),
        };
        let enumerator = JobRunEnumerator::new(Arc::new(fetcher));
        let mut runs = vec![
            JobRun {
                url: run_url.to_string(),
                outcome: RunOutcome::Success,
                duration: "1h0m0s".to_string(),
                build_farm: None,
            },
            JobRun {
                // No canned prowjob.json for this one.
                url: "https://prow.ci.openshift.org/view/gs/origin-ci-test/logs/job/0000000000000000002"
                    .to_string(),
                outcome: RunOutcome::Failure,
                duration: "1h0m0s".to_string(),
                build_farm: None,
            },
        ];

        enumerator.resolve_build_farms(&mut runs).await;
        assert_eq!(runs[0].build_farm.as_deref(), Some("build09"));
        assert_eq!(runs[1].build_farm.as_deref(), Some(UNKNOWN_FARM));
    }
}
