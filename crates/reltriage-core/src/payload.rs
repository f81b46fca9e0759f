//! Release payload records and their sources.
//!
//! A [`PayloadSource`] produces the ordered list of release payloads for
//! one (version, stream) pair. Three interchangeable strategies exist:
//! scraping the release-controller index page, the aggregation database's
//! REST API, and the release-controller API. The rest of the pipeline
//! only consumes the resulting records; it never cares which strategy
//! produced them.

use crate::error::{Result, TriageError};
use crate::fetch::{BodyFetcher, BODY_TIMEOUT};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The release controller serving the payload pages.
pub const RELEASE_URL_PREFIX: &str = "https://amd64.ocp.releases.ci.openshift.org";

/// Release versions this tool knows how to triage.
pub const SUPPORTED_VERSIONS: [&str; 4] = ["4.13", "4.14", "4.15", "4.16"];

/// Release streams this tool knows how to triage.
pub const SUPPORTED_STREAMS: [&str; 2] = ["nightly", "ci"];

/// Acceptance phase of a release payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadPhase {
    Accepted,
    Rejected,
    Pending,
    Ready,
    Unknown(String),
}

impl PayloadPhase {
    pub fn parse(text: &str) -> Self {
        match text {
            "Accepted" => PayloadPhase::Accepted,
            "Rejected" => PayloadPhase::Rejected,
            "Pending" => PayloadPhase::Pending,
            "Ready" => PayloadPhase::Ready,
            other => PayloadPhase::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for PayloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadPhase::Accepted => write!(f, "Accepted"),
            PayloadPhase::Rejected => write!(f, "Rejected"),
            PayloadPhase::Pending => write!(f, "Pending"),
            PayloadPhase::Ready => write!(f, "Ready"),
            PayloadPhase::Unknown(other) => write!(f, "{other}"),
        }
    }
}

/// Identity of one release artifact. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleasePayload {
    pub release_url: String,
    pub phase: PayloadPhase,
    /// The recorded phase was overridden by an operator.
    pub forced: bool,
    /// Relative display time, e.g. `"4 days ago"`.
    pub time: String,
    /// Detailed display time, e.g. `"03-11T04:46:13Z"`.
    pub time_detail: String,
}

impl ReleasePayload {
    /// A payload known only by its url, phase to be discovered.
    pub fn from_url(release_url: impl Into<String>) -> Self {
        Self {
            release_url: release_url.into(),
            phase: PayloadPhase::Unknown(String::new()),
            forced: false,
            time: String::new(),
            time_detail: String::new(),
        }
    }
}

/// Reject versions and streams outside the supported sets.
pub fn validate_selector(version: &str, stream: &str) -> Result<()> {
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(TriageError::InvalidSelector(format!(
            "version {version} not in {SUPPORTED_VERSIONS:?}"
        )));
    }
    if !SUPPORTED_STREAMS.contains(&stream) {
        return Err(TriageError::InvalidSelector(format!(
            "stream {stream} not in {SUPPORTED_STREAMS:?}"
        )));
    }
    Ok(())
}

/// The version released before `version`; the index-page scrape needs it
/// to know where the current version's table ends.
fn previous_version(version: &str) -> Result<&'static str> {
    match version {
        "4.16" => Ok("4.15"),
        "4.15" => Ok("4.14"),
        "4.14" => Ok("4.13"),
        "4.13" => Ok("4.12"),
        "4.12" => Ok("4.11"),
        other => Err(TriageError::InvalidSelector(format!(
            "no previous version known for {other}"
        ))),
    }
}

/// Source of release payload records for a (version, stream) pair.
#[async_trait]
pub trait PayloadSource: Send + Sync {
    async fn payloads(&self, version: &str, stream: &str) -> Result<Vec<ReleasePayload>>;
}

// ── release-controller index page scrape ─────────────────────────────────

/// Scrapes the release-controller index page. The richest source: it is
/// the only one that carries the display times.
pub struct ReleasePageSource {
    fetcher: Arc<dyn BodyFetcher>,
    anchor_regex: Regex,
    status_regex: Regex,
    time_regex: Regex,
}

/// Marker blurb above a stream's payload table on the index page.
fn stream_blurb(version: &str, stream: &str) -> String {
    match stream {
        "nightly" => format!(
            "This release contains OSBS official image builds of all code in release-{version} (master) branches, and is updated after those builds are synced to quay.io."
        ),
        _ => format!(
            "This release contains CI image builds of all code in release-{version} (master) branches, and is updated each time someone merges."
        ),
    }
}

impl ReleasePageSource {
    pub fn new(fetcher: Arc<dyn BodyFetcher>) -> Self {
        Self {
            fetcher,
            anchor_regex: Regex::new(
                r#"<td class="text-monospace"><a class="[^"]*" href="/(?P<path>[^"]+)""#,
            )
            .expect("static regex"),
            status_regex: Regex::new(r">(?P<status>[^<]+)<").expect("static regex"),
            time_regex: Regex::new(r#"<td title="(?P<detail>[^"]*)">(?P<time>[^<]+)<"#)
                .expect("static regex"),
        }
    }
}

#[async_trait]
impl PayloadSource for ReleasePageSource {
    async fn payloads(&self, version: &str, stream: &str) -> Result<Vec<ReleasePayload>> {
        validate_selector(version, stream)?;
        let index_url = format!("{RELEASE_URL_PREFIX}/#{version}.0-0.{stream}");
        let body = self.fetcher.fetch(&index_url, BODY_TIMEOUT).await?;
        let text = String::from_utf8_lossy(&body);

        // Isolate the current stream's table: it sits between this
        // stream's blurb and the previous version's.
        let current_marker = stream_blurb(version, stream);
        let previous_marker = match stream {
            "nightly" => stream_blurb(previous_version(version)?, "ci"),
            _ => stream_blurb(previous_version(version)?, "nightly"),
        };
        let section = text
            .split(&current_marker)
            .nth(1)
            .ok_or_else(|| {
                TriageError::Parse(format!("no {version} {stream} section on the index page"))
            })?
            .split(&previous_marker)
            .next()
            .unwrap_or_default();

        let version_tag = format!("{version}.0-0.{stream}");
        let lines: Vec<&str> = section.lines().collect();
        let mut payloads = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let Some(caps) = self.anchor_regex.captures(lines[i]) else {
                i += 1;
                continue;
            };
            if !lines[i].contains(&version_tag) {
                i += 1;
                continue;
            }
            let release_url = format!("{RELEASE_URL_PREFIX}/{}", &caps["path"]);

            // The next line carries Accepted/Rejected/Ready, the one
            // after the two display times.
            let mut phase = PayloadPhase::Unknown("unknown state".to_string());
            if let Some(status_line) = lines.get(i + 1) {
                if ["Accepted", "Rejected", "Ready"].iter().any(|s| status_line.contains(s)) {
                    if let Some(status) = self.status_regex.captures(status_line) {
                        phase = PayloadPhase::parse(&status["status"]);
                    }
                }
            }
            let mut time = "unknown time".to_string();
            let mut time_detail = "unknown time".to_string();
            if let Some(time_line) = lines.get(i + 2) {
                if let Some(times) = self.time_regex.captures(time_line) {
                    time_detail = times["detail"].get(5..).unwrap_or(&times["detail"]).to_string();
                    time = times["time"].to_string();
                }
            }

            payloads.push(ReleasePayload {
                release_url,
                phase,
                forced: false,
                time,
                time_detail,
            });
            i += 3;
        }
        Ok(payloads)
    }
}

// ── aggregation database API ─────────────────────────────────────────────

/// Payload records from the aggregation database's REST API. Lags the
/// live page by up to an hour but knows which acceptances were forced.
pub struct AggregationDbSource {
    fetcher: Arc<dyn BodyFetcher>,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct DbReleaseTag {
    release_tag: String,
    stream: String,
    architecture: String,
    phase: String,
    #[serde(default)]
    forced: bool,
    #[serde(default)]
    release_time: String,
    #[serde(rename = "failedJobNames", default)]
    failed_job_names: Vec<String>,
}

impl AggregationDbSource {
    pub fn new(fetcher: Arc<dyn BodyFetcher>) -> Self {
        Self {
            fetcher,
            api_url: "https://sippy.dptools.openshift.org/api/releases/tags".to_string(),
        }
    }
}

#[async_trait]
impl PayloadSource for AggregationDbSource {
    async fn payloads(&self, version: &str, stream: &str) -> Result<Vec<ReleasePayload>> {
        validate_selector(version, stream)?;
        let url = format!("{}?&release={version}", self.api_url);
        let body = self.fetcher.fetch(&url, BODY_TIMEOUT).await?;
        let tags: Vec<DbReleaseTag> = serde_json::from_slice(&body)?;

        let mut payloads = Vec::new();
        for tag in tags {
            if tag.architecture != "amd64" || tag.stream != stream {
                continue;
            }
            // An accepted payload that failed an aggregated job only got
            // through because an operator forced it.
            let failed_aggregated = tag
                .failed_job_names
                .iter()
                .any(|j| j.starts_with("aggregated"));
            let forced = tag.forced || (tag.phase == "Accepted" && failed_aggregated);
            payloads.push(ReleasePayload {
                release_url: format!(
                    "{RELEASE_URL_PREFIX}/releasestream/{version}.0-0.{stream}/release/{}",
                    tag.release_tag
                ),
                phase: PayloadPhase::parse(&tag.phase),
                forced,
                time: tag.release_time,
                time_detail: String::new(),
            });
        }
        Ok(payloads)
    }
}

// ── release-controller API ───────────────────────────────────────────────

/// Payload records from the release-controller's own API. Clean, but the
/// display times are not available there.
pub struct ReleaseApiSource {
    fetcher: Arc<dyn BodyFetcher>,
}

#[derive(Debug, Deserialize)]
struct ApiReleaseTag {
    name: String,
    phase: String,
}

#[derive(Debug, Deserialize)]
struct ApiReleaseStream {
    #[allow(dead_code)]
    name: String,
    #[serde(default)]
    tags: Vec<ApiReleaseTag>,
}

impl ReleaseApiSource {
    pub fn new(fetcher: Arc<dyn BodyFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl PayloadSource for ReleaseApiSource {
    async fn payloads(&self, version: &str, stream: &str) -> Result<Vec<ReleasePayload>> {
        validate_selector(version, stream)?;
        let url =
            format!("{RELEASE_URL_PREFIX}/api/v1/releasestream/{version}.0-0.{stream}/tags");
        let body = self.fetcher.fetch(&url, BODY_TIMEOUT).await?;
        let release_stream: ApiReleaseStream = serde_json::from_slice(&body)?;

        Ok(release_stream
            .tags
            .into_iter()
            .map(|tag| ReleasePayload {
                release_url: format!(
                    "{RELEASE_URL_PREFIX}/releasestream/{version}.0-0.{stream}/release/{}",
                    tag.name
                ),
                phase: PayloadPhase::parse(&tag.phase),
                forced: false,
                time: "Unknown ago".to_string(),
                time_detail: String::new(),
            })
            .collect())
    }
}
