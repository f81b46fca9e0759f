//! JUnit artifact extraction.
//!
//! Given one job run's url and job-type name, work out where the run's
//! JUnit files live, download the matching files into a scratch
//! directory keyed by the run id, parse them, and classify the cases.
//! The scratch directory is removed before returning, parse success or
//! not.

use crate::classify::{classify_suite, ClassifiedFailure, ClassifierConfig, FailureCategory};
use crate::enumerate::storage_url;
use crate::error::{Result, TriageError};
use crate::fetch::{BodyFetcher, BODY_TIMEOUT, JUNIT_TIMEOUT};
use crate::junit::parse_suite;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Host serving the storage-bucket directory listings.
const STORAGE_HOST: &str = "https://gcsweb-ci.apps.ci.l2s4.p1.openshiftapps.com";

/// Where a job type keeps its JUnit files relative to the run's storage
/// url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLayout {
    /// A junit subdirectory; files use the bare `<testsuite>` shape.
    Standard { subpath: String },
    /// Only the coarse `/artifacts` directory; files use the
    /// `<testsuites>` wrapper shape.
    Coarse,
    /// Job type with scattered artifacts we deliberately do not chase.
    Unsupported,
}

/// Artifact location lookup, keyed by normalized job short name.
///
/// Owned configuration data so tests can substitute fixtures.
#[derive(Debug, Clone, Default)]
pub struct ArtifactPathTable {
    exceptions: HashMap<String, ArtifactLayout>,
}

impl ArtifactPathTable {
    pub fn builtin() -> Self {
        let mut exceptions = HashMap::new();
        for metal in ["metal-ipi-sdn", "metal-ipi-ovn-ipv6", "e2e-metal-ipi-sdn"] {
            exceptions.insert(metal.to_string(), ArtifactLayout::Coarse);
        }
        exceptions.insert(
            "aws-ovn-fips".to_string(),
            ArtifactLayout::Standard {
                subpath: "/artifacts/e2e-aws-ovn-fips/openshift-e2e-test/artifacts/junit"
                    .to_string(),
            },
        );
        // Junit files for this one are scattered like an aggregated job's.
        exceptions.insert("install-analysis-all".to_string(), ArtifactLayout::Unsupported);
        Self { exceptions }
    }

    /// Layout for a normalized short name; unknown names use the default
    /// openshift-e2e-test template.
    pub fn resolve(&self, short_name: &str) -> ArtifactLayout {
        self.exceptions
            .get(short_name)
            .cloned()
            .unwrap_or_else(|| ArtifactLayout::Standard {
                subpath: format!("/artifacts/e2e-{short_name}/openshift-e2e-test/artifacts/junit"),
            })
    }
}

/// Known job names and their short names, used to locate test artifacts
/// when analyzing a bare job url.
#[derive(Debug, Clone)]
pub struct KnownJobs {
    map: HashMap<String, String>,
}

impl Default for KnownJobs {
    fn default() -> Self {
        let pairs = [
            ("aws-sdn-serial", "aws-sdn-serial"),
            ("aws-sdn-upgrade", "aws-sdn-upgrade"),
            ("e2e-aws-sdn-upgrade", "aws-sdn-upgrade"),
            ("e2e-aws-ovn-upgrade", "aws-ovn-upgrade"),
            ("e2e-aws-sdn-serial", "aws-sdn-serial"),
            ("e2e-metal-ipi-ovn-ipv6", "metal-ipi-sdn-bm"),
            ("e2e-metal-ipi-sdn-bm", "metal-ipi-sdn-bm"),
            ("e2e-metal-ipi-sdn", "metal-ipi-sdn"),
            ("e2e-gcp-sdn", "gcp-sdn"),
            ("aggregated-azure-ovn-upgrade", "azure-ovn-upgrade"),
            ("aggregated-gcp-ovn-rt-upgrade", "gcp-ovn-rt-upgrade"),
            ("aggregated-aws-sdn-upgrade", "aws-sdn-upgrade"),
            ("aggregated-aws-ovn-upgrade", "aws-ovn-upgrade"),
            ("aggregated-azure-sdn-upgrade", "azure-sdn-upgrade"),
            ("aggregated-gcp-ovn-upgrade", "gcp-ovn-upgrade"),
        ];
        Self {
            map: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl KnownJobs {
    pub fn short_name(&self, job_name: &str) -> Option<&str> {
        self.map.get(job_name).map(String::as_str)
    }
}

/// Normalize a displayed job name into the short name the artifact table
/// is keyed by: trim GA'ed `-4.12` suffixes, then strip an `aggregated-`
/// prefix along with its version tail.
pub fn normalize_short_name(name: &str) -> String {
    let mut short = name.trim().to_string();
    if short.contains("4.12") {
        short = short
            .split("-4.12")
            .next()
            .unwrap_or(short.as_str())
            .to_string();
    }
    if let Some(stripped) = short.strip_prefix("aggregated-") {
        short = stripped.split("-4.").next().unwrap_or(stripped).to_string();
    }
    short
}

/// Downloads and classifies one run's JUnit artifacts.
pub struct JunitExtractor {
    fetcher: Arc<dyn BodyFetcher>,
    paths: ArtifactPathTable,
    classifier: ClassifierConfig,
    href_regex: Regex,
    run_id_regex: Regex,
    scratch_root: PathBuf,
}

impl JunitExtractor {
    pub fn new(fetcher: Arc<dyn BodyFetcher>) -> Self {
        Self {
            fetcher,
            paths: ArtifactPathTable::builtin(),
            classifier: ClassifierConfig::default(),
            href_regex: Regex::new(r#"<a href="(?P<href>/gcs/origin-ci-test/[^"]*)""#)
                .expect("static regex"),
            run_id_regex: Regex::new(r"\d{19}").expect("static regex"),
            scratch_root: std::env::temp_dir(),
        }
    }

    /// Redirect scratch directories, e.g. into a test sandbox.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    /// The unique 19-digit run id embedded in every run url. Urls missing
    /// one get a random scratch identity instead of failing.
    fn run_id_for(&self, run_url: &str) -> String {
        match self.run_id_regex.find(run_url) {
            Some(m) => m.as_str().to_string(),
            None => {
                warn!("no run id in {run_url}; using a random scratch identity");
                uuid::Uuid::new_v4().to_string()
            }
        }
    }

    /// Download, parse and classify the JUnit artifacts for one run.
    ///
    /// Returns the classified failures in artifact order. The scratch
    /// directory for the run id is gone by the time this returns, on
    /// every path.
    pub async fn extract(
        &self,
        run_url: &str,
        job_short_name: &str,
        with_detail: bool,
    ) -> Result<Vec<ClassifiedFailure>> {
        let short = normalize_short_name(job_short_name);
        let layout = self.paths.resolve(&short);
        if layout == ArtifactLayout::Unsupported {
            return Err(TriageError::UnsupportedJob(short));
        }

        let storage = storage_url(run_url);
        let (dir_url, wrapped) = match &layout {
            ArtifactLayout::Standard { subpath } => (format!("{storage}{subpath}"), false),
            _ => (format!("{storage}/artifacts"), true),
        };

        let run_id = self.run_id_for(run_url);
        // RAII scratch dir: dropped (and thus deleted) on every return
        // path, including parse failures.
        let scratch = tempfile::Builder::new()
            .prefix(&format!("reltriage-{run_id}-"))
            .tempdir_in(&self.scratch_root)?;

        let mut wrapped = wrapped;
        let mut files = self.download_artifacts(&dir_url, scratch.path()).await?;
        if files.is_empty() && matches!(layout, ArtifactLayout::Standard { .. }) {
            debug!("no junit files under {dir_url}; falling back to /artifacts");
            files = self
                .download_artifacts(&format!("{storage}/artifacts"), scratch.path())
                .await?;
            wrapped = true;
        }

        let mut failures = Vec::new();
        for file in &files {
            let bytes = std::fs::read(file)?;
            match parse_suite(&bytes, wrapped) {
                Ok(suite) => {
                    failures.extend(classify_suite(&suite, &self.classifier, with_detail))
                }
                Err(err) => {
                    let file_name = file
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| file.display().to_string());
                    warn!("unparsable junit artifact {file_name}: {err}");
                    failures.push(ClassifiedFailure {
                        name: format!("could not parse junit artifact {file_name}"),
                        category: FailureCategory::UnknownShape,
                        detail: None,
                    });
                }
            }
        }
        Ok(failures)
    }

    /// Fetch a storage directory listing and download every `.xml` entry
    /// into `scratch`.
    async fn download_artifacts(&self, dir_url: &str, scratch: &Path) -> Result<Vec<PathBuf>> {
        let listing = self.fetcher.fetch(dir_url, BODY_TIMEOUT).await?;
        let text = String::from_utf8_lossy(&listing);

        let mut saved = Vec::new();
        for line in text.lines() {
            if !line.contains("gcs/origin-ci-test") {
                continue;
            }
            let Some(caps) = self.href_regex.captures(line) else {
                continue;
            };
            let href = &caps["href"];
            let file_name = href.rsplit('/').next().unwrap_or_default();
            if !file_name.ends_with(".xml") {
                continue;
            }
            let file_url = format!("{STORAGE_HOST}{href}");
            let body = self.fetcher.fetch(&file_url, JUNIT_TIMEOUT).await?;
            let path = scratch.join(file_name);
            std::fs::write(&path, &body)?;
            saved.push(path);
        }
        Ok(saved)
    }
}
