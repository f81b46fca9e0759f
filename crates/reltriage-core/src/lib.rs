//! reltriage core library
//!
//! Condenses CI status for release payloads into a readable failure
//! report:
//! - Enumerates the runs behind an aggregated prow job
//! - Downloads and classifies JUnit results (pass/fail/flake)
//! - Decodes aggregation summaries with a phrase-shape grammar
//! - Merges partial per-run results under a global deadline

pub mod aggregate;
pub mod classify;
pub mod enumerate;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod junit;
pub mod payload;
pub mod process;
pub mod report;
pub mod summary;
pub mod telemetry;

pub use aggregate::{
    AggregationCoordinator, AggregationSummary, SummarizeOptions, DETAIL_DEADLINE,
    MAX_PRINTED_FAILURES,
};
pub use classify::{classify_suite, ClassifiedFailure, ClassifierConfig, FailureCategory};
pub use enumerate::{
    job_run_summary_url, storage_url, testrun_summary_url, Enumeration, JobRun, JobRunEnumerator,
    RunOutcome, MAX_JOBS,
};
pub use error::{Result, TriageError};
pub use extract::{ArtifactLayout, ArtifactPathTable, JunitExtractor, KnownJobs};
pub use fetch::{BodyFetcher, HttpFetcher, BODY_TIMEOUT, JUNIT_TIMEOUT, PAYLOAD_PAGE_TIMEOUT};
pub use junit::{parse_suite, Failure, TestCase, TestSuite, TestSuites};
pub use payload::{
    validate_selector, AggregationDbSource, PayloadPhase, PayloadSource, ReleaseApiSource,
    ReleasePageSource, ReleasePayload, RELEASE_URL_PREFIX, SUPPORTED_STREAMS, SUPPORTED_VERSIONS,
};
pub use process::{PayloadProcessor, ProcessOptions};
pub use report::{BufferReporter, ReportLine, Reporter, Severity, StreamReporter};
pub use summary::{sorted_durations, DecodedSummary, ShapeCounts, SummaryGrammar};
pub use telemetry::init_tracing;

/// reltriage version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
