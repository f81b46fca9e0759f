//! Pass/fail/flake classification of test cases.
//!
//! The judgment call at the heart of the tool: a test name with several
//! same-named instances in one suite is a genuine failure only when
//! *none* of the instances passed. One pass among the instances means the
//! failure was a flake and is suppressed. The rule is uniform for any
//! instance count k >= 1.

use crate::junit::TestSuite;
use crate::report::{ReportLine, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Category attached to a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Normal,
    Disruption,
    /// Diagnostic stand-in for content we could not interpret
    /// (unparsable artifact, unrecognized summary text).
    UnknownShape,
}

/// One classified test failure, the unit the report assembler consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedFailure {
    pub name: String,
    pub category: FailureCategory,
    pub detail: Option<String>,
}

impl ClassifiedFailure {
    /// Render as report lines, matching the `Failed: <name>` layout the
    /// summary scanner uses for aggregated jobs.
    pub fn report_lines(&self, extra_indent: &str) -> Vec<ReportLine> {
        let severity = match self.category {
            FailureCategory::Normal => Severity::Failure,
            FailureCategory::Disruption => Severity::Disruption,
            FailureCategory::UnknownShape => Severity::Warning,
        };
        let mut lines = vec![ReportLine::new(
            severity,
            format!("    {}Failed: {}", extra_indent, self.name),
        )];
        if let Some(detail) = &self.detail {
            lines.push(ReportLine::info(format!("      {}{}", extra_indent, detail)));
        }
        lines
    }
}

/// Name-based filters applied to every classified suite.
///
/// Owned configuration, not ambient state, so tests can substitute their
/// own lists.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Test names containing any of these are dropped entirely; their
    /// failures never contribute to the triage picture.
    pub denied_substrings: Vec<String>,
    /// Test names containing any of these are tagged as disruption
    /// failures and counted separately.
    pub disruption_markers: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            denied_substrings: vec![
                "observers-resource-watch container test".to_string(),
                "openshift-e2e-test container test".to_string(),
                "multi-stage test test phase".to_string(),
            ],
            disruption_markers: vec![
                "disruption".to_string(),
                // The PDB availability test is disruption-shaped but not
                // named as such.
                "Application behind service load balancer with PDB remains available using new connections".to_string(),
            ],
        }
    }
}

impl ClassifierConfig {
    pub fn is_denied(&self, name: &str) -> bool {
        self.denied_substrings.iter().any(|s| name.contains(s))
    }

    pub fn is_disruption(&self, text: &str) -> bool {
        self.disruption_markers.iter().any(|s| text.contains(s))
    }
}

/// Classify one suite's cases into genuine failures.
///
/// `with_detail` attaches the first line of failure output to disruption
/// failures.
pub fn classify_suite(
    suite: &TestSuite,
    config: &ClassifierConfig,
    with_detail: bool,
) -> Vec<ClassifiedFailure> {
    // Group instance outcomes by name so the flake rule can see siblings.
    let mut passes_by_name: HashMap<&str, bool> = HashMap::new();
    for case in &suite.testcases {
        let saw_pass = passes_by_name.entry(case.name.as_str()).or_insert(false);
        *saw_pass |= case.passed();
    }

    let mut failures = Vec::new();
    let mut reported: HashMap<&str, ()> = HashMap::new();
    for case in &suite.testcases {
        let Some(failure) = &case.failure else {
            continue;
        };
        if passes_by_name.get(case.name.as_str()).copied().unwrap_or(false) {
            // At least one same-named instance passed: flake, suppress.
            continue;
        }
        if config.is_denied(&case.name) {
            continue;
        }
        if reported.insert(case.name.as_str(), ()).is_some() {
            continue;
        }

        let disruption = config.is_disruption(&case.name);
        let detail = if with_detail && disruption {
            failure.first_line().map(|l| l.to_string())
        } else {
            None
        };
        failures.push(ClassifiedFailure {
            name: case.name.clone(),
            category: if disruption {
                FailureCategory::Disruption
            } else {
                FailureCategory::Normal
            },
            detail,
        });
    }
    failures
}
