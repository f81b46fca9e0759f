//! JUnit XML models.
//!
//! The artifacts come in two shapes: a bare top-level `<testsuite>`, and a
//! `<testsuites>` wrapper holding one or more suites (the coarse-path
//! fallback always produces the wrapper shape, and only its first suite
//! is used). Declared totals on the suite are carried but never trusted;
//! only the test cases themselves matter.

use crate::error::{Result, TriageError};
use serde::Deserialize;

/// `<failure>` child of a test case.
#[derive(Debug, Clone, Deserialize)]
pub struct Failure {
    #[serde(rename = "@message", default)]
    pub message: Option<String>,
    #[serde(rename = "$text", default)]
    pub content: Option<String>,
}

impl Failure {
    /// First line of the failure content, falling back to the message.
    pub fn first_line(&self) -> Option<&str> {
        let text = match (&self.content, &self.message) {
            (Some(content), _) if !content.is_empty() => content,
            (_, Some(message)) if !message.is_empty() => message,
            _ => return None,
        };
        text.lines().next()
    }
}

/// One `<testcase>` element. Read-only once parsed.
#[derive(Debug, Clone, Deserialize)]
pub struct TestCase {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@time", default)]
    pub time: Option<String>,
    #[serde(default)]
    pub failure: Option<Failure>,
    #[serde(rename = "system-out", default)]
    pub system_out: Option<String>,
}

impl TestCase {
    /// A case with no failure element counts as a pass.
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// One `<testsuite>` element with its declared totals.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestSuite {
    #[serde(rename = "@name", default)]
    pub name: String,
    #[serde(rename = "@tests", default)]
    pub tests: Option<String>,
    #[serde(rename = "@failures", default)]
    pub failures: Option<String>,
    #[serde(rename = "@skipped", default)]
    pub skipped: Option<String>,
    #[serde(rename = "@time", default)]
    pub time: Option<String>,
    #[serde(rename = "testcase", default)]
    pub testcases: Vec<TestCase>,
}

/// `<testsuites>` wrapper shape.
#[derive(Debug, Deserialize)]
pub struct TestSuites {
    #[serde(rename = "testsuite", default)]
    pub suites: Vec<TestSuite>,
}

/// Parse one downloaded artifact.
///
/// `wrapped` selects the `<testsuites>` wrapper shape, from which the
/// first suite is taken.
pub fn parse_suite(bytes: &[u8], wrapped: bool) -> Result<TestSuite> {
    let text = String::from_utf8_lossy(bytes);
    if wrapped {
        let suites: TestSuites = quick_xml::de::from_str(&text)
            .map_err(|e| TriageError::Parse(format!("testsuites wrapper: {e}")))?;
        suites
            .suites
            .into_iter()
            .next()
            .ok_or_else(|| TriageError::Parse("testsuites wrapper holds no testsuite".to_string()))
    } else {
        quick_xml::de::from_str(&text)
            .map_err(|e| TriageError::Parse(format!("testsuite: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BARE: &str = r#"<?xml version="1.0"?>
<testsuite name="openshift-tests" tests="3" failures="1" skipped="0" time="120.5">
  <testcase name="[sig-network] pod connectivity" time="10.2"/>
  <testcase name="[sig-api] watch restarts" time="4.0">
    <failure message="timed out waiting">watch closed unexpectedly
full stack elided</failure>
  </testcase>
  <testcase name="[sig-network] pod connectivity" time="9.8"/>
</testsuite>"#;

    const WRAPPED: &str = r#"<testsuites>
  <testsuite name="first" tests="1">
    <testcase name="only case"/>
  </testsuite>
  <testsuite name="second" tests="0"/>
</testsuites>"#;

    #[test]
    fn test_parse_bare_suite() {
        let suite = parse_suite(BARE.as_bytes(), false).unwrap();
        assert_eq!(suite.name, "openshift-tests");
        assert_eq!(suite.testcases.len(), 3);
        assert!(suite.testcases[0].passed());
        assert!(!suite.testcases[1].passed());
    }

    #[test]
    fn test_parse_wrapped_takes_first_suite() {
        let suite = parse_suite(WRAPPED.as_bytes(), true).unwrap();
        assert_eq!(suite.name, "first");
        assert_eq!(suite.testcases.len(), 1);
    }

    #[test]
    fn test_failure_first_line_prefers_content() {
        let suite = parse_suite(BARE.as_bytes(), false).unwrap();
        let failure = suite.testcases[1].failure.as_ref().unwrap();
        assert_eq!(failure.first_line(), Some("watch closed unexpectedly"));
    }

    #[test]
    fn test_failure_first_line_falls_back_to_message() {
        let failure = Failure {
            message: Some("only a message".to_string()),
            content: None,
        };
        assert_eq!(failure.first_line(), Some("only a message"));
    }

    #[test]
    fn test_malformed_xml_is_a_parse_error() {
        let err = parse_suite(b"<testsuite><broken", false).unwrap_err();
        assert!(matches!(err, TriageError::Parse(_)));
    }

    #[test]
    fn test_empty_wrapper_is_a_parse_error() {
        let err = parse_suite(b"<testsuites></testsuites>", true).unwrap_err();
        assert!(matches!(err, TriageError::Parse(_)));
    }
}
