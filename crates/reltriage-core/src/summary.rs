//! Phrase-shape grammar for aggregation summary lines.
//!
//! Each `Failed:` entry in an aggregation testrun summary is followed by
//! one free-text line describing the pass/fail arithmetic. The aggregator
//! emits that line in a handful of known phrasings; we decode them into a
//! canonical `pass=/fail=/...` rendering with a prioritized rule set —
//! first matching shape wins. Text matching no shape passes through
//! tagged as unknown rather than being dropped.

use regex::Regex;

/// Counts recovered from a recognized phrase shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShapeCounts {
    pub passed: Option<u32>,
    pub failed: Option<u32>,
    pub skipped: Option<u32>,
    pub required: Option<u32>,
}

/// Result of decoding one summary line.
#[derive(Debug, Clone)]
pub struct DecodedSummary {
    /// Canonical rendering for the report.
    pub rendered: String,
    /// `None` when no shape matched.
    pub counts: Option<ShapeCounts>,
    /// The line was decoded by (or bucketed into) a disruption shape.
    pub disruption: bool,
    /// No known shape matched; `rendered` carries the raw text.
    pub unknown_shape: bool,
}

/// Compiled, prioritized phrase shapes. Owned by the coordinator so tests
/// can construct their own instance.
#[derive(Debug, Clone)]
pub struct SummaryGrammar {
    plain: Regex,
    with_required: Regex,
    historical: Regex,
    disruption_durations: Regex,
    disruption_required: Regex,
    disruption_mean: Regex,
}

impl Default for SummaryGrammar {
    fn default() -> Self {
        Self::new()
    }
}

impl SummaryGrammar {
    pub fn new() -> Self {
        // The patterns are literal phrases captured from real aggregator
        // output; the double spaces are in the source documents.
        Self {
            plain: Regex::new(
                r"Passed (?P<pass>\d+) times, failed (?P<fail>\d+) times, skipped (?P<skip>\d+) times: we require at least one pass to consider it a success",
            )
            .expect("static regex"),
            with_required: Regex::new(
                r"Passed (?P<pass>\d+) times, failed (?P<fail>\d+) times, skipped (?P<skip>\d+) times: we require at least (?P<req>\d+) attempts to have a chance at success",
            )
            .expect("static regex"),
            historical: Regex::new(
                r"Failed: Passed (?P<pass>\d+) times, failed (?P<fail>\d+) times\.  The historical pass rate is (?P<rate>\d+)%\.  The required number of passes is (?P<req>\d+)\.",
            )
            .expect("static regex"),
            disruption_durations: Regex::new(
                r"\((?P<pct>P[0-9]+=[0-9.]+s).* failures=\[(?P<durations>.*)\]",
            )
            .expect("static regex"),
            disruption_required: Regex::new(
                r"Failed: Passed (?P<pass>\d+) times, failed (?P<fail>\d+) times\.  \(.*requiredPasses=(?P<req>\d+).*\)",
            )
            .expect("static regex"),
            disruption_mean: Regex::new(
                r"Failed: Mean disruption of (?P<backend>[a-z-]+) is (?P<dev>\d+\.\d+) seconds is more than the failureThreshold",
            )
            .expect("static regex"),
        }
    }

    /// Decode one summary line; first matching shape wins.
    pub fn decode(&self, line: &str) -> DecodedSummary {
        let num = |caps: &regex::Captures, name: &str| -> Option<u32> {
            caps.name(name).and_then(|m| m.as_str().parse().ok())
        };

        if let Some(caps) = self.plain.captures(line) {
            let counts = ShapeCounts {
                passed: num(&caps, "pass"),
                failed: num(&caps, "fail"),
                skipped: num(&caps, "skip"),
                required: None,
            };
            return DecodedSummary {
                rendered: format!(
                    "pass={}/fail={}/skip={}",
                    counts.passed.unwrap_or(0),
                    counts.failed.unwrap_or(0),
                    counts.skipped.unwrap_or(0)
                ),
                counts: Some(counts),
                disruption: false,
                unknown_shape: false,
            };
        }

        if let Some(caps) = self.with_required.captures(line) {
            let counts = ShapeCounts {
                passed: num(&caps, "pass"),
                failed: num(&caps, "fail"),
                skipped: num(&caps, "skip"),
                required: num(&caps, "req"),
            };
            return DecodedSummary {
                rendered: format!(
                    "pass={}/fail={}/req={}/skip={}",
                    counts.passed.unwrap_or(0),
                    counts.failed.unwrap_or(0),
                    counts.required.unwrap_or(0),
                    counts.skipped.unwrap_or(0)
                ),
                counts: Some(counts),
                disruption: false,
                unknown_shape: false,
            };
        }

        if let Some(caps) = self.historical.captures(line) {
            let counts = ShapeCounts {
                passed: num(&caps, "pass"),
                failed: num(&caps, "fail"),
                skipped: None,
                required: num(&caps, "req"),
            };
            let rate = num(&caps, "rate").unwrap_or(0);
            return DecodedSummary {
                rendered: format!(
                    "pass={}/fail={}/req={}  historical={}%",
                    counts.passed.unwrap_or(0),
                    counts.failed.unwrap_or(0),
                    counts.required.unwrap_or(0),
                    rate
                ),
                counts: Some(counts),
                disruption: false,
                unknown_shape: false,
            };
        }

        if let Some(caps) = self.disruption_durations.captures(line) {
            let percentile = caps.name("pct").map(|m| m.as_str()).unwrap_or("P?");
            let durations = caps.name("durations").map(|m| m.as_str()).unwrap_or("");
            return DecodedSummary {
                rendered: format!(
                    "pass=0/fail=10/req=? disruption, {}, {}",
                    percentile,
                    sorted_durations(durations)
                ),
                counts: Some(ShapeCounts::default()),
                disruption: true,
                unknown_shape: false,
            };
        }

        if let Some(caps) = self.disruption_required.captures(line) {
            let counts = ShapeCounts {
                passed: num(&caps, "pass"),
                failed: num(&caps, "fail"),
                skipped: None,
                required: num(&caps, "req"),
            };
            return DecodedSummary {
                rendered: format!(
                    "pass={}/fail={}/req={} disruption",
                    counts.passed.unwrap_or(0),
                    counts.failed.unwrap_or(0),
                    counts.required.unwrap_or(0)
                ),
                counts: Some(counts),
                disruption: true,
                unknown_shape: false,
            };
        }

        if let Some(caps) = self.disruption_mean.captures(line) {
            let dev = caps.name("dev").map(|m| m.as_str()).unwrap_or("?");
            return DecodedSummary {
                rendered: format!("pass=?/fail=?/req=? dev={} disruption", dev),
                counts: Some(ShapeCounts::default()),
                disruption: true,
                unknown_shape: false,
            };
        }

        // Unknown shape: pass the raw text through rather than dropping
        // it. Mangled disruption output is the usual culprit, so lines
        // from the backend-disruption suite still count as disruption.
        DecodedSummary {
            rendered: format!("{} (?disruption)", line),
            counts: None,
            disruption: line.starts_with("suite=[BackendDisruption"),
            unknown_shape: true,
        }
    }
}

/// Turn a `jobId=7s jobId=9.2s ...` pair list into a sorted, comma-joined
/// list of whole seconds. An unparsable duration becomes 99999 so it
/// stands out instead of vanishing.
pub fn sorted_durations(pairs: &str) -> String {
    let mut seconds: Vec<i64> = pairs
        .split(' ')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let duration = pair.split('=').nth(1).unwrap_or("");
            duration
                .replace('s', "")
                .parse::<f64>()
                .map(|f| f.round() as i64)
                .unwrap_or(99999)
        })
        .collect();
    seconds.sort_unstable();
    seconds
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_shape_decodes_canonically() {
        let grammar = SummaryGrammar::new();
        let decoded = grammar.decode(
            "Passed 3 times, failed 7 times, skipped 0 times: we require at least one pass to consider it a success",
        );
        assert_eq!(decoded.rendered, "pass=3/fail=7/skip=0");
        let counts = decoded.counts.unwrap();
        assert_eq!(counts.passed, Some(3));
        assert_eq!(counts.failed, Some(7));
        assert_eq!(counts.skipped, Some(0));
        assert!(!decoded.disruption);
    }

    #[test]
    fn test_required_attempts_shape() {
        let grammar = SummaryGrammar::new();
        let decoded = grammar.decode(
            "Passed 2 times, failed 1 times, skipped 7 times: we require at least 9 attempts to have a chance at success",
        );
        assert_eq!(decoded.rendered, "pass=2/fail=1/req=9/skip=7");
    }

    #[test]
    fn test_historical_shape() {
        let grammar = SummaryGrammar::new();
        let decoded = grammar.decode(
            "Failed: Passed 4 times, failed 6 times.  The historical pass rate is 97%.  The required number of passes is 6.",
        );
        assert_eq!(decoded.rendered, "pass=4/fail=6/req=6  historical=97%");
        assert!(!decoded.unknown_shape);
    }

    #[test]
    fn test_disruption_durations_shape_sorts_runs() {
        let grammar = SummaryGrammar::new();
        let decoded = grammar.decode(
            "backend disruption (P85=2.00s vs current) failures=[1234=9s 5678=2.4s 9012=7s]",
        );
        assert!(decoded.disruption);
        assert_eq!(
            decoded.rendered,
            "pass=0/fail=10/req=? disruption, P85=2.00s, 2, 7, 9"
        );
    }

    #[test]
    fn test_disruption_mean_shape() {
        let grammar = SummaryGrammar::new();
        let decoded = grammar.decode(
            "Failed: Mean disruption of openshift-api is 32.25 seconds is more than the failureThreshold",
        );
        assert!(decoded.disruption);
        assert_eq!(decoded.rendered, "pass=?/fail=?/req=? dev=32.25 disruption");
    }

    #[test]
    fn test_unknown_shape_passes_through() {
        let grammar = SummaryGrammar::new();
        let decoded = grammar.decode("somebody rewrote the aggregator output");
        assert!(decoded.unknown_shape);
        assert!(decoded.counts.is_none());
        assert_eq!(
            decoded.rendered,
            "somebody rewrote the aggregator output (?disruption)"
        );
        assert!(!decoded.disruption);
    }

    #[test]
    fn test_unknown_backend_disruption_counts_as_disruption() {
        let grammar = SummaryGrammar::new();
        let decoded = grammar.decode("suite=[BackendDisruption] something novel");
        assert!(decoded.unknown_shape);
        assert!(decoded.disruption);
    }

    #[test]
    fn test_sorted_durations_uses_sentinel_for_garbage() {
        assert_eq!(sorted_durations("a=5s b=oops c=1s"), "1, 5, 99999");
    }
}
