/// Result classification.
///
/// Turns what the runtime and governor observed into the closed set of
/// outcome kinds a caller sees. Pure: the same raw outcome always yields the
/// same classified outcome.
use crate::config::types::{ExecutionOutcome, OutcomeKind, RawOutcome};
use crate::exec::validator::BlockReason;

/// Output text for a run that completed without printing anything
pub const SUCCESS_MARKER: &str = "✅ Code ran successfully!";

pub const TIME_LIMIT_DIAGNOSTIC: &str = "execution exceeded time limit";
pub const MEMORY_LIMIT_DIAGNOSTIC: &str = "execution exceeded memory limit";

/// Longest diagnostic handed back to a caller, in characters
pub const MAX_DIAGNOSTIC_CHARS: usize = 300;

pub struct ResultClassifier;

impl ResultClassifier {
    pub fn classify(raw: &RawOutcome) -> ExecutionOutcome {
        match raw {
            RawOutcome::Completed(captured) => {
                let trimmed = captured.text.trim();
                let output_text = if trimmed.is_empty() {
                    SUCCESS_MARKER.to_string()
                } else {
                    trimmed.to_string()
                };
                ExecutionOutcome {
                    kind: OutcomeKind::Success,
                    output_text,
                    diagnostic: None,
                    truncated: captured.is_truncated(),
                }
            }
            RawOutcome::Faulted(diagnostic) => {
                Self::failure(OutcomeKind::RuntimeFault, &diagnostic.to_string())
            }
            RawOutcome::TimedOut => {
                Self::failure(OutcomeKind::ResourceExceeded, TIME_LIMIT_DIAGNOSTIC)
            }
            RawOutcome::MemoryExceeded => {
                Self::failure(OutcomeKind::ResourceExceeded, MEMORY_LIMIT_DIAGNOSTIC)
            }
        }
    }

    /// The only way to build a `Blocked` outcome
    pub fn blocked(reason: &BlockReason) -> ExecutionOutcome {
        Self::failure(OutcomeKind::Blocked, &reason.to_string())
    }

    fn failure(kind: OutcomeKind, diagnostic: &str) -> ExecutionOutcome {
        ExecutionOutcome {
            kind,
            output_text: String::new(),
            diagnostic: Some(summarize(diagnostic)),
            truncated: false,
        }
    }
}

/// Collapse to one line of at most [`MAX_DIAGNOSTIC_CHARS`] characters
pub fn summarize(text: &str) -> String {
    let one_line = text
        .split(|c: char| c.is_control())
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if one_line.chars().count() <= MAX_DIAGNOSTIC_CHARS {
        return one_line;
    }
    let mut cut: String = one_line.chars().take(MAX_DIAGNOSTIC_CHARS - 3).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{CapturedOutput, FaultDiagnostic, FaultKind, OutputIntegrity};

    fn completed(text: &str, integrity: OutputIntegrity) -> RawOutcome {
        RawOutcome::Completed(CapturedOutput {
            text: text.to_string(),
            integrity,
            dropped_bytes: 0,
        })
    }

    #[test]
    fn test_completed_output_is_trimmed() {
        let outcome = ResultClassifier::classify(&completed("  Hello\n\n", OutputIntegrity::Complete));
        assert_eq!(outcome.kind, OutcomeKind::Success);
        assert_eq!(outcome.output_text, "Hello");
        assert_eq!(outcome.diagnostic, None);
        assert!(!outcome.truncated);
    }

    #[test]
    fn test_empty_output_gets_marker() {
        for text in ["", "\n \t\n"] {
            let outcome = ResultClassifier::classify(&completed(text, OutputIntegrity::Complete));
            assert_eq!(outcome.output_text, SUCCESS_MARKER);
            assert!(outcome.is_success());
        }
    }

    #[test]
    fn test_truncation_is_surfaced() {
        let outcome =
            ResultClassifier::classify(&completed("xxxx", OutputIntegrity::TruncatedByLimit));
        assert!(outcome.truncated);
        assert_eq!(outcome.kind, OutcomeKind::Success);
    }

    #[test]
    fn test_fault_diagnostic() {
        let raw = RawOutcome::Faulted(FaultDiagnostic::new(
            FaultKind::NameError,
            "name 'x' is not defined",
            Some(2),
        ));
        let outcome = ResultClassifier::classify(&raw);
        assert_eq!(outcome.kind, OutcomeKind::RuntimeFault);
        assert_eq!(outcome.output_text, "");
        assert_eq!(
            outcome.diagnostic.as_deref(),
            Some("NameError: name 'x' is not defined (line 2)")
        );
    }

    #[test]
    fn test_limits() {
        let timed_out = ResultClassifier::classify(&RawOutcome::TimedOut);
        assert_eq!(timed_out.kind, OutcomeKind::ResourceExceeded);
        assert_eq!(timed_out.diagnostic.as_deref(), Some(TIME_LIMIT_DIAGNOSTIC));

        let memory = ResultClassifier::classify(&RawOutcome::MemoryExceeded);
        assert_eq!(memory.diagnostic.as_deref(), Some(MEMORY_LIMIT_DIAGNOSTIC));
    }

    #[test]
    fn test_blocked() {
        let reason = BlockReason::ForbiddenIdentifier {
            word: "import".to_string(),
            line: 1,
        };
        let outcome = ResultClassifier::blocked(&reason);
        assert_eq!(outcome.kind, OutcomeKind::Blocked);
        assert_eq!(outcome.diagnostic, Some(reason.to_string()));
    }

    #[test]
    fn test_summarize() {
        assert_eq!(summarize("a\nb\r\n  c"), "a b c");
        let long = "y".repeat(1000);
        let short = summarize(&long);
        assert_eq!(short.chars().count(), MAX_DIAGNOSTIC_CHARS);
        assert!(short.ends_with("..."));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let raw = completed("same", OutputIntegrity::Complete);
        assert_eq!(ResultClassifier::classify(&raw), ResultClassifier::classify(&raw));
    }
}
