/// Static submission validator.
///
/// A pre-filter in front of the runtime, not the isolation boundary: the
/// runtime never exposes anything the policy does not install, whether or not
/// a submission passes through here first. What this module adds is a fast,
/// explainable rejection before any execution begins.
///
/// Checks run on lexer tokens, so text inside string literals and comments is
/// never matched. Anything the lexer cannot classify fails closed.
use crate::config::descriptor::PolicyDescriptor;
use crate::config::types::CodeSubmission;
use crate::script::lexer::{tokenize, LexErrorKind, Op, Token, TokenKind};
use std::fmt;

/// A submission that passed validation.
///
/// Only [`validate`] can construct one, and the runtime accepts nothing else:
///
/// ```compile_fail
/// use learnbox::config::types::CodeSubmission;
/// use learnbox::exec::validator::ValidatedSubmission;
///
/// let forged = ValidatedSubmission {
///     submission: CodeSubmission::new("import os"),
/// };
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedSubmission {
    submission: CodeSubmission,
}

impl ValidatedSubmission {
    pub fn id(&self) -> &str {
        &self.submission.id
    }

    pub fn source(&self) -> &str {
        &self.submission.source
    }

    pub fn submission(&self) -> &CodeSubmission {
        &self.submission
    }
}

/// Why a submission was rejected. `Display` is the user-facing text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockReason {
    SourceTooLarge { size: usize, limit: usize },
    ForbiddenIdentifier { word: String, line: usize },
    DunderName { name: String, line: usize },
    AttributeAccess { line: usize },
    UnrecognizedCharacter { ch: char, line: usize },
}

impl BlockReason {
    /// Stable machine-readable code for audit records
    pub fn code(&self) -> &'static str {
        match self {
            BlockReason::SourceTooLarge { .. } => "source_too_large",
            BlockReason::ForbiddenIdentifier { .. } => "forbidden_identifier",
            BlockReason::DunderName { .. } => "dunder_name",
            BlockReason::AttributeAccess { .. } => "attribute_access",
            BlockReason::UnrecognizedCharacter { .. } => "unrecognized_character",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "⚠️ Unsafe code blocked: ")?;
        match self {
            BlockReason::SourceTooLarge { size, limit } => write!(
                f,
                "submission is {} bytes, the limit is {} bytes",
                size, limit
            ),
            BlockReason::ForbiddenIdentifier { word, line } => {
                write!(f, "'{}' is not allowed (line {})", word, line)
            }
            BlockReason::DunderName { name, line } => {
                write!(f, "names starting with '__' are not allowed: '{}' (line {})", name, line)
            }
            BlockReason::AttributeAccess { line } => {
                write!(f, "attribute access with '.' is not allowed (line {})", line)
            }
            BlockReason::UnrecognizedCharacter { ch, line } if ch.is_control() => write!(
                f,
                "unexpected character U+{:04X} (line {})",
                *ch as u32, line
            ),
            BlockReason::UnrecognizedCharacter { ch, line } => {
                write!(f, "unexpected character '{}' (line {})", ch, line)
            }
        }
    }
}

/// Accept or block a submission under `policy`. Nothing is executed.
pub fn validate(
    submission: CodeSubmission,
    policy: &PolicyDescriptor,
) -> Result<ValidatedSubmission, BlockReason> {
    let source = submission.source.as_str();
    if source.len() > policy.max_source_bytes {
        return Err(BlockReason::SourceTooLarge {
            size: source.len(),
            limit: policy.max_source_bytes,
        });
    }

    match tokenize(source) {
        Ok(tokens) => check_tokens(&tokens, policy)?,
        Err(err) => {
            check_tokens(&err.tokens, policy)?;
            match err.kind {
                LexErrorKind::UnrecognizedCharacter(ch) => {
                    return Err(BlockReason::UnrecognizedCharacter { ch, line: err.line });
                }
                // Tokenization stopped early, so the remainder never got
                // string/comment treatment. Scan it as plain code.
                _ => scan_as_code(&source[err.offset..], err.line, policy)?,
            }
        }
    }

    Ok(ValidatedSubmission { submission })
}

fn check_tokens(tokens: &[Token], policy: &PolicyDescriptor) -> Result<(), BlockReason> {
    for (i, token) in tokens.iter().enumerate() {
        match &token.kind {
            TokenKind::Name(name) => check_word(name, token.line, policy)?,
            TokenKind::Keyword(kw) => check_word(kw.as_str(), token.line, policy)?,
            TokenKind::Op(Op::Dot) => {
                let next = tokens.get(i + 1).map(|t| &t.kind);
                if matches!(next, Some(TokenKind::Name(_)) | Some(TokenKind::Keyword(_))) {
                    return Err(BlockReason::AttributeAccess { line: token.line });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_word(word: &str, line: usize, policy: &PolicyDescriptor) -> Result<(), BlockReason> {
    if policy.forbids(word) {
        return Err(BlockReason::ForbiddenIdentifier {
            word: word.to_string(),
            line,
        });
    }
    if word.starts_with("__") {
        return Err(BlockReason::DunderName {
            name: word.to_string(),
            line,
        });
    }
    Ok(())
}

/// Word-boundary scan over text the lexer could not classify
fn scan_as_code(text: &str, first_line: usize, policy: &PolicyDescriptor) -> Result<(), BlockReason> {
    let bytes = text.as_bytes();
    let mut line = first_line;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\n' {
            line += 1;
            i += 1;
            continue;
        }
        if !(b.is_ascii_alphanumeric() || b == b'_') {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
            i += 1;
        }
        check_word(&text[start..i], line, policy)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(source: &str) -> Result<ValidatedSubmission, BlockReason> {
        validate(CodeSubmission::new(source), &PolicyDescriptor::default())
    }

    #[test]
    fn test_accepts_ordinary_lesson_code() {
        assert!(check("print(\"Hello, World!\")").is_ok());
        assert!(check("total = sum(range(10))\nprint(total)").is_ok());
        assert!(check("").is_ok());
    }

    #[test]
    fn test_blocks_forbidden_keywords_and_names() {
        assert_eq!(
            check("import os").unwrap_err(),
            BlockReason::ForbiddenIdentifier {
                word: "import".into(),
                line: 1
            }
        );
        assert!(matches!(
            check("x = 1\ny = eval('1')").unwrap_err(),
            BlockReason::ForbiddenIdentifier { line: 2, .. }
        ));
        assert!(check("open('f')").is_err());
        assert!(check("lambda: 1").is_err());
    }

    #[test]
    fn test_strings_and_comments_are_inert() {
        assert!(check("print('import os and eval(x)')").is_ok());
        assert!(check("print(1)  # do not import anything").is_ok());
        assert!(check("print(\"__init__\")").is_ok());
    }

    #[test]
    fn test_words_are_matched_whole() {
        assert!(check("imported = 1\nprint(imported)").is_ok());
        assert!(check("osmosis = 2").is_ok());
    }

    #[test]
    fn test_blocks_dunder_names() {
        assert!(matches!(
            check("__builtins__").unwrap_err(),
            BlockReason::DunderName { .. }
        ));
        assert!(check("_private = 1").is_ok());
    }

    #[test]
    fn test_blocks_attribute_access() {
        assert!(matches!(
            check("x = [1]\nx.append(2)").unwrap_err(),
            BlockReason::AttributeAccess { line: 2 }
        ));
        assert!(check("x = 1.5 + .5").is_ok());
    }

    #[test]
    fn test_unrecognized_characters_fail_closed() {
        assert!(matches!(
            check("x = 1\0").unwrap_err(),
            BlockReason::UnrecognizedCharacter { ch: '\0', .. }
        ));
        assert!(matches!(
            check("prïnt(1)").unwrap_err(),
            BlockReason::UnrecognizedCharacter { .. }
        ));
        assert!(check("x = $y").is_err());
    }

    #[test]
    fn test_forbidden_word_before_bad_character_wins() {
        assert!(matches!(
            check("import os; $").unwrap_err(),
            BlockReason::ForbiddenIdentifier { .. }
        ));
    }

    #[test]
    fn test_unterminated_string_remainder_is_scanned() {
        let err = check("x = 'abc\nimport os").unwrap_err();
        assert_eq!(
            err,
            BlockReason::ForbiddenIdentifier {
                word: "import".into(),
                line: 2
            }
        );
        // An unterminated string with harmless content is left for the runtime
        // to report as a syntax error.
        assert!(check("print('hello").is_ok());
    }

    #[test]
    fn test_length_limit() {
        let policy = PolicyDescriptor {
            max_source_bytes: 8,
            ..Default::default()
        };
        let err = validate(CodeSubmission::new("print(12345)"), &policy).unwrap_err();
        assert_eq!(err, BlockReason::SourceTooLarge { size: 12, limit: 8 });
    }

    #[test]
    fn test_reason_text_is_user_facing() {
        let err = check("import os").unwrap_err();
        assert_eq!(
            err.to_string(),
            "⚠️ Unsafe code blocked: 'import' is not allowed (line 1)"
        );
        assert_eq!(err.code(), "forbidden_identifier");
    }

    #[test]
    fn test_validated_submission_keeps_identity() {
        let submission = CodeSubmission::with_id("abc", "print(1)");
        let validated = validate(submission, &PolicyDescriptor::default()).unwrap();
        assert_eq!(validated.id(), "abc");
        assert_eq!(validated.source(), "print(1)");
    }
}
