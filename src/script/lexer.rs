//! Tokenizer for the lesson script dialect.
//!
//! Shared by the static validator and the parser so both see the same token
//! boundaries. String literals and comments are consumed here and never
//! surface as names. Indentation is turned into `Indent`/`Dedent` tokens;
//! newlines inside brackets and after a trailing backslash are joined.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyword {
    False,
    None,
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Nonlocal,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,
}

impl Keyword {
    pub fn from_word(word: &str) -> Option<Self> {
        let kw = match word {
            "False" => Keyword::False,
            "None" => Keyword::None,
            "True" => Keyword::True,
            "and" => Keyword::And,
            "as" => Keyword::As,
            "assert" => Keyword::Assert,
            "async" => Keyword::Async,
            "await" => Keyword::Await,
            "break" => Keyword::Break,
            "class" => Keyword::Class,
            "continue" => Keyword::Continue,
            "def" => Keyword::Def,
            "del" => Keyword::Del,
            "elif" => Keyword::Elif,
            "else" => Keyword::Else,
            "except" => Keyword::Except,
            "finally" => Keyword::Finally,
            "for" => Keyword::For,
            "from" => Keyword::From,
            "global" => Keyword::Global,
            "if" => Keyword::If,
            "import" => Keyword::Import,
            "in" => Keyword::In,
            "is" => Keyword::Is,
            "lambda" => Keyword::Lambda,
            "nonlocal" => Keyword::Nonlocal,
            "not" => Keyword::Not,
            "or" => Keyword::Or,
            "pass" => Keyword::Pass,
            "raise" => Keyword::Raise,
            "return" => Keyword::Return,
            "try" => Keyword::Try,
            "while" => Keyword::While,
            "with" => Keyword::With,
            "yield" => Keyword::Yield,
            _ => return None,
        };
        Some(kw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::False => "False",
            Keyword::None => "None",
            Keyword::True => "True",
            Keyword::And => "and",
            Keyword::As => "as",
            Keyword::Assert => "assert",
            Keyword::Async => "async",
            Keyword::Await => "await",
            Keyword::Break => "break",
            Keyword::Class => "class",
            Keyword::Continue => "continue",
            Keyword::Def => "def",
            Keyword::Del => "del",
            Keyword::Elif => "elif",
            Keyword::Else => "else",
            Keyword::Except => "except",
            Keyword::Finally => "finally",
            Keyword::For => "for",
            Keyword::From => "from",
            Keyword::Global => "global",
            Keyword::If => "if",
            Keyword::Import => "import",
            Keyword::In => "in",
            Keyword::Is => "is",
            Keyword::Lambda => "lambda",
            Keyword::Nonlocal => "nonlocal",
            Keyword::Not => "not",
            Keyword::Or => "or",
            Keyword::Pass => "pass",
            Keyword::Raise => "raise",
            Keyword::Return => "return",
            Keyword::Try => "try",
            Keyword::While => "while",
            Keyword::With => "with",
            Keyword::Yield => "yield",
        }
    }
}

/// Operators and delimiters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semicolon,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    DoubleSlashAssign,
    PercentAssign,
    DoubleStarAssign,
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Arrow,
    Walrus,
    At,
    Amp,
    Pipe,
    Caret,
    Tilde,
    LShift,
    RShift,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::LParen => "(",
            Op::RParen => ")",
            Op::LBracket => "[",
            Op::RBracket => "]",
            Op::LBrace => "{",
            Op::RBrace => "}",
            Op::Comma => ",",
            Op::Colon => ":",
            Op::Semicolon => ";",
            Op::Dot => ".",
            Op::Plus => "+",
            Op::Minus => "-",
            Op::Star => "*",
            Op::Slash => "/",
            Op::DoubleSlash => "//",
            Op::Percent => "%",
            Op::DoubleStar => "**",
            Op::Assign => "=",
            Op::PlusAssign => "+=",
            Op::MinusAssign => "-=",
            Op::StarAssign => "*=",
            Op::SlashAssign => "/=",
            Op::DoubleSlashAssign => "//=",
            Op::PercentAssign => "%=",
            Op::DoubleStarAssign => "**=",
            Op::Eq => "==",
            Op::NotEq => "!=",
            Op::Lt => "<",
            Op::LtE => "<=",
            Op::Gt => ">",
            Op::GtE => ">=",
            Op::Arrow => "->",
            Op::Walrus => ":=",
            Op::At => "@",
            Op::Amp => "&",
            Op::Pipe => "|",
            Op::Caret => "^",
            Op::Tilde => "~",
            Op::LShift => "<<",
            Op::RShift => ">>",
        }
    }
}

// Longest spellings first so that "**=" wins over "**" and "*".
const OPERATORS: &[(&str, Op)] = &[
    ("**=", Op::DoubleStarAssign),
    ("//=", Op::DoubleSlashAssign),
    ("**", Op::DoubleStar),
    ("//", Op::DoubleSlash),
    ("==", Op::Eq),
    ("!=", Op::NotEq),
    ("<=", Op::LtE),
    (">=", Op::GtE),
    ("+=", Op::PlusAssign),
    ("-=", Op::MinusAssign),
    ("*=", Op::StarAssign),
    ("/=", Op::SlashAssign),
    ("%=", Op::PercentAssign),
    ("->", Op::Arrow),
    (":=", Op::Walrus),
    ("<<", Op::LShift),
    (">>", Op::RShift),
    ("(", Op::LParen),
    (")", Op::RParen),
    ("[", Op::LBracket),
    ("]", Op::RBracket),
    ("{", Op::LBrace),
    ("}", Op::RBrace),
    (",", Op::Comma),
    (":", Op::Colon),
    (";", Op::Semicolon),
    (".", Op::Dot),
    ("+", Op::Plus),
    ("-", Op::Minus),
    ("*", Op::Star),
    ("/", Op::Slash),
    ("%", Op::Percent),
    ("=", Op::Assign),
    ("<", Op::Lt),
    (">", Op::Gt),
    ("@", Op::At),
    ("&", Op::Amp),
    ("|", Op::Pipe),
    ("^", Op::Caret),
    ("~", Op::Tilde),
];

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Name(String),
    Keyword(Keyword),
    Int(i64),
    Float(f64),
    Str(String),
    Op(Op),
    Newline,
    Indent,
    Dedent,
    EndOfInput,
}

impl TokenKind {
    /// Short description used in syntax error messages
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Name(name) => format!("'{}'", name),
            TokenKind::Keyword(kw) => format!("'{}'", kw.as_str()),
            TokenKind::Int(v) => format!("'{}'", v),
            TokenKind::Float(v) => format!("'{}'", v),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Op(op) => format!("'{}'", op.as_str()),
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Indent => "indent".to_string(),
            TokenKind::Dedent => "dedent".to_string(),
            TokenKind::EndOfInput => "end of input".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// 1-based line of the token's first character
    pub line: usize,
    /// Byte offset of the token's first character
    pub offset: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexErrorKind {
    /// A character with no meaning outside string or comment content
    UnrecognizedCharacter(char),
    UnterminatedString,
    InconsistentIndentation,
    NumberTooLarge,
    MalformedNumber,
}

impl fmt::Display for LexErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexErrorKind::UnrecognizedCharacter(c) if c.is_control() => {
                write!(f, "invalid character U+{:04X}", *c as u32)
            }
            LexErrorKind::UnrecognizedCharacter(c) => write!(f, "invalid character '{}'", c),
            LexErrorKind::UnterminatedString => write!(f, "unterminated string literal"),
            LexErrorKind::InconsistentIndentation => {
                write!(f, "unindent does not match any outer indentation level")
            }
            LexErrorKind::NumberTooLarge => write!(f, "integer literal is too large"),
            LexErrorKind::MalformedNumber => write!(f, "invalid number literal"),
        }
    }
}

/// Tokenization stopped early. `tokens` holds what was produced before `offset`.
#[derive(Clone, Debug, PartialEq)]
pub struct LexError {
    pub kind: LexErrorKind,
    pub line: usize,
    pub offset: usize,
    pub tokens: Vec<Token>,
}

/// Tokenize a whole source text
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).run()
}

pub fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

pub fn is_name_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    depth: usize,
    at_line_start: bool,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            depth: 0,
            at_line_start: true,
            indents: vec![0],
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        loop {
            if self.at_line_start && self.depth == 0 {
                let width = self.measure_indent();
                match self.peek() {
                    None => break,
                    Some(b'\n') | Some(b'\r') => {
                        self.consume_line_break();
                        continue;
                    }
                    Some(b'#') => {
                        self.skip_comment();
                        continue;
                    }
                    Some(_) => {
                        self.indent_to(width)?;
                        self.at_line_start = false;
                    }
                }
            }

            let Some(b) = self.peek() else { break };
            match b {
                b'\n' | b'\r' => {
                    if self.depth == 0 {
                        self.push_newline(self.pos);
                        self.at_line_start = true;
                    }
                    self.consume_line_break();
                }
                b' ' | b'\t' | b'\x0c' => self.pos += 1,
                b'#' => self.skip_comment(),
                b'\\' => {
                    let next = self.bytes.get(self.pos + 1).copied();
                    if matches!(next, Some(b'\n') | Some(b'\r')) {
                        self.pos += 1;
                        self.consume_line_break();
                    } else {
                        return Err(self.error(LexErrorKind::UnrecognizedCharacter('\\')));
                    }
                }
                b'"' | b'\'' => self.string(false)?,
                b'0'..=b'9' => self.number()?,
                b'.' if matches!(self.bytes.get(self.pos + 1), Some(d) if d.is_ascii_digit()) =>
                {
                    self.number()?
                }
                b if is_name_start(b) => self.word()?,
                _ => self.operator()?,
            }
        }

        let end = self.bytes.len();
        self.push_newline(end);
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, end);
        }
        self.push(TokenKind::EndOfInput, end);
        Ok(self.tokens)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn push(&mut self, kind: TokenKind, offset: usize) {
        self.tokens.push(Token {
            kind,
            line: self.line,
            offset,
        });
    }

    fn push_newline(&mut self, offset: usize) {
        let needed = matches!(
            self.tokens.last().map(|t| &t.kind),
            Some(kind) if !matches!(kind, TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent)
        );
        if needed {
            self.push(TokenKind::Newline, offset);
        }
    }

    fn error(&self, kind: LexErrorKind) -> LexError {
        self.error_at(kind, self.line, self.pos)
    }

    fn error_at(&self, kind: LexErrorKind, line: usize, offset: usize) -> LexError {
        LexError {
            kind,
            line,
            offset,
            tokens: self.tokens.clone(),
        }
    }

    fn consume_line_break(&mut self) {
        if self.peek() == Some(b'\r') {
            self.pos += 1;
            if self.peek() == Some(b'\n') {
                self.pos += 1;
            }
        } else {
            self.pos += 1;
        }
        self.line += 1;
    }

    fn skip_comment(&mut self) {
        while let Some(b) = self.peek() {
            if b == b'\n' || b == b'\r' {
                break;
            }
            self.pos += 1;
        }
    }

    fn measure_indent(&mut self) -> usize {
        let mut width = 0;
        while let Some(b) = self.peek() {
            match b {
                b' ' => width += 1,
                b'\t' => width = (width / 8 + 1) * 8,
                b'\x0c' => width = 0,
                _ => break,
            }
            self.pos += 1;
        }
        width
    }

    fn indent_to(&mut self, width: usize) -> Result<(), LexError> {
        let top = self.indents.last().copied().unwrap_or(0);
        if width > top {
            self.indents.push(width);
            self.push(TokenKind::Indent, self.pos);
            return Ok(());
        }
        while width < self.indents.last().copied().unwrap_or(0) {
            self.indents.pop();
            self.push(TokenKind::Dedent, self.pos);
        }
        if width != self.indents.last().copied().unwrap_or(0) {
            return Err(self.error(LexErrorKind::InconsistentIndentation));
        }
        Ok(())
    }

    fn word(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if is_name_continue(b)) {
            self.pos += 1;
        }
        let word = &self.src[start..self.pos];

        // Raw and unicode prefixes bind to a directly following quote.
        if matches!(self.peek(), Some(b'"') | Some(b'\'')) {
            match word {
                "r" | "R" => return self.string_from(start, true),
                "u" | "U" => return self.string_from(start, false),
                _ => {}
            }
        }

        if !self.peek().map_or(true, |b| b.is_ascii()) {
            // An identifier running into non-ASCII text, e.g. `prïnt`.
            return Err(self.unrecognized());
        }

        let kind = match Keyword::from_word(word) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Name(word.to_string()),
        };
        self.push(kind, start);
        Ok(())
    }

    fn unrecognized(&self) -> LexError {
        let c = self.src[self.pos..].chars().next().unwrap_or('\0');
        self.error(LexErrorKind::UnrecognizedCharacter(c))
    }

    fn string(&mut self, raw: bool) -> Result<(), LexError> {
        let start = self.pos;
        self.string_from(start, raw)
    }

    /// Lex a string literal whose quote is at `self.pos`; `start` may point at a prefix.
    fn string_from(&mut self, start: usize, raw: bool) -> Result<(), LexError> {
        let start_line = self.line;
        let quote = self.bytes[self.pos];
        let triple = self.bytes[self.pos..].starts_with(&[quote, quote, quote]);
        self.pos += if triple { 3 } else { 1 };

        let unterminated =
            |lexer: &Self| lexer.error_at(LexErrorKind::UnterminatedString, start_line, start);

        let mut value = String::new();
        loop {
            let Some(b) = self.peek() else {
                return Err(unterminated(self));
            };

            if b == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.bytes[self.pos..].starts_with(&[quote, quote, quote]) {
                    self.pos += 3;
                    break;
                }
            }

            match b {
                b'\n' | b'\r' if !triple => return Err(unterminated(self)),
                b'\\' => {
                    self.pos += 1;
                    let Some(next) = self.src[self.pos..].chars().next() else {
                        return Err(unterminated(self));
                    };
                    if raw {
                        value.push('\\');
                        value.push(next);
                        self.pos += next.len_utf8();
                        if next == '\n' {
                            self.line += 1;
                        }
                        continue;
                    }
                    self.escape(next, &mut value);
                }
                _ => {
                    let Some(c) = self.src[self.pos..].chars().next() else {
                        return Err(unterminated(self));
                    };
                    if c == '\n' {
                        self.line += 1;
                    }
                    value.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }

        self.tokens.push(Token {
            kind: TokenKind::Str(value),
            line: start_line,
            offset: start,
        });
        Ok(())
    }

    /// Decode the escape whose first character (after the backslash) is `next`.
    fn escape(&mut self, next: char, value: &mut String) {
        self.pos += next.len_utf8();
        match next {
            'n' => value.push('\n'),
            't' => value.push('\t'),
            'r' => value.push('\r'),
            '0' => value.push('\0'),
            'a' => value.push('\x07'),
            'b' => value.push('\x08'),
            'f' => value.push('\x0c'),
            'v' => value.push('\x0b'),
            '\\' => value.push('\\'),
            '\'' => value.push('\''),
            '"' => value.push('"'),
            '\n' => self.line += 1,
            'x' | 'u' => {
                let digits = if next == 'x' { 2 } else { 4 };
                let hex = self.src.get(self.pos..self.pos + digits);
                match hex
                    .filter(|h| h.bytes().all(|b| b.is_ascii_hexdigit()))
                    .and_then(|h| u32::from_str_radix(h, 16).ok())
                {
                    Some(code) => {
                        value.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
                        self.pos += digits;
                    }
                    None => {
                        value.push('\\');
                        value.push(next);
                    }
                }
            }
            other => {
                value.push('\\');
                value.push(other);
                if other == '\r' || other == '\n' {
                    self.line += 1;
                }
            }
        }
    }

    fn number(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        let radix = match (self.peek(), self.bytes.get(self.pos + 1).copied()) {
            (Some(b'0'), Some(b'x' | b'X')) => 16,
            (Some(b'0'), Some(b'o' | b'O')) => 8,
            (Some(b'0'), Some(b'b' | b'B')) => 2,
            _ => 10,
        };

        let kind = if radix != 10 {
            self.pos += 2;
            let digits_start = self.pos;
            while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
                self.pos += 1;
            }
            let digits: String = self.src[digits_start..self.pos]
                .chars()
                .filter(|c| *c != '_')
                .collect();
            if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
                return Err(self.error_at(LexErrorKind::MalformedNumber, self.line, start));
            }
            match i64::from_str_radix(&digits, radix) {
                Ok(v) => TokenKind::Int(v),
                Err(_) => return Err(self.error_at(LexErrorKind::NumberTooLarge, self.line, start)),
            }
        } else {
            let mut is_float = false;
            self.digits();
            if self.peek() == Some(b'.') {
                is_float = true;
                self.pos += 1;
                self.digits();
            }
            if matches!(self.peek(), Some(b'e' | b'E')) {
                is_float = true;
                self.pos += 1;
                if matches!(self.peek(), Some(b'+' | b'-')) {
                    self.pos += 1;
                }
                if !matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                    return Err(self.error_at(LexErrorKind::MalformedNumber, self.line, start));
                }
                self.digits();
            }
            if matches!(self.peek(), Some(b) if is_name_start(b)) {
                return Err(self.error_at(LexErrorKind::MalformedNumber, self.line, start));
            }

            let text: String = self.src[start..self.pos]
                .chars()
                .filter(|c| *c != '_')
                .collect();
            if is_float {
                match text.parse::<f64>() {
                    Ok(v) => TokenKind::Float(v),
                    Err(_) => {
                        return Err(self.error_at(LexErrorKind::MalformedNumber, self.line, start))
                    }
                }
            } else {
                match text.parse::<i64>() {
                    Ok(v) => TokenKind::Int(v),
                    Err(_) => {
                        return Err(self.error_at(LexErrorKind::NumberTooLarge, self.line, start))
                    }
                }
            }
        };

        self.push(kind, start);
        Ok(())
    }

    fn digits(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_digit() || b == b'_') {
            self.pos += 1;
        }
    }

    fn operator(&mut self) -> Result<(), LexError> {
        let rest = &self.bytes[self.pos..];
        let Some((spelling, op)) = OPERATORS
            .iter()
            .find(|(spelling, _)| rest.starts_with(spelling.as_bytes()))
        else {
            return Err(self.unrecognized());
        };

        let start = self.pos;
        self.pos += spelling.len();
        match op {
            Op::LParen | Op::LBracket | Op::LBrace => self.depth += 1,
            Op::RParen | Op::RBracket | Op::RBrace => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        self.push(TokenKind::Op(*op), start);
        Ok(())
    }
}
