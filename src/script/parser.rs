//! Directive parser
//!
//! A script is a sequence of `;`-separated statements. Comment lines of the
//! form `-- @wtf-<name> <param> ...` are directives attached to the statement
//! they appear in; they are removed from the SQL handed to SQLite.
//!
//! ```text
//! -- @wtf-validate name required,min=2
//! -- @wtf-store greeting
//! SELECT 'Hello, ' || :name AS message;
//! ```

use std::fmt;

/// Prefix of a directive after the `--` comment marker
pub const DIRECTIVE_PREFIX: &str = "@wtf-";

/// Directive names with built-in meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    /// `store <bucket>`: result rows go into the named bucket
    Store,
    /// `validate <field> <rule>`: check a variable before running the statement
    Validate,
    /// `capture <variable> [single]`: bind the result into the variable map
    Capture,
    /// Anything else; preserved but ignored
    Unknown,
}

/// A single `-- @wtf-<name>` annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub params: Vec<String>,
}

impl Directive {
    pub fn kind(&self) -> DirectiveKind {
        match self.name.as_str() {
            "store" => DirectiveKind::Store,
            "validate" => DirectiveKind::Validate,
            "capture" => DirectiveKind::Capture,
            _ => DirectiveKind::Unknown,
        }
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", DIRECTIVE_PREFIX, self.name)?;
        for param in &self.params {
            write!(f, " {}", param)?;
        }
        Ok(())
    }
}

/// One statement of a script with its directives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatement {
    /// SQL text with directive lines removed
    pub text: String,
    pub directives: Vec<Directive>,
}

impl ParsedStatement {
    /// True when the text holds nothing but comments and whitespace
    pub fn is_noop(&self) -> bool {
        !has_code(&self.text)
    }

    pub fn directives_of(&self, kind: DirectiveKind) -> impl Iterator<Item = &Directive> {
        self.directives.iter().filter(move |d| d.kind() == kind)
    }
}

/// Split a script into statements and extract their directives.
///
/// Statements with neither SQL nor directives are dropped. Separators inside
/// string literals, quoted identifiers and comments do not split.
pub fn parse_script(text: &str) -> Vec<ParsedStatement> {
    split_statements(text)
        .into_iter()
        .filter_map(|raw| parse_statement(raw.trim()))
        .collect()
}

fn parse_statement(raw: &str) -> Option<ParsedStatement> {
    if raw.is_empty() {
        return None;
    }

    let mut lines = Vec::new();
    let mut directives = Vec::new();
    for line in raw.lines() {
        match parse_directive(line.trim()) {
            Some(directive) => directives.push(directive),
            None => lines.push(line),
        }
    }

    let text = lines.join("\n").trim().to_string();
    if !has_code(&text) && directives.is_empty() {
        return None;
    }
    Some(ParsedStatement { text, directives })
}

fn parse_directive(line: &str) -> Option<Directive> {
    let comment = line.strip_prefix("--")?.trim_start();
    let body = comment.strip_prefix(DIRECTIVE_PREFIX)?;
    let mut fields = body.split_whitespace();
    let name = fields.next()?;
    Some(Directive {
        name: name.to_string(),
        params: fields.map(str::to_string).collect(),
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lex {
    Code,
    SingleQuote,
    DoubleQuote,
    Backtick,
    Bracket,
    LineComment,
    BlockComment,
}

/// Walk `text` calling `on_code` for every byte outside literals and comments
fn scan(text: &str, mut on_code: impl FnMut(usize, u8)) {
    let bytes = text.as_bytes();
    let mut state = Lex::Code;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            Lex::Code => match (b, next) {
                (b'-', Some(b'-')) => {
                    state = Lex::LineComment;
                    i += 1;
                }
                (b'/', Some(b'*')) => {
                    state = Lex::BlockComment;
                    i += 1;
                }
                (b'\'', _) => {
                    state = Lex::SingleQuote;
                    on_code(i, b);
                }
                (b'"', _) => {
                    state = Lex::DoubleQuote;
                    on_code(i, b);
                }
                (b'`', _) => {
                    state = Lex::Backtick;
                    on_code(i, b);
                }
                (b'[', _) => {
                    state = Lex::Bracket;
                    on_code(i, b);
                }
                _ => on_code(i, b),
            },
            Lex::SingleQuote if b == b'\'' => state = Lex::Code,
            Lex::DoubleQuote if b == b'"' => state = Lex::Code,
            Lex::Backtick if b == b'`' => state = Lex::Code,
            Lex::Bracket if b == b']' => state = Lex::Code,
            Lex::LineComment if b == b'\n' => state = Lex::Code,
            Lex::BlockComment if b == b'*' && next == Some(b'/') => {
                state = Lex::Code;
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
}

fn split_statements(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    scan(text, |i, b| {
        if b == b';' {
            pieces.push(&text[start..i]);
            start = i + 1;
        }
    });
    pieces.push(&text[start..]);
    pieces
}

fn has_code(text: &str) -> bool {
    let mut found = false;
    scan(text, |_, b| {
        if !b.is_ascii_whitespace() {
            found = true;
        }
    });
    found
}
