//! Route script parsing

mod parser;

pub use parser::{parse_script, Directive, DirectiveKind, ParsedStatement, DIRECTIVE_PREFIX};
