//! Parser for the textual scene/sprite/window descriptor files.
//!
//! The grammar is a key-value block tree: `BLOCK { KEY = VALUE ...
//! NESTED { ... } }` with C-style comments. Consumers walk the tree and
//! tolerate keys they do not know, so data authored against a newer engine
//! still loads.

use tracing::warn;
use wintermute_assets::{Resource, ResourceError};

use crate::error::{EngineError, EngineResult};

/// One parsed block: name, ordered entries, source line.
#[derive(Clone, Debug, PartialEq)]
pub struct DefBlock {
    pub name: String,
    pub entries: Vec<DefEntry>,
    pub line: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DefEntry {
    KeyValue {
        key: String,
        values: Vec<DefValue>,
        line: u32,
    },
    Block(DefBlock),
}

#[derive(Clone, Debug, PartialEq)]
pub enum DefValue {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
}

impl DefValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            DefValue::Int(value) => Some(*value),
            DefValue::Float(value) => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DefValue::Str(text) | DefValue::Ident(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DefValue::Int(value) => Some(*value != 0),
            DefValue::Ident(text) => match text.to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl DefBlock {
    /// First value of a key, matched case-insensitively.
    pub fn value(&self, key: &str) -> Option<&DefValue> {
        self.values(key).and_then(|values| values.first())
    }

    pub fn values(&self, key: &str) -> Option<&[DefValue]> {
        self.entries.iter().find_map(|entry| match entry {
            DefEntry::KeyValue {
                key: entry_key,
                values,
                ..
            } if entry_key.eq_ignore_ascii_case(key) => Some(values.as_slice()),
            _ => None,
        })
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.value(key).and_then(DefValue::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.value(key).and_then(DefValue::as_int)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.value(key).and_then(DefValue::as_bool)
    }

    /// Comma-tuple accessor, e.g. `POS = 120, 340`.
    pub fn get_int_pair(&self, key: &str) -> Option<(i64, i64)> {
        let values = self.values(key)?;
        match values {
            [a, b, ..] => Some((a.as_int()?, b.as_int()?)),
            _ => None,
        }
    }

    pub fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DefBlock> {
        self.entries.iter().filter_map(move |entry| match entry {
            DefEntry::Block(block) if block.name.eq_ignore_ascii_case(name) => Some(block),
            _ => None,
        })
    }

    pub fn child<'a>(&'a self, name: &'a str) -> Option<&'a DefBlock> {
        self.children(name).next()
    }
}

/// A parsed definition file: the sequence of top-level blocks.
#[derive(Clone, Debug, PartialEq)]
pub struct DefinitionFile {
    pub blocks: Vec<DefBlock>,
}

impl DefinitionFile {
    pub fn parse(path: &str, text: &str) -> EngineResult<Self> {
        let tokens = tokenize(path, text)?;
        let mut parser = DefParser {
            path,
            tokens,
            cursor: 0,
        };
        let mut blocks = Vec::new();
        while !parser.at_end() {
            blocks.push(parser.block()?);
        }
        Ok(Self { blocks })
    }

    /// First top-level block with the given name.
    pub fn block(&self, name: &str) -> Option<&DefBlock> {
        self.blocks
            .iter()
            .find(|block| block.name.eq_ignore_ascii_case(name))
    }
}

impl Resource for DefinitionFile {
    const KIND: &'static str = "definition";

    fn from_bytes(path: &str, bytes: &[u8]) -> Result<Self, ResourceError> {
        let text = std::str::from_utf8(bytes).map_err(|err| ResourceError::Load {
            kind: Self::KIND,
            path: path.to_string(),
            message: format!("not valid UTF-8: {err}"),
        })?;
        Self::parse(path, text).map_err(|err| ResourceError::Load {
            kind: Self::KIND,
            path: path.to_string(),
            message: err.to_string(),
        })
    }

    fn resident_size(&self) -> usize {
        fn block_size(block: &DefBlock) -> usize {
            block.name.len()
                + block
                    .entries
                    .iter()
                    .map(|entry| match entry {
                        DefEntry::KeyValue { key, values, .. } => {
                            key.len()
                                + values
                                    .iter()
                                    .map(|value| match value {
                                        DefValue::Str(text) | DefValue::Ident(text) => {
                                            text.len() + 8
                                        }
                                        _ => 8,
                                    })
                                    .sum::<usize>()
                        }
                        DefEntry::Block(child) => block_size(child),
                    })
                    .sum::<usize>()
        }
        self.blocks.iter().map(block_size).sum::<usize>() + 64
    }
}

#[derive(Clone, Debug, PartialEq)]
enum DefTok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    LBrace,
    RBrace,
    Eq,
    LParen,
    RParen,
    Comma,
    Semi,
}

#[derive(Clone, Debug)]
struct DefToken {
    tok: DefTok,
    line: u32,
    column: u32,
}

fn tokenize(path: &str, text: &str) -> EngineResult<Vec<DefToken>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1u32;
    let mut column = 1u32;

    macro_rules! bump {
        () => {{
            let ch = chars.next();
            if let Some(ch) = ch {
                if ch == '\n' {
                    line += 1;
                    column = 1;
                } else {
                    column += 1;
                }
            }
            ch
        }};
    }

    loop {
        let (tok_line, tok_column) = (line, column);
        let Some(ch) = bump!() else { break };
        let tok = match ch {
            ' ' | '\t' | '\r' | '\n' => continue,
            '{' => DefTok::LBrace,
            '}' => DefTok::RBrace,
            '=' => DefTok::Eq,
            '(' => DefTok::LParen,
            ')' => DefTok::RParen,
            ',' => DefTok::Comma,
            ';' => DefTok::Semi,
            '/' => match chars.peek() {
                Some('/') => {
                    while let Some(&next) = chars.peek() {
                        if next == '\n' {
                            break;
                        }
                        bump!();
                    }
                    continue;
                }
                Some('*') => {
                    bump!();
                    let mut closed = false;
                    while let Some(ch) = bump!() {
                        if ch == '*' && chars.peek() == Some(&'/') {
                            bump!();
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return Err(EngineError::definition(
                            path,
                            tok_line,
                            tok_column,
                            "unterminated block comment",
                        ));
                    }
                    continue;
                }
                _ => {
                    return Err(EngineError::definition(
                        path,
                        tok_line,
                        tok_column,
                        "stray '/'",
                    ))
                }
            },
            '"' => {
                let mut text = String::new();
                loop {
                    match bump!() {
                        Some('"') => break,
                        Some('\\') => match bump!() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some('"') => text.push('"'),
                            Some('\\') => text.push('\\'),
                            Some(other) => text.push(other),
                            None => {
                                return Err(EngineError::definition(
                                    path,
                                    tok_line,
                                    tok_column,
                                    "unterminated string",
                                ))
                            }
                        },
                        Some(other) => text.push(other),
                        None => {
                            return Err(EngineError::definition(
                                path,
                                tok_line,
                                tok_column,
                                "unterminated string",
                            ))
                        }
                    }
                }
                DefTok::Str(text)
            }
            ch if ch.is_ascii_digit() || ch == '-' => {
                let mut text = String::from(ch);
                let mut is_float = false;
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_digit() {
                        text.push(next);
                        bump!();
                    } else if next == '.' && !is_float {
                        is_float = true;
                        text.push(next);
                        bump!();
                    } else {
                        break;
                    }
                }
                if is_float {
                    DefTok::Float(text.parse().map_err(|_| {
                        EngineError::definition(path, tok_line, tok_column, "bad float literal")
                    })?)
                } else {
                    DefTok::Int(text.parse().map_err(|_| {
                        EngineError::definition(path, tok_line, tok_column, "bad integer literal")
                    })?)
                }
            }
            ch if ch.is_ascii_alphabetic() || ch == '_' => {
                let mut text = String::from(ch);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        text.push(next);
                        bump!();
                    } else {
                        break;
                    }
                }
                DefTok::Ident(text)
            }
            other => {
                return Err(EngineError::definition(
                    path,
                    tok_line,
                    tok_column,
                    format!("unexpected character '{other}'"),
                ))
            }
        };
        tokens.push(DefToken {
            tok,
            line: tok_line,
            column: tok_column,
        });
    }
    Ok(tokens)
}

struct DefParser<'a> {
    path: &'a str,
    tokens: Vec<DefToken>,
    cursor: usize,
}

impl DefParser<'_> {
    fn at_end(&self) -> bool {
        self.cursor >= self.tokens.len()
    }

    fn peek(&self) -> Option<&DefToken> {
        self.tokens.get(self.cursor)
    }

    fn next(&mut self) -> Option<DefToken> {
        let token = self.tokens.get(self.cursor).cloned();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn error_here(&self, message: impl Into<String>) -> EngineError {
        let (line, column) = self
            .tokens
            .get(self.cursor.min(self.tokens.len().saturating_sub(1)))
            .map(|token| (token.line, token.column))
            .unwrap_or((0, 0));
        EngineError::definition(self.path, line, column, message)
    }

    fn expect_ident(&mut self) -> EngineResult<(String, u32)> {
        match self.next() {
            Some(DefToken {
                tok: DefTok::Ident(name),
                line,
                ..
            }) => Ok((name, line)),
            _ => Err(self.error_here("expected identifier")),
        }
    }

    fn block(&mut self) -> EngineResult<DefBlock> {
        let (name, line) = self.expect_ident()?;
        match self.next() {
            Some(DefToken {
                tok: DefTok::LBrace,
                ..
            }) => {}
            _ => return Err(self.error_here(format!("expected '{{' after block name '{name}'"))),
        }

        let mut entries = Vec::new();
        loop {
            match self.peek().map(|token| token.tok.clone()) {
                None => return Err(self.error_here(format!("unclosed block '{name}'"))),
                Some(DefTok::RBrace) => {
                    self.next();
                    break;
                }
                Some(DefTok::Semi) => {
                    self.next();
                }
                Some(DefTok::Ident(_)) => {
                    // Either `KEY = values` or a nested block.
                    let after = self.tokens.get(self.cursor + 1).map(|token| &token.tok);
                    if matches!(after, Some(DefTok::LBrace)) {
                        entries.push(DefEntry::Block(self.block()?));
                    } else {
                        entries.push(self.key_value()?);
                    }
                }
                Some(_) => return Err(self.error_here("expected key, nested block, or '}'")),
            }
        }
        Ok(DefBlock {
            name,
            entries,
            line,
        })
    }

    fn key_value(&mut self) -> EngineResult<DefEntry> {
        let (key, line) = self.expect_ident()?;
        match self.next() {
            Some(DefToken { tok: DefTok::Eq, .. }) => {}
            _ => return Err(self.error_here(format!("expected '=' after key '{key}'"))),
        }
        let mut values = vec![self.value()?];
        while matches!(self.peek().map(|token| &token.tok), Some(DefTok::Comma)) {
            self.next();
            values.push(self.value()?);
        }
        Ok(DefEntry::KeyValue { key, values, line })
    }

    fn value(&mut self) -> EngineResult<DefValue> {
        match self.next() {
            Some(DefToken {
                tok: DefTok::Int(value),
                ..
            }) => Ok(DefValue::Int(value)),
            Some(DefToken {
                tok: DefTok::Float(value),
                ..
            }) => Ok(DefValue::Float(value)),
            Some(DefToken {
                tok: DefTok::Str(text),
                ..
            }) => Ok(DefValue::Str(text)),
            Some(DefToken {
                tok: DefTok::Ident(text),
                ..
            }) => Ok(DefValue::Ident(text)),
            _ => Err(self.error_here("expected a value")),
        }
    }
}

/// Logs and skips keys the consumer does not recognize.
pub fn warn_unknown_key(path: &str, block: &str, key: &str, line: u32) {
    warn!(path, block, key, line, "unknown definition key, skipped");
}
