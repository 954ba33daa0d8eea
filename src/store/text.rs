//! Text key-value store codec.
//!
//! Brace-delimited, tab-indented format: quoted keys paired with either
//! a quoted value on the same line or a `{ ... }` block. The client
//! writes this format canonically (tab indentation, two tabs between
//! key and value), so a tree loaded from a client-written file
//! serializes back byte-identically — sections this subsystem never
//! targets pass through untouched.

use std::fmt::Write as _;
use std::path::Path;

use crate::error::{ProvisionError, Result};

use super::{write_atomic, KvMap, KvValue};

/// Load a text store, failing with `NotFound` when the file is absent.
pub fn load(path: &Path) -> Result<KvMap> {
    if !path.exists() {
        return Err(ProvisionError::not_found(format!(
            "text store {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path).map_err(|e| ProvisionError::io(path, e))?;
    parse(&content, path)
}

/// Serialize and atomically replace the store at `path`.
pub fn save(tree: &KvMap, path: &Path) -> Result<()> {
    write_atomic(path, serialize(tree).as_bytes())
}

/// Decode a text store image.
pub fn parse(content: &str, origin: &Path) -> Result<KvMap> {
    let mut tokens = Tokenizer::new(content, origin);
    let tree = parse_map(&mut tokens, true)?;
    Ok(tree)
}

/// Encode a tree in the client's canonical text form.
pub fn serialize(tree: &KvMap) -> String {
    let mut out = String::new();
    write_map(&mut out, tree, 0);
    out
}

fn write_map(out: &mut String, map: &KvMap, depth: usize) {
    for (key, value) in map.iter() {
        indent(out, depth);
        match value {
            KvValue::Map(nested) => {
                let _ = writeln!(out, "\"{}\"", escape(key));
                indent(out, depth);
                out.push_str("{\n");
                write_map(out, nested, depth + 1);
                indent(out, depth);
                out.push_str("}\n");
            }
            KvValue::Str(s) => {
                let _ = writeln!(out, "\"{}\"\t\t\"{}\"", escape(key), escape(s));
            }
            // The text format has no integer type; numeric fields are
            // carried as decimal strings.
            KvValue::Int(n) => {
                let _ = writeln!(out, "\"{}\"\t\t\"{}\"", escape(key), n);
            }
        }
    }
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
}

fn escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[derive(Debug, PartialEq)]
enum Token {
    Str(String),
    Open,
    Close,
}

struct Tokenizer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    origin: &'a Path,
}

impl<'a> Tokenizer<'a> {
    fn new(content: &'a str, origin: &'a Path) -> Self {
        Self {
            chars: content.chars().peekable(),
            line: 1,
            origin,
        }
    }

    fn format_error(&self, detail: impl Into<String>) -> ProvisionError {
        ProvisionError::Format {
            path: self.origin.to_path_buf(),
            detail: format!("line {}: {}", self.line, detail.into()),
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        loop {
            let Some(&c) = self.chars.peek() else {
                return Ok(None);
            };
            match c {
                '\n' => {
                    self.line += 1;
                    self.chars.next();
                }
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '/' => {
                    // only `//` line comments exist in this format
                    self.chars.next();
                    if self.chars.peek() == Some(&'/') {
                        for c in self.chars.by_ref() {
                            if c == '\n' {
                                self.line += 1;
                                break;
                            }
                        }
                    } else {
                        return Err(self.format_error("stray '/'"));
                    }
                }
                '{' => {
                    self.chars.next();
                    return Ok(Some(Token::Open));
                }
                '}' => {
                    self.chars.next();
                    return Ok(Some(Token::Close));
                }
                '"' => {
                    self.chars.next();
                    return Ok(Some(Token::Str(self.read_quoted()?)));
                }
                _ => return Ok(Some(Token::Str(self.read_bare()))),
            }
        }
    }

    fn read_quoted(&mut self) -> Result<String> {
        let mut value = String::new();
        loop {
            match self.chars.next() {
                None => return Err(self.format_error("unterminated quoted token")),
                Some('"') => return Ok(value),
                Some('\\') => match self.chars.next() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return Err(self.format_error("unterminated escape")),
                },
                Some('\n') => {
                    self.line += 1;
                    value.push('\n');
                }
                Some(other) => value.push(other),
            }
        }
    }

    fn read_bare(&mut self) -> String {
        let mut value = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || c == '{' || c == '}' || c == '"' {
                break;
            }
            value.push(c);
            self.chars.next();
        }
        value
    }
}

fn parse_map(tokens: &mut Tokenizer<'_>, top_level: bool) -> Result<KvMap> {
    let mut map = KvMap::new();
    loop {
        let key = match tokens.next_token()? {
            None if top_level => return Ok(map),
            None => return Err(tokens.format_error("unexpected end of input inside block")),
            Some(Token::Close) if !top_level => return Ok(map),
            Some(Token::Close) => return Err(tokens.format_error("unbalanced '}'")),
            Some(Token::Open) => return Err(tokens.format_error("'{' without a key")),
            Some(Token::Str(s)) => s,
        };
        let value = match tokens.next_token()? {
            Some(Token::Str(s)) => KvValue::Str(s),
            Some(Token::Open) => KvValue::Map(parse_map(tokens, false)?),
            Some(Token::Close) | None => {
                return Err(tokens.format_error(format!("key {key:?} has no value")))
            }
        };
        map.set(key, value);
    }
}
