/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Parser for the textual form of interval programs.
//!
//! One instruction per line: the variables it defines, `=`, then the
//! variables it reads, e.g. `t = s n`.  Either side may be empty.  `#` starts
//! a comment.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use crate::test_framework::Program;

#[derive(Debug)]
pub enum ParseError {
  IoError(io::Error),
  Parse { line: usize, msg: String },
}

impl fmt::Display for ParseError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      ParseError::IoError(err) => write!(f, "{}", err),
      ParseError::Parse { line, msg } => write!(f, "line {}: {}", line, msg),
    }
  }
}

impl From<io::Error> for ParseError {
  fn from(err: io::Error) -> ParseError {
    ParseError::IoError(err)
  }
}

pub type ParseResult<T> = Result<T, ParseError>;

pub fn parse_file(path: &Path) -> ParseResult<Program> {
  let name = path
    .file_stem()
    .and_then(|stem| stem.to_str())
    .unwrap_or("program")
    .to_string();
  let content = fs::read_to_string(path)?;
  parse_content(&name, &content)
}

fn is_var_name(word: &str) -> bool {
  let mut chars = word.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
    _ => return false,
  }
  chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

struct Parser {
  prog: Program,
  line: usize,
}

impl Parser {
  fn error<T>(&self, msg: &str) -> ParseResult<T> {
    Err(ParseError::Parse { line: self.line, msg: msg.to_string() })
  }

  fn names(&mut self, side: &str) -> ParseResult<Vec<jitcore::VarIx>> {
    let mut vars = Vec::new();
    for word in side.split_whitespace() {
      if !is_var_name(word) {
        return self.error(&format!("bad variable name '{}'", word));
      }
      vars.push(self.prog.var(word));
    }
    Ok(vars)
  }

  fn insn(&mut self, text: &str) -> ParseResult<()> {
    let mut sides = text.splitn(2, '=');
    let lhs = sides.next().unwrap_or("");
    let rhs = match sides.next() {
      Some(rhs) => rhs,
      None => return self.error("expected '='"),
    };
    if rhs.contains('=') {
      return self.error("more than one '='");
    }
    let defined = self.names(lhs)?;
    let used = self.names(rhs)?;
    self.prog.push(defined, used);
    Ok(())
  }
}

pub fn parse_content(name: &str, content: &str) -> ParseResult<Program> {
  let mut parser = Parser { prog: Program::new(name), line: 0 };
  for (i, raw) in content.lines().enumerate() {
    parser.line = i + 1;
    let text = match raw.find('#') {
      Some(at) => &raw[..at],
      None => raw,
    };
    let text = text.trim();
    if text.is_empty() {
      continue;
    }
    parser.insn(text)?;
  }
  if parser.prog.insns.is_empty() {
    return parser.error("empty program");
  }
  Ok(parser.prog)
}
