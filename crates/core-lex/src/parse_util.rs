//! Extent location around a cursor offset: command substitutions, jobs,
//! processes, and tokens, plus line/offset mapping, indent depths, and the
//! completeness test the reader consults on Enter.
//!
//! Extents are half-open code-point ranges. At a boundary character the
//! extent that ends at the cursor wins over the one that starts there, and
//! empty extents come back as `cursor..cursor`.

use crate::token::{Token, TokenKind, Tokenizer, TokenizerFlags};
use std::ops::Range;
use thiserror::Error;

/// A located command substitution: offset of the `(` and, when closed, of
/// the matching `)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cmdsubst {
    pub open: usize,
    pub close: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unbalanced close parenthesis at offset {offset}")]
pub struct CmdsubstSyntaxError {
    pub offset: usize,
}

/// Offset just past the closing quote matching the quote at `pos`, if any.
fn quote_end(src: &[char], pos: usize) -> Option<usize> {
    let q = src[pos];
    let mut i = pos + 1;
    while i < src.len() {
        match src[i] {
            '\\' => i += 2,
            c if c == q => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Locate the first top-level `(...)` pair at or after `from`. Quoted and
/// escaped parentheses are skipped. An unterminated substitution is returned
/// with `close == None` when `allow_incomplete` is set, and is an error
/// otherwise; a stray `)` is always an error.
pub fn locate_cmdsubst(
    src: &[char],
    from: usize,
    allow_incomplete: bool,
) -> Result<Option<Cmdsubst>, CmdsubstSyntaxError> {
    let mut depth = 0usize;
    let mut open: Option<usize> = None;
    let mut i = from;
    while i < src.len() {
        match src[i] {
            '\\' => {
                i += 2;
                continue;
            }
            '\'' | '"' => match quote_end(src, i) {
                Some(end) => {
                    i = end + 1;
                    continue;
                }
                None => break,
            },
            '(' => {
                if depth == 0 && open.is_none() {
                    open = Some(i);
                }
                depth += 1;
            }
            ')' => {
                if depth == 0 {
                    return Err(CmdsubstSyntaxError { offset: i });
                }
                depth -= 1;
                if depth == 0 {
                    return Ok(Some(Cmdsubst {
                        open: open.unwrap(),
                        close: Some(i),
                    }));
                }
            }
            _ => {}
        }
        i += 1;
    }
    match open {
        Some(open) if allow_incomplete => Ok(Some(Cmdsubst { open, close: None })),
        Some(open) => Err(CmdsubstSyntaxError { offset: open }),
        None => Ok(None),
    }
}

/// Innermost command substitution enclosing the cursor, as the extent of its
/// interior text. Falls back to the whole buffer when the cursor is not
/// inside any substitution.
pub fn cmdsubst_extent(src: &[char], cursor: usize) -> Range<usize> {
    let cursor = cursor.min(src.len());
    let mut stack: Vec<usize> = Vec::new();
    let mut i = 0;
    while i < src.len() {
        match src[i] {
            '\\' => {
                i += 2;
                continue;
            }
            '\'' | '"' => match quote_end(src, i) {
                Some(end) => {
                    i = end + 1;
                    continue;
                }
                None => break,
            },
            '(' => stack.push(i),
            ')' => {
                if let Some(open) = stack.pop() {
                    // Nested pairs close before their parents, so the first
                    // closed pair containing the cursor is the innermost.
                    if open < cursor && i >= cursor {
                        return open + 1..i;
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }
    // Unterminated substitutions: the deepest opener before the cursor wins.
    while let Some(open) = stack.pop() {
        if open < cursor {
            return open + 1..src.len();
        }
    }
    0..src.len()
}

fn job_or_process_extent(src: &[char], cursor: usize, process: bool) -> Range<usize> {
    let sub = cmdsubst_extent(src, cursor);
    let cursor = cursor.min(src.len());
    let pos = cursor.saturating_sub(sub.start);
    let mut a = sub.start;
    let mut b = sub.end;
    let slice: Vec<char> = src[sub.clone()].to_vec();
    for tok in Tokenizer::new(&slice, TokenizerFlags::ACCEPT_UNFINISHED) {
        let boundary = match tok.kind {
            TokenKind::Pipe => process,
            TokenKind::End | TokenKind::Background => true,
            _ => false,
        };
        if !boundary {
            continue;
        }
        if tok.range.start >= pos {
            b = sub.start + tok.range.start;
            break;
        }
        a = sub.start + tok.range.end;
    }
    a..b
}

/// Extent of the process (pipeline segment) under the cursor.
pub fn process_extent(src: &[char], cursor: usize) -> Range<usize> {
    job_or_process_extent(src, cursor, true)
}

/// Extent of the job (full pipeline) under the cursor.
pub fn job_extent(src: &[char], cursor: usize) -> Range<usize> {
    job_or_process_extent(src, cursor, false)
}

/// Extents of the string token under the cursor and of the previous string
/// token. Either may be empty (`cursor..cursor`) when absent.
pub fn token_extents(src: &[char], cursor: usize) -> (Range<usize>, Range<usize>) {
    let cursor = cursor.min(src.len());
    let sub = cmdsubst_extent(src, cursor);
    let pos = cursor.saturating_sub(sub.start);
    let mut current = cursor..cursor;
    let mut prev = cursor..cursor;
    let slice: Vec<char> = src[sub.clone()].to_vec();
    for tok in Tokenizer::new(&slice, TokenizerFlags::ACCEPT_UNFINISHED) {
        if tok.kind == TokenKind::Terminate {
            break;
        }
        // Cursor sits before this token: it is between tokens.
        if tok.range.start > pos {
            break;
        }
        if tok.is_string() && tok.range.end >= pos {
            current = sub.start + tok.range.start..sub.start + tok.range.end;
            break;
        }
        if tok.is_string() {
            prev = sub.start + tok.range.start..sub.start + tok.range.end;
        }
    }
    (current, prev)
}

/// Extent of the string token under the cursor.
pub fn token_extent(src: &[char], cursor: usize) -> Range<usize> {
    token_extents(src, cursor).0
}

/// Extent of the string token before the one under the cursor.
pub fn prev_token_extent(src: &[char], cursor: usize) -> Range<usize> {
    token_extents(src, cursor).1
}

/// Zero-based line number holding `offset`.
pub fn line_of_offset(src: &[char], offset: usize) -> usize {
    src[..offset.min(src.len())]
        .iter()
        .filter(|&&c| c == '\n')
        .count()
}

/// Offset of the first code point of `line`, or the buffer length when the
/// line does not exist.
pub fn offset_of_line(src: &[char], line: usize) -> usize {
    if line == 0 {
        return 0;
    }
    let mut seen = 0usize;
    for (i, &c) in src.iter().enumerate() {
        if c == '\n' {
            seen += 1;
            if seen == line {
                return i + 1;
            }
        }
    }
    src.len()
}

/// Block-nesting depth per code point (plus sentinel slot): the number of
/// open substitutions and brace groups surrounding each position. Closing
/// characters sit at the outer depth.
pub fn compute_indents(src: &[char]) -> Vec<u32> {
    let mut indents = Vec::with_capacity(src.len() + 1);
    let mut depth = 0u32;
    let mut i = 0;
    while i < src.len() {
        match src[i] {
            '\\' => {
                indents.push(depth);
                if i + 1 < src.len() {
                    indents.push(depth);
                }
                i += 2;
                continue;
            }
            '\'' | '"' => {
                if let Some(end) = quote_end(src, i) {
                    for _ in i..=end {
                        indents.push(depth);
                    }
                    i = end + 1;
                    continue;
                }
                indents.push(depth);
            }
            '(' | '{' => {
                indents.push(depth);
                depth += 1;
            }
            ')' | '}' => {
                depth = depth.saturating_sub(1);
                indents.push(depth);
            }
            _ => indents.push(depth),
        }
        i += 1;
    }
    indents.push(depth);
    indents
}

/// Outcome of the reader's Enter-key completeness test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completeness {
    Complete,
    Incomplete,
    SyntaxError(String),
}

/// Decide whether the buffer can be executed as-is. Unterminated quotes,
/// substitutions, braces, a trailing pipe, or a trailing odd run of
/// backslashes leave the command open; a stray `)` is a hard error.
pub fn command_completeness(src: &[char]) -> Completeness {
    // Trailing odd backslash run always forces continuation.
    let mut trailing = 0usize;
    for &c in src.iter().rev() {
        if c == '\\' {
            trailing += 1;
        } else {
            break;
        }
    }
    if trailing % 2 == 1 {
        return Completeness::Incomplete;
    }

    let mut search = 0usize;
    loop {
        match locate_cmdsubst(src, search, true) {
            Err(e) => {
                return Completeness::SyntaxError(format!(
                    "unbalanced ')' at offset {}",
                    e.offset
                ));
            }
            Ok(Some(Cmdsubst { close: None, .. })) => return Completeness::Incomplete,
            Ok(Some(Cmdsubst {
                close: Some(close), ..
            })) => search = close + 1,
            Ok(None) => break,
        }
    }

    let mut last_meaningful: Option<Token> = None;
    for tok in Tokenizer::new(src, TokenizerFlags::SQUASH_ERRORS) {
        match tok.kind {
            TokenKind::Error(err) => {
                use crate::token::TokenError::*;
                return match err {
                    UnterminatedQuote { .. }
                    | UnterminatedBrace { .. }
                    | UnterminatedCmdsubst { .. } => Completeness::Incomplete,
                    BadRedirection => Completeness::SyntaxError(err.to_string()),
                };
            }
            TokenKind::Terminate => break,
            _ => last_meaningful = Some(tok),
        }
    }
    if matches!(
        last_meaningful.map(|t| t.kind),
        Some(TokenKind::Pipe)
    ) {
        return Completeness::Incomplete;
    }
    Completeness::Complete
}
