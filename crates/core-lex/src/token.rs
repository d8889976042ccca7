//! Lazy shell tokenizer.
//!
//! Produces tokens over a code-point slice. String tokens are maximal runs of
//! non-metacharacters honouring single quotes, double quotes, backslash
//! escapes, and command-substitution/brace nesting (metacharacters inside an
//! open `(` or `{` do not end the token). Every token carries its exact
//! source range; ranges of successive tokens never overlap.

use bitflags::bitflags;
use std::ops::Range;
use thiserror::Error;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TokenizerFlags: u8 {
        /// Emit a plain string token carrying the residue instead of an
        /// error token when a quote, brace, or substitution is unterminated.
        const ACCEPT_UNFINISHED = 1 << 0;
        /// Emit error tokens and keep going instead of stopping at the
        /// first malformed construct.
        const SQUASH_ERRORS = 1 << 1;
        /// Emit comment tokens; otherwise comments are skipped silently.
        const SHOW_COMMENTS = 1 << 2;
    }
}

/// Redirection operator family. `Fd` covers `>&` and `<&`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    In,
    Out,
    Append,
    Noclobber,
    Fd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("unterminated quote starting at offset {opener}")]
    UnterminatedQuote { opener: usize },
    #[error("unterminated brace starting at offset {opener}")]
    UnterminatedBrace { opener: usize },
    #[error("unterminated command substitution starting at offset {opener}")]
    UnterminatedCmdsubst { opener: usize },
    #[error("invalid redirection")]
    BadRedirection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    String,
    Pipe,
    Redirect { kind: RedirectKind, fd: Option<u32> },
    Background,
    End,
    Comment,
    Error(TokenError),
    /// Zero-width end-of-input marker, emitted once after the last token.
    Terminate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Source extent in code points, half-open.
    pub range: Range<usize>,
    /// Verbatim source text of the token.
    pub text: String,
}

impl Token {
    pub fn is_string(&self) -> bool {
        self.kind == TokenKind::String
    }
}

pub struct Tokenizer<'a> {
    src: &'a [char],
    pos: usize,
    flags: TokenizerFlags,
    stopped: bool,
    terminated: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(src: &'a [char], flags: TokenizerFlags) -> Tokenizer<'a> {
        Tokenizer {
            src,
            pos: 0,
            flags,
            stopped: false,
            terminated: false,
        }
    }

    fn slice(&self, range: Range<usize>) -> String {
        self.src[range].iter().collect()
    }

    fn make(&self, kind: TokenKind, range: Range<usize>) -> Token {
        let text = self.slice(range.clone());
        Token { kind, range, text }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.src.get(self.pos + offset).copied()
    }

    /// Skip inter-token separators (space, tab, escaped newlines).
    fn skip_separators(&mut self) {
        loop {
            while matches!(self.peek(0), Some(' ') | Some('\t')) {
                self.pos += 1;
            }
            if self.peek(0) == Some('\\') && self.peek(1) == Some('\n') {
                self.pos += 2;
                continue;
            }
            break;
        }
    }

    fn read_comment(&mut self) -> Option<Token> {
        let start = self.pos;
        while self.pos < self.src.len() && self.src[self.pos] != '\n' {
            self.pos += 1;
        }
        if self.flags.contains(TokenizerFlags::SHOW_COMMENTS) {
            Some(self.make(TokenKind::Comment, start..self.pos))
        } else {
            None
        }
    }

    fn read_redirect(&mut self, start: usize) -> Token {
        let mut fd: Option<u32> = None;
        let mut digits = 0u32;
        while let Some(c) = self.peek(0) {
            if let Some(d) = c.to_digit(10) {
                digits = digits.saturating_mul(10).saturating_add(d);
                fd = Some(digits);
                self.pos += 1;
            } else {
                break;
            }
        }
        let kind = match self.peek(0) {
            Some('<') => {
                self.pos += 1;
                if self.peek(0) == Some('&') {
                    self.pos += 1;
                    RedirectKind::Fd
                } else {
                    RedirectKind::In
                }
            }
            Some('>') => {
                self.pos += 1;
                match self.peek(0) {
                    Some('>') => {
                        self.pos += 1;
                        RedirectKind::Append
                    }
                    Some('|') => {
                        self.pos += 1;
                        RedirectKind::Noclobber
                    }
                    Some('&') => {
                        self.pos += 1;
                        RedirectKind::Fd
                    }
                    _ => RedirectKind::Out,
                }
            }
            _ => {
                // Caller guaranteed a redirection character; anything else is
                // a malformed operator.
                self.pos += 1;
                return self.make(TokenKind::Error(TokenError::BadRedirection), start..self.pos);
            }
        };
        self.make(TokenKind::Redirect { kind, fd }, start..self.pos)
    }

    /// True when a digit run at the current position is the fd prefix of a
    /// redirection operator rather than the start of a word.
    fn digits_prefix_redirect(&self) -> bool {
        let mut i = 0;
        while self
            .peek(i)
            .map(|c| c.is_ascii_digit())
            .unwrap_or(false)
        {
            i += 1;
        }
        i > 0 && matches!(self.peek(i), Some('<') | Some('>'))
    }

    fn read_string(&mut self) -> Token {
        let start = self.pos;
        let mut paren_openers: Vec<usize> = Vec::new();
        let mut brace_openers: Vec<usize> = Vec::new();
        let mut quote: Option<(char, usize)> = None;

        while self.pos < self.src.len() {
            let c = self.src[self.pos];
            match quote {
                Some(('\'', _)) => match c {
                    '\\' => {
                        // Inside single quotes only \' and \\ escape.
                        if matches!(self.peek(1), Some('\'') | Some('\\')) {
                            self.pos += 2;
                        } else {
                            self.pos += 1;
                        }
                    }
                    '\'' => {
                        quote = None;
                        self.pos += 1;
                    }
                    _ => self.pos += 1,
                },
                Some(('"', _)) => match c {
                    '\\' => {
                        self.pos += if self.peek(1).is_some() { 2 } else { 1 };
                    }
                    '"' => {
                        quote = None;
                        self.pos += 1;
                    }
                    _ => self.pos += 1,
                },
                _ => match c {
                    '\\' => {
                        self.pos += if self.peek(1).is_some() { 2 } else { 1 };
                    }
                    '\'' | '"' => {
                        quote = Some((c, self.pos));
                        self.pos += 1;
                    }
                    '(' => {
                        paren_openers.push(self.pos);
                        self.pos += 1;
                    }
                    ')' => {
                        paren_openers.pop();
                        self.pos += 1;
                    }
                    '{' => {
                        brace_openers.push(self.pos);
                        self.pos += 1;
                    }
                    '}' => {
                        brace_openers.pop();
                        self.pos += 1;
                    }
                    c if paren_openers.is_empty() && is_metachar(c) => break,
                    _ => self.pos += 1,
                },
            }
        }

        let error = if let Some((_, opener)) = quote {
            Some(TokenError::UnterminatedQuote { opener })
        } else if let Some(opener) = paren_openers.first().copied() {
            Some(TokenError::UnterminatedCmdsubst { opener })
        } else if let Some(opener) = brace_openers.first().copied() {
            Some(TokenError::UnterminatedBrace { opener })
        } else {
            None
        };

        match error {
            Some(err) if !self.flags.contains(TokenizerFlags::ACCEPT_UNFINISHED) => {
                if !self.flags.contains(TokenizerFlags::SQUASH_ERRORS) {
                    self.stopped = true;
                }
                self.make(TokenKind::Error(err), start..self.pos)
            }
            _ => self.make(TokenKind::String, start..self.pos),
        }
    }
}

fn is_metachar(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | ';' | '|' | '&' | '<' | '>')
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.stopped {
            return None;
        }
        loop {
            self.skip_separators();
            if self.pos >= self.src.len() {
                if self.terminated {
                    return None;
                }
                self.terminated = true;
                let end = self.src.len();
                return Some(self.make(TokenKind::Terminate, end..end));
            }
            let start = self.pos;
            let c = self.src[self.pos];
            let token = match c {
                '\n' | ';' => {
                    self.pos += 1;
                    self.make(TokenKind::End, start..self.pos)
                }
                '|' => {
                    self.pos += 1;
                    self.make(TokenKind::Pipe, start..self.pos)
                }
                '&' => {
                    self.pos += 1;
                    self.make(TokenKind::Background, start..self.pos)
                }
                '#' => match self.read_comment() {
                    Some(tok) => tok,
                    None => continue,
                },
                '<' | '>' => self.read_redirect(start),
                _ if c.is_ascii_digit() && self.digits_prefix_redirect() => {
                    self.read_redirect(start)
                }
                _ => self.read_string(),
            };
            return Some(token);
        }
    }
}

/// Tokenize an owned string; convenience for callers without a char slice.
pub fn tokenize_str(s: &str, flags: TokenizerFlags) -> Vec<Token> {
    let chars: Vec<char> = s.chars().collect();
    Tokenizer::new(&chars, flags).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(s: &str, flags: TokenizerFlags) -> Vec<TokenKind> {
        tokenize_str(s, flags)
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn simple_pipeline() {
        let toks = tokenize_str("ls -l | grep foo", TokenizerFlags::empty());
        let texts: Vec<&str> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["ls", "-l", "|", "grep", "foo", ""]);
        assert_eq!(toks[2].kind, TokenKind::Pipe);
        assert_eq!(toks[5].kind, TokenKind::Terminate);
    }

    #[test]
    fn ranges_match_source() {
        let s = "echo 'a b' ; cat";
        let chars: Vec<char> = s.chars().collect();
        for tok in tokenize_str(s, TokenizerFlags::empty()) {
            let substr: String = chars[tok.range.clone()].iter().collect();
            assert_eq!(substr, tok.text);
        }
    }

    #[test]
    fn quoted_space_stays_in_token() {
        let toks = tokenize_str("echo 'a b'", TokenizerFlags::empty());
        assert_eq!(toks[1].text, "'a b'");
    }

    #[test]
    fn cmdsubst_content_stays_in_token() {
        let toks = tokenize_str("echo (ls; date | wc)", TokenizerFlags::empty());
        assert_eq!(toks[1].text, "(ls; date | wc)");
        assert_eq!(toks[1].kind, TokenKind::String);
    }

    #[test]
    fn redirections() {
        let toks = tokenize_str("cmd 2>&1 >>log <in >|out", TokenizerFlags::empty());
        assert_eq!(
            toks[1].kind,
            TokenKind::Redirect {
                kind: RedirectKind::Fd,
                fd: Some(2)
            }
        );
        assert_eq!(
            toks[2].kind,
            TokenKind::Redirect {
                kind: RedirectKind::Append,
                fd: None
            }
        );
        assert_eq!(toks[3].text, "log");
        assert_eq!(
            toks[4].kind,
            TokenKind::Redirect {
                kind: RedirectKind::In,
                fd: None
            }
        );
        assert_eq!(
            toks[6].kind,
            TokenKind::Redirect {
                kind: RedirectKind::Noclobber,
                fd: None
            }
        );
    }

    #[test]
    fn digits_without_operator_are_a_word() {
        let toks = tokenize_str("echo 123 x", TokenizerFlags::empty());
        assert_eq!(toks[1].kind, TokenKind::String);
        assert_eq!(toks[1].text, "123");
    }

    #[test]
    fn comments_hidden_by_default() {
        assert_eq!(
            kinds("ls # trailing", TokenizerFlags::empty()),
            vec![TokenKind::String, TokenKind::Terminate]
        );
        let toks = tokenize_str("ls # trailing", TokenizerFlags::SHOW_COMMENTS);
        assert_eq!(toks[1].kind, TokenKind::Comment);
        assert_eq!(toks[1].text, "# trailing");
    }

    #[test]
    fn hash_inside_word_is_literal() {
        let toks = tokenize_str("echo a#b", TokenizerFlags::empty());
        assert_eq!(toks[1].text, "a#b");
    }

    #[test]
    fn unterminated_quote_reports_opener() {
        let toks = tokenize_str("echo 'oops", TokenizerFlags::SQUASH_ERRORS);
        assert_eq!(
            toks[1].kind,
            TokenKind::Error(TokenError::UnterminatedQuote { opener: 5 })
        );
    }

    #[test]
    fn unterminated_quote_stops_without_squash() {
        let toks = tokenize_str("echo 'oops; ls", TokenizerFlags::empty());
        assert!(matches!(toks.last().unwrap().kind, TokenKind::Error(_)));
    }

    #[test]
    fn accept_unfinished_yields_residue_string() {
        let toks = tokenize_str("echo 'oops", TokenizerFlags::ACCEPT_UNFINISHED);
        assert_eq!(toks[1].kind, TokenKind::String);
        assert_eq!(toks[1].text, "'oops");
    }

    #[test]
    fn unterminated_cmdsubst_reports_opener() {
        let toks = tokenize_str("echo (ls", TokenizerFlags::SQUASH_ERRORS);
        assert_eq!(
            toks[1].kind,
            TokenKind::Error(TokenError::UnterminatedCmdsubst { opener: 5 })
        );
    }

    #[test]
    fn newline_and_semicolon_are_end() {
        assert_eq!(
            kinds("a;b\nc", TokenizerFlags::empty()),
            vec![
                TokenKind::String,
                TokenKind::End,
                TokenKind::String,
                TokenKind::End,
                TokenKind::String,
                TokenKind::Terminate
            ]
        );
    }

    #[test]
    fn escaped_metachar_stays_in_word() {
        let toks = tokenize_str(r"echo a\ b", TokenizerFlags::empty());
        assert_eq!(toks[1].text, r"a\ b");
    }

    #[test]
    fn backslash_newline_is_a_separator() {
        let toks = tokenize_str("echo \\\nfoo", TokenizerFlags::empty());
        let texts: Vec<&str> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["echo", "foo", ""]);
    }
}
