//! Syntax highlighter: assigns a colour code to every code point of the
//! buffer, recursing into command substitutions, overlaying valid-path and
//! cursor-match information, and collecting human-readable error messages.
//!
//! The pass performs filesystem I/O (PATH lookup, directory probes) and is
//! meant to run on a worker thread against an immutable [`EnvSnapshot`]; it
//! never raises, reporting everything through the colour array and the error
//! list.

use core_config::EnvSnapshot;
use core_lex::{
    RedirectKind, TokenKind, Tokenizer, TokenizerFlags, locate_cmdsubst, token_extent,
};
use core_text::{Highlight, Overlay, Role};
use std::ops::Range;
use std::path::Path;

pub mod autosuggest;
pub mod cancel;
pub mod param;
pub mod path;
pub mod universal;

pub use autosuggest::autosuggest_validate;
pub use cancel::CancelToken;
pub use path::{is_potential_path, path_has_command, unescape_literal};

/// Validates switches against a registered argument grammar. `None` means
/// no grammar is registered for the command and nothing can be concluded.
pub trait OptionValidator {
    fn is_valid_option(&self, command: &str, option: &str) -> Option<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightError {
    pub range: Range<usize>,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct HighlightResult {
    /// One colour per code point plus the trailing sentinel slot.
    pub colors: Vec<Highlight>,
    pub errors: Vec<HighlightError>,
}

/// Keywords that are themselves followed by a command.
const SUBCOMMAND_KEYWORDS: &[&str] = &[
    "and", "builtin", "command", "exec", "if", "not", "or", "while",
];

/// Remaining reserved words; they take ordinary arguments.
const RESERVED_WORDS: &[&str] = &[
    "begin", "break", "case", "continue", "else", "end", "for", "function", "in", "return",
    "switch",
];

fn is_subcommand_keyword(word: &str) -> bool {
    SUBCOMMAND_KEYWORDS.contains(&word)
}

fn is_reserved_word(word: &str) -> bool {
    RESERVED_WORDS.contains(&word) || is_subcommand_keyword(word)
}

/// Lookup-set restrictions induced by `builtin` / `command` prefixes.
#[derive(Debug, Clone, Copy)]
struct LookupSet {
    builtins: bool,
    functions: bool,
    commands: bool,
}

impl Default for LookupSet {
    fn default() -> Self {
        LookupSet {
            builtins: true,
            functions: true,
            commands: true,
        }
    }
}

fn classify_command(
    text: &str,
    lookup: LookupSet,
    snap: &EnvSnapshot,
    cancel: &CancelToken,
) -> bool {
    let expanded = snap.expand_tilde(text);
    match unescape_literal(&expanded) {
        Some(lit) => {
            if lit.is_empty() {
                return false;
            }
            if lookup.builtins && snap.is_builtin(&lit) {
                return true;
            }
            if lookup.functions && snap.is_function(&lit) {
                return true;
            }
            if cancel.is_cancelled() {
                return true;
            }
            if lookup.commands && path_has_command(&lit, snap, cancel) {
                return true;
            }
            // A bare directory name works as an implicit cd, unless a
            // `command` prefix restricted the lookup to externals.
            lookup.builtins && snap.resolve(Path::new(&lit)).is_dir()
        }
        None => {
            // Substitutions and variables cannot name a command statically;
            // wildcards and braces get the benefit of the doubt.
            !(expanded.contains('(') || expanded.contains('$'))
        }
    }
}

struct Pass<'a> {
    snap: &'a EnvSnapshot,
    validator: Option<&'a dyn OptionValidator>,
    cancel: &'a CancelToken,
    errors: Vec<HighlightError>,
}

impl<'a> Pass<'a> {
    /// Token pass over one (sub)buffer. `colors` covers exactly `src`;
    /// `base` translates local offsets into whole-buffer offsets for error
    /// reporting.
    fn token_pass(&mut self, src: &[char], colors: &mut [Highlight], base: usize) {
        let mut toks = Tokenizer::new(
            src,
            TokenizerFlags::ACCEPT_UNFINISHED | TokenizerFlags::SHOW_COMMENTS,
        )
        .peekable();

        let mut had_cmd = false;
        let mut accept_switches = true;
        let mut after_subcommand = false;
        let mut lookup = LookupSet::default();
        let mut last_cmd = String::new();

        while let Some(tok) = toks.next() {
            if self.cancel.is_cancelled() {
                return;
            }
            let at = tok.range.start;
            match tok.kind {
                TokenKind::String if had_cmd => {
                    let text = tok.text.as_str();
                    let mut role = Role::Param;
                    if let Some(switch) = text.strip_prefix('-') {
                        if text == "--" {
                            accept_switches = false;
                        } else if accept_switches && !switch.is_empty() {
                            if let Some(false) = self
                                .validator
                                .and_then(|v| v.is_valid_option(&last_cmd, text))
                            {
                                role = Role::Error;
                                self.errors.push(HighlightError {
                                    range: base + tok.range.start..base + tok.range.end,
                                    message: format!("Unknown option '{text}'"),
                                });
                            }
                        }
                    }
                    if last_cmd == "cd"
                        && !text.starts_with("--help")
                        && !text.starts_with("-h")
                        && !path::is_cd_target(text, self.snap)
                    {
                        role = Role::Error;
                        self.errors.push(HighlightError {
                            range: base + tok.range.start..base + tok.range.end,
                            message: format!("'{text}' is not a directory"),
                        });
                    }
                    colors[at] = Highlight::from_role(role);
                    param::highlight_param(
                        &src[tok.range.clone()],
                        &mut colors[tok.range.clone()],
                        Highlight::from_role(role),
                    );
                }
                TokenKind::String => {
                    let text = tok.text.as_str();
                    if after_subcommand && text.starts_with('-') {
                        // A switch after `builtin`/`command` means no
                        // command follows; restore the full lookup set.
                        colors[at] = Highlight::from_role(Role::Param);
                        lookup = LookupSet::default();
                        after_subcommand = false;
                        continue;
                    }
                    after_subcommand = false;
                    if is_subcommand_keyword(text) {
                        colors[at] = Highlight::from_role(Role::Command);
                        match text {
                            "builtin" => {
                                lookup = LookupSet {
                                    builtins: true,
                                    functions: false,
                                    commands: false,
                                };
                            }
                            "command" => {
                                lookup = LookupSet {
                                    builtins: false,
                                    functions: false,
                                    commands: true,
                                };
                            }
                            _ => {}
                        }
                        after_subcommand = true;
                        // Command position continues at the next token.
                        continue;
                    }
                    if is_reserved_word(text) {
                        colors[at] = Highlight::from_role(Role::Command);
                        had_cmd = true;
                        last_cmd = text.to_string();
                        continue;
                    }
                    if classify_command(text, lookup, self.snap, self.cancel) {
                        colors[at] = Highlight::from_role(Role::Command);
                    } else {
                        colors[at] = Highlight::from_role(Role::Error);
                        self.errors.push(HighlightError {
                            range: base + tok.range.start..base + tok.range.end,
                            message: format!("Unknown command '{text}'"),
                        });
                    }
                    had_cmd = true;
                    last_cmd = text.to_string();
                }
                TokenKind::Redirect { kind, .. } => {
                    if !had_cmd {
                        colors[at] = Highlight::from_role(Role::Error);
                        self.errors.push(HighlightError {
                            range: base + tok.range.start..base + tok.range.end,
                            message: "Redirection without a command".to_string(),
                        });
                        continue;
                    }
                    colors[at] = Highlight::from_role(Role::Redirection);
                    match toks.peek() {
                        Some(target) if target.kind == TokenKind::String => {
                            let target = toks.next().unwrap();
                            if kind != RedirectKind::Fd {
                                // An fd target is a number, not a file; the
                                // rest get filesystem checks. Either way the
                                // target inherits the redirection colour.
                                self.check_redirect_target(
                                    kind,
                                    &target.text,
                                    base,
                                    &target.range,
                                    colors,
                                );
                            }
                        }
                        _ => {
                            colors[at] = Highlight::from_role(Role::Error);
                            self.errors.push(HighlightError {
                                range: base + tok.range.start..base + tok.range.end,
                                message: "Invalid redirection".to_string(),
                            });
                        }
                    }
                }
                TokenKind::Pipe | TokenKind::Background => {
                    if had_cmd {
                        colors[at] = Highlight::from_role(Role::End);
                        had_cmd = false;
                        lookup = LookupSet::default();
                        accept_switches = true;
                    } else {
                        colors[at] = Highlight::from_role(Role::Error);
                        self.errors.push(HighlightError {
                            range: base + tok.range.start..base + tok.range.end,
                            message: if tok.kind == TokenKind::Pipe {
                                "Pipe without a command".to_string()
                            } else {
                                "No job to put in background".to_string()
                            },
                        });
                    }
                }
                TokenKind::End => {
                    colors[at] = Highlight::from_role(Role::End);
                    had_cmd = false;
                    lookup = LookupSet::default();
                    accept_switches = true;
                }
                TokenKind::Comment => {
                    colors[at] = Highlight::from_role(Role::Comment);
                }
                TokenKind::Error(err) => {
                    colors[at] = Highlight::from_role(Role::Error);
                    self.errors.push(HighlightError {
                        range: base + tok.range.start..base + tok.range.end,
                        message: err.to_string(),
                    });
                }
                TokenKind::Terminate => {}
            }
        }
    }

    fn check_redirect_target(
        &mut self,
        kind: RedirectKind,
        text: &str,
        base: usize,
        range: &Range<usize>,
        colors: &mut [Highlight],
    ) {
        let expanded = self.snap.expand_tilde(text);
        let Some(lit) = unescape_literal(&expanded) else {
            // Target needs expansion; nothing to verify statically.
            return;
        };
        if lit.is_empty() || self.cancel.is_cancelled() {
            return;
        }
        let target = self.snap.resolve(Path::new(&lit));
        let mut failure: Option<String> = None;
        if let Some(dir) = target.parent() {
            if !dir.as_os_str().is_empty() && !dir.is_dir() {
                failure = Some(format!("Directory '{}' does not exist", dir.display()));
            }
        }
        if failure.is_none() {
            failure = match kind {
                RedirectKind::In | RedirectKind::Append if !target.exists() => {
                    Some(format!("File '{lit}' does not exist"))
                }
                RedirectKind::Noclobber if target.exists() => {
                    Some(format!("File '{lit}' exists"))
                }
                _ => None,
            };
        }
        if let Some(message) = failure {
            colors[range.start] = Highlight::from_role(Role::Error);
            self.errors.push(HighlightError {
                range: base + range.start..base + range.end,
                message,
            });
        }
    }

    /// Token pass plus command-substitution recursion over one region.
    fn highlight_region(&mut self, src: &[char], colors: &mut [Highlight], base: usize) {
        self.token_pass(src, colors, base);

        let mut from = 0usize;
        loop {
            match locate_cmdsubst(src, from, true) {
                Ok(Some(sub)) => {
                    let inner_end = sub.close.unwrap_or(src.len());
                    let inner = sub.open + 1..inner_end;
                    if !inner.is_empty() {
                        let (inner_src, inner_colors) =
                            (&src[inner.clone()], &mut colors[inner.clone()]);
                        self.highlight_region(inner_src, inner_colors, base + inner.start);
                    }
                    match sub.close {
                        Some(close) => {
                            colors[close] = Highlight::from_role(Role::Operator);
                            from = close + 1;
                        }
                        None => break,
                    }
                }
                _ => break,
            }
        }
    }
}

/// Highlight the buffer. `cursor` enables the cursor-relative overlays; pass
/// `None` when colouring detached text.
pub fn highlight(
    src: &[char],
    cursor: Option<usize>,
    snap: &EnvSnapshot,
    validator: Option<&dyn OptionValidator>,
    cancel: &CancelToken,
) -> HighlightResult {
    let mut colors = vec![Highlight::uncolored(); src.len() + 1];
    let mut pass = Pass {
        snap,
        validator,
        cancel,
        errors: Vec::new(),
    };
    if !src.is_empty() {
        pass.highlight_region(src, &mut colors[..src.len()], 0);
    }

    // Fill-forward: uncoloured slots inherit the previous colour.
    let mut last = Highlight::from_role(Role::Normal);
    for slot in colors.iter_mut().take(src.len()) {
        if slot.is_uncolored() {
            *slot = last;
        } else {
            last = *slot;
        }
    }
    colors[src.len()] = Highlight::from_role(Role::Normal);

    // Valid-path overlay on the token under the cursor.
    if let Some(cur) = cursor {
        let ext = token_extent(src, cur);
        if !ext.is_empty() {
            let token: String = src[ext.clone()].iter().collect();
            if is_potential_path(&token, snap, cancel) {
                for slot in colors[ext].iter_mut() {
                    if slot.role() != Some(Role::Error) {
                        *slot = slot.with_overlay(Overlay::VALID_PATH);
                    }
                }
            }
        }
    }

    // Cursor quote/bracket matching.
    if let Some(cur) = cursor {
        universal::overlay(src, &mut colors, cur);
    }

    // Whitespace carries no colour at all.
    for (i, &c) in src.iter().enumerate() {
        if c.is_whitespace() {
            colors[i] = Highlight::from_role(Role::Normal);
        }
    }

    tracing::trace!(
        target: "highlight",
        len = src.len(),
        errors = pass.errors.len(),
        "highlight_pass_done"
    );
    HighlightResult {
        colors,
        errors: pass.errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use std::path::PathBuf;

    fn snapshot(dir: &Path) -> EnvSnapshot {
        let mut vars = HashMap::new();
        vars.insert("PATH".to_string(), dir.join("bin").display().to_string());
        vars.insert("HOME".to_string(), dir.display().to_string());
        let builtins: BTreeSet<String> =
            ["echo", "cd", "set"].iter().map(|s| s.to_string()).collect();
        let functions: BTreeSet<String> = ["fish_prompt"].iter().map(|s| s.to_string()).collect();
        EnvSnapshot::new(vars, dir.to_path_buf(), builtins, functions)
    }

    fn fixture() -> (tempfile::TempDir, EnvSnapshot) {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("bin")).unwrap();
        std::fs::write(tmp.path().join("bin").join("ls"), "#!/bin/sh\n").unwrap();
        std::fs::write(tmp.path().join("existing"), "x").unwrap();
        let snap = snapshot(tmp.path());
        (tmp, snap)
    }

    fn run(s: &str, cursor: Option<usize>, snap: &EnvSnapshot) -> HighlightResult {
        let src: Vec<char> = s.chars().collect();
        highlight(&src, cursor, snap, None, &CancelToken::new())
    }

    fn roles(result: &HighlightResult) -> Vec<Role> {
        result.colors.iter().map(|h| h.role().unwrap()).collect()
    }

    #[test]
    fn known_command_and_param() {
        let (_tmp, snap) = fixture();
        let res = run("ls /tm", Some(6), &snap);
        let r = roles(&res);
        assert_eq!(r[0], Role::Command);
        assert_eq!(r[1], Role::Command);
        assert_eq!(r[2], Role::Normal); // space
        assert_eq!(r[3], Role::Param);
        assert!(res.errors.is_empty());
    }

    #[test]
    fn unknown_command_is_error() {
        let (_tmp, snap) = fixture();
        let res = run("nosuchcmd", None, &snap);
        assert_eq!(roles(&res)[0], Role::Error);
        assert!(res.errors[0].message.contains("Unknown command"));
    }

    #[test]
    fn every_slot_coloured_after_pass() {
        let (_tmp, snap) = fixture();
        let res = run("echo (ls) | cat; x", Some(0), &snap);
        assert!(res.colors.iter().all(|c| !c.is_uncolored()));
    }

    #[test]
    fn cmdsubst_interior_recurses() {
        let (_tmp, snap) = fixture();
        //          0123456789
        let res = run("echo (ls)", None, &snap);
        let r = roles(&res);
        assert_eq!(r[0], Role::Command); // echo
        assert_eq!(r[6], Role::Command); // inner ls
        assert_eq!(r[8], Role::Operator); // closing paren
    }

    #[test]
    fn nested_cmdsubst_both_closers_operator() {
        let (_tmp, snap) = fixture();
        let s = "echo (ls (echo x))";
        let res = run(s, None, &snap);
        let r = roles(&res);
        let closers: Vec<usize> = s
            .char_indices()
            .filter(|(_, c)| *c == ')')
            .map(|(i, _)| i)
            .collect();
        for idx in closers {
            assert_eq!(r[idx], Role::Operator, "offset {idx}");
        }
        // Inner command coloured as command.
        assert_eq!(r[10], Role::Command);
    }

    #[test]
    fn pipe_colours_end_and_resets_command_position() {
        let (_tmp, snap) = fixture();
        let res = run("ls | ls", None, &snap);
        let r = roles(&res);
        assert_eq!(r[3], Role::End);
        assert_eq!(r[5], Role::Command);
    }

    #[test]
    fn leading_pipe_is_error() {
        let (_tmp, snap) = fixture();
        let res = run("| ls", None, &snap);
        assert_eq!(roles(&res)[0], Role::Error);
    }

    #[test]
    fn redirect_checks_target() {
        let (tmp, snap) = fixture();
        // Reading an existing file is fine.
        let res = run("echo <existing", None, &snap);
        assert!(res.errors.is_empty(), "{:?}", res.errors);
        // Reading a missing file is not.
        let res = run("echo <missing", None, &snap);
        assert!(!res.errors.is_empty());
        // Noclobber over an existing file is an error.
        let res = run("echo >|existing", None, &snap);
        assert!(!res.errors.is_empty());
        drop(tmp);
    }

    #[test]
    fn cd_argument_must_be_directory() {
        let (tmp, snap) = fixture();
        std::fs::create_dir(tmp.path().join("dest")).unwrap();
        let res = run("cd dest", None, &snap);
        assert!(res.errors.is_empty());
        let res = run("cd nowhere", None, &snap);
        let r = roles(&res);
        assert_eq!(r[3], Role::Error);
    }

    #[test]
    fn valid_path_overlay_on_cursor_token() {
        let (tmp, snap) = fixture();
        std::fs::write(tmp.path().join("readme"), "x").unwrap();
        let s = "echo read";
        let res = run(s, Some(s.len()), &snap);
        for i in 5..9 {
            assert!(
                res.colors[i].has_overlay(Overlay::VALID_PATH),
                "offset {i}"
            );
        }
        let res = run("echo zzzz", Some(9), &snap);
        assert!(!res.colors[5].has_overlay(Overlay::VALID_PATH));
    }

    #[test]
    fn unterminated_quote_marks_opener_only() {
        let (_tmp, snap) = fixture();
        let s = "echo \"hi";
        let res = run(s, Some(s.len()), &snap);
        let r = roles(&res);
        assert_eq!(r[5], Role::Error); // the lone quote
        assert_eq!(r[6], Role::Quote);
        assert_eq!(r[7], Role::Quote);
    }

    #[test]
    fn quote_match_overlay_under_cursor() {
        let (_tmp, snap) = fixture();
        let s = "echo \"ab'cd\"";
        let res = run(s, Some(5), &snap);
        let r = roles(&res);
        assert_eq!(r[5], Role::Match);
        assert_eq!(r[11], Role::Match);
    }

    #[test]
    fn builtin_prefix_restricts_lookup() {
        let (_tmp, snap) = fixture();
        // `ls` is an external command, not a builtin.
        let res = run("builtin ls", None, &snap);
        let r = roles(&res);
        assert_eq!(r[0], Role::Command);
        assert_eq!(r[8], Role::Error);
        let res = run("builtin echo", None, &snap);
        assert_eq!(roles(&res)[8], Role::Command);
    }

    #[test]
    fn double_dash_stops_switch_validation() {
        struct NoOptions;
        impl OptionValidator for NoOptions {
            fn is_valid_option(&self, _c: &str, _o: &str) -> Option<bool> {
                Some(false)
            }
        }
        let (_tmp, snap) = fixture();
        let src: Vec<char> = "ls -- -x".chars().collect();
        let res = highlight(&src, None, &snap, Some(&NoOptions), &CancelToken::new());
        let r = roles(&res);
        // After `--` the switch is an ordinary parameter.
        assert_eq!(r[6], Role::Param);
    }

    #[test]
    fn invalid_switch_flagged_by_validator() {
        struct NoOptions;
        impl OptionValidator for NoOptions {
            fn is_valid_option(&self, _c: &str, _o: &str) -> Option<bool> {
                Some(false)
            }
        }
        let (_tmp, snap) = fixture();
        let src: Vec<char> = "ls -x".chars().collect();
        let res = highlight(&src, None, &snap, Some(&NoOptions), &CancelToken::new());
        assert_eq!(roles(&res)[3], Role::Error);
    }
}
