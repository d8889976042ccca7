//! Completion engine: isolate the token under the cursor, work out its role
//! and quoting context, merge candidates from every source, and rank them.
//!
//! Like the highlighter this runs on a worker thread against an immutable
//! snapshot and honours the shared cancellation token at I/O boundaries.

use core_argspec::ArgSpecRegistry;
use core_config::EnvSnapshot;
use core_highlight::{CancelToken, unescape_literal};
use core_lex::{TokenKind, Tokenizer, TokenizerFlags, process_extent, token_extents};
use std::path::PathBuf;

pub mod candidate;

pub use candidate::{
    Candidate, CandidateFlags, Insertion, MatchTier, insertion_for, match_tier, rank_and_dedup,
};

/// Quoting context of the token being completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quoting {
    None,
    Single,
    Double,
}

/// Quoting state at the end of a token prefix.
pub fn quoting_context(prefix: &str) -> Quoting {
    let mut quote = Quoting::None;
    let mut chars = prefix.chars();
    while let Some(c) = chars.next() {
        match quote {
            Quoting::None => match c {
                '\\' => {
                    chars.next();
                }
                '\'' => quote = Quoting::Single,
                '"' => quote = Quoting::Double,
                _ => {}
            },
            Quoting::Single => {
                if c == '\'' {
                    quote = Quoting::None;
                }
            }
            Quoting::Double => match c {
                '\\' => {
                    chars.next();
                }
                '"' => quote = Quoting::None,
                _ => {}
            },
        }
    }
    quote
}

/// Escape a replacement for insertion into the buffer under the given
/// quoting context.
pub fn escape_for_insertion(text: &str, quoting: Quoting) -> String {
    match quoting {
        Quoting::None => {
            let mut out = String::with_capacity(text.len());
            for c in text.chars() {
                if " \t\n;|&<>#*?(){}$'\"\\".contains(c) {
                    out.push('\\');
                }
                out.push(c);
            }
            out
        }
        Quoting::Single => text.replace('\\', "\\\\").replace('\'', "\\'"),
        Quoting::Double => {
            let mut out = String::with_capacity(text.len());
            for c in text.chars() {
                if "\\$\"".contains(c) {
                    out.push('\\');
                }
                out.push(c);
            }
            out
        }
    }
}

/// Glob match with `*` and `?`.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((sp, sn)) = star {
            pi = sp + 1;
            ni = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// The token role the engine completes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Command,
    Argument,
}

struct Request<'a> {
    snap: &'a EnvSnapshot,
    specs: Option<&'a ArgSpecRegistry>,
    cancel: &'a CancelToken,
}

/// Compute ranked completion candidates for the token under the cursor.
pub fn complete(
    src: &[char],
    cursor: usize,
    snap: &EnvSnapshot,
    specs: Option<&ArgSpecRegistry>,
    cancel: &CancelToken,
) -> Vec<Candidate> {
    let cursor = cursor.min(src.len());
    let (ext, _) = token_extents(src, cursor);
    let token: String = if ext.is_empty() {
        String::new()
    } else {
        src[ext.start..cursor.max(ext.start)].iter().collect()
    };

    let proc = process_extent(src, cursor);
    let proc_slice: Vec<char> = src[proc.clone()].to_vec();
    let strings: Vec<(std::ops::Range<usize>, String)> =
        Tokenizer::new(&proc_slice, TokenizerFlags::ACCEPT_UNFINISHED)
            .filter(|t| t.kind == TokenKind::String)
            .map(|t| (proc.start + t.range.start..proc.start + t.range.end, t.text))
            .collect();

    let position = match strings.first() {
        None => Position::Command,
        Some((range, _)) if !ext.is_empty() && range.start == ext.start => Position::Command,
        Some((range, _)) if ext.is_empty() && range.start >= cursor => Position::Command,
        _ => Position::Argument,
    };

    let req = Request {
        snap,
        specs,
        cancel,
    };
    let mut out = Vec::new();
    match position {
        Position::Command => complete_command(&req, &token, &mut out),
        Position::Argument => {
            let command = strings
                .first()
                .map(|(_, text)| text.clone())
                .unwrap_or_default();
            let prior_args: Vec<String> = strings
                .iter()
                .skip(1)
                .filter(|(range, _)| {
                    range.end <= ext.start || (ext.is_empty() && range.end <= cursor)
                })
                .map(|(_, text)| text.clone())
                .collect();
            complete_argument(&req, &command, &prior_args, &token, &mut out);
        }
    }

    let ranked = rank_and_dedup(out, &token);
    tracing::debug!(
        target: "complete",
        token_len = token.len(),
        candidates = ranked.len(),
        position = ?position,
        "completion_computed"
    );
    ranked
}

fn complete_command(req: &Request<'_>, token: &str, out: &mut Vec<Candidate>) {
    for name in req.snap.builtins() {
        out.push(Candidate::new(name, "Builtin"));
    }
    for name in req.snap.functions() {
        out.push(Candidate::new(name, "Function"));
    }
    // Autoloadable functions are offered by file name without running the
    // files.
    for dir in req.snap.function_path_dirs() {
        if req.cancel.is_cancelled() {
            return;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".fish") {
                out.push(Candidate::new(stem, "Function (autoloaded)"));
            }
        }
    }
    for dir in req.snap.path_dirs() {
        if req.cancel.is_cancelled() {
            return;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            if entry.path().is_file() {
                let name = entry.file_name().to_string_lossy().to_string();
                if match_tier(&name, token).is_some() {
                    out.push(Candidate::new(name, "Command"));
                }
            }
        }
    }
}

fn complete_argument(
    req: &Request<'_>,
    command: &str,
    prior_args: &[String],
    token: &str,
    out: &mut Vec<Candidate>,
) {
    if let Some(rest) = token.strip_prefix('$') {
        for name in req.snap.var_names() {
            if match_tier(name, rest).is_some() {
                out.push(Candidate::new(format!("${name}"), "Variable"));
            }
        }
        return;
    }

    if token.starts_with('~') && !token.contains('/') {
        complete_users(req, out);
        // Fall through: `~foo` may also be a literal file.
    }

    if let Some(specs) = req.specs {
        if token.starts_with('-') || token.is_empty() {
            for suggestion in specs.suggest_next(command, prior_args) {
                if suggestion.token.starts_with('-') {
                    out.push(Candidate::new(suggestion.token, suggestion.description));
                }
            }
        }
    }

    complete_files(req, prior_args, token, out);
}

fn complete_users(req: &Request<'_>, out: &mut Vec<Candidate>) {
    if req.cancel.is_cancelled() {
        return;
    }
    let Ok(passwd) = std::fs::read_to_string("/etc/passwd") else {
        return;
    };
    for line in passwd.lines() {
        if let Some(user) = line.split(':').next() {
            if !user.is_empty() {
                out.push(
                    Candidate::new(format!("~{user}/"), "Home directory")
                        .with_flags(CandidateFlags::NO_SPACE),
                );
            }
        }
    }
}

fn complete_files(
    req: &Request<'_>,
    prior_args: &[String],
    token: &str,
    out: &mut Vec<Candidate>,
) {
    let expanded = req.snap.expand_tilde(token);
    let literal = unescape_literal(&expanded);
    let has_wildcard = expanded.contains('*') || expanded.contains('?');

    // Split into the directory part (kept verbatim in replacements) and the
    // basename being completed.
    let split = token.rfind('/').map(|i| i + 1).unwrap_or(0);
    let dir_prefix = &token[..split];
    let base = &token[split..];

    let list_dir: PathBuf = if dir_prefix.is_empty() {
        req.snap.working_dir().to_path_buf()
    } else {
        let dir_expanded = req.snap.expand_tilde(dir_prefix);
        match unescape_literal(&dir_expanded) {
            Some(lit) => req.snap.resolve(std::path::Path::new(&lit)),
            None => return,
        }
    };

    if req.cancel.is_cancelled() {
        return;
    }
    let Ok(entries) = std::fs::read_dir(&list_dir) else {
        return;
    };
    let base_literal = unescape_literal(base).unwrap_or_else(|| base.to_string());
    for entry in entries.flatten() {
        if req.cancel.is_cancelled() {
            return;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = entry.path().is_dir();
        let accept = if has_wildcard {
            literal.is_none() && wildcard_match(&base_literal, &name)
        } else {
            match_tier(&name, &base_literal).is_some()
        };
        if !accept {
            continue;
        }
        let mut replacement = format!("{dir_prefix}{name}");
        let mut flags = CandidateFlags::empty();
        if is_dir {
            replacement.push('/');
            flags |= CandidateFlags::NO_SPACE;
        }
        if has_wildcard {
            flags |= CandidateFlags::REPLACE_TOKEN;
        }
        if prior_args.iter().any(|a| a == &replacement) {
            flags |= CandidateFlags::DUPLICATES_ARG;
        }
        out.push(Candidate::new(replacement, "").with_flags(flags));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use std::path::Path;

    fn snapshot(dir: &Path) -> EnvSnapshot {
        let mut vars = HashMap::new();
        vars.insert("PATH".to_string(), dir.join("bin").display().to_string());
        vars.insert("HOME".to_string(), dir.display().to_string());
        vars.insert("MYVAR".to_string(), "1".to_string());
        vars.insert("MYOTHER".to_string(), "2".to_string());
        let builtins: BTreeSet<String> = ["echo", "cd"].iter().map(|s| s.to_string()).collect();
        let functions: BTreeSet<String> = ["greet"].iter().map(|s| s.to_string()).collect();
        EnvSnapshot::new(vars, dir.to_path_buf(), builtins, functions)
    }

    fn fixture() -> (tempfile::TempDir, EnvSnapshot) {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("bin")).unwrap();
        std::fs::write(tmp.path().join("bin").join("grep"), "").unwrap();
        std::fs::write(tmp.path().join("bin").join("grok"), "").unwrap();
        std::fs::write(tmp.path().join("alpha.txt"), "").unwrap();
        std::fs::write(tmp.path().join("alphabet.txt"), "").unwrap();
        std::fs::create_dir(tmp.path().join("docs")).unwrap();
        let snap = snapshot(tmp.path());
        (tmp, snap)
    }

    fn run(s: &str, snap: &EnvSnapshot) -> Vec<Candidate> {
        let src: Vec<char> = s.chars().collect();
        complete(&src, src.len(), snap, None, &CancelToken::new())
    }

    fn names(cands: &[Candidate]) -> Vec<&str> {
        cands.iter().map(|c| c.replacement.as_str()).collect()
    }

    #[test]
    fn command_position_merges_sources() {
        let (_tmp, snap) = fixture();
        let cands = run("gr", &snap);
        let n = names(&cands);
        assert!(n.contains(&"greet"), "{n:?}");
        assert!(n.contains(&"grep"));
        assert!(n.contains(&"grok"));
    }

    #[test]
    fn command_position_includes_builtins() {
        let (_tmp, snap) = fixture();
        let cands = run("ec", &snap);
        assert!(names(&cands).contains(&"echo"));
        assert_eq!(cands[0].description, "Builtin");
    }

    #[test]
    fn argument_position_completes_files() {
        let (_tmp, snap) = fixture();
        let cands = run("echo alph", &snap);
        let n = names(&cands);
        assert_eq!(n, vec!["alpha.txt", "alphabet.txt"]);
    }

    #[test]
    fn directories_get_slash_and_no_space() {
        let (_tmp, snap) = fixture();
        let cands = run("echo do", &snap);
        assert_eq!(cands[0].replacement, "docs/");
        assert!(cands[0].flags.contains(CandidateFlags::NO_SPACE));
    }

    #[test]
    fn variables_after_dollar() {
        let (_tmp, snap) = fixture();
        let cands = run("echo $MY", &snap);
        let n = names(&cands);
        assert_eq!(n, vec!["$MYVAR", "$MYOTHER"]);
    }

    #[test]
    fn wildcards_expand_against_fs() {
        let (_tmp, snap) = fixture();
        let cands = run("echo al*.txt", &snap);
        let n = names(&cands);
        assert_eq!(n, vec!["alpha.txt", "alphabet.txt"]);
        assert!(cands[0].flags.contains(CandidateFlags::REPLACE_TOKEN));
    }

    #[test]
    fn argspec_options_offered() {
        let (_tmp, snap) = fixture();
        let reg = ArgSpecRegistry::new();
        reg.register("grep", "base", "Options:\n  -i, --ignore-case  Ignore case\n")
            .unwrap();
        let src: Vec<char> = "grep --ig".chars().collect();
        let cands = complete(&src, src.len(), &snap, Some(&reg), &CancelToken::new());
        assert_eq!(cands[0].replacement, "--ignore-case");
        assert_eq!(cands[0].description, "Ignore case");
    }

    #[test]
    fn autoloadable_functions_listed_without_execution() {
        let (tmp, _snap) = fixture();
        std::fs::create_dir(tmp.path().join("funcs")).unwrap();
        std::fs::write(tmp.path().join("funcs").join("fancy.fish"), "function fancy\nend\n")
            .unwrap();
        let mut vars = HashMap::new();
        vars.insert(
            "fish_function_path".to_string(),
            tmp.path().join("funcs").display().to_string(),
        );
        let snap = EnvSnapshot::new(
            vars,
            tmp.path().to_path_buf(),
            BTreeSet::new(),
            BTreeSet::new(),
        );
        let cands = run("fan", &snap);
        assert_eq!(names(&cands), vec!["fancy"]);
        assert_eq!(cands[0].description, "Function (autoloaded)");
    }

    #[test]
    fn subdirectory_prefix_kept_in_replacement() {
        let (tmp, snap) = fixture();
        std::fs::write(tmp.path().join("docs").join("guide.md"), "").unwrap();
        let cands = run("echo docs/gu", &snap);
        assert_eq!(names(&cands), vec!["docs/guide.md"]);
    }

    #[test]
    fn wildcard_matcher() {
        assert!(wildcard_match("a*.txt", "alpha.txt"));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("a?c", "abc"));
        assert!(!wildcard_match("a?c", "ac"));
        assert!(!wildcard_match("*.rs", "main.go"));
    }

    #[test]
    fn quoting_context_detection() {
        assert_eq!(quoting_context("plain"), Quoting::None);
        assert_eq!(quoting_context("'open"), Quoting::Single);
        assert_eq!(quoting_context("\"open"), Quoting::Double);
        assert_eq!(quoting_context("'closed'"), Quoting::None);
        assert_eq!(quoting_context("\\'"), Quoting::None);
    }

    #[test]
    fn escaping_for_insertion() {
        assert_eq!(escape_for_insertion("a b", Quoting::None), "a\\ b");
        assert_eq!(escape_for_insertion("a'b", Quoting::Single), "a\\'b");
        assert_eq!(escape_for_insertion("a\"b", Quoting::Double), "a\\\"b");
    }

    #[test]
    fn cancelled_request_returns_partial() {
        let (_tmp, snap) = fixture();
        let cancel = CancelToken::new();
        cancel.cancel();
        let src: Vec<char> = "echo alph".chars().collect();
        let cands = complete(&src, src.len(), &snap, None, &cancel);
        assert!(cands.is_empty());
    }
}
