//! Filesystem probes backing the valid-path overlay and command lookup.

use crate::cancel::CancelToken;
use core_config::EnvSnapshot;
use std::path::{Path, PathBuf};

/// Strip quotes and backslash escapes from a token, yielding the literal
/// text. Characters that would need expansion (`$`, wildcards, substitution
/// or brace groups) make the result non-literal and return `None`.
pub fn unescape_literal(token: &str) -> Option<String> {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars().peekable();
    let mut quote: Option<char> = None;
    while let Some(c) = chars.next() {
        match quote {
            Some('\'') => match c {
                '\'' => quote = None,
                '\\' => match chars.peek() {
                    Some('\'') | Some('\\') => out.push(chars.next().unwrap()),
                    _ => out.push('\\'),
                },
                _ => out.push(c),
            },
            Some('"') => match c {
                '"' => quote = None,
                '\\' => match chars.next() {
                    Some(e @ ('\\' | '$' | '"')) => out.push(e),
                    Some('\n') => {}
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => out.push('\\'),
                },
                '$' => return None,
                _ => out.push(c),
            },
            _ => match c {
                '\'' | '"' => quote = Some(c),
                '\\' => match chars.next() {
                    Some('\n') => {}
                    Some(e) => out.push(e),
                    None => out.push('\\'),
                },
                '$' | '*' | '?' | '(' | ')' | '{' | '}' => return None,
                _ => out.push(c),
            },
        }
    }
    Some(out)
}

/// True when the token is a prefix of some filesystem entry: a directory if
/// it ends with `/`, otherwise a file or name prefix within its parent.
pub fn is_potential_path(token: &str, snap: &EnvSnapshot, cancel: &CancelToken) -> bool {
    let Some(cleaned) = unescape_literal(&snap.expand_tilde(token)) else {
        return false;
    };
    if cleaned.is_empty() || cancel.is_cancelled() {
        return false;
    }

    if cleaned.ends_with('/') {
        return snap.resolve(Path::new(&cleaned)).is_dir();
    }

    let path = PathBuf::from(&cleaned);
    let base = match path.file_name().and_then(|n| n.to_str()) {
        Some(base) => base.to_string(),
        None => return snap.resolve(&path).is_dir(),
    };
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => snap.resolve(p),
        _ => snap.working_dir().to_path_buf(),
    };
    if cancel.is_cancelled() {
        return false;
    }
    let Ok(entries) = std::fs::read_dir(&parent) else {
        return false;
    };
    for entry in entries.flatten() {
        if cancel.is_cancelled() {
            return false;
        }
        if entry.file_name().to_string_lossy().starts_with(&base) {
            return true;
        }
    }
    false
}

/// Look a command name up on `PATH`. Names containing a slash resolve
/// against the working directory instead.
pub fn path_has_command(name: &str, snap: &EnvSnapshot, cancel: &CancelToken) -> bool {
    if name.contains('/') {
        return snap.resolve(Path::new(name)).is_file();
    }
    for dir in snap.path_dirs() {
        if cancel.is_cancelled() {
            return false;
        }
        if dir.join(name).is_file() {
            return true;
        }
    }
    false
}

/// Directory reachable as a `cd` target from the snapshot's working dir.
pub fn is_cd_target(arg: &str, snap: &EnvSnapshot) -> bool {
    let expanded = snap.expand_tilde(arg);
    let Some(cleaned) = unescape_literal(&expanded) else {
        // Not statically resolvable; give it the benefit of the doubt.
        return true;
    };
    if cleaned.is_empty() {
        return true;
    }
    snap.resolve(Path::new(&cleaned)).is_dir()
}
