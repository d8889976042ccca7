//! Light validity check for history-based autosuggestions: decide whether a
//! completed command line is plausibly executable without running the full
//! highlight pass.

use crate::cancel::CancelToken;
use crate::path::{is_cd_target, path_has_command, unescape_literal};
use core_config::EnvSnapshot;
use core_lex::{TokenKind, Tokenizer, TokenizerFlags};

/// Returns `(handled, suggestion_ok)`. When `handled` is false the line
/// could not be judged statically and the caller should offer the
/// suggestion anyway.
pub fn autosuggest_validate(
    line: &str,
    snap: &EnvSnapshot,
    cancel: &CancelToken,
) -> (bool, bool) {
    let chars: Vec<char> = line.chars().collect();
    let mut strings = Tokenizer::new(&chars, TokenizerFlags::ACCEPT_UNFINISHED)
        .filter(|t| t.kind == TokenKind::String);
    let Some(cmd_tok) = strings.next() else {
        return (false, true);
    };
    let expanded = snap.expand_tilde(&cmd_tok.text);
    let Some(cmd) = unescape_literal(&expanded) else {
        return (false, true);
    };

    if cmd == "cd" {
        let ok = match strings.next() {
            Some(arg) => {
                arg.text.starts_with('-') || is_cd_target(&arg.text, snap)
            }
            None => true,
        };
        return (true, ok);
    }

    if cancel.is_cancelled() {
        return (false, true);
    }
    let resolvable = snap.is_builtin(&cmd)
        || snap.is_function(&cmd)
        || path_has_command(&cmd, snap, cancel)
        || crate::RESERVED_WORDS.contains(&cmd.as_str())
        || crate::SUBCOMMAND_KEYWORDS.contains(&cmd.as_str());
    (true, resolvable)
}
