//! Thin seam to the command executor. The real parser/executor is a
//! collaborator outside the editor; this module covers the handful of
//! builtins the reader itself must observe (directory changes, nested
//! reads, universal variable writes, exit) and hands everything else to the
//! operating system.

use anyhow::Result;
use core_functions::{Autoload, AutoloadHandler, FunctionRegistry, function_exists};
use core_highlight::unescape_literal;
use core_lex::{TokenKind, TokenizerFlags, tokenize_str};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Everything the executor consults while running a line: the function
/// registry, the autoloader resolving names to definition files, and the
/// search path the autoloader scans.
pub struct ExecContext<'a> {
    pub functions: &'a FunctionRegistry,
    pub autoload: &'a Autoload,
    pub handler: &'a dyn AutoloadHandler,
    pub function_path: Vec<PathBuf>,
}

/// Function bodies run back through the executor; cap the nesting.
const MAX_CALL_DEPTH: usize = 16;

/// Builtin names advertised to the highlighter and completion engine.
pub const BUILTIN_NAMES: &[&str] = &[
    "cd", "echo", "exit", "read", "set", "source", "status", "history", "functions", "builtin",
    "command", "complete",
];

pub fn builtin_set() -> BTreeSet<String> {
    BUILTIN_NAMES.iter().map(|s| s.to_string()).collect()
}

/// What the reader must do after a command ran.
#[derive(Debug, PartialEq, Eq)]
pub enum ExecOutcome {
    Continue,
    Exit,
    /// The `read` builtin wants a nested reader frame.
    ReadRequest { variable: String, prompt: String },
    /// `set -U`: forward to the universal-variable broker.
    SetUniversal {
        key: String,
        value: String,
        export: bool,
    },
    /// `set -U -e`: erase a universal variable.
    EraseUniversal { key: String },
}

fn expand_arg(raw: &str) -> String {
    let tilde = if let Some(rest) = raw.strip_prefix('~') {
        match std::env::var("HOME") {
            Ok(home) if rest.is_empty() || rest.starts_with('/') => format!("{home}{rest}"),
            _ => raw.to_string(),
        }
    } else {
        raw.to_string()
    };
    unescape_literal(&tilde).unwrap_or(tilde)
}

/// Argv of the first process in the line, unescaped.
pub fn split_argv(line: &str) -> Vec<String> {
    tokenize_str(line, TokenizerFlags::ACCEPT_UNFINISHED)
        .into_iter()
        .take_while(|t| {
            !matches!(
                t.kind,
                TokenKind::End | TokenKind::Pipe | TokenKind::Background
            )
        })
        .filter(|t| t.kind == TokenKind::String)
        .map(|t| expand_arg(&t.text))
        .collect()
}

/// Paths mentioned on the line that exist right now; the history item
/// records them so stale suggestions stop being offered once they vanish.
pub fn existing_paths(line: &str) -> Vec<PathBuf> {
    split_argv(line)
        .into_iter()
        .skip(1)
        .filter(|arg| arg.contains('/') || Path::new(arg).exists())
        .map(PathBuf::from)
        .filter(|p| p.exists())
        .collect()
}

fn run_set(args: &[String]) -> ExecOutcome {
    let mut universal = false;
    let mut export = false;
    let mut erase = false;
    let mut rest: Vec<&String> = Vec::new();
    for arg in args {
        match arg.as_str() {
            "-U" | "--universal" => universal = true,
            "-x" | "--export" => export = true,
            "-e" | "--erase" => erase = true,
            "-Ux" | "-xU" => {
                universal = true;
                export = true;
            }
            "-Ue" | "-eU" => {
                universal = true;
                erase = true;
            }
            _ => rest.push(arg),
        }
    }
    let Some(key) = rest.first() else {
        return ExecOutcome::Continue;
    };
    if universal {
        if erase {
            return ExecOutcome::EraseUniversal {
                key: key.to_string(),
            };
        }
        let value = rest
            .iter()
            .skip(1)
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        return ExecOutcome::SetUniversal {
            key: key.to_string(),
            value,
            export,
        };
    }
    let value = rest
        .iter()
        .skip(1)
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    if erase {
        unsafe { std::env::remove_var(key.as_str()) };
    } else {
        unsafe { std::env::set_var(key.as_str(), value) };
    }
    ExecOutcome::Continue
}

/// Run one complete command line. The caller has already put the terminal
/// back into cooked mode.
pub fn execute(line: &str, ctx: &ExecContext<'_>) -> Result<ExecOutcome> {
    execute_at_depth(line, ctx, 0)
}

fn execute_at_depth(line: &str, ctx: &ExecContext<'_>, depth: usize) -> Result<ExecOutcome> {
    if depth >= MAX_CALL_DEPTH {
        eprintln!("brine: call depth limit reached");
        return Ok(ExecOutcome::Continue);
    }
    let argv = split_argv(line);
    let Some(cmd) = argv.first() else {
        return Ok(ExecOutcome::Continue);
    };
    debug!(target: "exec", argc = argv.len(), depth, "executing");

    match cmd.as_str() {
        "exit" => return Ok(ExecOutcome::Exit),
        "cd" => {
            let target = argv
                .get(1)
                .cloned()
                .or_else(|| std::env::var("HOME").ok())
                .unwrap_or_else(|| "/".to_string());
            if let Err(e) = std::env::set_current_dir(&target) {
                eprintln!("cd: {target}: {e}");
            }
            return Ok(ExecOutcome::Continue);
        }
        "read" => {
            let variable = argv.get(1).cloned().unwrap_or_else(|| "REPLY".to_string());
            let prompt = argv.get(2).cloned().unwrap_or_else(|| "read> ".to_string());
            return Ok(ExecOutcome::ReadRequest { variable, prompt });
        }
        "set" => return Ok(run_set(&argv[1..])),
        "echo" => {
            println!("{}", argv[1..].join(" "));
            return Ok(ExecOutcome::Continue);
        }
        "functions" => {
            for name in ctx.functions.names() {
                println!("{name}");
            }
            return Ok(ExecOutcome::Continue);
        }
        _ => {}
    }

    // Functions shadow external commands; referencing one here is what
    // triggers its autoload.
    if function_exists(cmd, ctx.functions, ctx.autoload, &ctx.function_path, ctx.handler) {
        if let Some(record) = ctx.functions.get(cmd) {
            for body_line in record.body.lines() {
                match execute_at_depth(body_line, ctx, depth + 1)? {
                    ExecOutcome::Continue => {}
                    other => return Ok(other),
                }
            }
        }
        return Ok(ExecOutcome::Continue);
    }

    match std::process::Command::new(cmd).args(&argv[1..]).status() {
        Ok(status) if !status.success() => {
            debug!(target: "exec", ?status, "command_failed");
        }
        Ok(_) => {}
        Err(e) => {
            warn!(target: "exec", %e, command = %cmd, "spawn_failed");
            eprintln!("brine: unknown command: {cmd}");
        }
    }
    Ok(ExecOutcome::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_functions::RegistryAutoloadHandler;
    use std::sync::Arc;

    fn ctx_in<'a>(
        functions: &'a FunctionRegistry,
        autoload: &'a Autoload,
        handler: &'a RegistryAutoloadHandler,
        dir: &Path,
    ) -> ExecContext<'a> {
        ExecContext {
            functions,
            autoload,
            handler,
            function_path: vec![dir.to_path_buf()],
        }
    }

    #[test]
    fn referencing_a_function_autoloads_and_runs_it() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("wave.fish"),
            "function wave\n    echo waving\nend\n",
        )
        .unwrap();
        let functions = Arc::new(FunctionRegistry::new());
        let autoload = Autoload::new("fish_function_path");
        let handler = RegistryAutoloadHandler::new(functions.clone());
        let ctx = ctx_in(&functions, &autoload, &handler, tmp.path());

        assert!(!functions.exists_no_autoload("wave"));
        let out = execute("wave", &ctx).unwrap();
        assert_eq!(out, ExecOutcome::Continue);
        assert!(functions.exists_no_autoload("wave"));
    }

    #[test]
    fn function_body_can_exit() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("bye.fish"), "function bye\n    exit\nend\n").unwrap();
        let functions = Arc::new(FunctionRegistry::new());
        let autoload = Autoload::new("fish_function_path");
        let handler = RegistryAutoloadHandler::new(functions.clone());
        let ctx = ctx_in(&functions, &autoload, &handler, tmp.path());
        assert_eq!(execute("bye", &ctx).unwrap(), ExecOutcome::Exit);
    }

    #[test]
    fn recursive_function_hits_depth_limit() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("loopy.fish"),
            "function loopy\n    loopy\nend\n",
        )
        .unwrap();
        let functions = Arc::new(FunctionRegistry::new());
        let autoload = Autoload::new("fish_function_path");
        let handler = RegistryAutoloadHandler::new(functions.clone());
        let ctx = ctx_in(&functions, &autoload, &handler, tmp.path());
        // Terminates instead of recursing forever.
        assert_eq!(execute("loopy", &ctx).unwrap(), ExecOutcome::Continue);
    }

    #[test]
    fn argv_splits_and_unescapes() {
        assert_eq!(split_argv("echo 'a b' c"), vec!["echo", "a b", "c"]);
        assert_eq!(split_argv("ls | wc"), vec!["ls"]);
        assert_eq!(split_argv(""), Vec::<String>::new());
    }

    #[test]
    fn set_universal_parsed() {
        let out = run_set(&[
            "-U".to_string(),
            "-x".to_string(),
            "COLS".to_string(),
            "80".to_string(),
        ]);
        assert_eq!(
            out,
            ExecOutcome::SetUniversal {
                key: "COLS".to_string(),
                value: "80".to_string(),
                export: true
            }
        );
    }

    #[test]
    fn set_universal_erase() {
        let out = run_set(&["-U".to_string(), "-e".to_string(), "GONE".to_string()]);
        assert_eq!(
            out,
            ExecOutcome::EraseUniversal {
                key: "GONE".to_string()
            }
        );
    }

    #[test]
    fn read_requests_nested_frame() {
        let tmp = tempfile::tempdir().unwrap();
        let functions = Arc::new(FunctionRegistry::new());
        let autoload = Autoload::new("fish_function_path");
        let handler = RegistryAutoloadHandler::new(functions.clone());
        let ctx = ctx_in(&functions, &autoload, &handler, tmp.path());
        let out = execute("read NAME", &ctx).unwrap();
        assert_eq!(
            out,
            ExecOutcome::ReadRequest {
                variable: "NAME".to_string(),
                prompt: "read> ".to_string()
            }
        );
    }

    #[test]
    fn exit_propagates() {
        let tmp = tempfile::tempdir().unwrap();
        let functions = Arc::new(FunctionRegistry::new());
        let autoload = Autoload::new("fish_function_path");
        let handler = RegistryAutoloadHandler::new(functions.clone());
        let ctx = ctx_in(&functions, &autoload, &handler, tmp.path());
        assert_eq!(execute("exit", &ctx).unwrap(), ExecOutcome::Exit);
    }

    #[test]
    fn existing_paths_filters() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("seen.txt");
        std::fs::write(&file, "x").unwrap();
        let line = format!("cat {} /definitely/not/here", file.display());
        let paths = existing_paths(&line);
        assert_eq!(paths, vec![file]);
    }
}
