//! Minimal parser for function definition files: enough to resolve names,
//! descriptions, and bodies without handing the file to the script
//! executor.

use crate::registry::FunctionRecord;
use std::path::Path;

fn unquote(word: &str) -> String {
    let w = word.trim();
    if (w.starts_with('\'') && w.ends_with('\'') && w.len() >= 2)
        || (w.starts_with('"') && w.ends_with('"') && w.len() >= 2)
    {
        w[1..w.len() - 1].to_string()
    } else {
        w.to_string()
    }
}

/// Split a `function` header line into shell-ish words, honouring quotes.
fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in line.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    current.push(c);
                    quote = Some(c);
                }
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        words.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Parse every `function ... end` block in `source`. Line numbers are
/// one-based.
pub fn parse_source(source: &str, file: Option<&Path>) -> Vec<FunctionRecord> {
    let mut records = Vec::new();
    let mut current: Option<(FunctionRecord, Vec<String>)> = None;
    let mut depth = 0usize;

    for (lineno, line) in source.lines().enumerate() {
        let trimmed = line.trim();
        if let Some((record, body)) = current.as_mut() {
            if trimmed == "end" && depth == 0 {
                record.body = body.join("\n");
                records.push(current.take().unwrap().0);
                continue;
            }
            if trimmed.starts_with("function ")
                || matches!(trimmed, "begin" | "if" | "while" | "for" | "switch")
                || trimmed.starts_with("begin ")
                || trimmed.starts_with("if ")
                || trimmed.starts_with("while ")
                || trimmed.starts_with("for ")
                || trimmed.starts_with("switch ")
            {
                depth += 1;
            } else if trimmed == "end" {
                depth -= 1;
            }
            body.push(line.to_string());
            continue;
        }

        if !trimmed.starts_with("function ") {
            continue;
        }
        let words = split_words(trimmed);
        let mut record = FunctionRecord {
            definition_file: file.map(Path::to_path_buf),
            definition_line: lineno + 1,
            // Functions shadow the caller's scope unless -S is given.
            shadows_scope: true,
            ..FunctionRecord::default()
        };
        let mut iter = words.into_iter().skip(1).peekable();
        while let Some(word) = iter.next() {
            match word.as_str() {
                "--description" | "-d" => {
                    if let Some(desc) = iter.next() {
                        record.description = unquote(&desc);
                    }
                }
                "--argument-names" | "-a" => {
                    while let Some(next) = iter.peek() {
                        if next.starts_with('-') {
                            break;
                        }
                        record.named_parameters.push(iter.next().unwrap());
                    }
                }
                "--no-scope-shadowing" | "-S" => record.shadows_scope = false,
                "--on-event" | "-e" => {
                    if let Some(event) = iter.next() {
                        record.event_handlers.push(event);
                    }
                }
                w if w.starts_with('-') => {}
                w if record.name.is_empty() => record.name = w.to_string(),
                _ => {}
            }
        }
        if record.name.is_empty() {
            continue;
        }
        current = Some((record, Vec::new()));
    }
    records
}

/// Parse a definition file from disk. Unreadable files yield nothing.
pub fn parse_file(path: &Path) -> Vec<FunctionRecord> {
    match std::fs::read_to_string(path) {
        Ok(source) => parse_source(&source, Some(path)),
        Err(e) => {
            tracing::warn!(target: "autoload", path = %path.display(), %e, "function_file_unreadable");
            Vec::new()
        }
    }
}
