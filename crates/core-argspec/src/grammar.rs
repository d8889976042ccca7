//! Parser for the docopt-style command grammar.
//!
//! A document has an optional `Usage:` section naming the command and its
//! positional shape, an `Options:` section of option descriptors, and an
//! optional `Arguments:` section binding `<variable>` placeholders to the
//! condition command that produces their completions:
//!
//! ```text
//! Usage: grep [options] <pattern> <file>...
//! Options:
//!   -i, --ignore-case     Ignore case distinctions
//!   -m <num>, --max-count <num>   Stop after <num> matches
//! Arguments:
//!   <file>  __complete_path
//! ```

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct SpecError {
    /// Byte offset into the source document.
    pub offset: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OptionDesc {
    /// Short form including the dash, e.g. `-i`.
    pub short: Option<String>,
    /// Long form including the dashes, e.g. `--ignore-case`.
    pub long: Option<String>,
    /// Value placeholder variable, e.g. `<num>`.
    pub variable: Option<String>,
    pub description: String,
}

impl OptionDesc {
    pub fn matches(&self, word: &str) -> bool {
        self.short.as_deref() == Some(word) || self.long.as_deref() == Some(word)
    }

    pub fn long_has_prefix(&self, prefix: &str) -> bool {
        self.long
            .as_deref()
            .map(|l| l.starts_with(prefix))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Positional {
    /// Placeholder name without the angle brackets.
    pub name: String,
    pub repeating: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DocSpec {
    pub usage_command: Option<String>,
    pub positionals: Vec<Positional>,
    pub options: Vec<OptionDesc>,
    /// `<variable>` → condition command from the `Arguments:` section.
    pub conditions: Vec<(String, String)>,
}

impl DocSpec {
    pub fn find_option(&self, word: &str) -> Option<&OptionDesc> {
        self.options.iter().find(|o| o.matches(word))
    }

    pub fn condition_for(&self, variable: &str) -> Option<&str> {
        let stripped = variable.trim_matches(|c| c == '<' || c == '>');
        self.conditions
            .iter()
            .find(|(v, _)| v == stripped)
            .map(|(_, c)| c.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Usage,
    Options,
    Arguments,
}

/// Parse one grammar document. All errors are collected, not just the first.
pub fn parse(doc: &str) -> Result<DocSpec, Vec<SpecError>> {
    let mut spec = DocSpec::default();
    let mut errors = Vec::new();
    let mut section = Section::Preamble;
    let mut offset = 0usize;

    for line in doc.split_inclusive('\n') {
        let line_offset = offset;
        offset += line.len();
        let trimmed_end = line.trim_end_matches('\n');
        let stripped = trimmed_end.trim_start();
        let indent = trimmed_end.len() - stripped.len();
        if stripped.is_empty() {
            continue;
        }

        let lower = stripped.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("usage:") {
            section = Section::Usage;
            let rest_src = &stripped[stripped.len() - rest.len()..];
            if !rest_src.trim().is_empty() {
                parse_usage_line(rest_src.trim(), line_offset, &mut spec, &mut errors);
            }
            continue;
        }
        if lower.starts_with("options:") {
            section = Section::Options;
            continue;
        }
        if lower.starts_with("arguments:") {
            section = Section::Arguments;
            continue;
        }

        match section {
            Section::Usage => {
                parse_usage_line(stripped, line_offset + indent, &mut spec, &mut errors);
            }
            Section::Options => {
                if stripped.starts_with('-') {
                    parse_option_line(stripped, line_offset + indent, &mut spec, &mut errors);
                } else if spec.options.is_empty() {
                    errors.push(SpecError {
                        offset: line_offset + indent,
                        message: "expected an option descriptor".to_string(),
                    });
                } else if let Some(last) = spec.options.last_mut() {
                    // Continuation line of the previous description.
                    if !last.description.is_empty() {
                        last.description.push(' ');
                    }
                    last.description.push_str(stripped);
                }
            }
            Section::Arguments => {
                parse_argument_line(stripped, line_offset + indent, &mut spec, &mut errors);
            }
            Section::Preamble => {}
        }
    }

    if errors.is_empty() { Ok(spec) } else { Err(errors) }
}

fn parse_usage_line(line: &str, offset: usize, spec: &mut DocSpec, errors: &mut Vec<SpecError>) {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else {
        return;
    };
    if spec.usage_command.is_none() {
        spec.usage_command = Some(cmd.to_string());
    }
    for word in words {
        let repeating = word.ends_with("...");
        let core = word.trim_end_matches("...");
        let bare = core.trim_matches(|c| c == '[' || c == ']');
        if bare == "options" || bare.starts_with('-') || bare.is_empty() {
            continue;
        }
        if bare.starts_with('<') {
            if !bare.ends_with('>') {
                errors.push(SpecError {
                    offset,
                    message: format!("unterminated placeholder '{word}'"),
                });
                continue;
            }
            spec.positionals.push(Positional {
                name: bare[1..bare.len() - 1].to_string(),
                repeating,
            });
        } else {
            // Bare literal positional (a subcommand word).
            spec.positionals.push(Positional {
                name: bare.to_string(),
                repeating,
            });
        }
    }
}

fn parse_option_line(line: &str, offset: usize, spec: &mut DocSpec, errors: &mut Vec<SpecError>) {
    // The descriptor ends at two consecutive spaces; the rest is prose.
    let (forms, description) = match line.find("  ") {
        Some(idx) => (&line[..idx], line[idx..].trim()),
        None => (line, ""),
    };
    let mut option = OptionDesc {
        description: description.to_string(),
        ..OptionDesc::default()
    };
    for form in forms.split(',') {
        let form = form.trim();
        if form.is_empty() {
            continue;
        }
        let mut parts = form.split([' ', '=']);
        let name = parts.next().unwrap_or_default();
        let value = parts.next();
        if let Some(long) = name.strip_prefix("--") {
            if long.is_empty() {
                errors.push(SpecError {
                    offset,
                    message: "empty long option".to_string(),
                });
                continue;
            }
            option.long = Some(name.to_string());
        } else if let Some(short) = name.strip_prefix('-') {
            if short.len() != 1 {
                errors.push(SpecError {
                    offset,
                    message: format!("malformed short option '{name}'"),
                });
                continue;
            }
            option.short = Some(name.to_string());
        } else {
            errors.push(SpecError {
                offset,
                message: format!("option form '{form}' must start with '-'"),
            });
            continue;
        }
        if let Some(value) = value {
            if value.starts_with('<') && value.ends_with('>') {
                option.variable = Some(value.to_string());
            }
        }
    }
    if option.short.is_none() && option.long.is_none() {
        errors.push(SpecError {
            offset,
            message: "descriptor defines no option".to_string(),
        });
        return;
    }
    spec.options.push(option);
}

fn parse_argument_line(
    line: &str,
    offset: usize,
    spec: &mut DocSpec,
    errors: &mut Vec<SpecError>,
) {
    let (var, condition) = match line.find("  ") {
        Some(idx) => (line[..idx].trim(), line[idx..].trim()),
        None => {
            errors.push(SpecError {
                offset,
                message: "argument binding needs '<var>  condition'".to_string(),
            });
            return;
        }
    };
    if !(var.starts_with('<') && var.ends_with('>')) {
        errors.push(SpecError {
            offset,
            message: format!("'{var}' is not a <variable>"),
        });
        return;
    }
    spec.conditions
        .push((var[1..var.len() - 1].to_string(), condition.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREP: &str = "\
Usage: grep [options] <pattern> <file>...
Options:
  -i, --ignore-case  Ignore case distinctions
  -m <num>, --max-count <num>  Stop after <num> matches
  -q  Quiet
Arguments:
  <file>  __complete_path
";

    #[test]
    fn parses_usage_positionals() {
        let spec = parse(GREP).unwrap();
        assert_eq!(spec.usage_command.as_deref(), Some("grep"));
        assert_eq!(spec.positionals.len(), 2);
        assert_eq!(spec.positionals[0].name, "pattern");
        assert!(spec.positionals[1].repeating);
    }

    #[test]
    fn parses_option_forms_and_values() {
        let spec = parse(GREP).unwrap();
        let opt = spec.find_option("--max-count").unwrap();
        assert_eq!(opt.short.as_deref(), Some("-m"));
        assert_eq!(opt.variable.as_deref(), Some("<num>"));
        assert!(opt.description.contains("Stop after"));
        assert!(spec.find_option("-q").unwrap().long.is_none());
    }

    #[test]
    fn argument_conditions_bound() {
        let spec = parse(GREP).unwrap();
        assert_eq!(spec.condition_for("file"), Some("__complete_path"));
        assert_eq!(spec.condition_for("<file>"), Some("__complete_path"));
        assert_eq!(spec.condition_for("nope"), None);
    }

    #[test]
    fn errors_carry_offsets() {
        let doc = "Options:\n  notanoption  Broken\n";
        let errs = parse(doc).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].offset, doc.find("notanoption").unwrap());
    }

    #[test]
    fn malformed_short_option_rejected() {
        let doc = "Options:\n  -xy  Bad short\n";
        let errs = parse(doc).unwrap_err();
        assert!(errs[0].message.contains("malformed short option"));
    }

    #[test]
    fn description_continuation_lines_join() {
        let doc = "Options:\n  -a  First line\n      continues here\n";
        let spec = parse(doc).unwrap();
        assert_eq!(spec.options[0].description, "First line continues here");
    }
}
