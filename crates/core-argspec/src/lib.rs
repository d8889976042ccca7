//! Per-command argument grammar registry.
//!
//! Grammars register under `(command, doc_name)`; re-registering the same
//! doc name replaces it, and when several grammars exist for one command the
//! first registered wins for queries. All mutation goes through one interior
//! lock.

use std::collections::HashMap;
use std::sync::Mutex;

pub mod grammar;

pub use grammar::{DocSpec, OptionDesc, Positional, SpecError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentStatus {
    Invalid,
    Valid,
    ValidPrefix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidateFlags {
    /// Let an unambiguous option prefix count as `ValidPrefix`.
    pub allow_incomplete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub token: String,
    pub description: String,
}

#[derive(Debug)]
struct SpecRecord {
    doc_name: String,
    spec: DocSpec,
}

#[derive(Debug, Default)]
pub struct ArgSpecRegistry {
    inner: Mutex<HashMap<String, Vec<SpecRecord>>>,
}

impl ArgSpecRegistry {
    pub fn new() -> ArgSpecRegistry {
        ArgSpecRegistry::default()
    }

    /// Parse and register a grammar. Parse errors leave the registry
    /// untouched.
    pub fn register(
        &self,
        command: &str,
        doc_name: &str,
        doc_text: &str,
    ) -> Result<(), Vec<SpecError>> {
        let spec = grammar::parse(doc_text)?;
        let mut inner = self.inner.lock().unwrap();
        let records = inner.entry(command.to_string()).or_default();
        if let Some(existing) = records.iter_mut().find(|r| r.doc_name == doc_name) {
            existing.spec = spec;
        } else {
            records.push(SpecRecord {
                doc_name: doc_name.to_string(),
                spec,
            });
        }
        tracing::debug!(target: "argspec", command, doc_name, "grammar_registered");
        Ok(())
    }

    pub fn unregister(&self, command: &str, doc_name: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(records) = inner.get_mut(command) else {
            return false;
        };
        let before = records.len();
        records.retain(|r| r.doc_name != doc_name);
        let removed = records.len() != before;
        if records.is_empty() {
            inner.remove(command);
        }
        removed
    }

    pub fn has_spec(&self, command: &str) -> bool {
        self.inner.lock().unwrap().contains_key(command)
    }

    pub fn registered_doc_names(&self, command: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .get(command)
            .map(|records| records.iter().map(|r| r.doc_name.clone()).collect())
            .unwrap_or_default()
    }

    fn with_first_spec<T>(&self, command: &str, f: impl FnOnce(&DocSpec) -> T) -> Option<T> {
        let inner = self.inner.lock().unwrap();
        inner
            .get(command)
            .and_then(|records| records.first())
            .map(|record| f(&record.spec))
    }

    /// Per-argument validity of `argv` against the first-registered grammar.
    /// Commands with no grammar validate everything.
    pub fn validate(&self, command: &str, argv: &[String], flags: ValidateFlags) -> Vec<ArgumentStatus> {
        self.with_first_spec(command, |spec| {
            let mut out = Vec::with_capacity(argv.len());
            let mut switches_done = false;
            let mut value_pending = false;
            let mut positionals_seen = 0usize;
            for arg in argv {
                if value_pending {
                    value_pending = false;
                    out.push(ArgumentStatus::Valid);
                    continue;
                }
                if arg == "--" && !switches_done {
                    switches_done = true;
                    out.push(ArgumentStatus::Valid);
                    continue;
                }
                if arg.starts_with('-') && !switches_done {
                    if let Some(opt) = spec.find_option(arg) {
                        value_pending = opt.variable.is_some();
                        out.push(ArgumentStatus::Valid);
                    } else if flags.allow_incomplete
                        && arg.starts_with("--")
                        && spec.options.iter().any(|o| o.long_has_prefix(arg))
                    {
                        out.push(ArgumentStatus::ValidPrefix);
                    } else {
                        out.push(ArgumentStatus::Invalid);
                    }
                    continue;
                }
                let accepted = match spec.positionals.get(positionals_seen) {
                    Some(_) => true,
                    None => spec.positionals.last().map(|p| p.repeating).unwrap_or(false),
                };
                positionals_seen += 1;
                out.push(if accepted {
                    ArgumentStatus::Valid
                } else {
                    ArgumentStatus::Invalid
                });
            }
            out
        })
        .unwrap_or_else(|| vec![ArgumentStatus::Valid; argv.len()])
    }

    /// Candidates for the argument after `argv`, from the first-registered
    /// grammar: the pending option value placeholder when one is expected,
    /// otherwise every option form plus positional placeholders.
    pub fn suggest_next(&self, command: &str, argv: &[String]) -> Vec<Suggestion> {
        self.with_first_spec(command, |spec| {
            if let Some(last) = argv.last() {
                if let Some(opt) = spec.find_option(last) {
                    if let Some(var) = &opt.variable {
                        return vec![Suggestion {
                            token: var.clone(),
                            description: opt.description.clone(),
                        }];
                    }
                }
            }
            let mut out = Vec::new();
            for opt in &spec.options {
                for form in [&opt.long, &opt.short].into_iter().flatten() {
                    if !argv.iter().any(|a| a == form) {
                        out.push(Suggestion {
                            token: form.clone(),
                            description: opt.description.clone(),
                        });
                    }
                }
            }
            let consumed = argv.iter().filter(|a| !a.starts_with('-')).count();
            for pos in spec.positionals.iter().skip(consumed) {
                out.push(Suggestion {
                    token: format!("<{}>", pos.name),
                    description: String::new(),
                });
            }
            out
        })
        .unwrap_or_default()
    }

    /// Condition command bound to `<var>` in the first-registered grammar.
    pub fn conditions_for(&self, command: &str, variable: &str) -> Option<String> {
        self.with_first_spec(command, |spec| {
            spec.condition_for(variable).map(str::to_string)
        })
        .flatten()
    }

    /// Description of an option in the first-registered grammar.
    pub fn description_for(&self, command: &str, option: &str) -> Option<String> {
        self.with_first_spec(command, |spec| {
            spec.find_option(option).map(|o| o.description.clone())
        })
        .flatten()
    }

    /// Whether `option` is known for `command`; `None` when no grammar is
    /// registered at all.
    pub fn option_validity(&self, command: &str, option: &str) -> Option<bool> {
        self.with_first_spec(command, |spec| spec.find_option(option).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LS_DOC: &str = "\
Usage: ls [options] <path>...
Options:
  -l  Long listing
  -a, --all  Include hidden entries
  -w <cols>, --width <cols>  Format to <cols> columns
Arguments:
  <path>  __complete_path
";

    fn registry() -> ArgSpecRegistry {
        let reg = ArgSpecRegistry::new();
        reg.register("ls", "base", LS_DOC).unwrap();
        reg
    }

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn register_and_query() {
        let reg = registry();
        assert!(reg.has_spec("ls"));
        assert_eq!(
            reg.description_for("ls", "--all").as_deref(),
            Some("Include hidden entries")
        );
        assert_eq!(reg.conditions_for("ls", "<path>").as_deref(), Some("__complete_path"));
        assert_eq!(reg.option_validity("ls", "-l"), Some(true));
        assert_eq!(reg.option_validity("ls", "-z"), Some(false));
        assert_eq!(reg.option_validity("cat", "-z"), None);
    }

    #[test]
    fn same_doc_name_replaces() {
        let reg = registry();
        reg.register("ls", "base", "Options:\n  -q  Quiet\n").unwrap();
        assert_eq!(reg.option_validity("ls", "-l"), Some(false));
        assert_eq!(reg.option_validity("ls", "-q"), Some(true));
        assert_eq!(reg.registered_doc_names("ls"), vec!["base".to_string()]);
    }

    #[test]
    fn first_registered_wins() {
        let reg = registry();
        reg.register("ls", "extra", "Options:\n  -z  Zed\n").unwrap();
        // `-z` lives only in the second grammar; queries use the first.
        assert_eq!(reg.option_validity("ls", "-z"), Some(false));
        assert_eq!(reg.registered_doc_names("ls").len(), 2);
    }

    #[test]
    fn validate_options_and_positionals() {
        let reg = registry();
        let statuses = reg.validate(
            "ls",
            &argv(&["-l", "--all", "src", "-z"]),
            ValidateFlags::default(),
        );
        assert_eq!(
            statuses,
            vec![
                ArgumentStatus::Valid,
                ArgumentStatus::Valid,
                ArgumentStatus::Valid,
                ArgumentStatus::Invalid
            ]
        );
    }

    #[test]
    fn validate_option_value_consumed() {
        let reg = registry();
        let statuses = reg.validate("ls", &argv(&["-w", "80"]), ValidateFlags::default());
        assert_eq!(statuses, vec![ArgumentStatus::Valid, ArgumentStatus::Valid]);
    }

    #[test]
    fn validate_prefix_with_flag() {
        let reg = registry();
        let flags = ValidateFlags {
            allow_incomplete: true,
        };
        let statuses = reg.validate("ls", &argv(&["--al"]), flags);
        assert_eq!(statuses, vec![ArgumentStatus::ValidPrefix]);
        let statuses = reg.validate("ls", &argv(&["--al"]), ValidateFlags::default());
        assert_eq!(statuses, vec![ArgumentStatus::Invalid]);
    }

    #[test]
    fn double_dash_disables_option_matching() {
        let reg = registry();
        let statuses = reg.validate("ls", &argv(&["--", "-l"]), ValidateFlags::default());
        // After `--`, `-l` is a positional path argument.
        assert_eq!(statuses, vec![ArgumentStatus::Valid, ArgumentStatus::Valid]);
    }

    #[test]
    fn suggest_next_lists_unused_options() {
        let reg = registry();
        let suggestions = reg.suggest_next("ls", &argv(&["-l"]));
        let tokens: Vec<&str> = suggestions.iter().map(|s| s.token.as_str()).collect();
        assert!(tokens.contains(&"--all"));
        assert!(tokens.contains(&"-a"));
        assert!(!tokens.contains(&"-l"));
        assert!(tokens.contains(&"<path>"));
    }

    #[test]
    fn suggest_next_after_value_option() {
        let reg = registry();
        let suggestions = reg.suggest_next("ls", &argv(&["-w"]));
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].token, "<cols>");
    }

    #[test]
    fn no_grammar_validates_everything() {
        let reg = ArgSpecRegistry::new();
        let statuses = reg.validate("cat", &argv(&["-z"]), ValidateFlags::default());
        assert_eq!(statuses, vec![ArgumentStatus::Valid]);
        assert!(reg.suggest_next("cat", &[]).is_empty());
    }

    #[test]
    fn unregister_drops_grammar() {
        let reg = registry();
        assert!(reg.unregister("ls", "base"));
        assert!(!reg.has_spec("ls"));
        assert!(!reg.unregister("ls", "base"));
    }
}
