//! Immutable environment snapshot handed to the worker passes.
//!
//! The highlighter and completion engine run off the interactive thread and
//! must never read mutable process state, so the reader captures everything
//! they need up front: the variable map, the working directory, and the
//! builtin/function name sets current at capture time.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
    working_dir: PathBuf,
    builtins: BTreeSet<String>,
    functions: BTreeSet<String>,
}

impl EnvSnapshot {
    pub fn new(
        vars: HashMap<String, String>,
        working_dir: PathBuf,
        builtins: BTreeSet<String>,
        functions: BTreeSet<String>,
    ) -> EnvSnapshot {
        EnvSnapshot {
            vars,
            working_dir,
            builtins,
            functions,
        }
    }

    /// Capture the real process environment. The caller supplies the name
    /// sets because this crate does not know the function registry.
    pub fn capture(builtins: BTreeSet<String>, functions: BTreeSet<String>) -> EnvSnapshot {
        let vars = std::env::vars().collect();
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        EnvSnapshot::new(vars, working_dir, builtins, functions)
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn home(&self) -> Option<PathBuf> {
        self.var("HOME").map(PathBuf::from)
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins.contains(name)
    }

    pub fn is_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    pub fn builtins(&self) -> impl Iterator<Item = &str> {
        self.builtins.iter().map(String::as_str)
    }

    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(String::as_str)
    }

    pub fn var_names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Directories of `PATH`, in order.
    pub fn path_dirs(&self) -> Vec<PathBuf> {
        self.var("PATH")
            .map(|p| p.split(':').filter(|d| !d.is_empty()).map(PathBuf::from).collect())
            .unwrap_or_default()
    }

    /// Directories of `fish_function_path`, colon separated like `PATH`.
    pub fn function_path_dirs(&self) -> Vec<PathBuf> {
        self.var("fish_function_path")
            .map(|p| p.split(':').filter(|d| !d.is_empty()).map(PathBuf::from).collect())
            .unwrap_or_default()
    }

    /// Resolve a path the way the prompt sees it: absolute stays, relative
    /// joins the captured working directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }

    /// Expand a leading `~` or `~user` using the snapshot, not the live
    /// environment.
    pub fn expand_tilde(&self, s: &str) -> String {
        if let Some(rest) = s.strip_prefix('~') {
            let (user, tail) = match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx..]),
                None => (rest, ""),
            };
            if user.is_empty() {
                if let Some(home) = self.home() {
                    return format!("{}{}", home.display(), tail);
                }
            } else {
                return format!("/home/{user}{tail}");
            }
        }
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with(vars: &[(&str, &str)]) -> EnvSnapshot {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvSnapshot::new(map, PathBuf::from("/work"), BTreeSet::new(), BTreeSet::new())
    }

    #[test]
    fn path_dirs_split_and_skip_empty() {
        let snap = snapshot_with(&[("PATH", "/bin::/usr/bin")]);
        assert_eq!(
            snap.path_dirs(),
            vec![PathBuf::from("/bin"), PathBuf::from("/usr/bin")]
        );
    }

    #[test]
    fn resolve_relative_joins_workdir() {
        let snap = snapshot_with(&[]);
        assert_eq!(snap.resolve(Path::new("sub/f")), PathBuf::from("/work/sub/f"));
        assert_eq!(snap.resolve(Path::new("/abs")), PathBuf::from("/abs"));
    }

    #[test]
    fn tilde_expansion_uses_snapshot_home() {
        let snap = snapshot_with(&[("HOME", "/home/me")]);
        assert_eq!(snap.expand_tilde("~/x"), "/home/me/x");
        assert_eq!(snap.expand_tilde("~"), "/home/me");
        assert_eq!(snap.expand_tilde("plain"), "plain");
    }
}
