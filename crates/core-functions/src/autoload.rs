//! On-demand loading of function definition files from a search path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Instant, SystemTime};
use tracing::debug;

/// Entries kept before the oldest loads are evicted.
const CACHE_MAX: usize = 1024;

#[derive(Debug, Clone)]
pub struct AutoloadEntry {
    pub name: String,
    pub path: Option<PathBuf>,
    pub mtime: Option<SystemTime>,
    pub loaded_at: Instant,
    /// Records a failed lookup so the search path is not re-scanned on
    /// every query.
    pub is_placeholder: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Cached and unchanged on disk.
    AlreadyLoaded,
    /// Parsed now (first load or mtime change).
    Loaded,
    /// No file in the search path.
    Absent,
}

/// Owner-side callbacks: parsing a definition file into live state, and
/// dropping that state again on unload or eviction.
pub trait AutoloadHandler {
    fn parse_file(&self, name: &str, path: &Path);
    fn on_unload(&self, name: &str);
}

struct Inner {
    cache: HashMap<String, AutoloadEntry>,
    path_snapshot: Vec<PathBuf>,
}

/// Cache of load attempts for one search-path variable.
pub struct Autoload {
    variable: String,
    inner: Mutex<Inner>,
}

impl Autoload {
    pub fn new(variable: impl Into<String>) -> Autoload {
        Autoload {
            variable: variable.into(),
            inner: Mutex::new(Inner {
                cache: HashMap::new(),
                path_snapshot: Vec::new(),
            }),
        }
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    fn file_mtime(path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    /// Resolve `name`, parsing its file when new or changed.
    pub fn load(
        &self,
        name: &str,
        path_dirs: &[PathBuf],
        handler: &dyn AutoloadHandler,
        reload: bool,
    ) -> LoadOutcome {
        let mut flushed: Vec<String> = Vec::new();
        let decision = {
            let mut inner = self.inner.lock().unwrap();
            if inner.path_snapshot != path_dirs {
                // Search path changed: every cached resolution is stale.
                inner.path_snapshot = path_dirs.to_vec();
                flushed = inner
                    .cache
                    .drain()
                    .filter(|(_, e)| !e.is_placeholder)
                    .map(|(n, _)| n)
                    .collect();
            }
            match inner.cache.get(name) {
                Some(entry) if entry.is_placeholder && !reload => Some(LoadOutcome::Absent),
                Some(entry) if !reload => {
                    let path = entry.path.clone();
                    match path {
                        Some(path) => {
                            let current = Self::file_mtime(&path);
                            if current.is_some() && current == entry.mtime {
                                Some(LoadOutcome::AlreadyLoaded)
                            } else {
                                // Changed or vanished: fall through to a
                                // fresh scan.
                                inner.cache.remove(name);
                                None
                            }
                        }
                        None => Some(LoadOutcome::Absent),
                    }
                }
                _ => None,
            }
        };
        for stale in &flushed {
            handler.on_unload(stale);
        }
        if let Some(outcome) = decision {
            return outcome;
        }

        // Scan the search path outside the lock; parsing may re-enter.
        let mut found: Option<(PathBuf, Option<SystemTime>)> = None;
        for dir in path_dirs {
            let candidate = dir.join(format!("{name}.fish"));
            if candidate.is_file() {
                let mtime = Self::file_mtime(&candidate);
                found = Some((candidate, mtime));
                break;
            }
        }

        match found {
            Some((path, mtime)) => {
                handler.parse_file(name, &path);
                let evicted = {
                    let mut inner = self.inner.lock().unwrap();
                    inner.cache.insert(
                        name.to_string(),
                        AutoloadEntry {
                            name: name.to_string(),
                            path: Some(path.clone()),
                            mtime,
                            loaded_at: Instant::now(),
                            is_placeholder: false,
                        },
                    );
                    evict_if_full(&mut inner)
                };
                if let Some(old) = evicted {
                    handler.on_unload(&old);
                }
                debug!(target: "autoload", name, path = %path.display(), "autoload_parsed");
                LoadOutcome::Loaded
            }
            None => {
                let mut inner = self.inner.lock().unwrap();
                inner.cache.insert(
                    name.to_string(),
                    AutoloadEntry {
                        name: name.to_string(),
                        path: None,
                        mtime: None,
                        loaded_at: Instant::now(),
                        is_placeholder: true,
                    },
                );
                LoadOutcome::Absent
            }
        }
    }

    /// Explicitly drop one entry, informing the handler first.
    pub fn unload(&self, name: &str, handler: &dyn AutoloadHandler) -> bool {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            inner.cache.remove(name)
        };
        match removed {
            Some(entry) => {
                if !entry.is_placeholder {
                    handler.on_unload(name);
                }
                true
            }
            None => false,
        }
    }

    /// Drop everything (used on shutdown and by tests).
    pub fn reset(&self, handler: &dyn AutoloadHandler) {
        let loaded: Vec<String> = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .cache
                .drain()
                .filter(|(_, e)| !e.is_placeholder)
                .map(|(n, _)| n)
                .collect()
        };
        for name in loaded {
            handler.on_unload(&name);
        }
    }

    pub fn entry(&self, name: &str) -> Option<AutoloadEntry> {
        self.inner.lock().unwrap().cache.get(name).cloned()
    }
}

fn evict_if_full(inner: &mut Inner) -> Option<String> {
    if inner.cache.len() <= CACHE_MAX {
        return None;
    }
    let oldest = inner
        .cache
        .values()
        .filter(|e| !e.is_placeholder)
        .min_by_key(|e| e.loaded_at)
        .map(|e| e.name.clone())?;
    inner.cache.remove(&oldest);
    Some(oldest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        parsed: StdMutex<Vec<String>>,
        unloaded: StdMutex<Vec<String>>,
    }
    impl AutoloadHandler for Recorder {
        fn parse_file(&self, name: &str, _path: &Path) {
            self.parsed.lock().unwrap().push(name.to_string());
        }
        fn on_unload(&self, name: &str) {
            self.unloaded.lock().unwrap().push(name.to_string());
        }
    }

    fn write_func(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(format!("{name}.fish"));
        std::fs::write(&path, format!("function {name}\nend\n")).unwrap();
        path
    }

    #[test]
    fn first_load_parses_second_hits_cache() {
        let tmp = tempfile::tempdir().unwrap();
        write_func(tmp.path(), "greet");
        let auto = Autoload::new("fish_function_path");
        let handler = Recorder::default();
        let dirs = vec![tmp.path().to_path_buf()];
        assert_eq!(auto.load("greet", &dirs, &handler, false), LoadOutcome::Loaded);
        assert_eq!(
            auto.load("greet", &dirs, &handler, false),
            LoadOutcome::AlreadyLoaded
        );
        assert_eq!(handler.parsed.lock().unwrap().len(), 1);
    }

    #[test]
    fn missing_name_becomes_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let auto = Autoload::new("fish_function_path");
        let handler = Recorder::default();
        let dirs = vec![tmp.path().to_path_buf()];
        assert_eq!(auto.load("ghost", &dirs, &handler, false), LoadOutcome::Absent);
        assert!(auto.entry("ghost").unwrap().is_placeholder);
        // Second query answers from the placeholder without rescanning.
        assert_eq!(auto.load("ghost", &dirs, &handler, false), LoadOutcome::Absent);
    }

    #[test]
    fn mtime_change_triggers_reparse() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_func(tmp.path(), "greet");
        let auto = Autoload::new("fish_function_path");
        let handler = Recorder::default();
        let dirs = vec![tmp.path().to_path_buf()];
        auto.load("greet", &dirs, &handler, false);
        // Backdate the recorded mtime instead of sleeping.
        let stale = SystemTime::now() - std::time::Duration::from_secs(60);
        {
            let mut inner = auto.inner.lock().unwrap();
            inner.cache.get_mut("greet").unwrap().mtime = Some(stale);
        }
        assert_eq!(auto.load("greet", &dirs, &handler, false), LoadOutcome::Loaded);
        assert_eq!(handler.parsed.lock().unwrap().len(), 2);
        drop(path);
    }

    #[test]
    fn path_change_flushes_and_unloads() {
        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();
        write_func(tmp_a.path(), "greet");
        let auto = Autoload::new("fish_function_path");
        let handler = Recorder::default();
        auto.load("greet", &[tmp_a.path().to_path_buf()], &handler, false);
        // New search path: the cached entry must go and the owner hears
        // about it.
        assert_eq!(
            auto.load("greet", &[tmp_b.path().to_path_buf()], &handler, false),
            LoadOutcome::Absent
        );
        assert_eq!(handler.unloaded.lock().unwrap().as_slice(), ["greet"]);
    }

    #[test]
    fn unload_informs_handler_once() {
        let tmp = tempfile::tempdir().unwrap();
        write_func(tmp.path(), "greet");
        let auto = Autoload::new("fish_function_path");
        let handler = Recorder::default();
        auto.load("greet", &[tmp.path().to_path_buf()], &handler, false);
        assert!(auto.unload("greet", &handler));
        assert!(!auto.unload("greet", &handler));
        assert_eq!(handler.unloaded.lock().unwrap().len(), 1);
    }
}
