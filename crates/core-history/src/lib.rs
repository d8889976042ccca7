//! Persistent command history.
//!
//! A session keeps the last loaded snapshot of its backing file as an owned
//! byte region indexed by item offsets, decoding items lazily, plus the
//! items added by this process. Saving streams the latest on-disk snapshot
//! through a sibling temp file (dropping items this process re-added), then
//! renames it over the target so concurrent readers always observe a
//! complete file. I/O failures are logged and never interrupt the session.

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub mod format;

pub use format::{decode_item, encode_item, scan_offsets};

/// Upper bound on items kept when rewriting the file.
pub const SAVE_MAX_ITEMS: usize = 32_768;
/// New-item count that triggers a save.
pub const SAVE_COUNT: usize = 5;
/// Seconds between time-triggered saves.
pub const SAVE_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryItem {
    pub timestamp: u64,
    pub contents: String,
    /// Paths that must still exist for the item to be offered as an
    /// autosuggestion. Runtime-only; not persisted.
    pub required_paths: Vec<PathBuf>,
}

impl HistoryItem {
    pub fn now(contents: impl Into<String>) -> HistoryItem {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        HistoryItem {
            timestamp,
            contents: contents.into(),
            required_paths: Vec::new(),
        }
    }

    fn paths_still_exist(&self) -> bool {
        self.required_paths.iter().all(|p| p.exists())
    }
}

/// Search variants offered by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Substring anywhere in the command.
    Contains,
    /// The command starts with the needle (autosuggestion lookup).
    Prefix,
    /// Some token of the command contains the needle; matches yield the
    /// token, not the whole command.
    Token,
}

#[derive(Debug)]
pub struct HistorySession {
    name: String,
    file: PathBuf,
    new_items: Vec<HistoryItem>,
    region: Option<Vec<u8>>,
    old_offsets: Vec<usize>,
    loaded_old: bool,
    last_save: Instant,
    save_count: usize,
    save_interval_secs: u64,
    /// Indices already returned to the active search, newest-first order.
    used: Vec<usize>,
}

impl HistorySession {
    /// Open the named session backed by `file`. Nothing is read until
    /// first use.
    pub fn open(name: impl Into<String>, file: PathBuf) -> HistorySession {
        HistorySession {
            name: name.into(),
            file,
            new_items: Vec::new(),
            region: None,
            old_offsets: Vec::new(),
            loaded_old: false,
            last_save: Instant::now(),
            save_count: SAVE_COUNT,
            save_interval_secs: SAVE_INTERVAL_SECS,
            used: Vec::new(),
        }
    }

    pub fn with_thresholds(mut self, count: usize, interval_secs: u64) -> HistorySession {
        self.save_count = count.max(1);
        self.save_interval_secs = interval_secs;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> &PathBuf {
        &self.file
    }

    /// Append a new item and save when thresholds are hit.
    pub fn add(&mut self, item: HistoryItem) {
        if item.contents.trim().is_empty() {
            return;
        }
        self.new_items.push(item);
        if self.new_items.len() >= self.save_count
            || self.last_save.elapsed().as_secs() >= self.save_interval_secs
        {
            self.save();
        }
    }

    fn load_old_if_needed(&mut self) {
        if self.loaded_old {
            return;
        }
        self.loaded_old = true;
        match std::fs::read(&self.file) {
            Ok(bytes) => {
                self.old_offsets = scan_offsets(&bytes);
                self.region = Some(bytes);
                debug!(
                    target: "history",
                    session = %self.name,
                    items = self.old_offsets.len(),
                    "history_loaded"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(target: "history", session = %self.name, %e, "history_read_failed");
            }
        }
    }

    /// Total number of items reachable by index.
    pub fn len(&mut self) -> usize {
        self.load_old_if_needed();
        self.new_items.len() + self.old_offsets.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Item by index, `0` being the newest. New items of this process come
    /// before items read back from disk.
    pub fn item_at(&mut self, idx: usize) -> Option<HistoryItem> {
        let new_count = self.new_items.len();
        if idx < new_count {
            return Some(self.new_items[new_count - 1 - idx].clone());
        }
        self.load_old_if_needed();
        let old_idx = idx - new_count;
        let old_count = self.old_offsets.len();
        if old_idx >= old_count {
            return None;
        }
        let offset = self.old_offsets[old_count - 1 - old_idx];
        let region = self.region.as_ref()?;
        Some(decode_item(&region[offset..]))
    }

    fn matches(item: &HistoryItem, needle: &str, mode: SearchMode) -> Option<String> {
        match mode {
            SearchMode::Contains => item
                .contents
                .contains(needle)
                .then(|| item.contents.clone()),
            SearchMode::Prefix => (item.contents.starts_with(needle)
                && item.contents != needle
                && item.paths_still_exist())
            .then(|| item.contents.clone()),
            SearchMode::Token => {
                core_lex::tokenize_str(&item.contents, core_lex::TokenizerFlags::ACCEPT_UNFINISHED)
                    .into_iter()
                    .filter(|t| t.kind == core_lex::TokenKind::String)
                    .map(|t| t.text)
                    .find(|text| text.contains(needle))
            }
        }
    }

    /// Next older match not yet returned since the last reset. The match's
    /// index is pushed so [`next_match`](Self::next_match) can unwind.
    pub fn prev_match(&mut self, needle: &str, mode: SearchMode) -> Option<String> {
        let start = self.used.last().map(|&i| i + 1).unwrap_or(0);
        let len = self.len();
        for idx in start..len {
            let item = self.item_at(idx)?;
            if let Some(text) = Self::matches(&item, needle, mode) {
                self.used.push(idx);
                return Some(text);
            }
        }
        None
    }

    /// Unwind one step of the search stack, returning the match that is now
    /// current, or `None` when back at the editing line.
    pub fn next_match(&mut self, needle: &str, mode: SearchMode) -> Option<String> {
        self.used.pop();
        let &idx = self.used.last()?;
        let item = self.item_at(idx)?;
        Self::matches(&item, needle, mode)
    }

    /// Forget the search position stack.
    pub fn reset_search(&mut self) {
        self.used.clear();
    }

    /// Newest item whose text extends `prefix` and whose required paths all
    /// still exist.
    pub fn suggestion(&mut self, prefix: &str) -> Option<String> {
        if prefix.is_empty() {
            return None;
        }
        let len = self.len();
        for idx in 0..len {
            let item = self.item_at(idx)?;
            if let Some(text) = Self::matches(&item, prefix, SearchMode::Prefix) {
                return Some(text);
            }
        }
        None
    }

    /// Periodic variant used by the reader's tick: saves only when the
    /// count or interval threshold has been crossed.
    pub fn save_if_due(&mut self) {
        if self.new_items.is_empty() {
            return;
        }
        if self.new_items.len() >= self.save_count
            || self.last_save.elapsed().as_secs() >= self.save_interval_secs
        {
            self.save();
        }
    }

    /// Rewrite the backing file: re-read the latest on-disk snapshot, drop
    /// items this process re-added, bound the total, stream to a sibling
    /// temp file and rename it into place.
    pub fn save(&mut self) {
        if self.new_items.is_empty() {
            return;
        }
        if let Err(e) = self.save_inner() {
            warn!(target: "history", session = %self.name, %e, "history_save_failed");
            return;
        }
        // Re-reference the rewritten file; in-memory state restarts clean.
        self.new_items.clear();
        self.region = None;
        self.old_offsets.clear();
        self.loaded_old = false;
        self.used.clear();
        self.last_save = Instant::now();
        debug!(target: "history", session = %self.name, "history_saved");
    }

    fn save_inner(&mut self) -> std::io::Result<()> {
        // Step 1: fresh snapshot; sibling shells may have written since we
        // loaded.
        let disk = std::fs::read(&self.file).unwrap_or_default();
        let disk_offsets = scan_offsets(&disk);

        // Step 2: contents added by this process shadow older duplicates.
        let new_set: HashSet<&str> = self
            .new_items
            .iter()
            .map(|i| i.contents.as_str())
            .collect();

        // Old items, oldest first, minus anything we re-added; then dedup
        // within the survivors keeping the newest occurrence.
        let mut merged: Vec<HistoryItem> = Vec::with_capacity(disk_offsets.len() + self.new_items.len());
        for &offset in &disk_offsets {
            let item = decode_item(&disk[offset..]);
            if !new_set.contains(item.contents.as_str()) {
                merged.push(item);
            }
        }
        merged.extend(self.new_items.iter().cloned());
        let mut seen: HashSet<String> = HashSet::new();
        let mut unique_rev: Vec<HistoryItem> = Vec::with_capacity(merged.len());
        for item in merged.into_iter().rev() {
            if seen.insert(item.contents.clone()) {
                unique_rev.push(item);
            }
        }
        unique_rev.truncate(SAVE_MAX_ITEMS);
        unique_rev.reverse();

        // Steps 3-6: temp sibling, stream, fsync, rename.
        if let Some(parent) = self.file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.file.with_extension("tmp");
        {
            let mut out = std::fs::File::create(&tmp_path)?;
            for item in &unique_rev {
                out.write_all(encode_item(item).as_bytes())?;
            }
            out.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.file)?;
        Ok(())
    }
}

impl Drop for HistorySession {
    fn drop(&mut self) {
        self.save();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(dir: &std::path::Path) -> HistorySession {
        HistorySession::open("fish", dir.join("fish_history")).with_thresholds(100, 10_000)
    }

    #[test]
    fn items_index_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = session(tmp.path());
        s.add(HistoryItem::now("first"));
        s.add(HistoryItem::now("second"));
        assert_eq!(s.item_at(0).unwrap().contents, "second");
        assert_eq!(s.item_at(1).unwrap().contents, "first");
        assert!(s.item_at(2).is_none());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = session(tmp.path());
        s.add(HistoryItem::now("cmd one"));
        s.add(HistoryItem::now("cmd two"));
        s.save();
        let mut fresh = session(tmp.path());
        assert_eq!(fresh.len(), 2);
        assert_eq!(fresh.item_at(0).unwrap().contents, "cmd two");
        assert_eq!(fresh.item_at(1).unwrap().contents, "cmd one");
    }

    #[test]
    fn save_dedups_keeping_newest() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = session(tmp.path());
        s.add(HistoryItem::now("cmd"));
        s.add(HistoryItem::now("foo"));
        s.add(HistoryItem::now("cmd"));
        s.save();
        let data = std::fs::read_to_string(tmp.path().join("fish_history")).unwrap();
        let offsets = scan_offsets(data.as_bytes());
        let decoded: Vec<String> = offsets
            .iter()
            .map(|&o| decode_item(&data.as_bytes()[o..]).contents)
            .collect();
        // Newest-last on disk, a single copy of the duplicate.
        assert_eq!(decoded, vec!["foo", "cmd"]);
    }

    #[test]
    fn save_merges_with_disk_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let mut a = session(tmp.path());
        a.add(HistoryItem::now("from a"));
        a.save();
        let mut b = session(tmp.path());
        b.add(HistoryItem::now("from b"));
        b.save();
        let mut check = session(tmp.path());
        assert_eq!(check.len(), 2);
        assert_eq!(check.item_at(0).unwrap().contents, "from b");
        assert_eq!(check.item_at(1).unwrap().contents, "from a");
    }

    #[test]
    fn temp_file_removed_after_save() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = session(tmp.path());
        s.add(HistoryItem::now("x"));
        s.save();
        assert!(tmp.path().join("fish_history").exists());
        assert!(!tmp.path().join("fish_history.tmp").exists());
    }

    #[test]
    fn threshold_triggers_save() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s =
            HistorySession::open("fish", tmp.path().join("fish_history")).with_thresholds(2, 10_000);
        s.add(HistoryItem::now("one"));
        assert!(!tmp.path().join("fish_history").exists());
        s.add(HistoryItem::now("two"));
        assert!(tmp.path().join("fish_history").exists());
    }

    #[test]
    fn prev_match_walks_newest_first_without_repeats() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = session(tmp.path());
        s.add(HistoryItem::now("cmd"));
        s.add(HistoryItem::now("foo"));
        s.add(HistoryItem::now("cmd extra"));
        assert_eq!(s.prev_match("cmd", SearchMode::Contains).as_deref(), Some("cmd extra"));
        assert_eq!(s.prev_match("cmd", SearchMode::Contains).as_deref(), Some("cmd"));
        assert_eq!(s.prev_match("cmd", SearchMode::Contains), None);
    }

    #[test]
    fn next_match_unwinds_stack() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = session(tmp.path());
        s.add(HistoryItem::now("alpha"));
        s.add(HistoryItem::now("beta"));
        s.add(HistoryItem::now("alpine"));
        assert_eq!(s.prev_match("al", SearchMode::Contains).as_deref(), Some("alpine"));
        assert_eq!(s.prev_match("al", SearchMode::Contains).as_deref(), Some("alpha"));
        assert_eq!(s.next_match("al", SearchMode::Contains).as_deref(), Some("alpine"));
        assert_eq!(s.next_match("al", SearchMode::Contains), None);
    }

    #[test]
    fn empty_needle_enumerates_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = session(tmp.path());
        s.add(HistoryItem::now("cmd"));
        s.add(HistoryItem::now("foo"));
        s.save();
        let mut fresh = session(tmp.path());
        assert_eq!(fresh.prev_match("", SearchMode::Contains).as_deref(), Some("foo"));
        assert_eq!(fresh.prev_match("", SearchMode::Contains).as_deref(), Some("cmd"));
    }

    #[test]
    fn token_search_returns_token() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = session(tmp.path());
        s.add(HistoryItem::now("cp /etc/hosts /tmp/backup"));
        assert_eq!(
            s.prev_match("hosts", SearchMode::Token).as_deref(),
            Some("/etc/hosts")
        );
    }

    #[test]
    fn suggestion_requires_existing_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = session(tmp.path());
        let path = tmp.path().join("present");
        std::fs::write(&path, "x").unwrap();
        let mut item = HistoryItem::now("cat present-file");
        item.required_paths.push(path.clone());
        s.add(item);
        assert_eq!(s.suggestion("cat").as_deref(), Some("cat present-file"));
        std::fs::remove_file(&path).unwrap();
        assert_eq!(s.suggestion("cat"), None);
    }

    #[test]
    fn blank_commands_not_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = session(tmp.path());
        s.add(HistoryItem::now("   "));
        assert_eq!(s.len(), 0);
    }
}
