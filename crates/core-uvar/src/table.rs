//! Insertion-ordered universal variable table.

/// One variable's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarEntry {
    pub value: String,
    pub exported: bool,
}

/// Mutation observer: the shell-side client uses this to mirror broadcasts
/// into its own environment.
pub trait VarEventSink {
    fn on_set(&self, key: &str, value: &str, exported: bool);
    fn on_erased(&self, key: &str);
}

/// Variable map preserving insertion order. Lookups are linear; the table
/// holds user configuration, not bulk data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarTable {
    entries: Vec<(String, VarEntry)>,
}

impl VarTable {
    pub fn new() -> VarTable {
        VarTable::default()
    }

    /// Insert or update; returns true when the stored state changed.
    pub fn set(&mut self, key: &str, value: &str, exported: bool) -> bool {
        if let Some((_, entry)) = self.entries.iter_mut().find(|(k, _)| k == key) {
            if entry.value == value && entry.exported == exported {
                return false;
            }
            entry.value = value.to_string();
            entry.exported = exported;
            return true;
        }
        self.entries.push((
            key.to_string(),
            VarEntry {
                value: value.to_string(),
                exported,
            },
        ));
        true
    }

    pub fn erase(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != key);
        self.entries.len() != before
    }

    pub fn get(&self, key: &str) -> Option<&VarEntry> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, e)| e)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VarEntry)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
