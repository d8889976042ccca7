//! Bounded ring of killed text fragments.

use std::collections::VecDeque;

/// Direction a kill ran in, relative to the cursor. Forward kills coalesce by
/// appending to the ring head; backward kills prepend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillDirection {
    Forward,
    Backward,
}

/// Ring of previously killed strings. The head is the most recent kill and is
/// what `yank` inserts; `rotate` cycles the head to the back so the next yank
/// sees the next-older entry.
#[derive(Debug)]
pub struct KillRing {
    entries: VecDeque<String>,
    max: usize,
}

pub const DEFAULT_KILL_RING_MAX: usize = 30;

impl Default for KillRing {
    fn default() -> Self {
        Self::new(DEFAULT_KILL_RING_MAX)
    }
}

impl KillRing {
    pub fn new(max: usize) -> KillRing {
        assert!(max > 0);
        KillRing {
            entries: VecDeque::new(),
            max,
        }
    }

    /// Record a kill. With `coalesce` set the text joins the current head
    /// (direction-aware) instead of starting a new entry.
    pub fn add(&mut self, text: String, direction: KillDirection, coalesce: bool) {
        if text.is_empty() {
            return;
        }
        if coalesce {
            if let Some(head) = self.entries.front_mut() {
                match direction {
                    KillDirection::Forward => head.push_str(&text),
                    KillDirection::Backward => head.insert_str(0, &text),
                }
                return;
            }
        }
        self.entries.push_front(text);
        while self.entries.len() > self.max {
            self.entries.pop_back();
        }
    }

    /// Most recent kill, if any.
    pub fn yank(&self) -> Option<&str> {
        self.entries.front().map(|s| s.as_str())
    }

    /// Cycle the head to the back; returns the new head.
    pub fn rotate(&mut self) -> Option<&str> {
        if self.entries.len() > 1 {
            let head = self.entries.pop_front().unwrap();
            self.entries.push_back(head);
        }
        self.yank()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
