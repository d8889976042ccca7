//! Edit buffer for the interactive reader: a flat sequence of code points
//! with colour and indent arrays kept in lockstep, plus the kill ring.
//!
//! The colour and indent arrays always hold one more slot than the text so a
//! sentinel exists at `len()`; every text mutation resizes them together.
//! The generation counter increments on every text mutation and is what the
//! reader uses to discard stale asynchronous highlight/completion results.

use std::ops::Range;

pub mod color;
pub mod kill;

pub use color::{Highlight, Overlay, Role};
pub use kill::{DEFAULT_KILL_RING_MAX, KillDirection, KillRing};

/// Horizontal motion direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

#[derive(Debug, Default)]
pub struct EditBuffer {
    chars: Vec<char>,
    colors: Vec<Highlight>,
    indents: Vec<u32>,
    cursor: usize,
    generation: u64,
    /// Extent of the text inserted by the last yank, so yank-rotate can
    /// replace it. Cleared by any other mutation.
    last_yank: Option<Range<usize>>,
}

impl EditBuffer {
    pub fn new() -> EditBuffer {
        let mut buf = EditBuffer::default();
        buf.sync_parallel_arrays();
        buf
    }

    /// Number of code points.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn text_range(&self, range: Range<usize>) -> String {
        let end = range.end.min(self.chars.len());
        let start = range.start.min(end);
        self.chars[start..end].iter().collect()
    }

    pub fn colors(&self) -> &[Highlight] {
        &self.colors
    }

    pub fn indents(&self) -> &[u32] {
        &self.indents
    }

    /// Move the cursor, clamped to `[0, len]`. Cursor motion is not a text
    /// mutation and does not bump the generation.
    pub fn set_cursor(&mut self, pos: usize) {
        self.cursor = pos.min(self.chars.len());
    }

    /// Replace the whole buffer.
    pub fn set(&mut self, text: &str, cursor: usize) {
        self.chars = text.chars().collect();
        self.cursor = cursor.min(self.chars.len());
        self.touch();
    }

    /// Insert at the cursor and advance past the inserted text.
    pub fn insert(&mut self, text: &str) {
        let incoming: Vec<char> = text.chars().collect();
        let at = self.cursor;
        self.chars.splice(at..at, incoming.iter().copied());
        self.cursor = at + incoming.len();
        self.touch();
    }

    /// Delete the code point before the cursor. Returns false at offset 0.
    pub fn delete_backward(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        self.chars.remove(self.cursor);
        self.touch();
        true
    }

    /// Delete the code point under the cursor. Returns false at end.
    pub fn delete_forward(&mut self) -> bool {
        if self.cursor >= self.chars.len() {
            return false;
        }
        self.chars.remove(self.cursor);
        self.touch();
        true
    }

    /// Remove `range`, push the removed text on the kill ring, and leave the
    /// cursor at the start of the removed extent.
    pub fn kill(
        &mut self,
        range: Range<usize>,
        direction: KillDirection,
        coalesce: bool,
        ring: &mut KillRing,
    ) {
        let removed = self.remove_range(range.clone());
        if removed.is_empty() {
            return;
        }
        ring.add(removed, direction, coalesce);
        self.cursor = range.start.min(self.chars.len());
        self.touch();
    }

    /// Insert the kill ring head at the cursor.
    pub fn yank(&mut self, ring: &KillRing) {
        let Some(text) = ring.yank().map(str::to_owned) else {
            return;
        };
        let start = self.cursor;
        self.insert(&text);
        self.last_yank = Some(start..self.cursor);
    }

    /// Replace the text of the previous yank with the next ring entry. A
    /// no-op unless the last mutation was a yank.
    pub fn yank_rotate(&mut self, ring: &mut KillRing) {
        let Some(prev) = self.last_yank.clone() else {
            return;
        };
        self.remove_range(prev.clone());
        self.cursor = prev.start;
        self.touch();
        if let Some(next) = ring.rotate().map(str::to_owned) {
            let start = self.cursor;
            self.insert(&next);
            self.last_yank = Some(start..self.cursor);
        }
    }

    /// Offset of the word boundary one word away from the cursor.
    pub fn word_boundary(&self, direction: Direction) -> usize {
        match direction {
            Direction::Left => word::prev_word_start(&self.chars, self.cursor),
            Direction::Right => word::next_word_end(&self.chars, self.cursor),
        }
    }

    /// Move the cursor by one word.
    pub fn move_by_word(&mut self, direction: Direction) {
        self.cursor = self.word_boundary(direction);
    }

    /// Kill from the cursor to the word boundary in `direction`.
    pub fn kill_word(&mut self, direction: Direction, ring: &mut KillRing, coalesce: bool) {
        let boundary = self.word_boundary(direction);
        let (range, kdir) = match direction {
            Direction::Left => (boundary..self.cursor, KillDirection::Backward),
            Direction::Right => (self.cursor..boundary, KillDirection::Forward),
        };
        if range.start < range.end {
            self.kill(range, kdir, coalesce, ring);
        }
    }

    /// Install a freshly computed colour array. The array must carry the
    /// sentinel slot; anything shorter is padded with the sentinel.
    pub fn set_colors(&mut self, mut colors: Vec<Highlight>) {
        colors.resize(self.chars.len() + 1, Highlight::uncolored());
        self.colors = colors;
    }

    /// Install a freshly computed indent array (one slot per code point plus
    /// sentinel, padded with the last depth).
    pub fn set_indents(&mut self, mut indents: Vec<u32>) {
        let pad = indents.last().copied().unwrap_or(0);
        indents.resize(self.chars.len() + 1, pad);
        self.indents = indents;
    }

    fn remove_range(&mut self, range: Range<usize>) -> String {
        let end = range.end.min(self.chars.len());
        let start = range.start.min(end);
        self.chars.drain(start..end).collect()
    }

    fn touch(&mut self) {
        self.generation += 1;
        self.last_yank = None;
        self.sync_parallel_arrays();
        debug_assert!(self.cursor <= self.chars.len());
    }

    fn sync_parallel_arrays(&mut self) {
        self.colors
            .resize(self.chars.len() + 1, Highlight::uncolored());
        self.indents.resize(self.chars.len() + 1, 0);
    }
}

/// Word classification and display-width helpers.
pub mod word {
    use unicode_segmentation::UnicodeSegmentation;
    use unicode_width::UnicodeWidthChar;

    /// A word character is alphanumeric or underscore.
    pub fn is_word_char(c: char) -> bool {
        c == '_' || c.is_alphanumeric()
    }

    /// Start offset of the word left of `from`: skip separators, then the
    /// word itself.
    pub fn prev_word_start(chars: &[char], from: usize) -> usize {
        let mut i = from.min(chars.len());
        while i > 0 && !is_word_char(chars[i - 1]) {
            i -= 1;
        }
        while i > 0 && is_word_char(chars[i - 1]) {
            i -= 1;
        }
        i
    }

    /// End offset of the word right of `from`.
    pub fn next_word_end(chars: &[char], from: usize) -> usize {
        let mut i = from;
        while i < chars.len() && !is_word_char(chars[i]) {
            i += 1;
        }
        while i < chars.len() && is_word_char(chars[i]) {
            i += 1;
        }
        i
    }

    /// Terminal cell width of one code point.
    pub fn char_width(c: char) -> usize {
        UnicodeWidthChar::width(c).unwrap_or(0)
    }

    /// Terminal cell width of one grapheme cluster. Combining sequences
    /// count once; anything wider than two cells is clamped to two.
    pub fn grapheme_width(g: &str) -> usize {
        let w: usize = g.chars().map(char_width).sum();
        w.clamp(1, 2)
    }

    /// Terminal cell width of a string, summed per grapheme cluster.
    pub fn display_width(s: &str) -> usize {
        s.graphemes(true).map(grapheme_width).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(text: &str, cursor: usize) -> EditBuffer {
        let mut b = EditBuffer::new();
        b.set(text, cursor);
        b
    }

    #[test]
    fn arrays_track_length_with_sentinel() {
        let mut b = buf("echo hi", 7);
        assert_eq!(b.colors().len(), 8);
        assert_eq!(b.indents().len(), 8);
        b.insert("!");
        assert_eq!(b.len(), 8);
        assert_eq!(b.colors().len(), 9);
        b.delete_backward();
        assert_eq!(b.colors().len(), 8);
    }

    #[test]
    fn insert_advances_cursor() {
        let mut b = buf("ls", 2);
        b.insert(" /tmp");
        assert_eq!(b.text(), "ls /tmp");
        assert_eq!(b.cursor(), 7);
    }

    #[test]
    fn generation_bumps_on_mutation_only() {
        let mut b = buf("ab", 2);
        let g = b.generation();
        b.set_cursor(0);
        assert_eq!(b.generation(), g);
        b.delete_forward();
        assert!(b.generation() > g);
    }

    #[test]
    fn kill_and_yank_round_trip() {
        let mut b = buf("echo hello", 10);
        let mut ring = KillRing::default();
        b.kill(5..10, KillDirection::Forward, false, &mut ring);
        assert_eq!(b.text(), "echo ");
        b.yank(&ring);
        assert_eq!(b.text(), "echo hello");
    }

    #[test]
    fn yank_rotate_replaces_last_yank() {
        let mut b = buf("", 0);
        let mut ring = KillRing::default();
        ring.add("old".into(), KillDirection::Forward, false);
        ring.add("new".into(), KillDirection::Forward, false);
        b.yank(&ring);
        assert_eq!(b.text(), "new");
        b.yank_rotate(&mut ring);
        assert_eq!(b.text(), "old");
    }

    #[test]
    fn yank_rotate_without_yank_is_noop() {
        let mut b = buf("x", 1);
        let mut ring = KillRing::default();
        ring.add("y".into(), KillDirection::Forward, false);
        b.yank_rotate(&mut ring);
        assert_eq!(b.text(), "x");
    }

    #[test]
    fn word_motion_left_skips_separators() {
        let b = buf("echo  hello", 11);
        assert_eq!(b.word_boundary(Direction::Left), 6);
        let b = buf("echo  hello", 6);
        assert_eq!(b.word_boundary(Direction::Left), 0);
    }

    #[test]
    fn word_motion_right() {
        let b = buf("cd /tmp", 0);
        assert_eq!(b.word_boundary(Direction::Right), 2);
        let b = buf("cd /tmp", 2);
        assert_eq!(b.word_boundary(Direction::Right), 7);
    }

    #[test]
    fn kill_word_backward_prepends_on_coalesce() {
        let mut b = buf("one two three", 13);
        let mut ring = KillRing::default();
        b.kill_word(Direction::Left, &mut ring, false);
        assert_eq!(b.text(), "one two ");
        b.kill_word(Direction::Left, &mut ring, true);
        assert_eq!(b.text(), "one ");
        assert_eq!(ring.yank(), Some("two three"));
    }

    #[test]
    fn unicode_cursor_is_code_point_based() {
        let mut b = buf("héllo", 5);
        b.delete_backward();
        assert_eq!(b.text(), "héll");
        assert_eq!(b.cursor(), 4);
    }

    #[test]
    fn display_width_wide_and_combining() {
        assert_eq!(word::display_width("abc"), 3);
        assert_eq!(word::display_width("漢"), 2);
        assert_eq!(word::display_width("e\u{0301}"), 1);
    }
}
