//! Minimal terminal updates: diff the desired frame against the previous
//! one and emit only what changed, colour codes only at run boundaries, the
//! cursor move last.

use crate::frame::{Cell, Frame};
use core_config::ColorSpec;
use crossterm::style::{Attribute, Color, SetAttribute, SetForegroundColor};
use crossterm::{cursor, queue, terminal};
use std::io::Write;

/// Counters for repaint behaviour; tests assert minimality through these.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RenderMetrics {
    pub frames: u64,
    pub lines_repainted: u64,
    pub cells_printed: u64,
    pub full_reflows: u64,
}

#[derive(Debug, Default)]
pub struct Screen {
    prev: Vec<Vec<Cell>>,
    /// Row within our frame the terminal cursor currently sits on.
    cursor_row: usize,
    /// Rows that exist on the terminal below the prompt origin.
    printed_rows: usize,
    valid: bool,
    metrics: RenderMetrics,
}

impl Screen {
    pub fn new() -> Screen {
        Screen {
            printed_rows: 1,
            ..Screen::default()
        }
    }

    pub fn metrics(&self) -> RenderMetrics {
        self.metrics
    }

    /// Window size changed: reflow everything on the next repaint without
    /// clearing the terminal.
    pub fn invalidate(&mut self) {
        self.valid = false;
        self.metrics.full_reflows += 1;
    }

    /// Forget screen contents entirely (after the pager or an executed
    /// command owned the terminal). The next repaint starts from the
    /// current terminal line.
    pub fn reset_origin(&mut self) {
        self.prev.clear();
        self.cursor_row = 0;
        self.printed_rows = 1;
        self.valid = false;
    }

    fn goto_row<W: Write>(&mut self, out: &mut W, row: usize) -> std::io::Result<()> {
        if row < self.cursor_row {
            queue!(out, cursor::MoveUp((self.cursor_row - row) as u16))?;
        } else if row > self.cursor_row {
            if row < self.printed_rows {
                queue!(out, cursor::MoveDown((row - self.cursor_row) as u16))?;
            } else {
                // Create rows by scrolling; "\r\n" below the last line.
                if self.printed_rows > 0 && self.cursor_row < self.printed_rows - 1 {
                    queue!(
                        out,
                        cursor::MoveDown((self.printed_rows - 1 - self.cursor_row) as u16)
                    )?;
                }
                for _ in self.printed_rows..=row {
                    out.write_all(b"\r\n")?;
                }
                self.printed_rows = row + 1;
            }
        }
        self.cursor_row = row;
        Ok(())
    }

    fn emit_style<W: Write>(out: &mut W, style: &ColorSpec) -> std::io::Result<()> {
        queue!(out, SetAttribute(Attribute::Reset))?;
        if let Some(color) = style.color {
            queue!(out, SetForegroundColor(color))?;
        }
        if style.bold {
            queue!(out, SetAttribute(Attribute::Bold))?;
        }
        if style.underline {
            queue!(out, SetAttribute(Attribute::Underlined))?;
        }
        Ok(())
    }

    fn emit_cells<W: Write>(&mut self, out: &mut W, cells: &[Cell]) -> std::io::Result<()> {
        let mut current: Option<&ColorSpec> = None;
        for cell in cells {
            if current != Some(&cell.style) {
                Self::emit_style(out, &cell.style)?;
                current = Some(&cell.style);
            }
            let mut buf = [0u8; 4];
            out.write_all(cell.ch.encode_utf8(&mut buf).as_bytes())?;
            self.metrics.cells_printed += 1;
        }
        queue!(out, SetAttribute(Attribute::Reset))?;
        Ok(())
    }

    fn col_of(cells: &[Cell], idx: usize) -> usize {
        cells[..idx]
            .iter()
            .map(|c| core_text::word::char_width(c.ch).max(1))
            .sum()
    }

    /// Transform the terminal from the previous frame to `frame`.
    pub fn repaint<W: Write>(&mut self, frame: &Frame, out: &mut W) -> std::io::Result<()> {
        self.metrics.frames += 1;
        queue!(out, cursor::Hide)?;

        for (row, line) in frame.lines.iter().enumerate() {
            let prev_line = self.prev.get(row);
            if self.valid && prev_line == Some(line) {
                continue;
            }
            // Skip the unchanged prefix of the line.
            let start = match prev_line {
                Some(prev) if self.valid => prev
                    .iter()
                    .zip(line.iter())
                    .take_while(|(a, b)| a == b)
                    .count(),
                _ => 0,
            };
            let prev_len = prev_line.map(|p| p.len()).unwrap_or(0);
            self.goto_row(out, row)?;
            queue!(out, cursor::MoveToColumn(Self::col_of(line, start) as u16))?;
            self.emit_cells(out, &line[start..])?;
            if prev_len > line.len() || !self.valid {
                queue!(out, terminal::Clear(terminal::ClearType::UntilNewLine))?;
            }
            self.metrics.lines_repainted += 1;
        }

        // Rows the new frame no longer uses.
        for row in frame.lines.len()..self.prev.len() {
            self.goto_row(out, row)?;
            queue!(
                out,
                cursor::MoveToColumn(0),
                terminal::Clear(terminal::ClearType::UntilNewLine)
            )?;
        }

        // Cursor moves last.
        self.goto_row(out, frame.cursor.0)?;
        queue!(out, cursor::MoveToColumn(frame.cursor.1 as u16), cursor::Show)?;
        out.flush()?;

        self.prev = frame.lines.clone();
        self.valid = true;
        tracing::trace!(
            target: "render.diff",
            rows = frame.lines.len(),
            lines_repainted = self.metrics.lines_repainted,
            "repaint_done"
        );
        Ok(())
    }
}

/// Convenience used by the reader when tearing down: leave the cursor on a
/// fresh line below everything we drew.
pub fn finish_line<W: Write>(screen: &mut Screen, out: &mut W) -> std::io::Result<()> {
    let last = screen.prev.len().saturating_sub(1);
    screen.goto_row(out, last)?;
    out.write_all(b"\r\n")?;
    queue!(out, SetAttribute(Attribute::Reset), SetForegroundColor(Color::Reset))?;
    out.flush()?;
    screen.reset_origin();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_config::parse_color_spec;

    fn cells(text: &str) -> Vec<Cell> {
        text.chars()
            .map(|ch| Cell {
                ch,
                style: parse_color_spec("normal"),
            })
            .collect()
    }

    fn frame(lines: &[&str], cursor: (usize, usize)) -> Frame {
        Frame {
            lines: lines.iter().map(|l| cells(l)).collect(),
            cursor,
        }
    }

    #[test]
    fn first_repaint_draws_everything() {
        let mut screen = Screen::new();
        let mut out = Vec::new();
        screen
            .repaint(&frame(&["$ ls"], (0, 4)), &mut out)
            .unwrap();
        let m = screen.metrics();
        assert_eq!(m.lines_repainted, 1);
        assert_eq!(m.cells_printed, 4);
        assert!(!out.is_empty());
    }

    #[test]
    fn identical_frame_paints_nothing() {
        let mut screen = Screen::new();
        let mut out = Vec::new();
        let f = frame(&["$ ls"], (0, 4));
        screen.repaint(&f, &mut out).unwrap();
        let before = screen.metrics();
        screen.repaint(&f, &mut out).unwrap();
        let after = screen.metrics();
        assert_eq!(after.lines_repainted, before.lines_repainted);
        assert_eq!(after.cells_printed, before.cells_printed);
    }

    #[test]
    fn appended_character_repaints_only_suffix() {
        let mut screen = Screen::new();
        let mut out = Vec::new();
        screen.repaint(&frame(&["$ ls"], (0, 4)), &mut out).unwrap();
        let before = screen.metrics().cells_printed;
        screen
            .repaint(&frame(&["$ lsx"], (0, 5)), &mut out)
            .unwrap();
        let after = screen.metrics().cells_printed;
        // Only the appended cell is printed.
        assert_eq!(after - before, 1);
    }

    #[test]
    fn only_changed_line_repaints() {
        let mut screen = Screen::new();
        let mut out = Vec::new();
        screen
            .repaint(&frame(&["$ for x", "    echo"], (1, 8)), &mut out)
            .unwrap();
        let before = screen.metrics().lines_repainted;
        screen
            .repaint(&frame(&["$ for x", "    echo2"], (1, 9)), &mut out)
            .unwrap();
        let after = screen.metrics().lines_repainted;
        assert_eq!(after - before, 1);
    }

    #[test]
    fn invalidate_forces_full_redraw() {
        let mut screen = Screen::new();
        let mut out = Vec::new();
        let f = frame(&["$ ls"], (0, 4));
        screen.repaint(&f, &mut out).unwrap();
        screen.invalidate();
        let before = screen.metrics().cells_printed;
        screen.repaint(&f, &mut out).unwrap();
        assert_eq!(screen.metrics().cells_printed - before, 4);
        assert_eq!(screen.metrics().full_reflows, 1);
    }

    #[test]
    fn shrinking_frame_clears_stale_rows() {
        let mut screen = Screen::new();
        let mut out = Vec::new();
        screen
            .repaint(&frame(&["$ a", "$ b"], (1, 3)), &mut out)
            .unwrap();
        out.clear();
        screen.repaint(&frame(&["$ a"], (0, 3)), &mut out).unwrap();
        // The second row must be cleared; crossterm emits ESC[K for
        // clear-until-newline.
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("\u{1b}[K"));
    }
}
