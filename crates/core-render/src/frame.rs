//! Desired-screen computation: prompt plus buffer rendered through the
//! colour and indent arrays into a grid of styled cells.

use core_config::{ColorSpec, Theme};
use core_text::{Highlight, Overlay, Role, word};

/// Spaces per indent level on continuation lines.
pub const INDENT_STEP: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub style: ColorSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub lines: Vec<Vec<Cell>>,
    /// Cursor position as (row, display column).
    pub cursor: (usize, usize),
}

/// Map one colour code to its terminal style through the theme.
pub fn style_for(h: Highlight, theme: &Theme) -> ColorSpec {
    let base = match h.role().unwrap_or(Role::Normal) {
        Role::Normal => theme.normal,
        Role::Error => theme.error,
        Role::Command => theme.command,
        Role::End => theme.end,
        Role::Param => theme.param,
        Role::Comment => theme.comment,
        Role::Match => theme.matched,
        Role::SearchMatch => theme.search_match,
        Role::Operator => theme.operator,
        Role::Escape => theme.escape,
        Role::Quote => theme.quote,
        Role::Redirection => theme.redirection,
        Role::Autosuggestion => theme.autosuggestion,
    };
    let mut style = base;
    if h.has_overlay(Overlay::VALID_PATH) {
        style = theme.apply_valid_path(style);
    }
    if h.has_overlay(Overlay::SEARCH_MATCH) {
        style = theme.search_match;
    }
    style
}

pub struct FrameInput<'a> {
    pub prompt: &'a str,
    pub chars: &'a [char],
    pub colors: &'a [Highlight],
    pub indents: &'a [u32],
    pub cursor: usize,
    pub autosuggestion: Option<&'a str>,
    pub theme: &'a Theme,
    pub width: usize,
}

/// Render the desired screen. Explicit newlines start indented continuation
/// rows; rows also soft-wrap at the terminal width.
pub fn compose(input: &FrameInput<'_>) -> Frame {
    let width = input.width.max(4);
    let mut frame = Frame::default();
    let mut line: Vec<Cell> = Vec::new();
    let mut col = 0usize;
    let mut cursor: Option<(usize, usize)> = None;

    let mut push_cell = |frame: &mut Frame,
                         line: &mut Vec<Cell>,
                         col: &mut usize,
                         ch: char,
                         style: ColorSpec| {
        let w = word::char_width(ch).max(1);
        if *col + w > width {
            frame.lines.push(std::mem::take(line));
            *col = 0;
        }
        line.push(Cell { ch, style });
        *col += w;
    };

    let prompt_style = input.theme.normal;
    for ch in input.prompt.chars() {
        push_cell(&mut frame, &mut line, &mut col, ch, prompt_style);
    }

    for (i, &ch) in input.chars.iter().enumerate() {
        if i == input.cursor {
            cursor = Some((frame.lines.len(), col));
        }
        if ch == '\n' {
            frame.lines.push(std::mem::take(&mut line));
            col = 0;
            let level = input
                .indents
                .get(i + 1)
                .or(input.indents.last())
                .copied()
                .unwrap_or(0) as usize;
            for _ in 0..level * INDENT_STEP {
                push_cell(&mut frame, &mut line, &mut col, ' ', prompt_style);
            }
            continue;
        }
        let style = input
            .colors
            .get(i)
            .copied()
            .map(|h| style_for(h, input.theme))
            .unwrap_or(prompt_style);
        push_cell(&mut frame, &mut line, &mut col, ch, style);
    }
    if input.cursor >= input.chars.len() {
        cursor = Some((frame.lines.len(), col));
    }

    if let Some(suggestion) = input.autosuggestion {
        let style = input.theme.autosuggestion;
        for ch in suggestion.chars() {
            push_cell(&mut frame, &mut line, &mut col, ch, style);
        }
    }

    frame.lines.push(line);
    frame.cursor = cursor.unwrap_or((0, 0));
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_config::parse_color_spec;

    fn theme() -> Theme {
        Theme {
            command: parse_color_spec("green"),
            autosuggestion: parse_color_spec("brblack"),
            ..Theme::default()
        }
    }

    fn input<'a>(
        prompt: &'a str,
        chars: &'a [char],
        colors: &'a [Highlight],
        indents: &'a [u32],
        cursor: usize,
    ) -> FrameInput<'a> {
        FrameInput {
            prompt,
            chars,
            colors,
            indents,
            cursor,
            autosuggestion: None,
            theme: Box::leak(Box::new(theme())),
            width: 40,
        }
    }

    fn plain(text: &str) -> (Vec<char>, Vec<Highlight>, Vec<u32>) {
        let chars: Vec<char> = text.chars().collect();
        let colors = vec![Highlight::from_role(Role::Normal); chars.len() + 1];
        let indents = vec![0; chars.len() + 1];
        (chars, colors, indents)
    }

    #[test]
    fn cursor_accounts_for_prompt_width() {
        let (chars, colors, indents) = plain("ls");
        let frame = compose(&input("> ", &chars, &colors, &indents, 2));
        assert_eq!(frame.cursor, (0, 4));
        assert_eq!(frame.lines.len(), 1);
    }

    #[test]
    fn newline_starts_indented_row() {
        let text = "for (a\nb";
        let chars: Vec<char> = text.chars().collect();
        let colors = vec![Highlight::from_role(Role::Normal); chars.len() + 1];
        let indents = core_lex_like_indents(&chars);
        let frame = compose(&input("$ ", &chars, &colors, &indents, chars.len()));
        assert_eq!(frame.lines.len(), 2);
        // The continuation line is indented one level.
        let leading_spaces = frame.lines[1]
            .iter()
            .take_while(|c| c.ch == ' ')
            .count();
        assert_eq!(leading_spaces, INDENT_STEP);
    }

    // Indent array shaped like core-lex would produce for one open paren.
    fn core_lex_like_indents(chars: &[char]) -> Vec<u32> {
        let mut depth = 0u32;
        let mut out = Vec::with_capacity(chars.len() + 1);
        for &c in chars {
            if c == ')' {
                depth = depth.saturating_sub(1);
            }
            out.push(depth);
            if c == '(' {
                depth += 1;
            }
        }
        out.push(depth);
        out
    }

    #[test]
    fn long_line_soft_wraps() {
        let text = "a".repeat(50);
        let (chars, colors, indents) = plain(&text);
        let mut inp = input("", &chars, &colors, &indents, 0);
        inp.width = 20;
        let frame = compose(&inp);
        assert!(frame.lines.len() >= 3);
        assert!(frame.lines[0].len() <= 20);
    }

    #[test]
    fn styles_follow_colors() {
        let chars: Vec<char> = "ls".chars().collect();
        let mut colors = vec![Highlight::from_role(Role::Normal); 3];
        colors[0] = Highlight::from_role(Role::Command);
        colors[1] = Highlight::from_role(Role::Command);
        let indents = vec![0; 3];
        let frame = compose(&input("", &chars, &colors, &indents, 2));
        assert_eq!(frame.lines[0][0].style, parse_color_spec("green"));
    }

    #[test]
    fn autosuggestion_appended_dimmed() {
        let (chars, colors, indents) = plain("ech");
        let mut inp = input("", &chars, &colors, &indents, 3);
        inp.autosuggestion = Some("o hello");
        let frame = compose(&inp);
        let rendered: String = frame.lines[0].iter().map(|c| c.ch).collect();
        assert_eq!(rendered, "echo hello");
        // Cursor stays at the typed end, before the suggestion.
        assert_eq!(frame.cursor, (0, 3));
        assert_eq!(frame.lines[0][4].style, parse_color_spec("brblack"));
    }

    #[test]
    fn wide_characters_advance_two_columns() {
        let (chars, colors, indents) = plain("漢x");
        let frame = compose(&input("", &chars, &colors, &indents, 2));
        assert_eq!(frame.cursor, (0, 3));
    }
}
