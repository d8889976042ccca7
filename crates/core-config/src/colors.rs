//! Parsing of `fish_color_*` colour strings and the role → colour theme.

use crate::snapshot::EnvSnapshot;
use crossterm::style::Color;

/// One parsed colour value: a colour plus attribute flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColorSpec {
    pub color: Option<Color>,
    pub bold: bool,
    pub underline: bool,
}

fn named_color(name: &str) -> Option<Color> {
    Some(match name {
        "black" => Color::Black,
        "red" => Color::DarkRed,
        "green" => Color::DarkGreen,
        "brown" | "yellow" => Color::DarkYellow,
        "blue" => Color::DarkBlue,
        "magenta" | "purple" => Color::DarkMagenta,
        "cyan" => Color::DarkCyan,
        "white" => Color::Grey,
        "brblack" => Color::DarkGrey,
        "brred" => Color::Red,
        "brgreen" => Color::Green,
        "bryellow" => Color::Yellow,
        "brblue" => Color::Blue,
        "brmagenta" => Color::Magenta,
        "brcyan" => Color::Cyan,
        "brwhite" => Color::White,
        "normal" => return None,
        _ => return None,
    })
}

fn hex_color(s: &str) -> Option<Color> {
    let hex = s.strip_prefix('#')?;
    let (r, g, b) = match hex.len() {
        3 => {
            let d = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
            (d(0)?, d(1)?, d(2)?)
        }
        6 => {
            let d = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
            (d(0)?, d(2)?, d(4)?)
        }
        _ => return None,
    };
    Some(Color::Rgb { r, g, b })
}

/// Parse one colour string as found in `fish_color_*`: whitespace separated
/// words where `--bold`/`-o` and `--underline`/`-u` set attributes and the
/// first recognized colour word wins.
pub fn parse_color_spec(value: &str) -> ColorSpec {
    let mut spec = ColorSpec::default();
    for word in value.split_whitespace() {
        match word {
            "--bold" | "-o" => spec.bold = true,
            "--underline" | "-u" => spec.underline = true,
            w if spec.color.is_none() => {
                spec.color = named_color(w).or_else(|| hex_color(w));
            }
            _ => {}
        }
    }
    spec
}

/// Colour table for every highlight role, read once from a snapshot.
#[derive(Debug, Clone, Default)]
pub struct Theme {
    pub normal: ColorSpec,
    pub error: ColorSpec,
    pub command: ColorSpec,
    pub end: ColorSpec,
    pub param: ColorSpec,
    pub comment: ColorSpec,
    pub matched: ColorSpec,
    pub search_match: ColorSpec,
    pub operator: ColorSpec,
    pub escape: ColorSpec,
    pub quote: ColorSpec,
    pub redirection: ColorSpec,
    pub valid_path: ColorSpec,
    pub autosuggestion: ColorSpec,
}

impl Theme {
    pub fn from_snapshot(snap: &EnvSnapshot) -> Theme {
        let get = |name: &str, fallback: &str| {
            parse_color_spec(snap.var(name).unwrap_or(fallback))
        };
        Theme {
            normal: get("fish_color_normal", "normal"),
            error: get("fish_color_error", "red"),
            command: get("fish_color_command", "green"),
            end: get("fish_color_end", "brgreen"),
            param: get("fish_color_param", "normal"),
            comment: get("fish_color_comment", "brown"),
            matched: get("fish_color_match", "cyan --underline"),
            search_match: get("fish_color_search_match", "bryellow"),
            operator: get("fish_color_operator", "cyan"),
            escape: get("fish_color_escape", "brcyan"),
            quote: get("fish_color_quote", "brown"),
            redirection: get("fish_color_redirection", "normal"),
            valid_path: get("fish_color_valid_path", "--underline"),
            autosuggestion: get("fish_color_autosuggestion", "brblack"),
        }
    }

    /// Merge the valid-path overlay onto a role colour: a normal role colour
    /// is replaced outright, otherwise only the attribute bits carry over.
    pub fn apply_valid_path(&self, base: ColorSpec) -> ColorSpec {
        if base.color.is_none() {
            self.valid_path
        } else {
            ColorSpec {
                color: base.color,
                bold: base.bold || self.valid_path.bold,
                underline: base.underline || self.valid_path.underline,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_and_attributes() {
        let spec = parse_color_spec("red --bold");
        assert_eq!(spec.color, Some(Color::DarkRed));
        assert!(spec.bold);
        assert!(!spec.underline);
    }

    #[test]
    fn hex_colors() {
        assert_eq!(
            parse_color_spec("#00ff00").color,
            Some(Color::Rgb { r: 0, g: 255, b: 0 })
        );
        assert_eq!(
            parse_color_spec("#fff").color,
            Some(Color::Rgb { r: 255, g: 255, b: 255 })
        );
    }

    #[test]
    fn normal_means_no_color() {
        assert_eq!(parse_color_spec("normal").color, None);
    }

    #[test]
    fn valid_path_overlay_keeps_base_color() {
        let theme = Theme {
            valid_path: parse_color_spec("--underline"),
            ..Theme::default()
        };
        let base = parse_color_spec("green");
        let merged = theme.apply_valid_path(base);
        assert_eq!(merged.color, base.color);
        assert!(merged.underline);
    }
}
