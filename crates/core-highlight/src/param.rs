//! Parameter sub-highlighter: operators, quote runs, and escape sequences
//! inside a single string token.

use core_text::{Highlight, Role};

fn set(colors: &mut [Highlight], idx: usize, value: Highlight) {
    if let Some(slot) = colors.get_mut(idx) {
        *slot = value;
    }
}

fn is_var_char(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

/// Maximum value accepted per numeric escape family.
fn numeric_escape_params(kind: char) -> (u32, usize, u32) {
    // (base, digits, max value)
    match kind {
        'u' => (16, 4, 0xffff),
        'U' => (16, 8, 0x10ffff),
        'x' => (16, 2, 0x7f),
        'X' => (16, 2, 0xff),
        _ => (8, 3, 0x7f),
    }
}

/// Colour the characters of one token in place. `colors` is the slice of the
/// master colour array covering exactly this token; writes beyond the token
/// are dropped (the next token establishes its own colour, fill-forward does
/// the rest). `normal` is the role already assigned to the token.
pub fn highlight_param(src: &[char], colors: &mut [Highlight], normal: Highlight) {
    #[derive(PartialEq)]
    enum Mode {
        Plain,
        Single(usize),
        Double(usize),
    }
    let mut mode = Mode::Plain;
    let mut bracket_count = 0i32;
    let mut i = 0usize;
    let len = src.len();

    while i < len {
        let c = src[i];
        match mode {
            Mode::Plain => {
                if c == '\\' {
                    let start = i;
                    i += 1;
                    let Some(&e) = src.get(i) else {
                        break;
                    };
                    match e {
                        '~' | '%' => {
                            if i == 1 {
                                set(colors, start, Highlight::from_role(Role::Escape));
                                set(colors, i + 1, normal);
                            }
                        }
                        ',' => {
                            if bracket_count > 0 {
                                set(colors, start, Highlight::from_role(Role::Escape));
                                set(colors, i + 1, normal);
                            }
                        }
                        'c' => {
                            // \c consumes one following character.
                            set(colors, start, Highlight::from_role(Role::Escape));
                            set(colors, i + 2, normal);
                            i += 1;
                        }
                        'u' | 'U' | 'x' | 'X' | '0'..='7' => {
                            let (base, digits, max) = numeric_escape_params(e);
                            let mut value: u64 = 0;
                            let mut consumed = 0usize;
                            if base == 8 {
                                // The leading digit is part of the value.
                                i -= 1;
                            }
                            while consumed < digits {
                                let Some(d) =
                                    src.get(i + 1).and_then(|c| c.to_digit(base))
                                else {
                                    break;
                                };
                                value = value * base as u64 + d as u64;
                                i += 1;
                                consumed += 1;
                            }
                            let role = if value <= max as u64 {
                                Role::Escape
                            } else {
                                Role::Error
                            };
                            set(colors, start, Highlight::from_role(role));
                            set(colors, i + 1, normal);
                        }
                        e if "abefnrtv*?$(){}[]'\"<>^ \\#;|&".contains(e) => {
                            set(colors, start, Highlight::from_role(Role::Escape));
                            set(colors, i + 1, normal);
                        }
                        _ => {}
                    }
                } else {
                    match c {
                        '~' | '%' => {
                            if i == 0 {
                                set(colors, i, Highlight::from_role(Role::Operator));
                                set(colors, i + 1, normal);
                            }
                        }
                        '$' => {
                            let role = match src.get(i + 1) {
                                Some(&n) if n == '$' || is_var_char(n) => Role::Operator,
                                _ => Role::Error,
                            };
                            set(colors, i, Highlight::from_role(role));
                            set(colors, i + 1, normal);
                        }
                        '*' | '?' | '(' | ')' => {
                            set(colors, i, Highlight::from_role(Role::Operator));
                            set(colors, i + 1, normal);
                        }
                        '{' => {
                            set(colors, i, Highlight::from_role(Role::Operator));
                            set(colors, i + 1, normal);
                            bracket_count += 1;
                        }
                        '}' => {
                            set(colors, i, Highlight::from_role(Role::Operator));
                            set(colors, i + 1, normal);
                            bracket_count -= 1;
                        }
                        ',' => {
                            if bracket_count > 0 {
                                set(colors, i, Highlight::from_role(Role::Operator));
                                set(colors, i + 1, normal);
                            }
                        }
                        '\'' => {
                            set(colors, i, Highlight::from_role(Role::Quote));
                            mode = Mode::Single(i);
                        }
                        '"' => {
                            set(colors, i, Highlight::from_role(Role::Quote));
                            mode = Mode::Double(i);
                        }
                        _ => {}
                    }
                }
            }
            Mode::Single(_) => {
                if c == '\\' {
                    let start = i;
                    match src.get(i + 1) {
                        Some('\\') | Some('\'') => {
                            set(colors, start, Highlight::from_role(Role::Escape));
                            set(colors, i + 2, Highlight::from_role(Role::Quote));
                            i += 1;
                        }
                        None => break,
                        _ => {}
                    }
                } else if c == '\'' {
                    mode = Mode::Plain;
                    set(colors, i + 1, normal);
                }
            }
            Mode::Double(_) => match c {
                '"' => {
                    mode = Mode::Plain;
                    set(colors, i + 1, normal);
                }
                '\\' => {
                    let start = i;
                    match src.get(i + 1) {
                        Some('\\') | Some('$') | Some('"') => {
                            set(colors, start, Highlight::from_role(Role::Escape));
                            set(colors, i + 2, Highlight::from_role(Role::Quote));
                            i += 1;
                        }
                        None => break,
                        _ => {}
                    }
                }
                '$' => {
                    let role = match src.get(i + 1) {
                        Some(&n) if n == '$' || is_var_char(n) => Role::Operator,
                        _ => Role::Error,
                    };
                    set(colors, i, Highlight::from_role(role));
                    set(colors, i + 1, Highlight::from_role(Role::Quote));
                }
                _ => {}
            },
        }
        i += 1;
    }

    // An unterminated quote marks its opener as the error, leaving the
    // quoted text coloured as quote.
    match mode {
        Mode::Single(opener) | Mode::Double(opener) => {
            set(colors, opener, Highlight::from_role(Role::Error));
            set(colors, opener + 1, Highlight::from_role(Role::Quote));
        }
        Mode::Plain => {}
    }
}
