//! Universal-variable wire protocol: newline-terminated ASCII commands with
//! C-style escaping of value bytes.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("missing ':' separator in set command")]
    MissingSeparator,
    #[error("empty variable name")]
    EmptyKey,
    #[error("invalid escape sequence '\\{0}'")]
    BadEscape(char),
    #[error("escape value out of range")]
    EscapeOverflow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Set {
        key: String,
        value: String,
        export: bool,
    },
    Erase {
        key: String,
    },
    Barrier,
    BarrierReply,
}

fn encodes_directly(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '/'
}

/// Escape a value for the wire: alphanumerics and `/` pass through, other
/// ASCII becomes `\xHH`, the BMP `\uHHHH`, and the rest `\UHHHHHHHH`.
pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if encodes_directly(c) {
            out.push(c);
        } else if (c as u32) < 0x80 {
            out.push_str(&format!("\\x{:02x}", c as u32));
        } else if (c as u32) < 0x1_0000 {
            out.push_str(&format!("\\u{:04x}", c as u32));
        } else {
            out.push_str(&format!("\\U{:08x}", c as u32));
        }
    }
    out
}

fn take_hex(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, max: usize) -> Option<u32> {
    let mut value = 0u32;
    let mut taken = 0usize;
    while taken < max {
        let Some(d) = chars.peek().and_then(|c| c.to_digit(16)) else {
            break;
        };
        value = value.wrapping_mul(16).wrapping_add(d);
        chars.next();
        taken += 1;
    }
    (taken > 0).then_some(value)
}

/// Reverse [`escape_value`], accepting the common C escapes as well.
pub fn unescape_value(value: &str) -> Result<String, ProtocolError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('e') => out.push('\u{1b}'),
            Some('\\') => out.push('\\'),
            Some('x') | Some('X') => {
                let v = take_hex(&mut chars, 2).ok_or(ProtocolError::BadEscape('x'))?;
                out.push(char::from_u32(v).ok_or(ProtocolError::EscapeOverflow)?);
            }
            Some('u') => {
                let v = take_hex(&mut chars, 4).ok_or(ProtocolError::BadEscape('u'))?;
                out.push(char::from_u32(v).ok_or(ProtocolError::EscapeOverflow)?);
            }
            Some('U') => {
                let v = take_hex(&mut chars, 8).ok_or(ProtocolError::BadEscape('U'))?;
                out.push(char::from_u32(v).ok_or(ProtocolError::EscapeOverflow)?);
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Ok(out)
}

/// Render one message as its wire line, including the terminator.
pub fn format_message(msg: &Message) -> String {
    match msg {
        Message::Set { key, value, export } => {
            let cmd = if *export { "set_export" } else { "set" };
            format!("{cmd} {key}:{}\n", escape_value(value))
        }
        Message::Erase { key } => format!("erase {key}\n"),
        Message::Barrier => "barrier\n".to_string(),
        Message::BarrierReply => "barrier_reply\n".to_string(),
    }
}

fn parse_set(body: &str, export: bool) -> Result<Message, ProtocolError> {
    // The value keeps any further ':' bytes verbatim.
    let (key, raw_value) = body.split_once(':').ok_or(ProtocolError::MissingSeparator)?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ProtocolError::EmptyKey);
    }
    Ok(Message::Set {
        key: key.to_string(),
        value: unescape_value(raw_value)?,
        export,
    })
}

/// Parse one line (without the newline). Comment lines and unknown commands
/// are ignored (`Ok(None)`); malformed known commands are errors and the
/// caller drops the line.
pub fn parse_line(line: &str) -> Result<Option<Message>, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    if let Some(body) = line.strip_prefix("set_export ") {
        return parse_set(body, true).map(Some);
    }
    if let Some(body) = line.strip_prefix("set ") {
        return parse_set(body, false).map(Some);
    }
    if let Some(key) = line.strip_prefix("erase ") {
        let key = key.trim();
        if key.is_empty() {
            return Err(ProtocolError::EmptyKey);
        }
        return Ok(Some(Message::Erase {
            key: key.to_string(),
        }));
    }
    match line {
        "barrier" => Ok(Some(Message::Barrier)),
        "barrier_reply" => Ok(Some(Message::BarrierReply)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_round_trip() {
        for value in ["plain", "with space", "tab\there", "uni\u{e9}", "wide\u{1F41F}", "a:b"] {
            let escaped = escape_value(value);
            assert!(escaped.is_ascii(), "{escaped}");
            assert_eq!(unescape_value(&escaped).unwrap(), value);
        }
    }

    #[test]
    fn control_bytes_escaped() {
        assert_eq!(escape_value("\n"), "\\x0a");
        assert_eq!(escape_value("a b"), "a\\x20b");
    }

    #[test]
    fn format_and_parse_set() {
        let msg = Message::Set {
            key: "COLOR".to_string(),
            value: "red blue".to_string(),
            export: false,
        };
        let line = format_message(&msg);
        assert_eq!(line, "set COLOR:red\\x20blue\n");
        assert_eq!(parse_line(&line).unwrap(), Some(msg));
    }

    #[test]
    fn set_export_round_trip() {
        let msg = Message::Set {
            key: "PATHY".to_string(),
            value: "/a:/b".to_string(),
            export: true,
        };
        let parsed = parse_line(&format_message(&msg)).unwrap().unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn value_keeps_embedded_colons() {
        // An unescaped colon in the raw value side survives parsing.
        let parsed = parse_line("set K:a:b\n").unwrap().unwrap();
        assert_eq!(
            parsed,
            Message::Set {
                key: "K".to_string(),
                value: "a:b".to_string(),
                export: false
            }
        );
    }

    #[test]
    fn barrier_messages() {
        assert_eq!(parse_line("barrier\n").unwrap(), Some(Message::Barrier));
        assert_eq!(
            parse_line("barrier_reply\n").unwrap(),
            Some(Message::BarrierReply)
        );
    }

    #[test]
    fn unknown_commands_ignored() {
        assert_eq!(parse_line("frobnicate x\n").unwrap(), None);
        assert_eq!(parse_line("# greeting banner\n").unwrap(), None);
        assert_eq!(parse_line("\n").unwrap(), None);
    }

    #[test]
    fn malformed_set_is_error() {
        assert!(parse_line("set NOVALUE\n").is_err());
        assert!(parse_line("set :value\n").is_err());
    }
}
