//! On-disk history encoding.
//!
//! Items are separated by unescaped newlines and optionally preceded by a
//! `# <unix-seconds>` line. Inside an item every backslash doubles and every
//! newline becomes backslash-newline, so the decoder can treat a backslash
//! strictly as an escape prefix.

use crate::HistoryItem;

/// Encode one item, including its timestamp line and trailing separator.
pub fn encode_item(item: &HistoryItem) -> String {
    let mut out = String::with_capacity(item.contents.len() + 16);
    out.push_str(&format!("# {}\n", item.timestamp));
    for c in item.contents.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\\n"),
            c => out.push(c),
        }
    }
    out.push('\n');
    out
}

/// Decode the item starting at `bytes` (which may extend past it; decoding
/// stops at the first unescaped newline outside the timestamp line).
pub fn decode_item(bytes: &[u8]) -> HistoryItem {
    let text = String::from_utf8_lossy(bytes);
    let mut timestamp = 0u64;
    let mut contents = String::new();
    let mut chars = text.chars().peekable();
    let mut at_line_start = true;

    while let Some(c) = chars.next() {
        if at_line_start && c == '#' {
            // Timestamp comment line.
            let mut line = String::new();
            for c in chars.by_ref() {
                if c == '\n' {
                    break;
                }
                line.push(c);
            }
            let digits: String = line.chars().filter(|c| c.is_ascii_digit()).collect();
            if let Ok(ts) = digits.parse() {
                timestamp = ts;
            }
            continue;
        }
        at_line_start = false;
        match c {
            '\\' => match chars.next() {
                Some('\n') => contents.push('\n'),
                Some('\\') => contents.push('\\'),
                Some(other) => {
                    contents.push('\\');
                    contents.push(other);
                }
                None => contents.push('\\'),
            },
            '\n' => break,
            c => contents.push(c),
        }
    }

    HistoryItem {
        timestamp,
        contents,
        required_paths: Vec::new(),
    }
}

/// Offsets of every item start in a loaded file region. Mirrors the decode
/// rules: a backslash consumes the following byte, `#` lines glue to the
/// item that follows them.
pub fn scan_offsets(region: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut push_next = true;
    let mut in_timestamp = false;
    let mut i = 0;
    while i < region.len() {
        if push_next {
            offsets.push(i);
            in_timestamp = region[i] == b'#';
            push_next = false;
        }
        match region[i] {
            b'\\' => i += 2,
            b'\n' => {
                if in_timestamp {
                    in_timestamp = false;
                } else {
                    push_next = true;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(ts: u64, contents: &str) -> HistoryItem {
        HistoryItem {
            timestamp: ts,
            contents: contents.to_string(),
            required_paths: Vec::new(),
        }
    }

    fn round_trip(contents: &str) -> String {
        let encoded = encode_item(&item(7, contents));
        decode_item(encoded.as_bytes()).contents
    }

    #[test]
    fn simple_round_trip() {
        assert_eq!(round_trip("echo hello"), "echo hello");
    }

    #[test]
    fn embedded_newline_round_trip() {
        assert_eq!(round_trip("for x in a b\necho $x\nend"), "for x in a b\necho $x\nend");
    }

    #[test]
    fn trailing_single_backslash_round_trip() {
        assert_eq!(round_trip("echo \\"), "echo \\");
    }

    #[test]
    fn trailing_double_backslash_round_trip() {
        assert_eq!(round_trip("echo \\\\"), "echo \\\\");
    }

    #[test]
    fn timestamp_parsed() {
        let encoded = encode_item(&item(1234567, "ls"));
        assert!(encoded.starts_with("# 1234567\n"));
        let decoded = decode_item(encoded.as_bytes());
        assert_eq!(decoded.timestamp, 1234567);
    }

    #[test]
    fn decode_stops_at_item_boundary() {
        let bytes = b"# 1\nfirst\n# 2\nsecond\n";
        let decoded = decode_item(bytes);
        assert_eq!(decoded.contents, "first");
        assert_eq!(decoded.timestamp, 1);
    }

    #[test]
    fn offsets_split_items() {
        let mut data = String::new();
        data.push_str(&encode_item(&item(1, "one")));
        data.push_str(&encode_item(&item(2, "two\nlines")));
        data.push_str(&encode_item(&item(3, "three\\")));
        let offsets = scan_offsets(data.as_bytes());
        assert_eq!(offsets.len(), 3);
        let decoded: Vec<String> = offsets
            .iter()
            .map(|&o| decode_item(&data.as_bytes()[o..]).contents)
            .collect();
        assert_eq!(decoded, vec!["one", "two\nlines", "three\\"]);
    }

    #[test]
    fn items_without_timestamps_still_split() {
        let data = b"plain one\nplain two\n";
        let offsets = scan_offsets(data);
        assert_eq!(offsets.len(), 2);
        assert_eq!(decode_item(&data[offsets[1]..]).contents, "plain two");
    }
}
