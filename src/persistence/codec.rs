//! Stored-value encoding: optional whitespace collapsing behind a sentinel.
//!
//! Values longer than the threshold have every whitespace run outside JSON
//! strings collapsed to one space and are prefixed with [`SENTINEL`]. Decoding
//! strips the sentinel; the collapsed text is still valid JSON. The pair is
//! opaque to callers, so a real compressor can replace it behind the same
//! two functions.

/// Prefix marking a compressed value.
pub const SENTINEL: &str = "__COMPRESSED__";

/// Encode a serialized record for storage.
#[must_use]
pub fn encode(json: &str, threshold: usize) -> String {
    if json.len() <= threshold {
        return json.to_owned();
    }
    let mut out = String::with_capacity(SENTINEL.len() + json.len());
    out.push_str(SENTINEL);
    out.push_str(&collapse_outside_strings(json));
    out
}

/// Undo [`encode`]. Uncompressed values pass through.
#[must_use]
pub fn decode(stored: &str) -> &str {
    stored.strip_prefix(SENTINEL).unwrap_or(stored)
}

#[must_use]
pub fn is_compressed(stored: &str) -> bool {
    stored.starts_with(SENTINEL)
}

fn collapse_outside_strings(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut pending_space = false;
    for c in json.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        if c == '"' {
            in_string = true;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_values_pass_through() {
        assert_eq!(encode("{ \"a\": 1 }", 100), "{ \"a\": 1 }");
        assert_eq!(decode("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn long_values_collapse_outside_strings() {
        let json = "{\n    \"text\": \"keep   these  spaces\",\n    \"n\":   1\n}";
        let stored = encode(json, 10);
        assert!(is_compressed(&stored));
        assert_eq!(decode(&stored), "{ \"text\": \"keep   these  spaces\", \"n\": 1 }");
    }

    #[test]
    fn escaped_quotes_do_not_end_strings() {
        let json = "[\"a \\\"  b\",   2]";
        assert_eq!(decode(&encode(json, 0)), "[\"a \\\"  b\", 2]");
    }
}
