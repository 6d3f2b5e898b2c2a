//! Tolerant JSON parsing for language-model output (SPEC_FULL.md §4.F).
//!
//! Models routinely wrap JSON in code fences, leave trailing commas, or use
//! bare (unquoted) keys. This repairs the common cases before handing the
//! text to `serde_json`, rather than failing a tick outcome over formatting.

use serde_json::Value;

pub fn parse_tolerant_json(raw: &str) -> Option<Value> {
    let stripped = strip_code_fence(raw.trim());
    if let Ok(v) = serde_json::from_str(&stripped) {
        return Some(v);
    }
    let repaired = quote_bare_keys(&strip_trailing_commas(&stripped));
    serde_json::from_str(&repaired).ok()
}

fn strip_code_fence(s: &str) -> String {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix("```") {
        let rest = rest
            .strip_prefix("json")
            .or_else(|| rest.strip_prefix("JSON"))
            .unwrap_or(rest);
        let rest = rest.trim_start_matches('\n');
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim().to_string();
        }
        return rest.trim().to_string();
    }
    s.to_string()
}

fn strip_trailing_commas(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Quotes bare object keys (`{action: "WAGER"}` -> `{"action": "WAGER"}`).
/// Deliberately conservative: only touches identifier-shaped tokens
/// immediately followed by a colon and preceded by `{` or `,`.
fn quote_bare_keys(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    let bytes: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        out.push(c);
        if c == '{' || c == ',' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_whitespace() {
                j += 1;
            }
            if j < bytes.len() && (bytes[j].is_alphabetic() || bytes[j] == '_') {
                let start = j;
                while j < bytes.len() && (bytes[j].is_alphanumeric() || bytes[j] == '_') {
                    j += 1;
                }
                let mut k = j;
                while k < bytes.len() && bytes[k].is_whitespace() {
                    k += 1;
                }
                if k < bytes.len() && bytes[k] == ':' {
                    // copy whitespace between delimiter and key, then quote the key
                    out.extend(bytes[i + 1..start].iter());
                    out.push('"');
                    out.extend(bytes[start..j].iter());
                    out.push('"');
                    i = j;
                    continue;
                }
            }
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let v = parse_tolerant_json(r#"{"action": "WAGER"}"#).unwrap();
        assert_eq!(v["action"], "WAGER");
    }

    #[test]
    fn strips_code_fence() {
        let v = parse_tolerant_json("```json\n{\"action\": \"WAGER\"}\n```").unwrap();
        assert_eq!(v["action"], "WAGER");
    }

    #[test]
    fn strips_trailing_comma() {
        let v = parse_tolerant_json(r#"{"a": 1, "b": 2,}"#).unwrap();
        assert_eq!(v["b"], 2);
    }

    #[test]
    fn quotes_bare_keys() {
        let v = parse_tolerant_json(r#"{action: "WAGER", confidence: 0.8}"#).unwrap();
        assert_eq!(v["action"], "WAGER");
        assert_eq!(v["confidence"], 0.8);
    }
}
