//! Best-effort extraction of the summary-score map from loosely formatted
//! model output, and resolution of display names back to candidate ids.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*(.*?)```").expect("valid fence regex"));

/// Extracts a display-name -> raw-score-string map from the scoring
/// response. Tries, in order: the last fenced ```json block, the last
/// balanced `{...}` object anywhere in the text, and finally a per-name
/// regex scan for `"Name": "value"` pairs. The first stage yielding a
/// non-empty map wins; an empty map means nothing usable was found.
pub fn extract_scores(text: &str, names: &[String]) -> BTreeMap<String, String> {
    for caps in FENCE_RE
        .captures_iter(text)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
    {
        if let Some(block) = caps.get(1) {
            if let Some(map) = parse_score_object(block.as_str()) {
                if !map.is_empty() {
                    return map;
                }
            }
        }
    }

    if let Some(object) = last_balanced_object(text) {
        if let Some(map) = parse_score_object(object) {
            if !map.is_empty() {
                return map;
            }
        }
    }

    scan_name_value_pairs(text, names)
}

/// Parses a JSON object string into a string map, repairing sloppy JSON
/// (trailing commas, single quotes) when the strict parse fails.
fn parse_score_object(raw: &str) -> Option<BTreeMap<String, String>> {
    let value = serde_json::from_str::<Value>(raw.trim())
        .ok()
        .or_else(|| jsonrepair::repair_json_string(raw.trim()).ok())?;
    let object = value.as_object()?;
    let mut map = BTreeMap::new();
    for (key, val) in object {
        match val {
            Value::String(s) => {
                map.insert(key.clone(), s.clone());
            }
            Value::Number(n) => {
                map.insert(key.clone(), n.to_string());
            }
            _ => {}
        }
    }
    Some(map)
}

/// Returns the last balanced top-level `{...}` region in the input,
/// skipping brace characters inside string literals.
fn last_balanced_object(s: &str) -> Option<&str> {
    let mut in_str = false;
    let mut esc = false;
    let mut depth = 0usize;
    let mut start: Option<usize> = None;
    let mut last: Option<(usize, usize)> = None;

    for (i, ch) in s.char_indices() {
        if in_str {
            if esc {
                esc = false;
            } else if ch == '\\' {
                esc = true;
            } else if ch == '"' {
                in_str = false;
            }
            continue;
        }

        match ch {
            '"' if depth > 0 => in_str = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(st) = start {
                            last = Some((st, i));
                        }
                    }
                }
            }
            _ => {}
        }
    }
    last.map(|(a, b)| &s[a..=b])
}

/// Final fallback: scan for `"Name": "value"` pairs for each known
/// candidate display name.
fn scan_name_value_pairs(text: &str, names: &[String]) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for name in names {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            continue;
        }
        let pattern = format!(r#"(?i)"{}"\s*:\s*"([^"]*)""#, regex::escape(trimmed));
        let Ok(re) = Regex::new(&pattern) else { continue };
        if let Some(caps) = re.captures(text) {
            if let Some(value) = caps.get(1) {
                map.insert(trimmed.to_string(), value.as_str().to_string());
            }
        }
    }
    map
}

/// Maps display-name keys back to stored candidate ids: case-insensitive
/// exact match first, then substring containment in either direction, else
/// the raw display name is kept as the key.
pub fn resolve_keys(
    raw: BTreeMap<String, String>,
    candidates: &[(Uuid, String)],
) -> BTreeMap<String, String> {
    let mut resolved = BTreeMap::new();
    for (display, score) in raw {
        let needle = display.trim().to_lowercase();
        let exact = candidates
            .iter()
            .find(|(_, name)| name.trim().to_lowercase() == needle);
        let matched = exact.or_else(|| {
            candidates.iter().find(|(_, name)| {
                let n = name.trim().to_lowercase();
                !n.is_empty() && (n.contains(&needle) || needle.contains(&n))
            })
        });
        let key = matched
            .map(|(id, _)| id.to_string())
            .unwrap_or_else(|| display.clone());
        resolved.insert(key, score);
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["Alpha".to_string(), "Beta".to_string()]
    }

    #[test]
    fn fenced_json_wins() {
        let text = "### Summary Scores\n| Alpha | Beta |\n\n```json\n\
                    {\"Alpha\": \"7/15\", \"Beta\": \"12/15\"}\n```";
        let map = extract_scores(text, &names());
        assert_eq!(map.get("Alpha").unwrap(), "7/15");
        assert_eq!(map.get("Beta").unwrap(), "12/15");
    }

    #[test]
    fn bare_object_fallback() {
        let text = "Scoring logic: each check is one point.\n\
                    {\"Alpha\": \"3/5\", \"Beta\": \"5/5\"} is the result.";
        let map = extract_scores(text, &names());
        assert_eq!(map.get("Beta").unwrap(), "5/5");
    }

    #[test]
    fn last_object_is_preferred() {
        let text = "{\"draft\": \"x\"} and later {\"Alpha\": \"1/2\", \"Beta\": \"2/2\"}";
        let map = extract_scores(text, &names());
        assert_eq!(map.get("Alpha").unwrap(), "1/2");
    }

    #[test]
    fn numeric_values_are_stringified() {
        let text = "```json\n{\"Alpha\": 8.5, \"Beta\": \"9/10\"}\n```";
        let map = extract_scores(text, &names());
        assert_eq!(map.get("Alpha").unwrap(), "8.5");
    }

    #[test]
    fn regex_scan_rescues_broken_json() {
        let text = "totals were \"Alpha\": \"4/9\" while \"Beta\": \"6/9\" overall {";
        let map = extract_scores(text, &names());
        assert_eq!(map.get("Alpha").unwrap(), "4/9");
        assert_eq!(map.get("Beta").unwrap(), "6/9");
    }

    #[test]
    fn unusable_text_yields_empty_map() {
        assert!(extract_scores("no scores here", &names()).is_empty());
    }

    #[test]
    fn resolve_exact_then_substring_then_raw() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let candidates = vec![(a, "Alpha".to_string()), (b, "Beta Max".to_string())];
        let mut raw = BTreeMap::new();
        raw.insert("alpha".to_string(), "1/2".to_string());
        raw.insert("Beta".to_string(), "2/2".to_string());
        raw.insert("Gamma".to_string(), "0/2".to_string());

        let resolved = resolve_keys(raw, &candidates);
        assert_eq!(resolved.get(&a.to_string()).unwrap(), "1/2");
        assert_eq!(resolved.get(&b.to_string()).unwrap(), "2/2");
        assert_eq!(resolved.get("Gamma").unwrap(), "0/2");
    }
}
