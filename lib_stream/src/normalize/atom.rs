//! Atom `<entry>` decoding for Enterprise Data Collector streams.
//!
//! Entries are mapped onto the JSON activity shape the publisher profiles
//! read, so one set of extraction rules serves both wire formats. Only the
//! handful of elements the profiles use are decoded.

use regex::Regex;
use serde_json::{json, Map, Value};
use static_init::dynamic;

use super::NormalizeError;

#[dynamic]
static ENTRY: Regex = Regex::new(r"(?s)\A\s*<entry[\s>/]").expect("valid entry pattern");

#[dynamic]
static AUTHOR_NAME: Regex =
    Regex::new(r"(?s)<author[^>]*>.*?<name[^>]*>(.*?)</name>").expect("valid author pattern");

#[dynamic]
static MATCHING_RULE: Regex =
    Regex::new(r"(?s)<gnip:matching_rule(\s[^>]*)?>(.*?)</gnip:matching_rule>").expect("valid rule pattern");

#[dynamic]
static TAG_ATTRIBUTE: Regex = Regex::new(r#"\btag\s*=\s*"([^"]*)""#).expect("valid attribute pattern");

#[dynamic]
static GEO_POINT: Regex =
    Regex::new(r"(?s)<georss:point[^>]*>\s*(-?[0-9.]+)[\s,]+(-?[0-9.]+)\s*</georss:point>").expect("valid point pattern");

#[dynamic]
static ID: Regex = element_pattern("id");
#[dynamic]
static PUBLISHED: Regex = element_pattern("published");
#[dynamic]
static UPDATED: Regex = element_pattern("updated");
#[dynamic]
static TITLE: Regex = element_pattern("title");
#[dynamic]
static CONTENT: Regex = element_pattern("content");
#[dynamic]
static SUMMARY: Regex = element_pattern("summary");
#[dynamic]
static VERB: Regex = element_pattern("activity:verb");

/// `<name ...>text</name>`, capturing the text. The name must be followed by
/// whitespace or `>`, so `<id>` never matches `<identity>`.
fn element_pattern(name: &str) -> Regex {
    Regex::new(&format!(r"(?s)<{0}(?:\s[^>]*)?>(.*?)</{0}>", regex::escape(name))).expect("valid element pattern")
}

/// Text of the first element `pattern` matches, trimmed and unescaped. Empty counts as absent.
fn element(text: &str, pattern: &Regex) -> Option<String> {
    let value = pattern.captures(text)?.get(1)?.as_str();
    let value = unescape(strip_cdata(value.trim()));
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn strip_cdata(text: &str) -> &str {
    text.strip_prefix("<![CDATA[")
        .and_then(|t| t.strip_suffix("]]>"))
        .unwrap_or(text)
}

/// Resolves the five predefined XML entities and numeric character references.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..end];
        let resolved = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .map(|hex| u32::from_str_radix(hex, 16).ok())
                .unwrap_or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match resolved {
            Some(c) => out.push(c),
            None => out.push_str(&tail[..=end]),
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    out
}

/// The last path segment of an activity verb URI (`.../schema/1.0/post` → `post`).
fn verb_name(verb: &str) -> String {
    verb.rsplit('/').next().unwrap_or(verb).to_string()
}

/// Decodes one `<entry>` element into the JSON activity shape.
pub fn decode_entry(text: &str) -> Result<Value, NormalizeError> {
    if !ENTRY.is_match(text) || !text.trim_end().ends_with("</entry>") {
        return Err(NormalizeError::Decode("not an Atom <entry> element".to_string()));
    }

    let mut activity = Map::new();
    let mut put = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            activity.insert(key.to_string(), Value::String(value));
        }
    };
    put("id", element(text, &ID));
    put("postedTime", element(text, &PUBLISHED));
    put("updatedTime", element(text, &UPDATED));
    put("title", element(text, &TITLE));
    put("body", element(text, &CONTENT).or_else(|| element(text, &SUMMARY)));
    put("verb", element(text, &VERB).map(|v| verb_name(&v)));

    if let Some(name) = AUTHOR_NAME.captures(text).and_then(|c| c.get(1)) {
        activity.insert("actor".to_string(), json!({ "displayName": unescape(name.as_str().trim()) }));
    }

    if let Some(point) = GEO_POINT.captures(text) {
        let lat: Option<f64> = point.get(1).and_then(|m| m.as_str().parse().ok());
        let lon: Option<f64> = point.get(2).and_then(|m| m.as_str().parse().ok());
        if let (Some(lat), Some(lon)) = (lat, lon) {
            activity.insert("geo".to_string(), json!({ "type": "Point", "coordinates": [lat, lon] }));
        }
    }

    let rules: Vec<Value> = MATCHING_RULE
        .captures_iter(text)
        .map(|rule| {
            let tag = rule
                .get(1)
                .and_then(|attrs| TAG_ATTRIBUTE.captures(attrs.as_str()))
                .and_then(|c| c.get(1))
                .map(|t| unescape(t.as_str()));
            let value = rule.get(2).map(|v| unescape(v.as_str().trim())).unwrap_or_default();
            json!({ "value": value, "tag": tag })
        })
        .collect();
    if !rules.is_empty() {
        activity.insert("gnip".to_string(), json!({ "matching_rules": rules }));
    }

    Ok(Value::Object(activity))
}
