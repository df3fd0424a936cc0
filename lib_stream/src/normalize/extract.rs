//! Field extraction helpers shared by every publisher profile.
//!
//! Paths are JSON pointers (`/object/postedTime`). Absent or mistyped fields
//! yield `None`; callers turn that into the documented sentinel.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

/// Literal stored in both rule columns for non-`track` streams.
pub const FIREHOSE_RULE: &str = "firehose";

/// Twitter classic timestamp, e.g. `Wed Aug 27 13:08:45 +0000 2008`.
const TWITTER_CLASSIC_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";
/// Naive timestamp, interpreted as UTC.
const NAIVE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A posting time and whether it had to be substituted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostedTime {
    /// The posting time.
    pub at: DateTime<Utc>,
    /// True when no parseable time was found and `at` is the processing time.
    pub fallback: bool,
}

impl PostedTime {
    /// A time taken from the record.
    pub fn parsed(at: DateTime<Utc>) -> Self {
        Self { at, fallback: false }
    }

    /// The substitute used when the record has no usable time.
    pub fn now() -> Self {
        Self {
            at: Utc::now(),
            fallback: true,
        }
    }
}

/// The string at `pointer`, if present and a string.
pub fn str_at<'a>(record: &'a Value, pointer: &str) -> Option<&'a str> {
    record.pointer(pointer).and_then(Value::as_str)
}

/// The first non-empty string among `pointers`.
pub fn first_str(record: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .filter_map(|p| str_at(record, p))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

// --- Id segmentation ---

/// `tag:search.twitter.com,2005:123` → `123`.
pub fn after_last_colon(id: &str) -> Option<String> {
    id.rsplit(':').next().filter(|s| !s.is_empty()).map(str::to_string)
}

/// `http://stocktwits.com/message/123` → `123`.
pub fn last_path_segment(id: &str) -> Option<String> {
    id.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `http://staff.tumblr.com/post/123/slug` → `123`.
pub fn second_to_last_path_segment(id: &str) -> Option<String> {
    id.trim_end_matches('/')
        .rsplit('/')
        .nth(1)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `tag:wordpress.com,2005:blog/1/post/2` → `1:2`.
///
/// The part after the last `:` is read as `key/value/key/value`; the values
/// are joined with `:`.
pub fn keyed_path_segments(id: &str) -> Option<String> {
    let tail = id.rsplit(':').next()?;
    let values: Vec<&str> = tail
        .split('/')
        .filter(|s| !s.is_empty())
        .skip(1)
        .step_by(2)
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(":"))
    }
}

// --- Time ---

/// Parses the timestamp formats found across publishers.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = DateTime::parse_from_str(text, TWITTER_CLASSIC_FORMAT) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = DateTime::parse_from_rfc2822(text) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, NAIVE_FORMAT)
        .ok()
        .map(|at| at.and_utc())
}

/// The first present, parseable time among `pointers`, or the fallback.
pub fn posted_time(record: &Value, pointers: &[&str]) -> PostedTime {
    pointers
        .iter()
        .filter_map(|p| str_at(record, p))
        .find_map(parse_timestamp)
        .map(PostedTime::parsed)
        .unwrap_or_else(PostedTime::now)
}

// --- Geo ---

fn point_coordinates(record: &Value, pointer: &str) -> Option<(f64, f64)> {
    let geo = record.pointer(pointer)?;
    let kind = geo.get("type").and_then(Value::as_str)?;
    if !kind.eq_ignore_ascii_case("point") {
        return None;
    }
    match geo.get("coordinates").and_then(Value::as_array)?.as_slice() {
        [first, second, ..] => Some((first.as_f64()?, second.as_f64()?)),
        _ => None,
    }
}

/// A Point whose coordinates are stored `[lat, lon]`.
pub fn point_lat_lon(record: &Value, pointer: &str) -> Option<(f64, f64)> {
    point_coordinates(record, pointer)
}

/// A Point whose coordinates are stored `[lon, lat]` (GeoJSON order).
pub fn point_lon_lat(record: &Value, pointer: &str) -> Option<(f64, f64)> {
    point_coordinates(record, pointer).map(|(lon, lat)| (lat, lon))
}

// --- Rules and places ---

/// Joins matching rules: values always, tags only when every rule has one.
pub fn join_matching_rules<'a, I>(rules: I) -> (String, String)
where
    I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
{
    let mut values = Vec::new();
    let mut tags = Vec::new();
    let mut all_tagged = true;
    for (value, tag) in rules {
        values.push(value);
        match tag {
            Some(tag) => tags.push(tag),
            None => all_tagged = false,
        }
    }
    let tags = if all_tagged { tags.join(",") } else { String::new() };
    (values.join(","), tags)
}

/// Rule values and tags for a record of a `stream_type` stream.
pub fn extract_matching_rules(stream_type: &str, record: &Value) -> (String, String) {
    if stream_type != "track" {
        return (FIREHOSE_RULE.to_string(), FIREHOSE_RULE.to_string());
    }
    let rules = record
        .pointer("/gnip/matching_rules")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    join_matching_rules(rules.iter().map(|rule| {
        (
            rule.get("value").and_then(Value::as_str).unwrap_or(""),
            rule.get("tag").and_then(Value::as_str),
        )
    }))
}

/// Display name of the activity location, `""` when absent.
pub fn extract_place(record: &Value) -> String {
    str_at(record, "/location/displayName").unwrap_or("").to_string()
}

/// Display name of the actor's profile location, `""` when absent.
pub fn extract_bio_place(record: &Value) -> String {
    str_at(record, "/actor/location/displayName").unwrap_or("").to_string()
}
