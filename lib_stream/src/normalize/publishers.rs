//! Publisher profiles: one data bundle per supported publisher.
//!
//! Adding a publisher means adding one profile and one registry entry.

use std::collections::HashMap;

use serde_json::Value;
use static_init::dynamic;

use super::extract::{self, first_str, PostedTime};
use super::NormalizeError;

/// Pointer to the activity id in every publisher's shape.
pub const ID_POINTER: &str = "/id";

/// Everything needed to normalize one publisher's records.
pub struct PublisherProfile {
    /// Publisher tag as configured.
    pub tag: &'static str,
    /// Where the activity id lives.
    pub id_path: &'static str,
    /// Derives the native id from the activity id.
    pub native_id: fn(&str) -> Option<String>,
    /// Candidate posting-time locations, in preference order.
    pub time_paths: &'static [&'static str],
    /// Selects the body text.
    pub body: fn(&Value) -> Option<String>,
    /// Selects `(latitude, longitude)`.
    pub geo: fn(&Value) -> Option<(f64, f64)>,
}

impl std::fmt::Debug for PublisherProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherProfile")
            .field("tag", &self.tag)
            .field("time_paths", &self.time_paths)
            .finish_non_exhaustive()
    }
}

impl PublisherProfile {
    /// Native id of `record`.
    pub fn native_id(&self, record: &Value) -> Result<String, NormalizeError> {
        let id = extract::str_at(record, self.id_path).ok_or(NormalizeError::MissingField("id"))?;
        (self.native_id)(id).ok_or_else(|| NormalizeError::Decode(format!("cannot derive a {} native id from {:?}", self.tag, id)))
    }

    /// Posting time of `record`, or the processing time when none parses.
    pub fn posted_time(&self, record: &Value) -> PostedTime {
        extract::posted_time(record, self.time_paths)
    }

    /// Body text of `record`, `""` when absent.
    pub fn body(&self, record: &Value) -> String {
        (self.body)(record).unwrap_or_default()
    }

    /// `(latitude, longitude)` of `record`, `(0.0, 0.0)` when absent.
    pub fn geo_coordinates(&self, record: &Value) -> (f64, f64) {
        (self.geo)(record).unwrap_or(super::record::NO_COORDINATES)
    }
}

fn no_geo(_: &Value) -> Option<(f64, f64)> {
    None
}

fn geo_lat_lon(record: &Value) -> Option<(f64, f64)> {
    extract::point_lat_lon(record, "/geo")
}

fn location_geo_lon_lat(record: &Value) -> Option<(f64, f64)> {
    extract::point_lon_lat(record, "/location/geo")
}

fn body_field(record: &Value) -> Option<String> {
    first_str(record, &["/body"])
}

/// `share` activities carry the user's text; every other verb is described by a display name.
fn getglue_body(record: &Value) -> Option<String> {
    match extract::str_at(record, "/verb") {
        Some("share") => first_str(record, &["/body"]),
        _ => first_str(record, &["/displayName", "/object/displayName"]),
    }
}

const POSTED: &[&str] = &["/postedTime"];
const POSTED_THEN_OBJECT: &[&str] = &["/postedTime", "/object/postedTime"];
const OBJECT_THEN_POSTED: &[&str] = &["/object/postedTime", "/postedTime"];
const POSTED_THEN_UPDATED: &[&str] = &["/postedTime", "/updatedTime"];

static TWITTER: PublisherProfile = PublisherProfile {
    tag: "twitter",
    id_path: ID_POINTER,
    native_id: extract::after_last_colon,
    time_paths: POSTED,
    body: body_field,
    geo: geo_lat_lon,
};

static YOUTUBE: PublisherProfile = PublisherProfile {
    tag: "youtube",
    id_path: ID_POINTER,
    native_id: extract::after_last_colon,
    time_paths: POSTED_THEN_OBJECT,
    body: |r| first_str(r, &["/object/summary", "/object/displayName"]),
    geo: no_geo,
};

static STOCKTWITS: PublisherProfile = PublisherProfile {
    tag: "stocktwits",
    id_path: ID_POINTER,
    native_id: extract::last_path_segment,
    time_paths: POSTED,
    body: body_field,
    geo: no_geo,
};

static GETGLUE: PublisherProfile = PublisherProfile {
    tag: "getglue",
    id_path: ID_POINTER,
    native_id: extract::last_path_segment,
    time_paths: POSTED,
    body: getglue_body,
    geo: no_geo,
};

static FOURSQUARE: PublisherProfile = PublisherProfile {
    tag: "foursquare",
    id_path: ID_POINTER,
    native_id: extract::last_path_segment,
    time_paths: POSTED,
    body: |r| first_str(r, &["/body", "/displayName"]),
    geo: location_geo_lon_lat,
};

static INSTAGRAM: PublisherProfile = PublisherProfile {
    tag: "instagram",
    id_path: ID_POINTER,
    native_id: extract::last_path_segment,
    time_paths: POSTED,
    body: |r| first_str(r, &["/object/summary", "/object/displayName"]),
    geo: location_geo_lon_lat,
};

static TUMBLR: PublisherProfile = PublisherProfile {
    tag: "tumblr",
    id_path: ID_POINTER,
    native_id: extract::second_to_last_path_segment,
    time_paths: OBJECT_THEN_POSTED,
    body: |r| first_str(r, &["/object/content", "/object/summary", "/object/displayName"]),
    geo: no_geo,
};

static NEWSGATOR: PublisherProfile = PublisherProfile {
    tag: "newsgator",
    id_path: ID_POINTER,
    native_id: extract::second_to_last_path_segment,
    time_paths: POSTED_THEN_UPDATED,
    body: |r| first_str(r, &["/body", "/title"]),
    geo: geo_lat_lon,
};

static WORDPRESS: PublisherProfile = PublisherProfile {
    tag: "wordpress",
    id_path: ID_POINTER,
    native_id: extract::keyed_path_segments,
    time_paths: OBJECT_THEN_POSTED,
    body: |r| first_str(r, &["/object/content", "/object/summary"]),
    geo: no_geo,
};

static DISQUS: PublisherProfile = PublisherProfile {
    tag: "disqus",
    id_path: ID_POINTER,
    native_id: extract::keyed_path_segments,
    time_paths: OBJECT_THEN_POSTED,
    body: |r| first_str(r, &["/object/content"]),
    geo: no_geo,
};

#[dynamic]
static REGISTRY: HashMap<&'static str, &'static PublisherProfile> = [
    &TWITTER,
    &YOUTUBE,
    &STOCKTWITS,
    &GETGLUE,
    &FOURSQUARE,
    &INSTAGRAM,
    &TUMBLR,
    &NEWSGATOR,
    &WORDPRESS,
    &DISQUS,
]
.into_iter()
.map(|profile| (profile.tag, profile))
.collect();

/// The profile registered for `publisher`.
pub fn profile(publisher: &str) -> Result<&'static PublisherProfile, NormalizeError> {
    REGISTRY
        .get(publisher)
        .copied()
        .ok_or_else(|| NormalizeError::UnsupportedPublisher(publisher.to_string()))
}

/// Tags of every registered publisher, sorted.
pub fn supported_publishers() -> Vec<&'static str> {
    let mut tags: Vec<&'static str> = REGISTRY.keys().copied().collect();
    tags.sort_unstable();
    tags
}

/// Native id of a `publisher` record.
pub fn extract_native_id(publisher: &str, record: &Value) -> Result<String, NormalizeError> {
    profile(publisher)?.native_id(record)
}

/// Posting time of a `publisher` record.
pub fn extract_posted_time(publisher: &str, record: &Value) -> Result<PostedTime, NormalizeError> {
    Ok(profile(publisher)?.posted_time(record))
}

/// Body text of a `publisher` record.
pub fn extract_body(publisher: &str, record: &Value) -> Result<String, NormalizeError> {
    Ok(profile(publisher)?.body(record))
}

/// `(latitude, longitude)` of a `publisher` record.
pub fn extract_geo_coordinates(publisher: &str, record: &Value) -> Result<(f64, f64), NormalizeError> {
    Ok(profile(publisher)?.geo_coordinates(record))
}
