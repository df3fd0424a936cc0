//! # Normalization Engine
//!
//! Maps publisher-specific activity shapes onto [`CanonicalRecord`]. Each
//! supported publisher is a [`PublisherProfile`] in a fixed registry; the
//! [`Normalizer`] resolves its profile once, when it is built, so an
//! unsupported publisher fails at startup rather than on the first record.
//!
//! ## Contained Modules:
//! - **`record`**: the canonical record.
//! - **`extract`**: id segmentation, timestamp parsing, geo, matching rules.
//! - **`publishers`**: profiles, registry and per-publisher extraction entry points.
//! - **`atom`**: Atom `<entry>` decoding for XML streams.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Atom entry decoding.
pub mod atom;
/// Shared field extraction helpers.
pub mod extract;
/// Publisher profiles and registry.
pub mod publishers;
/// Canonical record type.
pub mod record;

use serde_json::Value;
use thiserror::Error;

use crate::configs::StreamSession;
use crate::framing::{Framing, RawRecord};

pub use extract::{extract_bio_place, extract_matching_rules, extract_place, PostedTime};
pub use publishers::{
    extract_body, extract_geo_coordinates, extract_native_id, extract_posted_time, profile, supported_publishers,
    PublisherProfile,
};
pub use record::CanonicalRecord;

/// Why a record could not be normalized.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeError {
    /// No profile is registered for the publisher.
    #[error("unsupported publisher: {0}")]
    UnsupportedPublisher(String),
    /// The record is not valid UTF-8, JSON or Atom.
    #[error("undecodable record: {0}")]
    Decode(String),
    /// A field every record must carry is missing.
    #[error("record has no {0} field")]
    MissingField(&'static str),
}

/// Normalizes the records of one stream.
#[derive(Debug, Clone)]
pub struct Normalizer {
    profile: &'static PublisherProfile,
    stream_type: String,
    stream_id: i64,
}

impl Normalizer {
    /// Normalizer for the publisher, stream type and stream id of `session`.
    pub fn new(session: &StreamSession) -> Result<Self, NormalizeError> {
        Self::for_stream(&session.publisher, &session.stream_type, session.stream_id)
    }

    /// Normalizer for an explicit publisher and stream.
    pub fn for_stream(publisher: &str, stream_type: &str, stream_id: i64) -> Result<Self, NormalizeError> {
        let profile = publishers::profile(publisher)?;
        log::debug!("Normalizing {} records of {} stream {}", profile.tag, stream_type, stream_id);
        Ok(Self {
            profile,
            stream_type: stream_type.to_string(),
            stream_id,
        })
    }

    /// Publisher tag this normalizer serves.
    pub fn publisher(&self) -> &'static str {
        self.profile.tag
    }

    /// Decodes a raw record into the JSON activity shape.
    pub fn decode(raw: &RawRecord) -> Result<Value, NormalizeError> {
        let text = raw
            .to_text()
            .map_err(|e| NormalizeError::Decode(format!("record #{} is not UTF-8: {}", raw.sequence(), e)))?;
        match raw.format() {
            Framing::Json => serde_json::from_str(text)
                .map_err(|e| NormalizeError::Decode(format!("record #{} is not JSON: {}", raw.sequence(), e))),
            Framing::Xml => atom::decode_entry(text),
        }
    }

    /// Builds the canonical record for `raw`.
    pub fn normalize(&self, raw: &RawRecord) -> Result<CanonicalRecord, NormalizeError> {
        let activity = Self::decode(raw)?;
        self.normalize_value(raw.to_text().unwrap_or_default(), &activity)
    }

    /// Builds the canonical record from an already-decoded activity and its source text.
    pub fn normalize_value(&self, raw_content: &str, activity: &Value) -> Result<CanonicalRecord, NormalizeError> {
        let native_id = self.profile.native_id(activity)?;

        let posted = self.profile.posted_time(activity);
        if posted.fallback {
            log::warn!(
                "No usable posting time on {} record {}, using processing time",
                self.profile.tag,
                native_id
            );
        }

        let (latitude, longitude) = self.profile.geo_coordinates(activity);
        let (rule_values, rule_tags) = extract_matching_rules(&self.stream_type, activity);

        Ok(CanonicalRecord {
            native_id,
            publisher: self.profile.tag.to_string(),
            raw_content: raw_content.to_string(),
            body: self.profile.body(activity),
            rule_values,
            rule_tags,
            posted_at: posted.at,
            latitude,
            longitude,
            place: extract_place(activity),
            bio_place: extract_bio_place(activity),
            stream_id: self.stream_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_record(text: &str) -> RawRecord {
        RawRecord::new(0, Framing::Json, text.as_bytes().to_vec())
    }

    #[test]
    fn test_unsupported_publisher_fails_at_construction() {
        let err = Normalizer::for_stream("friendster", "track", 1).unwrap_err();
        assert_eq!(err, NormalizeError::UnsupportedPublisher("friendster".to_string()));
    }

    #[test]
    fn test_normalize_twitter_track_record() {
        let text = r#"{"id":"tag:search.twitter.com,2005:2271751113","body":"hello é","postedTime":"2012-05-07T15:30:00.000Z","geo":{"type":"Point","coordinates":[40.7,-74.0]},"location":{"displayName":"Manhattan"},"actor":{"location":{"displayName":"NYC"}},"gnip":{"matching_rules":[{"value":"hello","tag":"greeting"}]}}"#;
        let normalizer = Normalizer::for_stream("twitter", "track", 7).unwrap();

        let record = normalizer.normalize(&json_record(text)).unwrap();
        assert_eq!(record.native_id, "2271751113");
        assert_eq!(record.publisher, "twitter");
        assert_eq!(record.raw_content, text);
        assert_eq!(record.body, "hello é");
        assert_eq!(record.rule_values, "hello");
        assert_eq!(record.rule_tags, "greeting");
        assert_eq!(record.posted_at.to_rfc3339(), "2012-05-07T15:30:00+00:00");
        assert_eq!((record.latitude, record.longitude), (40.7, -74.0));
        assert_eq!(record.place, "Manhattan");
        assert_eq!(record.bio_place, "NYC");
        assert_eq!(record.stream_id, 7);
    }

    #[test]
    fn test_missing_fields_get_sentinels() {
        let normalizer = Normalizer::for_stream("stocktwits", "firehose", 1).unwrap();
        let record = normalizer
            .normalize(&json_record(r#"{"id":"http://stocktwits.com/message/42"}"#))
            .unwrap();
        assert_eq!(record.native_id, "42");
        assert_eq!(record.body, "");
        assert_eq!((record.rule_values.as_str(), record.rule_tags.as_str()), ("firehose", "firehose"));
        assert!(!record.has_coordinates());
        assert_eq!(record.place, "");
    }

    #[test]
    fn test_undecodable_records() {
        let normalizer = Normalizer::for_stream("twitter", "track", 1).unwrap();

        let invalid_utf8 = RawRecord::new(3, Framing::Json, vec![b'{', 0xff, b'}']);
        assert!(matches!(normalizer.normalize(&invalid_utf8), Err(NormalizeError::Decode(_))));

        assert!(matches!(normalizer.normalize(&json_record("{not json}")), Err(NormalizeError::Decode(_))));
        assert_eq!(
            normalizer.normalize(&json_record(r#"{"body":"x"}"#)).unwrap_err(),
            NormalizeError::MissingField("id")
        );
    }

    #[test]
    fn test_normalize_atom_entry() {
        let entry = "<entry><id>http://www.newsgator.com/article/555/feed</id>\
            <updated>2012-05-07T15:30:00Z</updated><title>Headline</title>\
            <georss:point>45.5 -73.6</georss:point></entry>";
        let normalizer = Normalizer::for_stream("newsgator", "firehose", 1).unwrap();

        let record = normalizer
            .normalize(&RawRecord::new(0, Framing::Xml, entry.as_bytes().to_vec()))
            .unwrap();
        assert_eq!(record.native_id, "555");
        assert_eq!(record.body, "Headline");
        assert_eq!(record.posted_at.to_rfc3339(), "2012-05-07T15:30:00+00:00");
        assert_eq!((record.latitude, record.longitude), (45.5, -73.6));
        assert_eq!(record.raw_content, entry);
    }

    #[test]
    fn test_atom_track_entry_keeps_every_rule() {
        let entry = "<entry><id>http://www.newsgator.com/article/556/feed</id>\
            <published>2012-05-07T15:30:00Z</published><title>Lunch</title>\
            <gnip:matching_rules>\
            <gnip:matching_rule rel=\"inclusive\" tag=\"food\">fish</gnip:matching_rule>\
            <gnip:matching_rule rel=\"inclusive\" tag=\"side\">chips</gnip:matching_rule>\
            </gnip:matching_rules></entry>";
        let normalizer = Normalizer::for_stream("newsgator", "track", 1).unwrap();

        let record = normalizer
            .normalize(&RawRecord::new(0, Framing::Xml, entry.as_bytes().to_vec()))
            .unwrap();
        assert_eq!(
            (record.rule_values.as_str(), record.rule_tags.as_str()),
            ("fish,chips", "food,side")
        );
    }
}
