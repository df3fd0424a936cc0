//! The canonical, publisher-independent activity record.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Latitude and longitude stored when a record carries no coordinates.
pub const NO_COORDINATES: (f64, f64) = (0.0, 0.0);

/// One normalized activity, ready for a sink.
///
/// `(publisher, native_id)` identifies a record; sinks enforce the uniqueness.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    /// Publisher-native identifier derived from the activity id.
    pub native_id: String,
    /// Publisher tag, e.g. `twitter`.
    pub publisher: String,
    /// The record text exactly as received.
    pub raw_content: String,
    /// Human-readable text of the activity.
    pub body: String,
    /// Matching rule values joined with `,`.
    pub rule_values: String,
    /// Matching rule tags joined with `,`, empty unless every rule is tagged.
    pub rule_tags: String,
    /// When the activity was posted.
    pub posted_at: DateTime<Utc>,
    /// Latitude, `0.0` when unknown.
    pub latitude: f64,
    /// Longitude, `0.0` when unknown.
    pub longitude: f64,
    /// Display name of the activity location.
    pub place: String,
    /// Display name of the actor's profile location.
    pub bio_place: String,
    /// Stream the record came from.
    pub stream_id: i64,
}

impl CanonicalRecord {
    /// True when the record carries real coordinates.
    pub fn has_coordinates(&self) -> bool {
        (self.latitude, self.longitude) != NO_COORDINATES
    }
}
