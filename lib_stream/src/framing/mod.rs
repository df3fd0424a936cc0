//! # Stream Framing Module
//!
//! Turns the unbounded byte stream of a firehose connection into discrete
//! records. The framer knows nothing about networking or record semantics,
//! only the boundary pattern of the upstream wire format.
//!
//! ## Contained Modules:
//! - **`frame_buffer`**: the per-session accumulator and the `Framing`
//!   policies (JSON lines, Atom `<entry>` elements).

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Byte accumulator and record extraction.
pub mod frame_buffer;

pub use frame_buffer::{CompleteEntries, FrameBuffer, Framing, RawRecord};
