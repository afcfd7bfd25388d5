//! Core message types.

use chrono::{DateTime, Utc};

/// Dense zero-based message number, the primary key of every store.
pub type MessageIndex = u32;

/// A fully materialized message, copied out of the archive.
///
/// The archive itself never builds these; they are produced on demand by
/// [`crate::archive::Archive::load`] for callers that want an owned value
/// (JSON output, tests).
#[derive(Debug, Clone, serde::Serialize)]
pub struct Message {
    pub index: MessageIndex,
    /// Archive-scoped unique identifier (the `Message-ID` header, unpacked).
    pub message_id: String,
    /// Raw `From:` value.
    pub from: String,
    /// Display name extracted from `from`.
    pub real_name: String,
    pub subject: String,
    /// Unix timestamp in seconds.
    pub date: u32,
    pub parent: Option<MessageIndex>,
    pub children: Vec<MessageIndex>,
    /// Decompressed message text, lossily decoded as UTF-8.
    pub body: String,
}

impl Message {
    /// `date` as a UTC timestamp.
    pub fn date_time(&self) -> DateTime<Utc> {
        timestamp(self.date)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Convert an archive timestamp to `DateTime<Utc>`.
pub fn timestamp(secs: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(i64::from(secs), 0).unwrap_or_default()
}
