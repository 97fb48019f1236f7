//! Content fingerprint for change detection.
//!
//! The fingerprint is the SHA-224 digest (lower-case hex) of the record's
//! trimmed values concatenated in field-name order with no delimiter. Two
//! records with the same field content yield the same fingerprint no
//! matter how their fields were inserted; any change to a trimmed value
//! changes it.
//!
//! Because there is no separator, `{a: "ab", b: "c"}` and
//! `{a: "a", b: "bc"}` collide. Staging and cache are joined on guid first,
//! so such a collision only hides an edit that moves characters across a
//! field boundary of the same record.

use sha2::{Digest, Sha224};

use crate::error::SyncError;
use crate::models::Record;

/// Fingerprint a record that must carry `guid_field`.
///
/// # Errors
///
/// [`SyncError::MalformedRecord`] if the guid field is missing or blank.
pub fn fingerprint(record: &Record, guid_field: &str) -> Result<String, SyncError> {
    record.guid(guid_field)?;
    Ok(digest(record))
}

fn digest(record: &Record) -> String {
    let mut hasher = Sha224::new();
    for (_, value) in record.fields() {
        hasher.update(value.trim().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
