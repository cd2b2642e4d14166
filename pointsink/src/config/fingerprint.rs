use md5::{Digest, Md5};

use super::{ConfigValue, SinkConfig};

/// A digest identifying a sink definition independent of the categories it serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Hex-encoded md5 of `origin`
    pub hash: String,
    /// The concatenated values the hash was taken over, kept for auditing
    pub origin: String,
}

/// Concatenates every non-empty string value in ascending key order and hashes it.
///
/// Non-string values and the category list do not participate, so the same backend
/// declared under two categories fingerprints identically.
pub fn fingerprint(config: &SinkConfig) -> Fingerprint {
    // values is a BTreeMap: iteration is already in ascending key order.
    let origin: String = config
        .values
        .iter()
        .filter(|(key, _)| key.as_str() != "categories")
        .filter_map(|(_, value)| match value {
            ConfigValue::String(s) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        })
        .collect();

    Fingerprint {
        hash: hex::encode(Md5::digest(origin.as_bytes())),
        origin,
    }
}
