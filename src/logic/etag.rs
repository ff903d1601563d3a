use axum::http::{header, HeaderMap};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::model::Instance;

/// Fingerprint of the user-mutable state of an instance.
///
/// Hashes the JSON encoding of `[architecture, config, devices, ephemeral,
/// profiles]`. Config and devices are ordered maps, so the encoding is stable.
pub fn etag_hash(instance: &Instance) -> Result<String> {
    let fields = (
        instance.architecture,
        &instance.config,
        &instance.devices,
        instance.ephemeral,
        &instance.profiles,
    );
    let encoded = serde_json::to_vec(&fields)?;

    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    Ok(hex::encode(hasher.finalize()))
}

/// Compares the request's `If-Match` header with the instance fingerprint.
///
/// No header (or an empty one) means the caller opted out of the check. Any
/// other value, including one that isn't valid UTF-8, must match.
pub fn etag_check(headers: &HeaderMap, instance: &Instance) -> Result<()> {
    let Some(given) = headers
        .get(header::IF_MATCH)
        .map(|value| trim_etag(value.as_bytes()))
        .filter(|value| !value.is_empty())
    else {
        return Ok(());
    };

    let current = etag_hash(instance)?;
    if given != current.as_bytes() {
        return Err(Error::PreconditionFailed(format!(
            "ETag doesn't match: {} vs {}",
            String::from_utf8_lossy(given),
            current
        )));
    }

    Ok(())
}

fn trim_etag(value: &[u8]) -> &[u8] {
    let value = value.trim_ascii();
    let start = value.iter().position(|b| *b != b'"').unwrap_or(value.len());
    let end = value.iter().rposition(|b| *b != b'"').map_or(start, |i| i + 1);
    &value[start..end]
}
