//! SSH key injection into Ignition (spec 3.x) user data.

use semver::Version;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Version every merged document is rewritten to.
pub const IGNITION_VERSION: &str = "3.4.0";

#[derive(Debug, Error)]
pub enum IgnitionError {
    #[error("failed to parse ignition config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("ignition config does not declare ignition.version")]
    MissingVersion,

    #[error("unsupported ignition config version: {0}")]
    UnsupportedVersion(String),

    #[error("malformed ignition config: {0}")]
    Malformed(&'static str),
}

fn latest() -> Version {
    Version::new(3, 4, 0)
}

/// Accepts any released 3.x version up to [`IGNITION_VERSION`].
fn check_version(raw: &str) -> Result<(), IgnitionError> {
    let version = Version::parse(raw.trim())
        .map_err(|_| IgnitionError::UnsupportedVersion(raw.to_string()))?;
    if version.major != 3 || !version.pre.is_empty() || version > latest() {
        return Err(IgnitionError::UnsupportedVersion(raw.to_string()));
    }
    Ok(())
}

fn normalize_version(root: &mut Map<String, Value>) -> Result<(), IgnitionError> {
    let ignition = root
        .entry("ignition")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or(IgnitionError::Malformed("ignition is not an object"))?;

    match ignition.get("version") {
        None => return Err(IgnitionError::MissingVersion),
        Some(Value::String(raw)) => check_version(raw)?,
        Some(other) => return Err(IgnitionError::UnsupportedVersion(other.to_string())),
    }
    ignition.insert("version".to_string(), json!(IGNITION_VERSION));
    Ok(())
}

/// Appends `public_key` to the authorized keys of `username`.
///
/// Empty input yields a fresh document. The user entry is created at the end
/// of `passwd.users` when missing. Existing keys are kept in order and the
/// new key always ends up last, even if it was already present.
pub fn merge(document: &str, username: &str, public_key: &str) -> Result<String, IgnitionError> {
    let mut doc: Value = if document.trim().is_empty() {
        json!({ "ignition": { "version": IGNITION_VERSION } })
    } else {
        serde_json::from_str(document)?
    };

    let root = doc
        .as_object_mut()
        .ok_or(IgnitionError::Malformed("document is not an object"))?;
    normalize_version(root)?;

    let users = root
        .entry("passwd")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or(IgnitionError::Malformed("passwd is not an object"))?
        .entry("users")
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .ok_or(IgnitionError::Malformed("passwd.users is not an array"))?;

    let index = match users
        .iter()
        .position(|u| u.get("name").and_then(Value::as_str) == Some(username))
    {
        Some(index) => index,
        None => {
            users.push(json!({ "name": username }));
            users.len() - 1
        }
    };

    users[index]
        .as_object_mut()
        .ok_or(IgnitionError::Malformed("passwd.users entry is not an object"))?
        .entry("sshAuthorizedKeys")
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .ok_or(IgnitionError::Malformed("sshAuthorizedKeys is not an array"))?
        .push(Value::String(public_key.to_string()));

    Ok(serde_json::to_string(&doc)?)
}
