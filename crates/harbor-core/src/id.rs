//! Extension id validation.

use crate::error::{CoreError, CoreResult};

/// Ids that can never be taken by an external extension.
pub const RESERVED_IDS: &[&str] = &["builtin", "harbor", "plugin", "extension", "local", "anilist"];

/// Minimum id length (first char, at least one middle char, last char).
const MIN_LEN: usize = 3;
/// Maximum id length (first char, up to 38 middle chars, last char).
const MAX_LEN: usize = 40;

/// Validate an extension id.
///
/// The accepted grammar is `^[A-Za-z][A-Za-z0-9-]{1,38}[A-Za-z0-9]$`. The id
/// must also not equal (case-insensitively) any entry of [`RESERVED_IDS`] or
/// of `reserved`, which holds the ids of registered built-ins.
///
/// # Errors
///
/// Returns [`CoreError::InvalidId`] describing the violation.
pub fn validate_extension_id(id: &str, reserved: &[&str]) -> CoreResult<()> {
    let invalid = |reason: &str| CoreError::InvalidId {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    let bytes = id.as_bytes();
    if bytes.len() < MIN_LEN || bytes.len() > MAX_LEN {
        return Err(invalid("must be between 3 and 40 characters long"));
    }
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return Err(invalid("must not be empty"));
    };
    if !first.is_ascii_alphabetic() {
        return Err(invalid("must start with a letter"));
    }
    if !last.is_ascii_alphanumeric() {
        return Err(invalid("must end with a letter or digit"));
    }
    if !bytes
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || *b == b'-')
    {
        return Err(invalid("may only contain letters, digits and '-'"));
    }

    if RESERVED_IDS
        .iter()
        .chain(reserved.iter())
        .any(|r| r.eq_ignore_ascii_case(id))
    {
        return Err(invalid("collides with a reserved id"));
    }

    Ok(())
}

/// Whether `id` passes [`validate_extension_id`] with no extra reserved ids.
#[must_use]
pub fn is_valid_extension_id(id: &str) -> bool {
    validate_extension_id(id, &[]).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_valid_ids() {
        for id in ["gogoanime", "my-ext-2", "abc", "A1b", "x-y"] {
            assert!(is_valid_extension_id(id), "{id} should be valid");
        }
        let longest = format!("a{}b", "c".repeat(38));
        assert!(is_valid_extension_id(&longest));
    }

    #[test]
    fn test_rejects_invalid_ids() {
        let too_long = format!("a{}b", "c".repeat(39));
        for id in ["", "ab", "1abc", "-abc", "abc-", "ab_c", "ab c", "é-ext", too_long.as_str()] {
            assert!(!is_valid_extension_id(id), "{id:?} should be invalid");
        }
    }

    #[test]
    fn test_rejects_reserved_ids() {
        assert!(validate_extension_id("Builtin", &[]).is_err());
        assert!(validate_extension_id("animetosho", &["animetosho"]).is_err());
        assert!(validate_extension_id("animetosho", &[]).is_ok());
    }
}
