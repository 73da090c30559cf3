//! Custom-source media id encoding.
//!
//! AniList ids occupy `[0, 2^31 - 1]`. Ids minted for custom sources set the
//! high bit: `2^31 + (identifier << 36) + local_id`. With a 16-bit
//! identifier and a 36-bit local id the largest id stays below `2^53`, so
//! every encoded id is a safe JavaScript integer.

/// First id of the extension id space.
pub const EXTENSION_ID_OFFSET: u64 = 1 << 31;
/// Bits reserved for the local id.
pub const LOCAL_ID_BITS: u32 = 36;
/// Largest local id.
pub const MAX_LOCAL_ID: u64 = (1 << LOCAL_ID_BITS) - 1;
/// Smallest extension identifier.
pub const MIN_EXTENSION_IDENTIFIER: u16 = 1;
/// Largest extension identifier.
pub const MAX_EXTENSION_IDENTIFIER: u16 = u16::MAX;
/// Largest safe JavaScript integer.
pub const JS_MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Whether `id` lies in the extension id space.
#[must_use]
pub fn is_extension_media_id(id: u64) -> bool {
    id >= EXTENSION_ID_OFFSET
}

/// Encode `(identifier, local_id)` into a system-wide media id.
///
/// Returns `None` if `identifier` is below [`MIN_EXTENSION_IDENTIFIER`] or
/// `local_id` does not fit in 36 bits.
#[must_use]
pub fn encode_media_id(identifier: u16, local_id: u64) -> Option<u64> {
    if identifier < MIN_EXTENSION_IDENTIFIER || local_id > MAX_LOCAL_ID {
        return None;
    }
    let shifted = u64::from(identifier).checked_shl(LOCAL_ID_BITS)?;
    EXTENSION_ID_OFFSET
        .checked_add(shifted)?
        .checked_add(local_id)
}

/// Decode a media id into `(identifier, local_id)`.
///
/// Returns `None` for ids in the AniList range and for ids whose identifier
/// bits name no extension.
#[must_use]
pub fn decode_media_id(id: u64) -> Option<(u16, u64)> {
    let offset = id.checked_sub(EXTENSION_ID_OFFSET)?;
    let identifier = u16::try_from(offset >> LOCAL_ID_BITS).ok()?;
    if identifier < MIN_EXTENSION_IDENTIFIER {
        return None;
    }
    Some((identifier, offset & MAX_LOCAL_ID))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let id = encode_media_id(7, 12_345).unwrap();
        assert!(is_extension_media_id(id));
        assert_eq!(decode_media_id(id), Some((7, 12_345)));
    }

    #[test]
    fn test_anilist_range_not_decoded() {
        assert!(!is_extension_media_id(21));
        assert_eq!(decode_media_id(21), None);
        assert_eq!(decode_media_id(EXTENSION_ID_OFFSET - 1), None);
    }

    #[test]
    fn test_largest_id_is_js_safe() {
        let id = encode_media_id(MAX_EXTENSION_IDENTIFIER, MAX_LOCAL_ID).unwrap();
        assert!(id <= JS_MAX_SAFE_INTEGER);
        assert_eq!(
            decode_media_id(id),
            Some((MAX_EXTENSION_IDENTIFIER, MAX_LOCAL_ID))
        );
    }

    #[test]
    fn test_zero_identifier_rejected() {
        assert_eq!(decode_media_id(EXTENSION_ID_OFFSET), None);
        assert_eq!(decode_media_id(EXTENSION_ID_OFFSET + MAX_LOCAL_ID), None);
        assert_eq!(encode_media_id(0, 5), None);
        assert_eq!(
            decode_media_id(encode_media_id(MIN_EXTENSION_IDENTIFIER, 0).unwrap()),
            Some((MIN_EXTENSION_IDENTIFIER, 0))
        );
    }

    #[test]
    fn test_local_id_overflow_rejected() {
        assert_eq!(encode_media_id(1, MAX_LOCAL_ID + 1), None);
    }
}
