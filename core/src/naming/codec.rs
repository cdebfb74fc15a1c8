//! Friendly name codec
//!
//! Maps short human names (up to 9 symbols) to fixed-width address codes and
//! back without a lookup table.
//!
//! # Encoding
//!
//! ```text
//! value   = len
//! value   = value * 31 + index(c)      for each character c
//! address = "0X" || base31(value, 10 digits, most significant first)
//! ```
//!
//! Prefixing the value with the name length keeps names with leading `A`
//! (index 0) distinct from shorter names, which makes the mapping bijective.
//! The tag uses characters outside the alphabet, so no sanitized name can
//! ever look like an address.

/// Unambiguous alphabet: no `0`, `O`, `1`, `I` or `L`.
pub const ALPHABET: &[u8; 31] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Radix of the codec (alphabet size)
const RADIX: u64 = ALPHABET.len() as u64;

/// Maximum length of a friendly name
pub const MAX_NAME_LEN: usize = 9;

/// Number of base-31 digits in an address (after the tag)
pub const ADDRESS_DIGITS: usize = 10;

/// Reserved prefix carried by every encoded address
pub const ADDRESS_TAG: &str = "0X";

/// Errors from name encoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Nothing left after sanitizing
    #[error("name is empty after sanitizing: {0:?}")]
    EmptyName(String),
    /// Name contains characters outside the alphabet or is too long
    #[error("invalid name: {0:?}")]
    InvalidName(String),
}

fn symbol_index(c: u8) -> Option<u64> {
    ALPHABET.iter().position(|&a| a == c).map(|i| i as u64)
}

/// Normalize raw input into a candidate name.
///
/// Uppercases, drops every character outside [`ALPHABET`] and truncates to
/// [`MAX_NAME_LEN`]. The result may be empty.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .flat_map(char::to_uppercase)
        .filter(|c| c.is_ascii() && symbol_index(*c as u8).is_some())
        .take(MAX_NAME_LEN)
        .collect()
}

/// Check that a name is already in canonical form.
pub fn is_valid(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.bytes().all(|b| symbol_index(b).is_some())
}

/// Canonical form of a name that must already be spelled in the alphabet.
///
/// Unlike [`sanitize`], nothing may be dropped or truncated: `"demo"` is
/// rejected rather than shortened to `"DEM"`. Case is still folded.
pub fn strict_name(raw: &str) -> Result<String, CodecError> {
    let name = sanitize(raw);
    if name.is_empty() {
        return Err(CodecError::EmptyName(raw.to_string()));
    }
    if name.chars().count() != raw.chars().count() {
        return Err(CodecError::InvalidName(raw.to_string()));
    }
    Ok(name)
}

/// Whether a host string should be treated as a short-form name rather than
/// a literal app ID.
pub fn is_name_form(host: &str) -> bool {
    host.chars().count() <= MAX_NAME_LEN && !host.starts_with(ADDRESS_TAG)
}

/// Encode a name into its address code. The input is sanitized first.
pub fn encode(raw: &str) -> Result<String, CodecError> {
    let name = sanitize(raw);
    if name.is_empty() {
        return Err(CodecError::EmptyName(raw.to_string()));
    }

    let mut value = name.len() as u64;
    for b in name.bytes() {
        let idx = symbol_index(b).ok_or_else(|| CodecError::InvalidName(raw.to_string()))?;
        value = value * RADIX + idx;
    }

    let mut digits = [ALPHABET[0]; ADDRESS_DIGITS];
    for slot in digits.iter_mut().rev() {
        *slot = ALPHABET[(value % RADIX) as usize];
        value /= RADIX;
    }

    let mut address = String::with_capacity(ADDRESS_TAG.len() + ADDRESS_DIGITS);
    address.push_str(ADDRESS_TAG);
    address.extend(digits.iter().map(|&d| d as char));
    Ok(address)
}

/// Decode an address code back into its name.
///
/// Returns `None` for a missing tag, wrong width, foreign symbols or a value
/// that does not correspond to a name of length 1..=9.
pub fn decode(address: &str) -> Option<String> {
    let digits = address.strip_prefix(ADDRESS_TAG)?;
    if digits.len() != ADDRESS_DIGITS {
        return None;
    }

    let mut value: u64 = 0;
    for b in digits.bytes() {
        value = value * RADIX + symbol_index(b)?;
    }

    // A name of length L occupies [L * 31^L, (L + 1) * 31^L).
    let len = (1..=MAX_NAME_LEN).find(|&len| {
        let span = RADIX.pow(len as u32);
        value >= len as u64 * span && value < (len as u64 + 1) * span
    })?;

    let mut rest = value - len as u64 * RADIX.pow(len as u32);
    let mut name = vec![ALPHABET[0]; len];
    for slot in name.iter_mut().rev() {
        *slot = ALPHABET[(rest % RADIX) as usize];
        rest /= RADIX;
    }

    String::from_utf8(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_uppercases_and_strips() {
        assert_eq!(sanitize("chat"), "CHAT");
        assert_eq!(sanitize("my-app!"), "MYAPP");
        // 0, O, 1, I, L are confusable and dropped
        assert_eq!(sanitize("l0o1i"), "");
        assert_eq!(sanitize("abcdefghjkmnp"), "ABCDEFGHJ");
    }

    #[test]
    fn test_is_valid() {
        assert!(is_valid("CHAT"));
        assert!(is_valid("A"));
        assert!(is_valid("ABCDEFGHJ"));
        assert!(!is_valid(""));
        assert!(!is_valid("chat"));
        assert!(!is_valid("ABCDEFGHJK"));
        assert!(!is_valid("HELLO"));
    }

    #[test]
    fn test_strict_name_rejects_lossy_input() {
        assert_eq!(strict_name("chat").unwrap(), "CHAT");
        assert!(matches!(strict_name("demo"), Err(CodecError::InvalidName(_))));
        assert!(matches!(strict_name("my app"), Err(CodecError::InvalidName(_))));
        assert!(matches!(strict_name("ABCDEFGHJK"), Err(CodecError::InvalidName(_))));
        assert!(matches!(strict_name("l0o"), Err(CodecError::EmptyName(_))));
    }

    #[test]
    fn test_encode_shape() {
        let address = encode("chat").unwrap();
        assert!(address.starts_with(ADDRESS_TAG));
        assert_eq!(address.len(), ADDRESS_TAG.len() + ADDRESS_DIGITS);
        assert!(!is_name_form(&address));
    }

    #[test]
    fn test_encode_distinguishes_leading_zero_symbol() {
        // "A" has index 0; without the length prefix "AB" and "B" would collide
        assert_ne!(encode("AB").unwrap(), encode("B").unwrap());
        assert_ne!(encode("A").unwrap(), encode("AA").unwrap());
    }

    #[test]
    fn test_encode_empty_rejected() {
        assert!(matches!(encode("---"), Err(CodecError::EmptyName(_))));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(decode(""), None);
        assert_eq!(decode("CHAT"), None);
        assert_eq!(decode("0XAAAAAAAAAA"), None); // value 0 has no length
        assert_eq!(decode("0XAAAA"), None);
        assert_eq!(decode("0XAAAAAAAAA0"), None); // '0' not in alphabet
        assert_eq!(decode("0X9999999999"), None); // above the 9-symbol range
    }

    #[test]
    fn test_longest_name_fits() {
        let address = encode("999999999").unwrap();
        assert_eq!(decode(&address).as_deref(), Some("999999999"));
    }

    proptest! {
        #[test]
        fn prop_round_trip(raw in "[a-zA-Z0-9 _-]{0,16}") {
            let sanitized = sanitize(&raw);
            prop_assume!(is_valid(&sanitized));
            let address = encode(&raw).unwrap();
            prop_assert_eq!(decode(&address), Some(sanitized));
        }

        #[test]
        fn prop_distinct_names_distinct_addresses(a in "[A-HJKMNP-Z2-9]{1,9}", b in "[A-HJKMNP-Z2-9]{1,9}") {
            prop_assume!(a != b);
            prop_assert_ne!(encode(&a).unwrap(), encode(&b).unwrap());
        }
    }
}
