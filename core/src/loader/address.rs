//! App addresses
//!
//! ```text
//! <scheme>://<appId-or-name>[/path][?query]
//! ```
//!
//! Hosts of up to 9 characters that do not carry the address tag are short
//! names; anything else is a literal app ID.

use crate::bundle::manifest::validate_app_id;
use crate::naming::claims::NameClaim;
use crate::naming::codec::{self, is_name_form, strict_name, ADDRESS_TAG};

/// Default URL scheme
pub const DEFAULT_SCHEME: &str = "mooring";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("expected {expected}:// address: {input:?}")]
    WrongScheme { expected: String, input: String },
    #[error("address has no app id or name")]
    EmptyHost,
    #[error("invalid app name: {0:?}")]
    InvalidName(String),
    #[error("invalid app id: {0:?}")]
    InvalidAppId(String),
}

/// What the host part names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppTarget {
    /// Canonical short name
    Name(String),
    /// Literal app ID (tagged address or custom ID)
    AppId(String),
}

/// An address split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    pub target: AppTarget,
    /// Path inside the bundle, without the leading `/`
    pub path: Option<String>,
    pub query: Option<String>,
}

/// An address resolved to an app ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub app_id: String,
    /// Canonical name when the address used one
    pub name: Option<String>,
    /// Local claim for that name, if any
    pub claim: Option<NameClaim>,
    pub path: Option<String>,
    pub query: Option<String>,
}

fn classify_host(host: &str) -> Result<AppTarget, AddressError> {
    if is_name_form(host) && !host.to_ascii_uppercase().starts_with(ADDRESS_TAG) {
        // every character must survive sanitizing, so "hello" cannot alias "HE"
        return strict_name(host)
            .map(AppTarget::Name)
            .map_err(|_| AddressError::InvalidName(host.to_string()));
    }

    if host.starts_with(ADDRESS_TAG) {
        return codec::decode(host)
            .map(|_| AppTarget::AppId(host.to_string()))
            .ok_or_else(|| AddressError::InvalidAppId(host.to_string()));
    }

    validate_app_id(host)
        .map(|_| AppTarget::AppId(host.to_string()))
        .map_err(|_| AddressError::InvalidAppId(host.to_string()))
}

/// Split an address into target, path and query
pub fn parse_address(input: &str, scheme: &str) -> Result<ParsedAddress, AddressError> {
    let wrong_scheme = || AddressError::WrongScheme {
        expected: scheme.to_string(),
        input: input.to_string(),
    };
    let (given_scheme, rest) = input.trim().split_once("://").ok_or_else(wrong_scheme)?;
    if !given_scheme.eq_ignore_ascii_case(scheme) {
        return Err(wrong_scheme());
    }

    let (before_query, query) = match rest.split_once('?') {
        Some((before, query)) => (before, Some(query.to_string())),
        None => (rest, None),
    };
    let (host, path) = match before_query.split_once('/') {
        Some((host, path)) => (host, path.trim_start_matches('/')),
        None => (before_query, ""),
    };

    if host.is_empty() {
        return Err(AddressError::EmptyHost);
    }

    Ok(ParsedAddress {
        target: classify_host(host)?,
        path: (!path.is_empty()).then(|| path.to_string()),
        query: query.filter(|q| !q.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_with_path_and_query() {
        let parsed = parse_address("mooring://chat/rooms/a.html?x=1", DEFAULT_SCHEME).unwrap();
        assert_eq!(parsed.target, AppTarget::Name("CHAT".to_string()));
        assert_eq!(parsed.path.as_deref(), Some("rooms/a.html"));
        assert_eq!(parsed.query.as_deref(), Some("x=1"));
    }

    #[test]
    fn test_tagged_address_is_literal() {
        let address = codec::encode("chat").unwrap();
        let parsed = parse_address(&format!("mooring://{}", address), DEFAULT_SCHEME).unwrap();
        assert_eq!(parsed.target, AppTarget::AppId(address));
        assert_eq!(parsed.path, None);
        assert_eq!(parsed.query, None);
    }

    #[test]
    fn test_custom_app_id() {
        let parsed = parse_address("MOORING://my-custom-app/", DEFAULT_SCHEME).unwrap();
        assert_eq!(parsed.target, AppTarget::AppId("my-custom-app".to_string()));
        assert_eq!(parsed.path, None);
    }

    #[test]
    fn test_rejections() {
        assert!(matches!(
            parse_address("https://chat", DEFAULT_SCHEME),
            Err(AddressError::WrongScheme { .. })
        ));
        assert!(matches!(parse_address("chat", DEFAULT_SCHEME), Err(AddressError::WrongScheme { .. })));
        assert_eq!(parse_address("mooring:///x", DEFAULT_SCHEME), Err(AddressError::EmptyHost));
        assert!(matches!(
            parse_address("mooring://hello", DEFAULT_SCHEME),
            Err(AddressError::InvalidName(_))
        ));
        assert!(matches!(
            parse_address("mooring://0XAAAAAAAAAA", DEFAULT_SCHEME),
            Err(AddressError::InvalidAppId(_))
        ));
        assert!(matches!(
            parse_address("mooring://not%20an%20id", DEFAULT_SCHEME),
            Err(AddressError::InvalidAppId(_))
        ));
    }

    #[test]
    fn test_custom_scheme() {
        assert!(parse_address("app://chat", "app").is_ok());
        assert!(parse_address("mooring://chat", "app").is_err());
    }
}
