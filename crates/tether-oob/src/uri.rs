//! Pre-association URI parsing.
//!
//! A head unit can hand its OOB token to the companion app through a URI
//! (typically rendered as a QR code):
//!
//! ```text
//! scheme://authority/path?oob=<base64url-protobuf>[&<user-params>]
//! ```
//!
//! The `oob` value is a base64url (unpadded) [`OutOfBandAssociationData`].
//! Parameter names starting with the reserved prefixes `oob` or `bat` are
//! ours; an unknown reserved name rejects the whole URI so newer head
//! units cannot be silently misread. All other parameters pass through to
//! the caller untouched.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use prost::Message;

use tether_crypto::SessionKeys;
use tether_proto::OutOfBandAssociationData;
use tether_types::DeviceId;

use crate::channel::session_keys_from_token;
use crate::{OobError, Result};

/// Query parameter carrying the OOB payload.
const OOB_PARAMETER: &str = "oob";

/// Prefixes reserved for this protocol.
const RESERVED_PREFIXES: [&str; 2] = ["oob", "bat"];

/// Decoded pre-association URI.
#[derive(Debug)]
pub struct OobUriData {
    /// Non-reserved query parameters, verbatim.
    pub queries: HashMap<String, String>,
    /// Non-reserved valueless parameters, in order.
    pub flags: Vec<String>,
    /// Key material for the verification exchange.
    pub oob_data: SessionKeys,
    /// Device identifier of the advertising head unit, when the token
    /// carries one.
    pub device_identifier: Option<DeviceId>,
}

/// Parse a pre-association URI.
pub fn parse_oob_uri(uri: &str) -> Result<OobUriData> {
    let query = uri
        .split_once('?')
        .map(|(_, query)| query)
        .ok_or_else(|| OobError::InvalidUri("no query string".to_string()))?;

    let mut queries = HashMap::new();
    let mut flags = Vec::new();
    let mut oob_value = None;

    for parameter in query.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = match parameter.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (parameter, None),
        };

        if name == OOB_PARAMETER {
            let value =
                value.ok_or_else(|| OobError::InvalidUri("oob parameter has no value".to_string()))?;
            if oob_value.replace(value).is_some() {
                return Err(OobError::InvalidUri("duplicate oob parameter".to_string()));
            }
            continue;
        }
        if RESERVED_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
        {
            return Err(OobError::ReservedParameter(name.to_string()));
        }
        match value {
            Some(value) => {
                queries.insert(name.to_string(), value.to_string());
            }
            None => flags.push(name.to_string()),
        }
    }

    let encoded = oob_value.ok_or(OobError::MissingOobData)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| OobError::InvalidUri(format!("base64 decode error: {e}")))?;
    let data = OutOfBandAssociationData::decode(bytes.as_slice())?;

    let token = data
        .token
        .as_ref()
        .ok_or_else(|| OobError::InvalidToken("missing token".to_string()))?;
    let oob_data = session_keys_from_token(token)?;
    let device_identifier = if data.device_identifier.is_empty() {
        None
    } else {
        Some(
            DeviceId::from_slice(&data.device_identifier).ok_or_else(|| {
                OobError::InvalidToken(format!(
                    "device identifier of {} bytes",
                    data.device_identifier.len()
                ))
            })?,
        )
    };

    Ok(OobUriData {
        queries,
        flags,
        oob_data,
        device_identifier,
    })
}

/// Append the encoded OOB payload to a base URI (head-unit side).
pub fn append_oob_parameter(base: &str, data: &OutOfBandAssociationData) -> String {
    let encoded = URL_SAFE_NO_PAD.encode(data.encode_to_vec());
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{OOB_PARAMETER}={encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_proto::OobToken;

    fn association_data(device_id: Option<DeviceId>) -> OutOfBandAssociationData {
        OutOfBandAssociationData {
            token: Some(OobToken {
                encryption_key: vec![7u8; 32],
                ihu_iv: vec![8u8; 12],
                mobile_iv: vec![9u8; 12],
            }),
            device_identifier: device_id
                .map(|id| id.as_bytes().to_vec())
                .unwrap_or_default(),
        }
    }

    #[test]
    fn test_roundtrip_with_device_id() {
        let device_id = DeviceId::random();
        let uri = append_oob_parameter(
            "tether://associate/start",
            &association_data(Some(device_id)),
        );

        let parsed = parse_oob_uri(&uri).expect("parse");
        assert_eq!(parsed.oob_data.encryption_key, [7u8; 32]);
        assert_eq!(parsed.device_identifier, Some(device_id));
        assert!(parsed.queries.is_empty());
        assert!(parsed.flags.is_empty());
    }

    #[test]
    fn test_user_parameters_preserved() {
        let base = append_oob_parameter("tether://associate/start", &association_data(None));
        let uri = format!("{base}&theme=dark&fastlane");

        let parsed = parse_oob_uri(&uri).expect("parse");
        assert_eq!(parsed.queries.get("theme").map(String::as_str), Some("dark"));
        assert_eq!(parsed.flags, vec!["fastlane".to_string()]);
        assert_eq!(parsed.device_identifier, None);
    }

    #[test]
    fn test_unknown_reserved_parameters_reject() {
        let base = append_oob_parameter("tether://associate/start", &association_data(None));
        for reserved in ["oobExtra=1", "batMode=2", "bat"] {
            let uri = format!("{base}&{reserved}");
            assert!(
                matches!(parse_oob_uri(&uri), Err(OobError::ReservedParameter(_))),
                "{reserved} must reject"
            );
        }
    }

    #[test]
    fn test_missing_oob_parameter_rejected() {
        assert!(matches!(
            parse_oob_uri("tether://associate/start?theme=dark"),
            Err(OobError::MissingOobData)
        ));
        assert!(matches!(
            parse_oob_uri("tether://associate/start"),
            Err(OobError::InvalidUri(_))
        ));
    }

    #[test]
    fn test_duplicate_oob_parameter_rejected() {
        let base = append_oob_parameter("tether://associate/start", &association_data(None));
        let encoded = base.split_once("oob=").map(|(_, v)| v.to_string());
        let uri = format!("{base}&oob={}", encoded.expect("encoded"));
        assert!(parse_oob_uri(&uri).is_err());
    }

    #[test]
    fn test_garbage_payload_rejected() {
        assert!(parse_oob_uri("tether://x?oob=!!!not-base64!!!").is_err());
        let uri = format!("tether://x?oob={}", URL_SAFE_NO_PAD.encode([0xFFu8; 3]));
        assert!(parse_oob_uri(&uri).is_err());
    }

    #[test]
    fn test_token_without_key_material_rejected() {
        let data = OutOfBandAssociationData {
            token: None,
            device_identifier: Vec::new(),
        };
        let uri = append_oob_parameter("tether://x", &data);
        assert!(matches!(
            parse_oob_uri(&uri),
            Err(OobError::InvalidToken(_))
        ));
    }
}
