//! Channel trait and token validation.

use async_trait::async_trait;

use tether_crypto::SessionKeys;
use tether_proto::{OobChannelType, OobToken};

use crate::{OobError, Result};

/// One source of OOB key material. A channel either produces a token or
/// fails; the manager treats any error as "this channel is out".
#[async_trait]
pub trait OobChannel: Send + Sync {
    /// Which capability this channel implements.
    fn channel_type(&self) -> OobChannelType;

    /// Produce the key material. Called at most once per channel.
    async fn read_data(&mut self) -> Result<SessionKeys>;
}

/// Validate a wire token and convert it to session key material.
///
/// Enforces the field sizes and the `mobile_iv != ihu_iv` invariant.
pub fn session_keys_from_token(token: &OobToken) -> Result<SessionKeys> {
    let encryption_key: [u8; 32] = token
        .encryption_key
        .as_slice()
        .try_into()
        .map_err(|_| OobError::InvalidToken(format!(
            "encryption key of {} bytes",
            token.encryption_key.len()
        )))?;
    let mobile_iv: [u8; 12] = token
        .mobile_iv
        .as_slice()
        .try_into()
        .map_err(|_| OobError::InvalidToken(format!(
            "mobile iv of {} bytes",
            token.mobile_iv.len()
        )))?;
    let ihu_iv: [u8; 12] = token
        .ihu_iv
        .as_slice()
        .try_into()
        .map_err(|_| OobError::InvalidToken(format!("ihu iv of {} bytes", token.ihu_iv.len())))?;
    if mobile_iv == ihu_iv {
        return Err(OobError::IvReuse);
    }
    Ok(SessionKeys {
        encryption_key,
        mobile_iv,
        ihu_iv,
    })
}

/// Channel backed by a token the caller already holds (QR/URI delivery).
pub struct PreAssociationChannel {
    data: Option<SessionKeys>,
}

impl PreAssociationChannel {
    pub fn new(data: SessionKeys) -> Self {
        Self { data: Some(data) }
    }
}

#[async_trait]
impl OobChannel for PreAssociationChannel {
    fn channel_type(&self) -> OobChannelType {
        OobChannelType::PreAssociation
    }

    async fn read_data(&mut self) -> Result<SessionKeys> {
        self.data.take().ok_or(OobError::ChannelExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_token() -> OobToken {
        OobToken {
            encryption_key: vec![1u8; 32],
            ihu_iv: vec![2u8; 12],
            mobile_iv: vec![3u8; 12],
        }
    }

    #[test]
    fn test_valid_token_converts() {
        let keys = session_keys_from_token(&valid_token()).expect("convert");
        assert_eq!(keys.encryption_key, [1u8; 32]);
        assert_eq!(keys.ihu_iv, [2u8; 12]);
        assert_eq!(keys.mobile_iv, [3u8; 12]);
    }

    #[test]
    fn test_wrong_lengths_rejected() {
        let mut token = valid_token();
        token.encryption_key = vec![1u8; 16];
        assert!(session_keys_from_token(&token).is_err());

        let mut token = valid_token();
        token.mobile_iv = vec![3u8; 11];
        assert!(session_keys_from_token(&token).is_err());
    }

    #[test]
    fn test_iv_reuse_rejected() {
        let mut token = valid_token();
        token.mobile_iv = token.ihu_iv.clone();
        assert!(matches!(
            session_keys_from_token(&token),
            Err(OobError::IvReuse)
        ));
    }

    #[tokio::test]
    async fn test_pre_association_yields_once() {
        let keys = session_keys_from_token(&valid_token()).expect("convert");
        let mut channel = PreAssociationChannel::new(keys.clone());
        assert_eq!(channel.channel_type(), OobChannelType::PreAssociation);
        assert_eq!(channel.read_data().await.expect("first read"), keys);
        assert!(matches!(
            channel.read_data().await,
            Err(OobError::ChannelExhausted)
        ));
    }
}
