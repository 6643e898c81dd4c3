//! Racing multiple OOB channels.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tether_crypto::SessionKeys;

use crate::channel::OobChannel;

/// Starts all configured channels in parallel and keeps the first token.
pub struct OobChannelManager {
    channels: Vec<Box<dyn OobChannel>>,
}

impl OobChannelManager {
    pub fn new(channels: Vec<Box<dyn OobChannel>>) -> Self {
        Self { channels }
    }

    /// Whether any channel is configured.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Race every channel; return the first successful token and cancel
    /// the rest. `None` when all channels fail — the caller falls back to
    /// visual verification.
    pub async fn read_first(self) -> Option<SessionKeys> {
        if self.channels.is_empty() {
            return None;
        }

        let (tx, mut rx) = mpsc::channel(self.channels.len());
        let tasks: Vec<JoinHandle<()>> = self
            .channels
            .into_iter()
            .map(|mut channel| {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let channel_type = channel.channel_type();
                    match channel.read_data().await {
                        Ok(data) => {
                            let _ = tx.send(Some(data)).await;
                        }
                        Err(error) => {
                            tracing::debug!(?channel_type, %error, "OOB channel failed");
                            let _ = tx.send(None).await;
                        }
                    }
                })
            })
            .collect();
        drop(tx);

        let mut winner = None;
        while let Some(outcome) = rx.recv().await {
            if let Some(data) = outcome {
                winner = Some(data);
                break;
            }
        }
        for task in tasks {
            task.abort();
        }
        winner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::PreAssociationChannel;
    use crate::{OobError, Result};
    use async_trait::async_trait;
    use std::time::Duration;
    use tether_proto::OobChannelType;

    struct SlowChannel {
        delay: Duration,
        outcome: Result<SessionKeys>,
    }

    #[async_trait]
    impl OobChannel for SlowChannel {
        fn channel_type(&self) -> OobChannelType {
            OobChannelType::BtRfcomm
        }

        async fn read_data(&mut self) -> Result<SessionKeys> {
            tokio::time::sleep(self.delay).await;
            std::mem::replace(&mut self.outcome, Err(OobError::ChannelExhausted))
        }
    }

    fn keys(marker: u8) -> SessionKeys {
        SessionKeys {
            encryption_key: [marker; 32],
            mobile_iv: [1u8; 12],
            ihu_iv: [2u8; 12],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_wins() {
        let manager = OobChannelManager::new(vec![
            Box::new(SlowChannel {
                delay: Duration::from_millis(50),
                outcome: Ok(keys(1)),
            }),
            Box::new(SlowChannel {
                delay: Duration::from_millis(10),
                outcome: Ok(keys(2)),
            }),
        ]);

        let winner = manager.read_first().await.expect("one channel wins");
        assert_eq!(winner.encryption_key, [2u8; 32]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_mask_later_success() {
        let manager = OobChannelManager::new(vec![
            Box::new(SlowChannel {
                delay: Duration::from_millis(5),
                outcome: Err(OobError::Socket("link reset".to_string())),
            }),
            Box::new(SlowChannel {
                delay: Duration::from_millis(30),
                outcome: Ok(keys(7)),
            }),
        ]);

        let winner = manager.read_first().await.expect("second channel wins");
        assert_eq!(winner.encryption_key, [7u8; 32]);
    }

    #[tokio::test]
    async fn test_all_failures_yield_none() {
        let manager = OobChannelManager::new(vec![
            Box::new(SlowChannel {
                delay: Duration::from_millis(1),
                outcome: Err(OobError::Socket("a".to_string())),
            }),
            Box::new(SlowChannel {
                delay: Duration::from_millis(1),
                outcome: Err(OobError::Socket("b".to_string())),
            }),
        ]);
        assert!(manager.read_first().await.is_none());
    }

    #[tokio::test]
    async fn test_no_channels_yield_none() {
        let manager = OobChannelManager::new(Vec::new());
        assert!(manager.is_empty());
        assert!(manager.read_first().await.is_none());
    }

    #[tokio::test]
    async fn test_pre_association_channel_wins_immediately() {
        let manager = OobChannelManager::new(vec![Box::new(PreAssociationChannel::new(keys(9)))]);
        let winner = manager.read_first().await.expect("token");
        assert_eq!(winner.encryption_key, [9u8; 32]);
    }
}
