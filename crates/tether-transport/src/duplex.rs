//! In-memory duplex connection.
//!
//! Two [`DuplexConnection`]s joined by bounded channels, used to run both
//! peers of a session inside one test process.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::connection::PhysicalConnection;
use crate::{Result, TransportError};

// Generous: a single-task test can write a fully split message before
// the peer end drains a frame.
const CHANNEL_CAPACITY: usize = 1024;

/// One end of an in-memory connection pair.
pub struct DuplexConnection {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    rx: mpsc::Receiver<Vec<u8>>,
    mtu: usize,
}

/// Create a connected pair with the given MTU on both ends.
pub fn duplex_pair(mtu: usize) -> (DuplexConnection, DuplexConnection) {
    let (a_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (b_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
    (
        DuplexConnection {
            tx: Some(a_tx),
            rx: b_rx,
            mtu,
        },
        DuplexConnection {
            tx: Some(b_tx),
            rx: a_rx,
            mtu,
        },
    )
}

#[async_trait]
impl PhysicalConnection for DuplexConnection {
    async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(frame.to_vec())
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.rx.recv().await)
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_cross_in_both_directions() {
        let (mut a, mut b) = duplex_pair(185);
        a.send_frame(b"to b").await.expect("send");
        b.send_frame(b"to a").await.expect("send");

        assert_eq!(b.recv_chunk().await.expect("recv"), Some(b"to b".to_vec()));
        assert_eq!(a.recv_chunk().await.expect("recv"), Some(b"to a".to_vec()));
    }

    #[tokio::test]
    async fn test_close_stops_sends_and_signals_peer() {
        let (mut a, mut b) = duplex_pair(185);
        a.close().await;

        assert!(matches!(
            a.send_frame(b"x").await,
            Err(TransportError::ConnectionClosed)
        ));
        assert_eq!(b.recv_chunk().await.expect("recv"), None);
    }

    #[tokio::test]
    async fn test_mtu_reported() {
        let (a, _b) = duplex_pair(99);
        assert_eq!(a.mtu(), 99);
    }
}
