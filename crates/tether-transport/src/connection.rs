//! Physical connection seam.
//!
//! Platform Bluetooth stacks live outside this workspace; they hand the
//! stream a [`PhysicalConnection`] once the link-level setup (GATT
//! characteristics resolved, notifications enabled, or RFCOMM socket
//! connected) is done.

use async_trait::async_trait;

use crate::Result;

/// One ordered, reliable byte pipe to the peer.
///
/// The transport guarantees ordered delivery; the stream treats any
/// observed reordering as a protocol violation.
#[async_trait]
pub trait PhysicalConnection: Send {
    /// Deliver one transport frame. Frames never exceed [`mtu`](Self::mtu)
    /// bytes.
    async fn send_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Receive the next chunk of bytes. Chunks may split or coalesce
    /// frames arbitrarily. `None` means the peer closed the connection.
    async fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>>;

    /// Largest frame this connection can carry in one send.
    fn mtu(&self) -> usize;

    /// Close the connection; further sends fail.
    async fn close(&mut self);
}

/// Wrapper pinning the reported MTU to a negotiated value.
///
/// GATT connections learn their MTU after the link is up; the setup layer
/// wraps the raw pipe so the stream splits against the negotiated size.
pub struct MtuOverride<C: PhysicalConnection> {
    inner: C,
    mtu: usize,
}

impl<C: PhysicalConnection> MtuOverride<C> {
    pub fn new(inner: C, mtu: usize) -> Self {
        Self { inner, mtu }
    }
}

#[async_trait]
impl<C: PhysicalConnection> PhysicalConnection for MtuOverride<C> {
    async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.inner.send_frame(frame).await
    }

    async fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        self.inner.recv_chunk().await
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    async fn close(&mut self) {
        self.inner.close().await;
    }
}

#[async_trait]
impl<T: PhysicalConnection + ?Sized> PhysicalConnection for Box<T> {
    async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        (**self).send_frame(frame).await
    }

    async fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        (**self).recv_chunk().await
    }

    fn mtu(&self) -> usize {
        (**self).mtu()
    }

    async fn close(&mut self) {
        (**self).close().await;
    }
}
