use kenet_transport::{LinkError, LinkNode};

use super::effect::SendHint;

/// Link abstraction for the runtime.
///
/// In production: [`LinkNode`] (framed TCP). In tests: `MockTransport`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Write one frame. An error is fatal to the link.
    async fn send_frame(&self, frame: &[u8], hint: &SendHint) -> Result<(), LinkError>;

    /// Read the next frame; `Ok(None)` on clean end of stream.
    ///
    /// Not required to be cancellation safe: the runtime drives it from a
    /// dedicated reader task.
    async fn recv_frame(&self) -> Result<Option<Vec<u8>>, LinkError>;

    /// False once the link is known to be down.
    fn is_connected(&self) -> bool;
}

// ── LinkNode (production) ───────────────────────────────────────────────

#[async_trait::async_trait]
impl Transport for LinkNode {
    async fn send_frame(&self, frame: &[u8], _hint: &SendHint) -> Result<(), LinkError> {
        LinkNode::send_frame(self, frame).await
    }

    async fn recv_frame(&self) -> Result<Option<Vec<u8>>, LinkError> {
        LinkNode::recv_frame(self).await
    }

    fn is_connected(&self) -> bool {
        LinkNode::is_connected(self)
    }
}

// ── MockTransport (tests) ───────────────────────────────────────────────
