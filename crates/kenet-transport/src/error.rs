/// Errors returned by the Kenet link layer.
///
/// Every variant is fatal to the current link except `FrameTooLarge` on the
/// send side, which rejects a single frame before anything is written.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("failed to bind link listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("failed to accept link: {0}")]
    Accept(#[source] std::io::Error),

    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("receive failed: {0}")]
    Receive(#[source] std::io::Error),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("link closed mid-frame")]
    TruncatedFrame,

    #[error("link is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_frame_too_large() {
        let err = LinkError::FrameTooLarge { size: 70_000, max: 65_536 };
        assert_eq!(err.to_string(), "frame too large: 70000 bytes (max 65536)");
    }

    #[test]
    fn display_connect_timeout() {
        let err = LinkError::ConnectTimeout {
            addr: "192.168.49.1:8888".into(),
        };
        assert_eq!(err.to_string(), "connection to 192.168.49.1:8888 timed out");
    }
}
