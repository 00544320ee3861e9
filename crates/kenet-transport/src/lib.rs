//! Kenet link layer.
//!
//! One device talks to exactly one peer at a time over a point-to-point
//! socket (Wi-Fi Direct group owner ↔ client). This crate owns that socket:
//! it accepts or dials the link, splits it into a read half and a
//! mutex-guarded write half, and moves whole frames across it using a
//! 4-byte big-endian length prefix.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use kenet_transport::{LinkConfig, LinkListener};
//!
//! # async fn example() -> Result<(), kenet_transport::LinkError> {
//! let listener = LinkListener::bind(&LinkConfig::new()).await?;
//! let link = listener.accept().await?;
//! link.send_frame(b"hello").await?;
//! while let Some(frame) = link.recv_frame().await? {
//!     println!("got {} bytes", frame.len());
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod framing;
mod link;

pub use config::LinkConfig;
pub use error::LinkError;
pub use framing::{read_framed, write_framed};
pub use link::{LinkListener, LinkNode};

/// Default TCP port for the link (matches the group-owner socket).
pub const DEFAULT_PORT: u16 = 8888;

/// Default largest frame accepted in either direction (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;
