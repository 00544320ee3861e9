use std::time::Duration;

/// Configuration for a [`LinkListener`](crate::LinkListener) or
/// [`LinkNode`](crate::LinkNode).
///
/// ```rust
/// use kenet_transport::LinkConfig;
/// use std::time::Duration;
///
/// let config = LinkConfig::new()
///     .port(9000)
///     .connect_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub(crate) port: u16,
    pub(crate) bind_host: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) max_frame_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkConfig {
    /// Defaults, with the port taken from `KENET_LINK_PORT` when set.
    pub fn new() -> Self {
        let port = std::env::var("KENET_LINK_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(crate::DEFAULT_PORT);

        Self {
            port,
            bind_host: "0.0.0.0".to_string(),
            connect_timeout: Duration::from_secs(3),
            max_frame_size: crate::DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Interface to listen on (default: all interfaces).
    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Largest frame accepted in either direction (default: 64 KiB).
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn get_max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = LinkConfig::new()
            .port(9100)
            .bind_host("127.0.0.1")
            .max_frame_size(1024)
            .connect_timeout(Duration::from_millis(250));

        assert_eq!(config.get_port(), 9100);
        assert_eq!(config.bind_host, "127.0.0.1");
        assert_eq!(config.get_max_frame_size(), 1024);
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
    }
}
