use std::sync::Arc;
use std::time::Duration;

use url::Url;

use tls::TlsOptions;


/// Fine-grained configuration of the HTTP server
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) max_connections: Option<usize>,
    pub(crate) headers_timeout: Duration,
    pub(crate) max_headers_size: usize,
    pub(crate) max_request_body_size: u64,
    pub(crate) backlog_size: i32,
    pub(crate) server_uri: Option<Url>,
    pub(crate) no_expect_handler: bool,
    pub(crate) tls: Option<TlsOptions>,
}

impl Config {
    /// Create a config with defaults
    pub fn new() -> Config {
        Config {
            max_connections: None,
            headers_timeout: Duration::from_secs(10),
            max_headers_size: 8192,
            max_request_body_size: 1_048_576,
            backlog_size: 100,
            server_uri: None,
            no_expect_handler: false,
            tls: None,
        }
    }

    /// Admission bound on simultaneously served connections
    ///
    /// `None` means unlimited.  The bound is advisory: connections past it
    /// are dropped right after accept.
    pub fn max_connections(&mut self, value: Option<usize>) -> &mut Self {
        self.max_connections = value;
        self
    }

    /// Deadline for receiving a complete request head
    pub fn headers_timeout(&mut self, value: Duration) -> &mut Self {
        self.headers_timeout = value;
        self
    }

    /// Size of the buffer the request head must fit into
    pub fn max_headers_size(&mut self, value: usize) -> &mut Self {
        self.max_headers_size = value;
        self
    }

    /// Upper bound on a request body, declared or chunked
    pub fn max_request_body_size(&mut self, value: u64) -> &mut Self {
        self.max_request_body_size = value;
        self
    }

    /// Listen backlog passed to the OS
    pub fn backlog_size(&mut self, value: i32) -> &mut Self {
        self.backlog_size = value;
        self
    }

    /// Scheme and authority used when the request target is relative
    pub fn server_uri(&mut self, value: Url) -> &mut Self {
        self.server_uri = Some(value);
        self
    }

    /// Do not answer `Expect: 100-continue` automatically
    pub fn no_expect_handler(&mut self) -> &mut Self {
        self.no_expect_handler = true;
        self
    }

    /// Terminate TLS on every connection with the given key material
    pub fn secure(&mut self, options: TlsOptions) -> &mut Self {
        self.tls = Some(options);
        self
    }

    /// Create a Arc'd config clone to pass to the constructor
    ///
    /// This is just a convenience method.
    pub fn done(&mut self) -> Arc<Config> {
        Arc::new(self.clone())
    }
}


#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::Config;

    #[test]
    fn defaults() {
        let cfg = Config::new();
        assert_eq!(cfg.max_request_body_size, 1_048_576);
        assert_eq!(cfg.max_headers_size, 8192);
        assert_eq!(cfg.headers_timeout, Duration::from_secs(10));
        assert_eq!(cfg.backlog_size, 100);
        assert_eq!(cfg.max_connections, None);
        assert!(!cfg.no_expect_handler);
        assert!(cfg.tls.is_none());
        assert!(cfg.server_uri.is_none());
    }
}
