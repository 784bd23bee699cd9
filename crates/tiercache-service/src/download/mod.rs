//! Transports that deliver the raw payload of a remote object.
//!
//! The cache does not care how bytes are obtained. Everything it needs is the [`Transport`]
//! trait, which is implemented for plain HTTP by [`HttpTransport`].

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;
use url::Url;

use crate::config::Config;

mod http;

pub use self::http::{HttpTransport, create_client};

/// The user agent sent with every outgoing request.
pub const USER_AGENT: &str = concat!("tiercache/", env!("CARGO_PKG_VERSION"));

/// An error that happens while fetching the payload of a remote object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The remote source does not have the requested object.
    #[error("not found")]
    NotFound,
    /// The remote source answered with an unexpected status code.
    #[error("server returned status {0}")]
    Status(u16),
    /// The fetch did not complete in time.
    #[error("fetch timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),
    /// Any other failure, such as a refused connection or a broken body.
    #[error("fetch failed: {0}")]
    Other(String),
}

/// Fetches the full payload addressed by a locator.
///
/// Implementations must be safe to call concurrently.
pub trait Transport: fmt::Debug + Send + Sync {
    fn fetch_bytes<'a>(&'a self, locator: &'a Url) -> BoxFuture<'a, Result<Bytes, TransportError>>;
}

/// Timeouts applied by the [`HttpTransport`].
#[derive(Copy, Clone, Debug)]
pub struct DownloadTimeouts {
    /// The timeout for establishing a connection.
    pub connect: Duration,
    /// Global timeout for one fetch, including the body.
    pub max_download: Duration,
}

impl DownloadTimeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect: config.connect_timeout,
            max_download: config.max_download_timeout,
        }
    }
}

impl Default for DownloadTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(1),
            max_download: Duration::from_secs(5 * 60),
        }
    }
}
