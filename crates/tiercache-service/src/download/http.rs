//! Support to fetch objects from HTTP sources.

use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode, header};
use url::Url;

use super::{DownloadTimeouts, Transport, TransportError, USER_AGENT};

/// Creates a [`reqwest::Client`] that applies the given timeouts to every request.
pub fn create_client(timeouts: &DownloadTimeouts) -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .gzip(true)
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.max_download)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|err| {
            tracing::error!(error = %err, "Failed to build HTTP client, falling back to defaults");
            Client::new()
        })
}

/// [`Transport`] implementation that performs a plain `GET` request.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    timeouts: DownloadTimeouts,
}

impl HttpTransport {
    pub fn new(client: Client, timeouts: DownloadTimeouts) -> Self {
        Self { client, timeouts }
    }

    /// Creates a transport with its own client.
    pub fn with_timeouts(timeouts: DownloadTimeouts) -> Self {
        Self::new(create_client(&timeouts), timeouts)
    }

    async fn get(&self, locator: &Url) -> Result<Bytes, TransportError> {
        tracing::debug!("Fetching object from `{}`", locator);

        let response = self
            .client
            .get(locator.clone())
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|err| self.map_error(err))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound);
        }
        if !status.is_success() {
            tracing::debug!("Unexpected status code from `{}`: {}", locator, status);
            return Err(TransportError::Status(status.as_u16()));
        }

        response.bytes().await.map_err(|err| self.map_error(err))
    }

    fn map_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeouts.max_download)
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

impl Transport for HttpTransport {
    fn fetch_bytes<'a>(&'a self, locator: &'a Url) -> BoxFuture<'a, Result<Bytes, TransportError>> {
        self.get(locator).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test;

    #[tokio::test]
    async fn test_fetch_bytes() {
        test::setup();

        let server = test::HitCounter::new();
        let transport = HttpTransport::with_timeouts(Default::default());

        let payload = transport
            .fetch_bytes(&server.url("garbage_data/hello"))
            .await
            .unwrap();

        assert_eq!(&payload[..], b"hello");
        assert_eq!(server.accesses(), 1);
    }

    #[tokio::test]
    async fn test_fetch_not_found() {
        test::setup();

        let server = test::HitCounter::new();
        let transport = HttpTransport::with_timeouts(Default::default());

        let result = transport
            .fetch_bytes(&server.url("respond_statuscode/404/a.png"))
            .await;
        assert_eq!(result, Err(TransportError::NotFound));

        let result = transport
            .fetch_bytes(&server.url("respond_statuscode/503/a.png"))
            .await;
        assert_eq!(result, Err(TransportError::Status(503)));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        test::setup();

        let server = test::HitCounter::new();
        let timeouts = DownloadTimeouts {
            connect: Duration::from_secs(1),
            max_download: Duration::from_millis(100),
        };
        let transport = HttpTransport::with_timeouts(timeouts);

        let result = transport
            .fetch_bytes(&server.url("delay/2s/slow.png"))
            .await;
        assert_eq!(
            result,
            Err(TransportError::Timeout(Duration::from_millis(100)))
        );
    }
}
