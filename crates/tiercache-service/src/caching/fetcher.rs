use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared, TryFutureExt};
use parking_lot::Mutex;
use sentry::{Hub, SentryFutureExt};
use url::Url;

use crate::download::Transport;
use crate::utils::defer::defer;

use super::{Codec, FetchError};

type FetchResult<T> = Result<T, FetchError>;
type FetchChannel<T> = Shared<oneshot::Receiver<FetchResult<T>>>;
type FetchMap<T> = Arc<Mutex<BTreeMap<Url, FetchChannel<T>>>>;

/// Fetches and decodes remote objects, running at most one fetch per locator at a time.
///
/// Every fetch is spawned as an independent task. All callers asking for the same locator while
/// it is running wait for that same task and receive a clone of its outcome, success or failure.
/// Once the outcome is delivered the locator is forgotten, so the next call starts over.
pub struct CoalescingFetcher<C: Codec> {
    transport: Arc<dyn Transport>,
    codec: Arc<C>,

    /// Used for deduplicating concurrent fetches.
    current_computations: FetchMap<C::Item>,
}

impl<C: Codec> fmt::Debug for CoalescingFetcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingFetcher")
            .field("transport", &self.transport)
            .field("codec", &self.codec)
            .field("running fetches", &self.in_flight())
            .finish()
    }
}

impl<C: Codec> Clone for CoalescingFetcher<C> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            codec: Arc::clone(&self.codec),
            current_computations: Arc::clone(&self.current_computations),
        }
    }
}

impl<C: Codec> CoalescingFetcher<C> {
    pub fn new(transport: Arc<dyn Transport>, codec: Arc<C>) -> Self {
        Self {
            transport,
            codec,
            current_computations: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// The number of fetches currently running.
    pub fn in_flight(&self) -> usize {
        self.current_computations.lock().len()
    }

    /// Fetches and decodes the object at `locator`.
    ///
    /// NOTE: This function itself is *not* `async`, because it should eagerly spawn the fetch
    /// on the runtime, even if the returned future is never awaited. Dropping the future does not
    /// cancel the fetch.
    pub fn fetch(&self, locator: &Url) -> BoxFuture<'static, FetchResult<C::Item>> {
        self.fetch_with(locator, |_| {})
    }

    /// Like [`fetch`](Self::fetch), but runs `on_fetched` with the decoded object inside the
    /// fetch task, before the outcome is handed to any caller.
    ///
    /// `on_fetched` is only run if this call started a new fetch. It is dropped otherwise.
    pub fn fetch_with<F>(
        &self,
        locator: &Url,
        on_fetched: F,
    ) -> BoxFuture<'static, FetchResult<C::Item>>
    where
        F: FnOnce(&C::Item) + Send + 'static,
    {
        let channel = {
            let mut current_computations = self.current_computations.lock();
            if let Some(channel) = current_computations.get(locator) {
                // A concurrent fetch was deduplicated.
                metric!(counter("caches.channel.hit") += 1);
                channel.clone()
            } else {
                metric!(counter("caches.channel.miss") += 1);

                let channel = self.create_channel(locator.clone(), on_fetched);
                let evicted = current_computations.insert(locator.clone(), channel.clone());
                debug_assert!(evicted.is_none());
                channel
            }
        };

        channel
            .unwrap_or_else(|_cancelled| Err(FetchError::Interrupted))
            .boxed()
    }

    /// Spawns the fetch task, and returns the channel that receives its outcome.
    fn create_channel<F>(&self, locator: Url, on_fetched: F) -> FetchChannel<C::Item>
    where
        F: FnOnce(&C::Item) + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();

        let remove_computation_token = {
            let current_computations = Arc::clone(&self.current_computations);
            let locator = locator.clone();
            defer(move || {
                current_computations.lock().remove(&locator);
            })
        };

        let transport = Arc::clone(&self.transport);
        let codec = Arc::clone(&self.codec);

        let channel = async move {
            let result = fetch_and_decode(&*transport, &*codec, &locator).await;
            if let Ok(ref item) = result {
                on_fetched(item);
            }
            // Drop the token first to evict from the map. This ensures that callers either
            // get a channel that will receive data, or they create a new channel.
            drop(remove_computation_token);
            sender.send(result).ok();
        }
        .bind_hub(Hub::new_from_top(Hub::current()));

        tokio::spawn(channel);

        receiver.shared()
    }
}

async fn fetch_and_decode<C: Codec>(
    transport: &dyn Transport,
    codec: &C,
    locator: &Url,
) -> FetchResult<C::Item> {
    metric!(counter("caches.computation") += 1);
    tracing::debug!("Fetching `{}`", locator);

    let payload = transport.fetch_bytes(locator).await.map_err(|err| {
        tracing::debug!(error = %err, "Fetching `{}` failed", locator);
        err
    })?;

    if payload.is_empty() {
        return Err(FetchError::BadResponse);
    }

    Ok(codec.decode(&payload)?)
}
