// Request dispatcher.
// Decides per request between a cache hit, joining an in-flight call, or issuing a new one.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::api::{ErrorTransform, RequestDescriptor, Transport, TransportRequest};
use crate::cache::entry::{InFlight, PendingRequest};
use crate::cache::{
    CacheEventKind, CacheKey, CacheStore, Clock, EntryStatus, Payload, SystemClock, is_stale,
};
use crate::error::{ApiError, Result};
use crate::state::ReadHook;

use super::retry::RetryPolicy;

/// Outcome of consulting the cache for one request.
enum Decision {
    Cached(Payload),
    Join(PendingRequest),
    Issued(PendingRequest),
}

/// Orchestrates API requests against a shared cache store.
///
/// All cache mutation goes through here or through [`CacheStore::invalidate`].
pub struct Dispatcher {
    store: Arc<CacheStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    next_request_id: AtomicU64,
}

impl Dispatcher {
    pub fn new(store: Arc<CacheStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::default(),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// A read hook over the same store and clock.
    pub fn reader(&self) -> ReadHook {
        ReadHook::new(self.store.clone(), self.clock.clone())
    }

    /// Resolve a request from cache, an in-flight call, or the network.
    ///
    /// Returns the cached payload without I/O when the entry is `Ready` and
    /// not stale. Otherwise joins the pending call for the same key unless
    /// the descriptor allows concurrency, and only then issues a new call.
    pub async fn request(&self, descriptor: RequestDescriptor) -> Result<Payload> {
        self.dispatch(descriptor, false).await
    }

    /// Like [`request`](Self::request) but skips the staleness check.
    ///
    /// Still joins an in-flight call for the same key.
    pub async fn refresh(&self, descriptor: RequestDescriptor) -> Result<Payload> {
        self.dispatch(descriptor, true).await
    }

    /// Mark every entry for `labels` stale.
    pub fn invalidate<I, S>(&self, labels: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.store.invalidate(labels)
    }

    async fn dispatch(&self, descriptor: RequestDescriptor, force: bool) -> Result<Payload> {
        let key = descriptor.key();
        let fingerprint = descriptor.fingerprint();
        let now = self.clock.now();

        let decision = self.store.with_entry(&key, |entry| {
            if !force
                && entry.status == EntryStatus::Ready
                && !is_stale(entry, &fingerprint, descriptor.ttl, now)
            {
                if let Some(payload) = &entry.payload {
                    return Decision::Cached(payload.clone());
                }
            }

            if !descriptor.allow_concurrent {
                if let Some(in_flight) = &entry.in_flight {
                    return Decision::Join(in_flight.request.clone());
                }
            }

            let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            let request = self.spawn_request(id, entry.generation, &descriptor, fingerprint.clone());
            entry.begin_loading(
                InFlight {
                    id,
                    request: request.clone(),
                },
                descriptor.ttl,
            );
            self.store.emit(&key, CacheEventKind::Loading);
            Decision::Issued(request)
        });

        match decision {
            Decision::Cached(payload) => {
                debug!(key = %key, "cache hit");
                Ok(payload)
            }
            Decision::Join(request) => {
                debug!(key = %key, "joining in-flight request");
                request.await
            }
            Decision::Issued(request) => request.await,
        }
    }

    /// Spawn the network call for one request and return a shareable handle.
    ///
    /// The call runs on the runtime so it completes and updates the cache even
    /// if every caller stops waiting.
    fn spawn_request(
        &self,
        id: u64,
        generation: u64,
        descriptor: &RequestDescriptor,
        fingerprint: String,
    ) -> PendingRequest {
        let store = self.store.clone();
        let transport = self.transport.clone();
        let clock = self.clock.clone();
        let retry = self.retry.clone();
        let descriptor = descriptor.clone();
        let key = descriptor.key();

        let task = {
            let store = store.clone();
            let clock = clock.clone();
            let key = key.clone();
            let work = {
                let store = store.clone();
                let clock = clock.clone();
                let key = key.clone();
                async move {
                    info!(
                        key = %key,
                        method = %descriptor.method,
                        url = %descriptor.url,
                        "dispatching request"
                    );

                    let wire = TransportRequest::from(&descriptor);
                    let outcome = retry
                        .run(&descriptor.label, || transport.send(wire.clone()))
                        .await
                        .and_then(|raw| descriptor.on_success.apply(raw));

                    let at = clock.now();
                    match outcome {
                        Ok(value) => {
                            let payload: Payload = Arc::new(value);
                            store.with_entry(&key, |entry| {
                                entry.complete(id, generation, payload.clone(), fingerprint, at)
                            });
                            store.emit(&key, CacheEventKind::Ready);
                            store.invalidate(&descriptor.invalidates);
                            Ok(payload)
                        }
                        Err(error) => {
                            warn!(key = %key, error = %error, "request failed");
                            let record = descriptor.on_error.apply(&error, at);
                            store.with_entry(&key, |entry| entry.fail(id, record));
                            store.emit(&key, CacheEventKind::Failed);
                            Err(error)
                        }
                    }
                }
            };

            // A panic is recorded here so the entry leaves Loading even when
            // nobody awaits the shared handle.
            tokio::spawn(async move {
                match AssertUnwindSafe(work).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let error = ApiError::Aborted(panic_message(panic.as_ref()));
                        fail_aborted(&store, &key, id, &error, clock.as_ref());
                        Err(error)
                    }
                }
            })
        };

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    let error = ApiError::Aborted(join_error.to_string());
                    fail_aborted(&store, &key, id, &error, clock.as_ref());
                    Err(error)
                }
            }
        }
        .boxed()
        .shared()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "request task panicked".to_string())
}

/// Release the slot of a request whose task died before recording an outcome.
fn fail_aborted(store: &CacheStore, key: &CacheKey, id: u64, error: &ApiError, clock: &dyn Clock) {
    warn!(key = %key, error = %error, "request task aborted");
    let record = ErrorTransform::Verbatim.apply(error, clock.now());
    store.with_entry(key, |entry| entry.fail(id, record));
    store.emit(key, CacheEventKind::Failed);
}
