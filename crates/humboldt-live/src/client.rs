//! The live client facade.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::panic;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use humboldt_codec::{Metadata, Record};
use humboldt_types::{DEFAULT_GATEWAY_PORT, Dataset, HumboldtError, Result};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::warn;

use crate::cram::BUCKET_ID_LENGTH;
use crate::protocol;
use crate::queue::{DEFAULT_QUEUE_CAPACITY, RecordQueue};
use crate::reconnect::ReconnectPolicy;
use crate::session::{
    self, ErrorCallback, SessionHandle, SessionState, Shared, Shutdown, SinkRegistry,
};
use crate::subscription::Subscription;

/// Configuration for a [`LiveClient`].
///
/// Defaults suit a live session against the production gateway; every
/// field is public and may be adjusted before constructing the client.
#[derive(Clone)]
pub struct LiveConfig {
    /// API key used for CRAM authentication.
    pub key: String,
    /// Gateway host override. Defaults to the dataset's gateway.
    pub gateway: Option<String>,
    /// Gateway port.
    pub port: u16,
    /// Bound on the TCP dial.
    pub connect_timeout: Duration,
    /// Bound on the whole authentication handshake.
    pub auth_timeout: Duration,
    /// Bound on a graceful stop before it escalates to terminate.
    pub close_timeout: Duration,
    /// Requested gateway heartbeat interval, `None` for the gateway
    /// default.
    pub heartbeat_interval: Option<Duration>,
    /// Record queue capacity for sync/async iteration.
    pub queue_capacity: usize,
    /// Policy applied when the session drops unexpectedly.
    pub reconnect_policy: ReconnectPolicy,
}

impl LiveConfig {
    /// Creates a configuration with default timeouts and no reconnect
    /// policy.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            gateway: None,
            port: DEFAULT_GATEWAY_PORT,
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            heartbeat_interval: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            reconnect_policy: ReconnectPolicy::None,
        }
    }
}

impl fmt::Debug for LiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveConfig")
            .field("key", &"<redacted>")
            .field("gateway", &self.gateway)
            .field("port", &self.port)
            .field("connect_timeout", &self.connect_timeout)
            .field("auth_timeout", &self.auth_timeout)
            .field("close_timeout", &self.close_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("queue_capacity", &self.queue_capacity)
            .field("reconnect_policy", &self.reconnect_policy)
            .finish()
    }
}

/// Which iteration surface has claimed the record queue. One client
/// serves exactly one consumer context; mixing the sync and async
/// iterators would split the stream unpredictably.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsumerMode {
    Unclaimed,
    Sync,
    Async,
}

/// A live streaming client.
///
/// The client owns a small dedicated runtime that drives the
/// connection, so the facade works from plain threads and from inside
/// other runtimes alike. Records are consumed through callbacks and
/// output streams, or by iterating: [`next_record`](Self::next_record)
/// (blocking) or [`next_record_async`](Self::next_record_async). Both
/// iteration forms send the session start signal automatically when the
/// session is connected but not yet started.
///
/// Prefer [`close`](Self::close) for teardown; `Drop` falls back to a
/// best-effort terminate so a leaked client never dangles a connection.
pub struct LiveClient {
    config: LiveConfig,
    runtime: Option<Runtime>,
    session: Mutex<Option<Arc<SessionHandle>>>,
    consumer: Mutex<ConsumerMode>,
    registry: Arc<SinkRegistry>,
}

impl LiveClient {
    /// Validates the configuration and builds the client runtime. No
    /// connection is made until the first [`subscribe`](Self::subscribe).
    pub fn new(config: LiveConfig) -> Result<Self> {
        if config.key.is_empty() {
            return Err(HumboldtError::Config("API key is empty".to_owned()));
        }
        if config.key.len() < BUCKET_ID_LENGTH {
            return Err(HumboldtError::Config(format!(
                "API key is shorter than {BUCKET_ID_LENGTH} characters"
            )));
        }
        if config.key.chars().any(|c| c == '|' || c.is_whitespace()) {
            return Err(HumboldtError::Config(
                "API key contains invalid characters".to_owned(),
            ));
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("humboldt-live")
            .enable_all()
            .build()
            .map_err(|cause| HumboldtError::Config(format!("failed to build runtime: {cause}")))?;
        Ok(Self {
            config,
            runtime: Some(runtime),
            session: Mutex::new(None),
            consumer: Mutex::new(ConsumerMode::Unclaimed),
            registry: Arc::new(SinkRegistry::new()),
        })
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime
            .as_ref()
            .ok_or_else(|| HumboldtError::bad_state("use client", SessionState::Closed))
    }

    fn current_shared(&self) -> Option<Arc<Shared>> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|handle| Arc::clone(&handle.shared))
    }

    /// Queues a subscription, connecting and authenticating on first
    /// use. The first subscription binds the session's dataset; mixing
    /// datasets within one session is a subscription error. After a
    /// stop, the next subscribe opens a fresh session and may bind a
    /// different dataset (the old backlog was cleared with the old
    /// session).
    pub fn subscribe(&self, sub: Subscription) -> Result<()> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = session.as_ref() {
            let state = handle.shared.state();
            if !state.is_terminal() {
                if handle.shared.dataset != sub.dataset {
                    return Err(HumboldtError::Subscription(format!(
                        "session is bound to dataset {}; cannot subscribe to {}",
                        handle.shared.dataset, sub.dataset
                    )));
                }
                return handle.shared.subscribe(sub);
            }
            if state == SessionState::Errored {
                return Err(HumboldtError::bad_state("subscribe", state));
            }
        }
        let handle = self.open_session(sub.dataset.clone())?;
        let result = handle.shared.subscribe(sub);
        *session = Some(handle);
        result
    }

    fn open_session(&self, dataset: Dataset) -> Result<Arc<SessionHandle>> {
        let runtime = self.runtime()?;
        let queue = Arc::new(RecordQueue::new(self.config.queue_capacity));
        let shared = Shared::new(
            self.config.clone(),
            dataset,
            Arc::clone(&self.registry),
            queue,
        );
        let connection = block_on(runtime, protocol::establish(&shared))?;
        shared.activate_link(connection.link.clone());
        let (handle, shutdown_rx) = SessionHandle::new(Arc::clone(&shared));
        runtime.spawn(session::supervise(shared, connection, shutdown_rx));
        Ok(handle)
    }

    /// Flushes buffered subscriptions and starts streaming. Errors if
    /// nothing is connected; idempotent once started.
    pub fn start(&self) -> Result<()> {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(handle) = session.as_ref() else {
            return Err(HumboldtError::bad_state(
                "start session",
                SessionState::NotConnected,
            ));
        };
        let state = handle.shared.state();
        if state.is_terminal() {
            return Err(HumboldtError::bad_state("start session", state));
        }
        handle.shared.start()
    }

    /// Claims the queue for one consumer context and performs the
    /// deferred auto-start on the first call.
    fn begin_iteration(&self, mode: ConsumerMode) -> Result<Arc<SessionHandle>> {
        let mut consumer = self.consumer.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = {
            let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(handle) = session.as_ref() else {
                return Err(HumboldtError::bad_state(
                    "iterate records",
                    SessionState::NotConnected,
                ));
            };
            Arc::clone(handle)
        };
        match (*consumer, mode) {
            (ConsumerMode::Unclaimed, _) => {
                let state = handle.shared.state();
                if state == SessionState::Started {
                    // An explicit start already routed this session to
                    // callbacks and streams; records seen since were
                    // never queued.
                    return Err(HumboldtError::bad_state("begin iterating", state));
                }
                if !state.is_terminal() {
                    handle.shared.queue.enable();
                    handle.shared.start()?;
                }
                *consumer = mode;
            }
            (current, requested) if current == requested => {}
            (ConsumerMode::Sync, _) => {
                return Err(HumboldtError::bad_state(
                    "iterate asynchronously",
                    "consumed synchronously",
                ));
            }
            (ConsumerMode::Async, _) => {
                return Err(HumboldtError::bad_state(
                    "iterate synchronously",
                    "consumed asynchronously",
                ));
            }
        }
        Ok(handle)
    }

    fn finish_iteration(&self, handle: &SessionHandle) -> Result<Option<Record>> {
        match handle.shared.take_error() {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }

    /// Blocks for the next record. Returns `Ok(None)` once the session
    /// is over and the queue is drained; a session failure surfaces
    /// here once.
    pub fn next_record(&self) -> Result<Option<Record>> {
        let handle = self.begin_iteration(ConsumerMode::Sync)?;
        match handle.shared.queue.get() {
            Some(record) => Ok(Some(record)),
            None => self.finish_iteration(&handle),
        }
    }

    /// Awaits the next record without blocking the surrounding event
    /// loop. Same termination semantics as [`next_record`](Self::next_record).
    pub async fn next_record_async(&self) -> Result<Option<Record>> {
        let handle = self.begin_iteration(ConsumerMode::Async)?;
        match handle.shared.queue.pop().await {
            Some(record) => Ok(Some(record)),
            None => self.finish_iteration(&handle),
        }
    }

    /// Returns a blocking iterator over the record stream.
    pub fn iter(&self) -> RecordIter<'_> {
        RecordIter { client: self }
    }

    /// Returns the record stream as a [`futures::Stream`].
    pub fn record_stream(&self) -> impl Stream<Item = Result<Record>> + '_ {
        futures::stream::unfold(self, |client| async move {
            match client.next_record_async().await {
                Ok(Some(record)) => Some((Ok(record), client)),
                Ok(None) => None,
                Err(error) => Some((Err(error), client)),
            }
        })
    }

    /// Registers a record callback with an optional error handler. A
    /// callback failure is reported to the handler (or logged) and
    /// never ends the session.
    pub fn add_callback<F>(&self, callback: F, on_error: Option<ErrorCallback>)
    where
        F: FnMut(&Record) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + 'static,
    {
        self.registry.add_callback(Box::new(callback), on_error);
    }

    /// Registers a writer that receives the encoded metadata header
    /// once, then every record byte-for-byte. A broken writer is
    /// reported through `on_error` (or a warning) and dropped.
    pub fn add_stream<W>(&self, writer: W, on_error: Option<ErrorCallback>) -> Result<()>
    where
        W: Write + Send + 'static,
    {
        self.register_stream(Box::new(writer), None, on_error)
    }

    /// Like [`add_stream`](Self::add_stream), writing to a freshly
    /// created file. Fails if the target already exists.
    pub fn add_stream_path(
        &self,
        path: impl AsRef<Path>,
        on_error: Option<ErrorCallback>,
    ) -> Result<()> {
        let path = path.as_ref();
        let file = File::create_new(path).map_err(|cause| {
            HumboldtError::Io(io::Error::new(
                cause.kind(),
                format!("{}: {cause}", path.display()),
            ))
        })?;
        self.register_stream(
            Box::new(BufWriter::new(file)),
            Some(path.display().to_string()),
            on_error,
        )
    }

    fn register_stream(
        &self,
        writer: Box<dyn Write + Send>,
        label: Option<String>,
        on_error: Option<ErrorCallback>,
    ) -> Result<()> {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        match session.as_ref() {
            Some(handle) => handle.shared.register_stream(writer, label, on_error),
            None => self.registry.add_stream(writer, label, on_error, None),
        }
    }

    /// Registers a callback invoked after each successful reconnect
    /// with the gap bounds: event time of the last record seen before
    /// the drop and the reconnect completion time.
    pub fn add_reconnect_callback<F>(&self, callback: F)
    where
        F: FnMut(DateTime<Utc>, DateTime<Utc>) + Send + 'static,
    {
        self.registry.add_reconnect_callback(Box::new(callback));
    }

    /// Stops the session gracefully: stop reading, flush output
    /// streams, close the transport. Escalates to terminate when the
    /// close timeout elapses. The client stays reusable.
    pub fn stop(&self) -> Result<()> {
        let handle = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        *self.consumer.lock().unwrap_or_else(PoisonError::into_inner) = ConsumerMode::Unclaimed;
        let Some(handle) = handle else {
            return Ok(());
        };
        if handle.shared.state().is_terminal() {
            self.registry.clear();
            return Ok(());
        }
        handle.request_shutdown(Shutdown::Graceful);
        let runtime = self.runtime()?;
        let close_timeout = self.config.close_timeout;
        let shared = Arc::clone(&handle.shared);
        let finished = block_on(runtime, async move {
            tokio::time::timeout(close_timeout, shared.wait_terminal())
                .await
                .is_ok()
        });
        if !finished {
            warn!("graceful stop timed out; aborting session");
            handle.request_shutdown(Shutdown::Abort);
            let shared = Arc::clone(&handle.shared);
            let confirmed = block_on(runtime, async move {
                tokio::time::timeout(close_timeout, shared.wait_terminal())
                    .await
                    .is_ok()
            });
            if !confirmed {
                warn!("session did not confirm abort");
            }
        }
        Ok(())
    }

    /// Aborts the session immediately, without flushing output streams.
    /// The client stays reusable.
    pub fn terminate(&self) -> Result<()> {
        let handle = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        *self.consumer.lock().unwrap_or_else(PoisonError::into_inner) = ConsumerMode::Unclaimed;
        let Some(handle) = handle else {
            return Ok(());
        };
        if handle.shared.state().is_terminal() {
            self.registry.clear();
            return Ok(());
        }
        handle.request_shutdown(Shutdown::Abort);
        let runtime = self.runtime()?;
        let close_timeout = self.config.close_timeout;
        let shared = Arc::clone(&handle.shared);
        let confirmed = block_on(runtime, async move {
            tokio::time::timeout(close_timeout, shared.wait_terminal())
                .await
                .is_ok()
        });
        if !confirmed {
            warn!("session did not confirm abort");
        }
        Ok(())
    }

    /// The stream metadata header, once captured.
    pub fn metadata(&self) -> Option<Metadata> {
        self.current_shared().and_then(|shared| shared.metadata())
    }

    /// Snapshot of the instrument-id to symbol mappings seen so far.
    pub fn symbology_map(&self) -> HashMap<u32, String> {
        self.current_shared()
            .map(|shared| shared.symbology_map())
            .unwrap_or_default()
    }

    /// The dataset the session is bound to, once bound.
    pub fn dataset(&self) -> Option<Dataset> {
        self.current_shared().map(|shared| shared.dataset.clone())
    }

    /// The session's lifecycle state.
    pub fn state(&self) -> SessionState {
        self.current_shared()
            .map(|shared| shared.state())
            .unwrap_or(SessionState::NotConnected)
    }

    /// True while authenticated, whether or not streaming has started.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Authenticated | SessionState::Started
        )
    }

    /// True while streaming records.
    pub fn is_started(&self) -> bool {
        self.state() == SessionState::Started
    }

    /// Blocks until the session closes or fails. When the timeout
    /// elapses first, the session is terminated before returning,
    /// mirroring interrupt semantics on blocking waits.
    pub fn block_for_close(&self, timeout: Duration) -> Result<()> {
        let Some(shared) = self.current_shared() else {
            return Ok(());
        };
        let runtime = self.runtime()?;
        let closed = block_on(runtime, async move {
            tokio::time::timeout(timeout, shared.wait_terminal())
                .await
                .is_ok()
        });
        if closed {
            Ok(())
        } else {
            warn!("close wait elapsed; terminating session");
            self.terminate()
        }
    }

    /// Awaits the session's close or failure.
    pub async fn wait_for_close(&self) {
        if let Some(shared) = self.current_shared() {
            shared.wait_terminal().await;
        }
    }

    /// Deterministic teardown: graceful stop, then runtime shutdown.
    /// Call from a non-async context.
    pub fn close(mut self) -> Result<()> {
        let result = self.stop();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_secs(2));
        }
        result
    }
}

impl fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveClient")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        if let Some(handle) = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.request_shutdown(Shutdown::Abort);
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Blocking iterator over a client's record stream.
#[derive(Debug)]
pub struct RecordIter<'a> {
    client: &'a LiveClient,
}

impl Iterator for RecordIter<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.client.next_record().transpose()
    }
}

/// Runs a future to completion on the client runtime. When the caller
/// is already inside a runtime, `Runtime::block_on` would panic; the
/// call is offloaded to a scoped thread instead, keeping the facade
/// synchronous without blocking a foreign event loop illegally.
fn block_on<F>(runtime: &Runtime, future: F) -> F::Output
where
    F: Future + Send,
    F::Output: Send,
{
    if Handle::try_current().is_ok() {
        thread::scope(|scope| {
            scope
                .spawn(|| runtime.block_on(future))
                .join()
                .unwrap_or_else(|payload| panic::resume_unwind(payload))
        })
    } else {
        runtime.block_on(future)
    }
}

#[cfg(test)]
mod tests {
    use humboldt_types::Schema;

    use super::*;

    fn test_client() -> LiveClient {
        LiveClient::new(LiveConfig::new("hb-test-key-123")).unwrap()
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let config = LiveConfig::new("hb-very-secret-key");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_new_rejects_invalid_keys() {
        for key in ["", "abc", "bad|key-123", "white space-key"] {
            let err = LiveClient::new(LiveConfig::new(key)).unwrap_err();
            assert!(matches!(err, HumboldtError::Config(_)), "key {key:?}");
        }
    }

    #[test]
    fn test_operations_require_a_session() {
        let client = test_client();
        assert_eq!(client.state(), SessionState::NotConnected);
        assert!(!client.is_connected());
        assert!(client.dataset().is_none());
        assert!(client.metadata().is_none());
        assert!(client.symbology_map().is_empty());

        assert!(matches!(
            client.start(),
            Err(HumboldtError::BadState { .. })
        ));
        assert!(matches!(
            client.next_record(),
            Err(HumboldtError::BadState { .. })
        ));
        client.stop().unwrap();
        client.terminate().unwrap();
    }

    #[test]
    fn test_subscription_constructor_defaults() {
        let sub = Subscription::new(
            Dataset::new("EQUS.MINI").unwrap(),
            Schema::Trades,
            ["AAPL"],
        );
        assert!(sub.start.is_none());
        assert!(!sub.snapshot);
        assert!(sub.id.is_none());
    }

    #[test]
    fn test_add_stream_path_requires_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.hmb");
        let client = test_client();
        client.add_stream_path(&path, None).unwrap();
        let err = client.add_stream_path(&path, None).unwrap_err();
        assert!(matches!(err, HumboldtError::Io(_)));
    }
}
