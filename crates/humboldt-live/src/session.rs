//! Session lifecycle: shared state, sink fan-out, and the supervisor
//! task that drives the read loop and the reconnection controller.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use humboldt_codec::{Metadata, Record, UNDEF_TIMESTAMP};
use humboldt_types::{Dataset, HumboldtError, Result};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::client::LiveConfig;
use crate::gateway::START_SESSION_LINE;
use crate::protocol::{self, Connection};
use crate::queue::RecordQueue;
use crate::reconnect::{ReconnectDecision, ReconnectState};
use crate::subscription::Subscription;

/// Lifecycle states of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport established yet.
    NotConnected,
    /// TCP dial in progress.
    Connecting,
    /// Control-protocol handshake in progress.
    Authenticating,
    /// Handshake complete; the stream has not been started.
    Authenticated,
    /// Streaming binary records.
    Started,
    /// Stopped by the user. Terminal.
    Closed,
    /// Failed without recovery. Terminal.
    Errored,
}

impl SessionState {
    /// Returns the lowercase name used in logs and state errors.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotConnected => "not connected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Started => "started",
            Self::Closed => "closed",
            Self::Errored => "errored",
        }
    }

    /// Returns true once the session can never leave this state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-record callback. Returning an error reports it through the
/// sink's error handler (or a logged warning); it never ends the
/// session.
pub type RecordCallback =
    Box<dyn FnMut(&Record) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> + Send>;

/// Handler for failures inside a callback or output stream.
pub type ErrorCallback = Box<dyn FnMut(&HumboldtError) + Send>;

/// Called after a successful reconnect with the gap bounds: the event
/// time of the last record seen before the drop, and the time the
/// session was re-established.
pub type ReconnectCallback = Box<dyn FnMut(DateTime<Utc>, DateTime<Utc>) + Send>;

/// How a session is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shutdown {
    /// Stop reading, flush output streams, then close.
    Graceful,
    /// Drop everything immediately.
    Abort,
}

/// A registered record destination.
pub(crate) enum Sink {
    Callback {
        callback: RecordCallback,
        on_error: Option<ErrorCallback>,
    },
    Stream {
        writer: Box<dyn Write + Send>,
        label: String,
        on_error: Option<ErrorCallback>,
        wrote_metadata: bool,
    },
}

fn report_sink_error(on_error: &mut Option<ErrorCallback>, error: &HumboldtError) {
    match on_error {
        Some(handler) => handler(error),
        None => warn!(error = %error, "sink error"),
    }
}

impl Sink {
    /// Delivers one record. Returns false when the sink is broken and
    /// must be dropped from the registry.
    fn deliver(&mut self, record: &Record) -> bool {
        match self {
            Self::Callback { callback, on_error } => {
                if let Err(cause) = callback(record) {
                    let error = HumboldtError::Callback(cause.to_string());
                    report_sink_error(on_error, &error);
                }
                true
            }
            Self::Stream {
                writer,
                label,
                on_error,
                ..
            } => match writer.write_all(record.as_bytes()) {
                Ok(()) => true,
                Err(cause) => {
                    let error = HumboldtError::Callback(format!("output stream {label}: {cause}"));
                    report_sink_error(on_error, &error);
                    false
                }
            },
        }
    }

    /// Writes the encoded metadata header to a stream that has not yet
    /// received it. Returns false when the sink must be dropped.
    fn write_metadata(&mut self, encoded: &[u8]) -> bool {
        let Self::Stream {
            writer,
            label,
            on_error,
            wrote_metadata,
        } = self
        else {
            return true;
        };
        if *wrote_metadata {
            return true;
        }
        match writer.write_all(encoded) {
            Ok(()) => {
                *wrote_metadata = true;
                true
            }
            Err(cause) => {
                let error = HumboldtError::Callback(format!("output stream {label}: {cause}"));
                report_sink_error(on_error, &error);
                false
            }
        }
    }

    fn flush(&mut self) {
        if let Self::Stream { writer, label, .. } = self
            && let Err(cause) = writer.flush()
        {
            warn!(stream = %label, error = %cause, "output stream flush failed");
        }
    }
}

/// Client-level registry of sinks and reconnect callbacks. Shared by
/// every session generation of one client; cleared on stop/terminate.
pub(crate) struct SinkRegistry {
    sinks: Mutex<Vec<Sink>>,
    reconnect: Mutex<Vec<ReconnectCallback>>,
    stream_count: AtomicUsize,
}

impl SinkRegistry {
    pub(crate) fn new() -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
            reconnect: Mutex::new(Vec::new()),
            stream_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn add_callback(&self, callback: RecordCallback, on_error: Option<ErrorCallback>) {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Sink::Callback { callback, on_error });
    }

    /// Registers an output stream. When the metadata header is already
    /// captured it is written immediately; a write failure here is
    /// returned to the caller instead of deferred.
    pub(crate) fn add_stream(
        &self,
        mut writer: Box<dyn Write + Send>,
        label: Option<String>,
        on_error: Option<ErrorCallback>,
        metadata: Option<&[u8]>,
    ) -> Result<()> {
        let label = label.unwrap_or_else(|| {
            format!("stream-{}", self.stream_count.fetch_add(1, Ordering::Relaxed) + 1)
        });
        let mut wrote_metadata = false;
        if let Some(encoded) = metadata {
            writer.write_all(encoded)?;
            wrote_metadata = true;
        }
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Sink::Stream {
                writer,
                label,
                on_error,
                wrote_metadata,
            });
        Ok(())
    }

    pub(crate) fn add_reconnect_callback(&self, callback: ReconnectCallback) {
        self.reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    /// Fans one record out to every sink, dropping the broken ones.
    pub(crate) fn dispatch(&self, record: &Record) {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain_mut(|sink| sink.deliver(record));
    }

    /// Writes the metadata header to streams still waiting for it.
    pub(crate) fn write_metadata(&self, encoded: &[u8]) {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain_mut(|sink| sink.write_metadata(encoded));
    }

    pub(crate) fn flush_streams(&self) {
        for sink in self
            .sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_mut()
        {
            sink.flush();
        }
    }

    pub(crate) fn notify_reconnect(&self, gap_start: DateTime<Utc>, gap_end: DateTime<Utc>) {
        for callback in self
            .reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_mut()
        {
            callback(gap_start, gap_end);
        }
    }

    pub(crate) fn clear(&self) {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Write-side handle to one connection: subscription and control lines
/// queue on the channel, and the flag flips the read loop from control
/// lines to binary decode.
#[derive(Clone)]
pub(crate) struct Link {
    pub(crate) tx: mpsc::UnboundedSender<Bytes>,
    started: Arc<AtomicBool>,
}

impl Link {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            tx,
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Marks the connection as past `start_session`. Set before the
    /// start line is queued so the read loop never parses binary
    /// metadata as control text.
    pub(crate) fn start_binary(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub(crate) fn binary_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

/// One buffered or transmitted subscription.
struct SubEntry {
    sub: Subscription,
    /// Sticky: set on the first successful transmit. Replays of a
    /// transmitted subscription clear `start`; the historical replay
    /// point was consumed by the original request.
    transmitted: bool,
}

/// Subscription backlog plus the write link of the current connection.
/// All transmissions happen under this lock, which totally orders
/// subscription lines, replays, and the start line.
#[derive(Default)]
struct SubState {
    entries: Vec<SubEntry>,
    /// Logical start flag. Survives reconnects so the replay can
    /// restart streaming on the fresh connection.
    started: bool,
    link: Option<Link>,
}

/// State shared between the facade and the session tasks for one
/// session generation.
pub(crate) struct Shared {
    pub(crate) config: LiveConfig,
    pub(crate) dataset: Dataset,
    pub(crate) queue: Arc<RecordQueue>,
    pub(crate) registry: Arc<SinkRegistry>,
    state: watch::Sender<SessionState>,
    subs: Mutex<SubState>,
    metadata: Mutex<Option<Metadata>>,
    symbology: Mutex<HashMap<u32, String>>,
    last_ts_event: AtomicU64,
    error: Mutex<Option<HumboldtError>>,
    session_id: Mutex<Option<String>>,
}

impl Shared {
    pub(crate) fn new(
        config: LiveConfig,
        dataset: Dataset,
        registry: Arc<SinkRegistry>,
        queue: Arc<RecordQueue>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::NotConnected);
        Arc::new(Self {
            config,
            dataset,
            queue,
            registry,
            state,
            subs: Mutex::new(SubState::default()),
            metadata: Mutex::new(None),
            symbology: Mutex::new(HashMap::new()),
            last_ts_event: AtomicU64::new(0),
            error: Mutex::new(None),
            session_id: Mutex::new(None),
        })
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Moves to `next` unless a terminal state was already reached.
    pub(crate) fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            debug!(from = %current, to = %next, "session state change");
            *current = next;
            true
        });
    }

    /// Waits until the session reaches `Closed` or `Errored`.
    pub(crate) async fn wait_terminal(&self) {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state.is_terminal() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub(crate) fn set_session_id(&self, id: String) {
        *self.session_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
    }

    pub(crate) fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn metadata(&self) -> Option<Metadata> {
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn symbology_map(&self) -> HashMap<u32, String> {
        self.symbology
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn record_symbol_mapping(&self, instrument_id: u32, symbol: String) {
        self.symbology
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(instrument_id, symbol);
    }

    pub(crate) fn record_ts_event(&self, ts_event: u64) {
        self.last_ts_event.store(ts_event, Ordering::Relaxed);
    }

    /// Stores the stream metadata and sends the header to output
    /// streams still waiting for it. The first capture wins; the header
    /// replayed after a reconnect describes the same session.
    pub(crate) fn capture_metadata(&self, metadata: Metadata) {
        let mut slot = self.metadata.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            let encoded = metadata.encode();
            self.registry.write_metadata(&encoded);
            *slot = Some(metadata);
        }
    }

    /// Registers an output stream, holding the metadata slot so a
    /// concurrently arriving header cannot slip past registration.
    pub(crate) fn register_stream(
        &self,
        writer: Box<dyn Write + Send>,
        label: Option<String>,
        on_error: Option<ErrorCallback>,
    ) -> Result<()> {
        let slot = self.metadata.lock().unwrap_or_else(PoisonError::into_inner);
        let encoded = slot.as_ref().map(Metadata::encode);
        self.registry
            .add_stream(writer, label, on_error, encoded.as_deref())
    }

    /// Queues a subscription. Pre-start requests buffer client-side;
    /// once the session is started they transmit immediately.
    pub(crate) fn subscribe(&self, sub: Subscription) -> Result<()> {
        let chunks = sub.encode_chunks()?;
        let mut subs = self.subs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entry = SubEntry {
            sub,
            transmitted: false,
        };
        if subs.started
            && let Some(link) = &subs.link
        {
            entry.transmitted = send_chunks(link, chunks);
        }
        subs.entries.push(entry);
        Ok(())
    }

    /// Flushes the buffered subscriptions in submission order and sends
    /// the session-start signal. Idempotent once started.
    pub(crate) fn start(&self) -> Result<()> {
        let mut subs = self.subs.lock().unwrap_or_else(PoisonError::into_inner);
        if subs.started {
            return Ok(());
        }
        let Some(link) = subs.link.clone() else {
            return Err(HumboldtError::bad_state("start session", self.state()));
        };
        for entry in &mut subs.entries {
            if entry.transmitted {
                continue;
            }
            match entry.sub.encode_chunks() {
                Ok(chunks) => entry.transmitted = send_chunks(&link, chunks),
                // Validated when queued; an encode failure here means
                // the entry can only be skipped.
                Err(error) => warn!(error = %error, "dropping invalid buffered subscription"),
            }
        }
        subs.started = true;
        link.start_binary();
        let _ = link.tx.send(Bytes::from_static(START_SESSION_LINE.as_bytes()));
        self.set_state(SessionState::Started);
        Ok(())
    }

    /// Installs the write link of a fresh connection. When the session
    /// was already streaming, the active subscription set is replayed
    /// in original order (transmitted requests with `start` cleared)
    /// and the start signal is re-sent, all under the one lock so no
    /// concurrent subscribe can interleave.
    pub(crate) fn activate_link(&self, link: Link) {
        let mut subs = self.subs.lock().unwrap_or_else(PoisonError::into_inner);
        if subs.started {
            for entry in &mut subs.entries {
                let request = if entry.transmitted {
                    entry.sub.for_replay()
                } else {
                    entry.sub.clone()
                };
                match request.encode_chunks() {
                    Ok(chunks) => {
                        if send_chunks(&link, chunks) {
                            entry.transmitted = true;
                        }
                    }
                    Err(error) => warn!(error = %error, "dropping unreplayable subscription"),
                }
            }
            link.start_binary();
            let _ = link.tx.send(Bytes::from_static(START_SESSION_LINE.as_bytes()));
            self.set_state(SessionState::Started);
        }
        subs.link = Some(link);
    }

    /// Drops the write link of a dead connection so later subscribes
    /// buffer instead of sending into the void.
    pub(crate) fn detach_link(&self) {
        self.subs.lock().unwrap_or_else(PoisonError::into_inner).link = None;
    }

    /// Event time of the last record seen, for reconnect gap reporting.
    fn gap_start(&self) -> Option<DateTime<Utc>> {
        let ts = self.last_ts_event.load(Ordering::Relaxed);
        (ts != 0 && ts != UNDEF_TIMESTAMP).then(|| DateTime::from_timestamp_nanos(ts as i64))
    }

    /// Tears the session down on user request.
    pub(crate) fn finish(&self, mode: Shutdown) {
        debug!(mode = ?mode, "closing session");
        if mode == Shutdown::Graceful {
            self.registry.flush_streams();
        }
        self.registry.clear();
        {
            let mut subs = self.subs.lock().unwrap_or_else(PoisonError::into_inner);
            subs.entries.clear();
            subs.started = false;
            subs.link = None;
        }
        self.set_state(SessionState::Closed);
        self.queue.close();
    }

    /// Parks an unrecoverable failure for the next consumer call and
    /// closes the queue so blocked consumers observe it.
    pub(crate) fn fail(&self, error: HumboldtError) {
        error!(error = %error, "session failed");
        {
            let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.detach_link();
        self.set_state(SessionState::Errored);
        self.queue.close();
    }

    pub(crate) fn take_error(&self) -> Option<HumboldtError> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

fn send_chunks(link: &Link, chunks: Vec<String>) -> bool {
    chunks
        .into_iter()
        .all(|chunk| link.tx.send(Bytes::from(chunk)).is_ok())
}

/// Facade-side handle to a running session generation.
pub(crate) struct SessionHandle {
    pub(crate) shared: Arc<Shared>,
    shutdown: watch::Sender<Option<Shutdown>>,
}

impl SessionHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> (Arc<Self>, watch::Receiver<Option<Shutdown>>) {
        let (shutdown, rx) = watch::channel(None);
        (Arc::new(Self { shared, shutdown }), rx)
    }

    /// Requests a teardown. Graceful escalates to abort; an abort is
    /// never downgraded.
    pub(crate) fn request_shutdown(&self, mode: Shutdown) {
        self.shutdown.send_if_modified(|current| match (*current, mode) {
            (None, _) => {
                *current = Some(mode);
                true
            }
            (Some(Shutdown::Graceful), Shutdown::Abort) => {
                *current = Some(Shutdown::Abort);
                true
            }
            _ => false,
        });
    }
}

enum SessionEnd {
    Shutdown(Shutdown),
    Failed(HumboldtError),
}

enum ReconnectOutcome {
    Resumed(Connection),
    Shutdown(Shutdown),
    GaveUp(HumboldtError),
}

/// Drives one session generation: the read loop until shutdown or
/// failure, then the reconnection controller.
pub(crate) async fn supervise(
    shared: Arc<Shared>,
    connection: Connection,
    mut shutdown: watch::Receiver<Option<Shutdown>>,
) {
    let mut connection = connection;
    loop {
        let end = tokio::select! {
            error = protocol::read_loop(&shared, connection) => SessionEnd::Failed(error),
            mode = wait_shutdown(&mut shutdown) => SessionEnd::Shutdown(mode),
        };
        match end {
            SessionEnd::Shutdown(mode) => {
                shared.finish(mode);
                return;
            }
            SessionEnd::Failed(failure) => {
                match run_reconnect(&shared, &mut shutdown, failure).await {
                    ReconnectOutcome::Resumed(fresh) => {
                        debug!(phase = ?ReconnectState::Idle, "read loop resumed");
                        connection = fresh;
                    }
                    ReconnectOutcome::Shutdown(mode) => {
                        shared.finish(mode);
                        return;
                    }
                    ReconnectOutcome::GaveUp(failure) => {
                        shared.fail(failure);
                        return;
                    }
                }
            }
        }
    }
}

async fn wait_shutdown(shutdown: &mut watch::Receiver<Option<Shutdown>>) -> Shutdown {
    loop {
        let requested = *shutdown.borrow_and_update();
        if let Some(mode) = requested {
            return mode;
        }
        // A dropped sender means the facade is gone; abort.
        if shutdown.changed().await.is_err() {
            return Shutdown::Abort;
        }
    }
}

/// The reconnection controller: backoff, re-establish, replay.
async fn run_reconnect(
    shared: &Arc<Shared>,
    shutdown: &mut watch::Receiver<Option<Shutdown>>,
    failure: HumboldtError,
) -> ReconnectOutcome {
    shared.detach_link();
    let policy = shared.config.reconnect_policy.clone();
    let mut last_error = failure;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let delay = match policy.decide(&last_error, attempt) {
            ReconnectDecision::Retry(delay) => delay,
            ReconnectDecision::GiveUp => {
                warn!(
                    phase = ?ReconnectState::GaveUp,
                    attempt,
                    error = %last_error,
                    "not reconnecting"
                );
                return ReconnectOutcome::GaveUp(last_error);
            }
        };
        shared.set_state(SessionState::Connecting);
        warn!(
            phase = ?ReconnectState::AwaitingReconnect,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %last_error,
            "session dropped; reconnecting after backoff"
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            mode = wait_shutdown(shutdown) => return ReconnectOutcome::Shutdown(mode),
        }
        debug!(phase = ?ReconnectState::Reconnecting, attempt, "re-establishing session");
        match protocol::establish(shared).await {
            Ok(connection) => {
                shared.activate_link(connection.link.clone());
                let gap_end = Utc::now();
                let gap_start = shared.gap_start().unwrap_or(gap_end);
                shared.registry.notify_reconnect(gap_start, gap_end);
                info!(attempt, session_id = ?shared.session_id(), "session re-established");
                return ReconnectOutcome::Resumed(connection);
            }
            Err(error) => {
                warn!(error = %error, attempt, "reconnect attempt failed");
                last_error = error;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::str::from_utf8;

    use humboldt_codec::{RType, RecordHeader, TradeMsg};
    use humboldt_types::Schema;

    use super::*;
    use crate::queue::DEFAULT_QUEUE_CAPACITY;

    fn sample_record() -> Record {
        TradeMsg {
            header: RecordHeader::new(RType::Trade, 1, 42, 1_000),
            price: 5_000_000_000,
            size: 10,
            action: b'T',
            side: b'B',
            flags: 0,
            depth: 0,
            ts_recv: 1_001,
            ts_in_delta: 0,
            sequence: 1,
        }
        .to_record()
    }

    fn test_shared() -> Arc<Shared> {
        Shared::new(
            LiveConfig::new("hb-test-key-123"),
            Dataset::new("EQUS.MINI").unwrap(),
            Arc::new(SinkRegistry::new()),
            Arc::new(RecordQueue::new(DEFAULT_QUEUE_CAPACITY)),
        )
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_state_names_and_terminality() {
        assert_eq!(SessionState::NotConnected.to_string(), "not connected");
        assert_eq!(SessionState::Started.as_str(), "started");
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Errored.is_terminal());
        assert!(!SessionState::Authenticated.is_terminal());
    }

    #[test]
    fn test_terminal_state_is_never_overwritten() {
        let shared = test_shared();
        shared.set_state(SessionState::Started);
        shared.fail(HumboldtError::connection("reset"));
        assert_eq!(shared.state(), SessionState::Errored);
        shared.set_state(SessionState::Closed);
        assert_eq!(shared.state(), SessionState::Errored);
        assert!(matches!(
            shared.take_error(),
            Some(HumboldtError::Connection(_))
        ));
        assert!(shared.take_error().is_none(), "error is taken once");
    }

    #[test]
    fn test_callback_failure_is_isolated() {
        let registry = SinkRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reported = Arc::clone(&seen);
        registry.add_callback(
            Box::new(|_record| Err("boom".into())),
            Some(Box::new(move |error| {
                reported.lock().unwrap().push(error.to_string());
            })),
        );
        let record = sample_record();
        registry.dispatch(&record);
        registry.dispatch(&record);
        let reports = seen.lock().unwrap();
        assert_eq!(reports.len(), 2, "failing callback stays registered");
        assert!(reports[0].contains("boom"));
    }

    #[test]
    fn test_broken_stream_is_dropped() {
        let registry = SinkRegistry::new();
        let reports = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&reports);
        registry
            .add_stream(
                Box::new(BrokenWriter),
                None,
                Some(Box::new(move |_error| {
                    *counter.lock().unwrap() += 1;
                })),
                None,
            )
            .unwrap();
        let record = sample_record();
        registry.dispatch(&record);
        registry.dispatch(&record);
        assert_eq!(*reports.lock().unwrap(), 1, "dropped after first failure");
    }

    #[test]
    fn test_stream_receives_metadata_once() {
        let registry = SinkRegistry::new();
        let buf = SharedBuf::default();
        let metadata = Metadata::new("EQUS.MINI", Some(Schema::Trades), 0).encode();
        registry
            .add_stream(Box::new(buf.clone()), None, None, Some(&metadata))
            .unwrap();
        registry.write_metadata(&metadata);
        let record = sample_record();
        registry.dispatch(&record);

        let mut expected = metadata.clone();
        expected.extend_from_slice(record.as_bytes());
        assert_eq!(buf.contents(), expected);
    }

    #[test]
    fn test_late_metadata_reaches_waiting_stream() {
        let shared = test_shared();
        let buf = SharedBuf::default();
        shared
            .register_stream(Box::new(buf.clone()), None, None)
            .unwrap();
        assert!(buf.contents().is_empty());

        let metadata = Metadata::new("EQUS.MINI", Some(Schema::Trades), 7);
        let encoded = metadata.encode();
        shared.capture_metadata(metadata.clone());
        shared.capture_metadata(Metadata::new("EQUS.MINI", Some(Schema::Trades), 99));
        assert_eq!(buf.contents(), encoded);
        assert_eq!(shared.metadata().unwrap().start, 7, "first capture wins");
    }

    #[test]
    fn test_subscribe_buffers_until_start() {
        let shared = test_shared();
        let sub = Subscription::new(
            Dataset::new("EQUS.MINI").unwrap(),
            Schema::Trades,
            ["AAPL", "MSFT"],
        );
        shared.subscribe(sub).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        shared.activate_link(Link::new(tx));
        assert!(rx.try_recv().is_err(), "pre-start requests stay buffered");

        shared.start().unwrap();
        let line = rx.try_recv().unwrap();
        assert!(from_utf8(&line).unwrap().contains("symbols=AAPL,MSFT"));
        assert_eq!(rx.try_recv().unwrap(), START_SESSION_LINE.as_bytes());
        assert_eq!(shared.state(), SessionState::Started);

        shared.start().unwrap();
        assert!(rx.try_recv().is_err(), "start is idempotent");
    }

    #[test]
    fn test_replay_clears_start_and_restarts_stream() {
        let shared = test_shared();
        let dataset = Dataset::new("EQUS.MINI").unwrap();
        let mut with_start = Subscription::new(dataset.clone(), Schema::Trades, ["AAPL"]);
        with_start.start = Some(DateTime::from_timestamp_nanos(1_000));
        shared.subscribe(with_start).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        shared.activate_link(Link::new(tx));
        shared.start().unwrap();
        let first = rx.try_recv().unwrap();
        assert!(from_utf8(&first).unwrap().contains("start=1000"));
        rx.try_recv().unwrap();

        // Fresh connection after a drop: same set, start cleared, then
        // the start line again.
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let link = Link::new(tx2);
        shared.detach_link();
        shared.activate_link(link.clone());
        let replayed = rx2.try_recv().unwrap();
        let replayed = from_utf8(&replayed).unwrap();
        assert!(replayed.contains("symbols=AAPL"));
        assert!(!replayed.contains("start="));
        assert_eq!(rx2.try_recv().unwrap(), START_SESSION_LINE.as_bytes());
        assert!(link.binary_started());
    }

    #[test]
    fn test_subscribe_after_start_transmits_immediately() {
        let shared = test_shared();
        let dataset = Dataset::new("EQUS.MINI").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        shared.activate_link(Link::new(tx));
        shared.start().unwrap();
        assert_eq!(rx.try_recv().unwrap(), START_SESSION_LINE.as_bytes());

        shared
            .subscribe(Subscription::new(dataset, Schema::Ohlcv1S, ["ESM6"]))
            .unwrap();
        let line = rx.try_recv().unwrap();
        assert!(from_utf8(&line).unwrap().contains("symbols=ESM6"));
    }

    #[test]
    fn test_finish_clears_sinks_and_backlog() {
        let shared = test_shared();
        shared.registry.add_callback(Box::new(|_| Ok(())), None);
        shared
            .subscribe(Subscription::new(
                Dataset::new("EQUS.MINI").unwrap(),
                Schema::Trades,
                ["AAPL"],
            ))
            .unwrap();
        shared.finish(Shutdown::Graceful);
        assert_eq!(shared.state(), SessionState::Closed);
        assert!(shared.queue.is_closed());

        // A link activated after close must see an empty backlog.
        let (tx, mut rx) = mpsc::unbounded_channel();
        shared.activate_link(Link::new(tx));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_shutdown_escalates_but_never_downgrades() {
        let (handle, rx) = SessionHandle::new(test_shared());
        handle.request_shutdown(Shutdown::Graceful);
        assert_eq!(*rx.borrow(), Some(Shutdown::Graceful));
        handle.request_shutdown(Shutdown::Abort);
        assert_eq!(*rx.borrow(), Some(Shutdown::Abort));
        handle.request_shutdown(Shutdown::Graceful);
        assert_eq!(*rx.borrow(), Some(Shutdown::Abort));
    }
}
