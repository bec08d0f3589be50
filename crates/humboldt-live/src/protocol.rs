//! Gateway transport: dial, CRAM handshake, the write task, and the
//! read loop that turns transport bytes into dispatched records.

use bytes::{Bytes, BytesMut};
use humboldt_codec::{RType, Record, StreamDecoder, SystemCode};
use humboldt_types::{HumboldtError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cram;
use crate::gateway::{GatewayMessage, LineBuffer, encode_auth};
use crate::session::{Link, SessionState, Shared};

/// Read buffer handed to the kernel per transport read.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Client identity transmitted in the authentication line.
const CLIENT_NAME: &str = concat!("humboldt-rust/", env!("CARGO_PKG_VERSION"));

/// An authenticated connection, ready for the read loop.
pub(crate) struct Connection {
    reader: OwnedReadHalf,
    /// Bytes read past the auth response, owed to the read loop.
    carry: BytesMut,
    pub(crate) link: Link,
}

/// Dials the gateway and completes the control-protocol handshake.
/// Leaves the session in `Authenticated` with the write task running.
pub(crate) async fn establish(shared: &Shared) -> Result<Connection> {
    let host = shared
        .config
        .gateway
        .clone()
        .unwrap_or_else(|| shared.dataset.default_gateway());
    let port = shared.config.port;

    shared.set_state(SessionState::Connecting);
    debug!(host = %host, port, "dialing gateway");
    let stream = tokio::time::timeout(
        shared.config.connect_timeout,
        TcpStream::connect((host.as_str(), port)),
    )
    .await
    .map_err(|_| HumboldtError::Connection(format!("connect to {host}:{port} timed out")))?
    .map_err(|cause| HumboldtError::Connection(format!("connect to {host}:{port}: {cause}")))?;
    stream.set_nodelay(true).map_err(HumboldtError::connection)?;

    shared.set_state(SessionState::Authenticating);
    let mut stream = stream;
    let (session_id, carry) = tokio::time::timeout(
        shared.config.auth_timeout,
        authenticate(shared, &mut stream),
    )
    .await
    .map_err(|_| HumboldtError::Authentication("handshake timed out".to_owned()))??;
    info!(session_id = %session_id, dataset = %shared.dataset, "authenticated");
    shared.set_session_id(session_id);
    shared.set_state(SessionState::Authenticated);

    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(writer, rx));
    Ok(Connection {
        reader,
        carry,
        link: Link::new(tx),
    })
}

/// Runs the greeting/challenge/response exchange. Returns the assigned
/// session id and any bytes read past the auth response.
async fn authenticate(shared: &Shared, stream: &mut TcpStream) -> Result<(String, BytesMut)> {
    let mut lines = LineBuffer::new();
    match next_message(stream, &mut lines).await? {
        GatewayMessage::Greeting { version } => debug!(lsg_version = %version, "gateway greeting"),
        other => return Err(unexpected("greeting", &other)),
    }
    let challenge = match next_message(stream, &mut lines).await? {
        GatewayMessage::Challenge { challenge } => challenge,
        other => return Err(unexpected("CRAM challenge", &other)),
    };

    let auth = cram::solve(&challenge, &shared.config.key);
    let request = encode_auth(
        &auth,
        shared.dataset.as_str(),
        CLIENT_NAME,
        shared.config.heartbeat_interval.map(|d| d.as_secs()),
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(HumboldtError::connection)?;

    match next_message(stream, &mut lines).await? {
        GatewayMessage::AuthResponse {
            success: true,
            session_id,
            ..
        } => Ok((session_id.unwrap_or_default(), lines.into_remainder())),
        GatewayMessage::AuthResponse {
            success: false,
            error,
            ..
        } => Err(HumboldtError::Authentication(
            error.unwrap_or_else(|| "rejected by gateway".to_owned()),
        )),
        other => Err(unexpected("auth response", &other)),
    }
}

fn unexpected(wanted: &str, got: &GatewayMessage) -> HumboldtError {
    HumboldtError::Protocol(format!("expected {wanted}, got {got:?}"))
}

async fn next_message(stream: &mut TcpStream, lines: &mut LineBuffer) -> Result<GatewayMessage> {
    loop {
        if let Some(line) = lines.next_line() {
            return GatewayMessage::parse(&line);
        }
        let mut chunk = [0u8; 1024];
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(HumboldtError::connection)?;
        if n == 0 {
            return Err(HumboldtError::Connection(
                "gateway closed during handshake".to_owned(),
            ));
        }
        lines.write(&chunk[..n]);
    }
}

/// Writes queued control and subscription lines to the gateway. Ends
/// when every link sender is gone; dropping the half closes the write
/// direction.
async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(message) = rx.recv().await {
        if let Err(error) = writer.write_all(&message).await {
            debug!(error = %error, "gateway write failed");
            break;
        }
    }
}

/// Reads the connection until it fails. Control lines are parsed until
/// the start signal is on the wire; after that the stream is the
/// metadata frame followed by records.
pub(crate) async fn read_loop(shared: &Shared, conn: Connection) -> HumboldtError {
    let Connection {
        mut reader,
        carry,
        link,
    } = conn;
    let mut lines = LineBuffer::new();
    lines.write(&carry);
    let mut decoder: Option<StreamDecoder> = None;
    let mut announced = false;
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        // The start line queues behind the flag flip, so once the flag
        // reads true everything still buffered belongs to the decoder.
        if decoder.is_none() && link.binary_started() {
            let mut fresh = StreamDecoder::new();
            fresh.write(&std::mem::take(&mut lines).into_remainder());
            decoder = Some(fresh);
        }
        match &mut decoder {
            None => {
                while let Some(line) = lines.next_line() {
                    debug!(line = %line, "control line before start");
                }
            }
            Some(stream) => {
                if let Err(error) = drain_records(shared, stream, &mut announced).await {
                    return error;
                }
            }
        }

        let n = match reader.read(&mut buf).await {
            Ok(0) => return HumboldtError::Connection("gateway closed the connection".to_owned()),
            Ok(n) => n,
            Err(cause) => return HumboldtError::connection(cause),
        };
        match &mut decoder {
            None => lines.write(&buf[..n]),
            Some(stream) => stream.write(&buf[..n]),
        }
    }
}

/// Decodes and dispatches every complete record currently buffered.
async fn drain_records(
    shared: &Shared,
    decoder: &mut StreamDecoder,
    announced: &mut bool,
) -> Result<()> {
    loop {
        let next = decoder.next_record();
        if !*announced && let Some(metadata) = decoder.metadata() {
            info!(
                dataset = %metadata.dataset,
                version = metadata.version,
                "stream metadata received"
            );
            shared.capture_metadata(metadata.clone());
            *announced = true;
        }
        match next {
            Ok(Some(record)) => handle_record(shared, record).await?,
            Ok(None) => return Ok(()),
            Err(error) => return Err(error.into()),
        }
    }
}

/// Routes one decoded record. Gateway errors are fatal; system messages
/// are logged session plumbing; everything else fans out to sinks and
/// the queue in arrival order.
async fn handle_record(shared: &Shared, record: Record) -> Result<()> {
    if let Some(ts_event) = record.ts_event() {
        shared.record_ts_event(ts_event);
    }
    match record.rtype() {
        RType::Error => {
            let message = record.as_error().map(|e| e.err).unwrap_or_default();
            return Err(HumboldtError::Connection(format!("gateway error: {message}")));
        }
        RType::System => {
            if let Some(system) = record.as_system() {
                match system.code {
                    SystemCode::Heartbeat => debug!("gateway heartbeat"),
                    SystemCode::SlowReaderWarning => {
                        warn!(msg = %system.msg, "gateway slow-reader warning");
                    }
                    _ => info!(msg = %system.msg, "gateway system message"),
                }
            }
            return Ok(());
        }
        RType::SymbolMapping => {
            if let Some(mapping) = record.as_symbol_mapping() {
                shared.record_symbol_mapping(record.instrument_id(), mapping.stype_out_symbol);
            }
        }
        _ => {}
    }

    shared.registry.dispatch(&record);
    if shared.queue.is_enabled() {
        if let Err(error) = shared.queue.put_nowait(record) {
            debug!(error = %error, "record not queued");
        } else if shared.queue.is_full() {
            // Transport pause: resume once the consumer drains below
            // half capacity.
            shared.queue.space_available().await;
        }
    }
    Ok(())
}
