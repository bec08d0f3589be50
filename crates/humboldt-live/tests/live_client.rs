//! End-to-end tests of [`LiveClient`] against an in-process gateway.
//!
//! The mock speaks the real control protocol: version greeting, CRAM
//! challenge, authentication, subscription lines, session start, then
//! a scripted binary stream. Scripted disconnects drive the reconnect
//! paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::DateTime;
use humboldt_codec::{
    ErrorMsg, Metadata, RType, Record, RecordHeader, SymbolMappingMsg, SystemMsg, TradeMsg,
};
use humboldt_live::{LiveClient, LiveConfig, ReconnectPolicy, SessionState, Subscription};
use humboldt_types::{Dataset, HumboldtError, Schema};
use tokio::task::spawn_blocking;

mod mock {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use humboldt_codec::{Metadata, Record};
    use humboldt_types::Schema;
    use sha2::{Digest, Sha256};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    const CHALLENGE: &str = "sVmWbc0TkDEnJo2z";

    /// What one accepted connection streams once the session starts.
    #[derive(Clone)]
    pub struct ConnPlan {
        records: Vec<Record>,
        drop_after: bool,
    }

    impl ConnPlan {
        /// Stream `records` and hold the connection open.
        pub fn stream(records: Vec<Record>) -> Self {
            Self {
                records,
                drop_after: false,
            }
        }

        /// Stream `records`, then drop the socket like a crashed
        /// gateway.
        pub fn stream_then_drop(records: Vec<Record>) -> Self {
            Self {
                records,
                drop_after: true,
            }
        }
    }

    /// A scripted gateway bound to a loopback port.
    pub struct MockGateway {
        pub port: u16,
        subs: Arc<Mutex<Vec<Vec<String>>>>,
        starts: Arc<AtomicUsize>,
    }

    impl MockGateway {
        /// Serves `plans`, one per accepted connection in order, and
        /// validates CRAM replies against `key`. Connections beyond
        /// the plan list are dropped on accept.
        pub async fn spawn(key: &str, plans: Vec<ConnPlan>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let subs = Arc::new(Mutex::new(Vec::new()));
            let starts = Arc::new(AtomicUsize::new(0));
            let key = key.to_owned();
            let accept_subs = Arc::clone(&subs);
            let accept_starts = Arc::clone(&starts);
            tokio::spawn(async move {
                let mut conn_no = 0usize;
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    let plan = plans.get(conn_no).cloned();
                    accept_subs.lock().unwrap().push(Vec::new());
                    let key = key.clone();
                    let subs = Arc::clone(&accept_subs);
                    let starts = Arc::clone(&accept_starts);
                    tokio::spawn(async move {
                        if let Some(plan) = plan {
                            serve(stream, &key, plan, conn_no, &subs, &starts).await;
                        }
                    });
                    conn_no += 1;
                }
            });
            Self { port, subs, starts }
        }

        /// Subscription lines received on connection `conn`, in order.
        pub fn subscription_lines(&self, conn: usize) -> Vec<String> {
            self.subs
                .lock()
                .unwrap()
                .get(conn)
                .cloned()
                .unwrap_or_default()
        }

        /// Number of connections accepted so far.
        pub fn connections(&self) -> usize {
            self.subs.lock().unwrap().len()
        }

        /// Number of session-start requests received so far.
        pub fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }
    }

    /// The reply the gateway expects for its challenge.
    fn expected_reply(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(CHALLENGE.as_bytes());
        hasher.update(b"|");
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        let mut reply = String::new();
        for byte in digest {
            reply.push_str(&format!("{byte:02x}"));
        }
        format!("{reply}-{}", &key[key.len() - 5..])
    }

    async fn serve(
        stream: TcpStream,
        key: &str,
        plan: ConnPlan,
        conn_no: usize,
        subs: &Mutex<Vec<Vec<String>>>,
        starts: &AtomicUsize,
    ) {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let greeting = format!("lsg_version=1.4.0\ncram={CHALLENGE}\n");
        if write_half.write_all(greeting.as_bytes()).await.is_err() {
            return;
        }
        let Ok(Some(auth_line)) = lines.next_line().await else {
            return;
        };
        let mut auth = None;
        let mut dataset = None;
        for field in auth_line.split('|') {
            match field.split_once('=') {
                Some(("auth", value)) => auth = Some(value.to_owned()),
                Some(("dataset", value)) => dataset = Some(value.to_owned()),
                _ => {}
            }
        }
        if auth.as_deref() != Some(expected_reply(key).as_str()) {
            let _ = write_half
                .write_all(b"success=0|error=Authentication failed\n")
                .await;
            return;
        }
        let response = format!("success=1|session_id=mock-{conn_no}\n");
        if write_half.write_all(response.as_bytes()).await.is_err() {
            return;
        }

        while let Ok(Some(line)) = lines.next_line().await {
            if line == "start_session=0" {
                starts.fetch_add(1, Ordering::SeqCst);
                break;
            }
            subs.lock().unwrap()[conn_no].push(line);
        }

        let metadata = Metadata::new(dataset.unwrap_or_default(), Some(Schema::Trades), 0);
        if write_half.write_all(&metadata.encode()).await.is_err() {
            return;
        }
        for record in &plan.records {
            if write_half.write_all(record.as_bytes()).await.is_err() {
                return;
            }
        }
        if plan.drop_after {
            return;
        }
        // Hold the session open and keep collecting requests sent
        // after the start.
        while let Ok(Some(line)) = lines.next_line().await {
            subs.lock().unwrap()[conn_no].push(line);
        }
    }
}

const TEST_KEY: &str = "hb-int-test-key-XYZ12";

fn config_for(port: u16) -> LiveConfig {
    let mut config = LiveConfig::new(TEST_KEY);
    config.gateway = Some("127.0.0.1".to_owned());
    config.port = port;
    config.connect_timeout = Duration::from_secs(5);
    config.auth_timeout = Duration::from_secs(5);
    config.close_timeout = Duration::from_secs(5);
    config
}

fn equs() -> Dataset {
    Dataset::new("EQUS.MINI").unwrap()
}

fn trade(ts_event: u64, instrument_id: u32) -> Record {
    TradeMsg {
        header: RecordHeader::new(RType::Trade, 1, instrument_id, ts_event),
        price: 1_234_000_000_000,
        size: 100,
        action: b'T',
        side: b'A',
        flags: 0,
        depth: 0,
        ts_recv: ts_event,
        ts_in_delta: 0,
        sequence: ts_event as u32,
    }
    .to_record()
}

/// Polls `predicate` for up to five seconds.
async fn wait_for(what: &str, predicate: impl Fn() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_subscribe_then_start_streams_to_callbacks() {
    let gateway = mock::MockGateway::spawn(
        TEST_KEY,
        vec![mock::ConnPlan::stream(vec![
            trade(1, 10),
            SystemMsg::heartbeat(2).to_record(),
            trade(3, 10),
            trade(4, 11),
        ])],
    )
    .await;
    let client = LiveClient::new(config_for(gateway.port)).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    client.add_callback(
        move |record| {
            sink.lock().unwrap().push(record.header().ts_event);
            Ok(())
        },
        None,
    );

    client
        .subscribe(Subscription::new(equs(), Schema::Trades, ["AAPL", "MSFT"]))
        .unwrap();
    assert!(client.is_connected());
    assert!(!client.is_started());
    client.start().unwrap();
    assert!(client.is_started());

    wait_for("three trades", || seen.lock().unwrap().len() >= 3).await;
    // The heartbeat is session plumbing; only data records fan out.
    assert_eq!(*seen.lock().unwrap(), vec![1, 3, 4]);
    assert_eq!(
        gateway.subscription_lines(0),
        vec![
            "dataset=EQUS.MINI|schema=trades|stype_in=raw_symbol|symbols=AAPL,MSFT\
             |snapshot=0|is_last=1"
        ]
    );
    assert_eq!(gateway.starts(), 1);

    client.stop().unwrap();
    assert_eq!(client.state(), SessionState::NotConnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_auth_rejection_surfaces_as_authentication_error() {
    let gateway =
        mock::MockGateway::spawn("hb-other-key-ABCDE", vec![mock::ConnPlan::stream(vec![])]).await;
    let client = LiveClient::new(config_for(gateway.port)).unwrap();
    let err = client
        .subscribe(Subscription::new(equs(), Schema::Trades, ["AAPL"]))
        .unwrap_err();
    assert!(matches!(err, HumboldtError::Authentication(_)), "{err}");
    assert!(err.to_string().contains("Authentication failed"), "{err}");
    assert_eq!(client.state(), SessionState::NotConnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_iteration_auto_starts_and_maps_symbols() {
    let gateway = mock::MockGateway::spawn(
        TEST_KEY,
        vec![mock::ConnPlan::stream(vec![
            SymbolMappingMsg::new(42, 1, "AAPL").to_record(),
            trade(2, 42),
            trade(3, 42),
        ])],
    )
    .await;
    let client = Arc::new(LiveClient::new(config_for(gateway.port)).unwrap());
    client
        .subscribe(Subscription::new(equs(), Schema::Trades, ["AAPL"]))
        .unwrap();

    let consumer = Arc::clone(&client);
    let records = spawn_blocking(move || {
        let mut records = Vec::new();
        for _ in 0..3 {
            records.push(consumer.next_record().unwrap().unwrap());
        }
        records
    })
    .await
    .unwrap();

    assert_eq!(records[0].rtype(), RType::SymbolMapping);
    assert_eq!(records[1].header().ts_event, 2);
    assert_eq!(records[2].header().ts_event, 3);
    assert_eq!(gateway.starts(), 1, "iteration must start the stream");
    assert_eq!(
        client.symbology_map().get(&42).map(String::as_str),
        Some("AAPL")
    );
    assert!(client.is_started());
    assert_eq!(client.metadata().unwrap().dataset, "EQUS.MINI");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_explicit_start_forbids_iteration() {
    let gateway = mock::MockGateway::spawn(TEST_KEY, vec![mock::ConnPlan::stream(vec![])]).await;
    let client = LiveClient::new(config_for(gateway.port)).unwrap();
    client
        .subscribe(Subscription::new(equs(), Schema::Trades, ["AAPL"]))
        .unwrap();
    client.start().unwrap();

    // Records have been flowing to callbacks since the start; a queue
    // iterator would observe a hole it cannot see.
    let err = client.next_record().unwrap_err();
    assert!(matches!(err, HumboldtError::BadState { .. }), "{err}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconnect_replays_subscriptions_and_reports_gap() {
    let gateway = mock::MockGateway::spawn(
        TEST_KEY,
        vec![
            mock::ConnPlan::stream_then_drop(vec![trade(1, 7), trade(2, 7), trade(3, 7)]),
            mock::ConnPlan::stream(vec![trade(10, 7), trade(11, 7), trade(12, 7)]),
        ],
    )
    .await;
    let mut config = config_for(gateway.port);
    config.reconnect_policy = ReconnectPolicy::Reconnect {
        max_attempts: 5,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
    };
    let client = Arc::new(LiveClient::new(config).unwrap());

    let gaps = Arc::new(Mutex::new(Vec::new()));
    let gap_sink = Arc::clone(&gaps);
    client.add_reconnect_callback(move |gap_start, gap_end| {
        gap_sink.lock().unwrap().push((gap_start, gap_end));
    });

    let mut sub = Subscription::new(equs(), Schema::Trades, ["AAPL", "MSFT"]);
    sub.start = Some(DateTime::from_timestamp_nanos(500));
    client.subscribe(sub).unwrap();

    let consumer = Arc::clone(&client);
    let seen = spawn_blocking(move || {
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(consumer.next_record().unwrap().unwrap().header().ts_event);
        }
        seen
    })
    .await
    .unwrap();
    assert_eq!(seen, vec![1, 2, 3, 10, 11, 12]);

    assert_eq!(gateway.connections(), 2);
    assert_eq!(gateway.starts(), 2, "the fresh session must restart");
    let first = gateway.subscription_lines(0);
    assert_eq!(first.len(), 1);
    assert!(first[0].contains("symbols=AAPL,MSFT"), "{}", first[0]);
    assert!(first[0].contains("start=500"), "{}", first[0]);
    let second = gateway.subscription_lines(1);
    assert_eq!(second.len(), 1);
    assert!(second[0].contains("symbols=AAPL,MSFT"), "{}", second[0]);
    assert!(
        !second[0].contains("start="),
        "replay must not re-request history: {}",
        second[0]
    );

    let gaps = gaps.lock().unwrap();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].0.timestamp_nanos_opt(), Some(3));
    assert!(gaps[0].1 >= gaps[0].0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_then_rebind_to_another_dataset() {
    let gateway = mock::MockGateway::spawn(
        TEST_KEY,
        vec![
            mock::ConnPlan::stream(vec![trade(1, 5)]),
            mock::ConnPlan::stream(vec![trade(20, 6)]),
        ],
    )
    .await;
    let client = Arc::new(LiveClient::new(config_for(gateway.port)).unwrap());
    client
        .subscribe(Subscription::new(equs(), Schema::Trades, ["AAPL"]))
        .unwrap();
    let consumer = Arc::clone(&client);
    let first = spawn_blocking(move || consumer.next_record().unwrap().unwrap())
        .await
        .unwrap();
    assert_eq!(first.header().ts_event, 1);
    client.stop().unwrap();

    // A stopped client rebinds freely; the old session's backlog must
    // not leak into the new one.
    let other = Dataset::new("XNAS.ITCH").unwrap();
    client
        .subscribe(Subscription::new(other.clone(), Schema::Trades, ["MSFT"]))
        .unwrap();
    let consumer = Arc::clone(&client);
    let second = spawn_blocking(move || consumer.next_record().unwrap().unwrap())
        .await
        .unwrap();
    assert_eq!(second.header().ts_event, 20);
    assert_eq!(client.dataset(), Some(other));

    let replayed = gateway.subscription_lines(1);
    assert_eq!(replayed.len(), 1);
    assert!(replayed[0].contains("dataset=XNAS.ITCH"), "{}", replayed[0]);
    assert!(replayed[0].contains("symbols=MSFT"), "{}", replayed[0]);
    assert!(!replayed[0].contains("AAPL"), "{}", replayed[0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mixing_datasets_is_rejected() {
    let gateway = mock::MockGateway::spawn(TEST_KEY, vec![mock::ConnPlan::stream(vec![])]).await;
    let client = LiveClient::new(config_for(gateway.port)).unwrap();
    client
        .subscribe(Subscription::new(equs(), Schema::Trades, ["AAPL"]))
        .unwrap();
    let err = client
        .subscribe(Subscription::new(
            Dataset::new("XNAS.ITCH").unwrap(),
            Schema::Trades,
            ["MSFT"],
        ))
        .unwrap_err();
    assert!(matches!(err, HumboldtError::Subscription(_)), "{err}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_callback_failure_does_not_stop_dispatch() {
    let gateway = mock::MockGateway::spawn(
        TEST_KEY,
        vec![mock::ConnPlan::stream(vec![trade(1, 3), trade(2, 3)])],
    )
    .await;
    let client = LiveClient::new(config_for(gateway.port)).unwrap();
    client.add_callback(|_record| Err("broken".into()), None);
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    client.add_callback(
        move |_record| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        None,
    );
    client
        .subscribe(Subscription::new(equs(), Schema::Trades, ["AAPL"]))
        .unwrap();
    client.start().unwrap();
    wait_for("both trades", || delivered.load(Ordering::SeqCst) >= 2).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stream_path_captures_header_and_records() {
    let records = vec![trade(1, 9), trade(2, 9)];
    let gateway =
        mock::MockGateway::spawn(TEST_KEY, vec![mock::ConnPlan::stream(records.clone())]).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.hmb");
    let client = LiveClient::new(config_for(gateway.port)).unwrap();
    client.add_stream_path(&path, None).unwrap();
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    client.add_callback(
        move |_record| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        None,
    );

    client
        .subscribe(Subscription::new(equs(), Schema::Trades, ["AAPL"]))
        .unwrap();
    client.start().unwrap();
    wait_for("both trades", || delivered.load(Ordering::SeqCst) >= 2).await;
    client.stop().unwrap();

    let mut expected = Metadata::new("EQUS.MINI", Some(Schema::Trades), 0).encode();
    for record in &records {
        expected.extend_from_slice(record.as_bytes());
    }
    assert_eq!(std::fs::read(&path).unwrap(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_iteration_conflicts_with_sync() {
    let gateway = mock::MockGateway::spawn(
        TEST_KEY,
        vec![mock::ConnPlan::stream(vec![trade(1, 2), trade(2, 2)])],
    )
    .await;
    let client = LiveClient::new(config_for(gateway.port)).unwrap();
    client
        .subscribe(Subscription::new(equs(), Schema::Trades, ["AAPL"]))
        .unwrap();

    let first = client.next_record_async().await.unwrap().unwrap();
    assert_eq!(first.header().ts_event, 1);

    let err = client.next_record().unwrap_err();
    assert!(matches!(err, HumboldtError::BadState { .. }), "{err}");

    // The rejected call must not disturb the async consumer.
    let second = client.next_record_async().await.unwrap().unwrap();
    assert_eq!(second.header().ts_event, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_gateway_error_record_fails_the_session() {
    let gateway = mock::MockGateway::spawn(
        TEST_KEY,
        vec![mock::ConnPlan::stream(vec![
            ErrorMsg::new(1, "Unknown symbol: ZZZT").to_record(),
        ])],
    )
    .await;
    let client = Arc::new(LiveClient::new(config_for(gateway.port)).unwrap());
    client
        .subscribe(Subscription::new(equs(), Schema::Trades, ["ZZZT"]))
        .unwrap();
    let consumer = Arc::clone(&client);
    let err = spawn_blocking(move || consumer.next_record().unwrap_err())
        .await
        .unwrap();
    assert!(matches!(err, HumboldtError::Connection(_)), "{err}");
    assert!(err.to_string().contains("Unknown symbol: ZZZT"), "{err}");
    assert_eq!(client.state(), SessionState::Errored);

    let err = client
        .subscribe(Subscription::new(equs(), Schema::Trades, ["AAPL"]))
        .unwrap_err();
    assert!(matches!(err, HumboldtError::BadState { .. }), "{err}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wait_for_close_observes_failure() {
    let gateway = mock::MockGateway::spawn(
        TEST_KEY,
        vec![mock::ConnPlan::stream_then_drop(vec![trade(1, 4)])],
    )
    .await;
    let client = LiveClient::new(config_for(gateway.port)).unwrap();
    client
        .subscribe(Subscription::new(equs(), Schema::Trades, ["AAPL"]))
        .unwrap();
    client.start().unwrap();

    tokio::time::timeout(Duration::from_secs(5), client.wait_for_close())
        .await
        .expect("a dropped session with no reconnect policy must fail fast");
    assert_eq!(client.state(), SessionState::Errored);
}
