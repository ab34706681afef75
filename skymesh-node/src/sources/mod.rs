//! Source manager: N concurrent feeders, one ordered-within-source
//! stream of frames out.
//!
//! Each source runs in its own task and owns its connection. Runtime
//! errors are never fatal: lost connections reconnect with exponential
//! backoff (full jitter), reads have an idle timeout, and a slow decoder
//! drops the *oldest* frame of that source rather than blocking anyone
//! else. Only configuration errors abort startup (see `config`).

pub mod avr;
pub mod beast;
pub mod json;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use skymesh_core::decode::Decoded;
use skymesh_core::frame::RawFrame;
use skymesh_core::types::{SourceId, SourceKind};

use crate::config::{SourceKindConfig, SourceSection};

/// What a source produces: raw frames for the decoder, or pre-decoded
/// messages (json_poll) that bypass it.
#[derive(Debug)]
pub enum SourceItem {
    Frame(RawFrame),
    Decoded(Decoded),
}

/// Per-source queue bound. Beast feeders burst hard during overflights.
const QUEUE_CAP: usize = 512;

/// Merged channel depth towards the decoder stage.
const MERGED_CAP: usize = 1024;

pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Source status (shared with the stats read view)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SourceStatus {
    pub name: String,
    pub kind: SourceKind,
    connected: AtomicBool,
    messages: AtomicU64,
    errors: AtomicU64,
    dropped: AtomicU64,
    last_message_ms: AtomicU64,
}

impl SourceStatus {
    fn new(name: &str, kind: SourceKind) -> Arc<Self> {
        Arc::new(SourceStatus {
            name: name.to_string(),
            kind,
            connected: AtomicBool::new(false),
            messages: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            last_message_ms: AtomicU64::new(0),
        })
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn last_message_unix(&self) -> Option<f64> {
        match self.last_message_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms as f64 / 1000.0),
        }
    }

    fn mark_message(&self, now: f64) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.last_message_ms
            .store((now * 1000.0) as u64, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Drop-oldest queue
// ---------------------------------------------------------------------------

/// Bounded per-source queue. Overflow drops the oldest entry of *this*
/// source; other sources are unaffected and the producer never blocks.
struct FrameQueue {
    inner: Mutex<VecDeque<SourceItem>>,
    notify: Arc<Notify>,
    status: Arc<SourceStatus>,
}

impl FrameQueue {
    fn new(notify: Arc<Notify>, status: Arc<SourceStatus>) -> Arc<Self> {
        Arc::new(FrameQueue {
            inner: Mutex::new(VecDeque::with_capacity(QUEUE_CAP)),
            notify,
            status,
        })
    }

    fn push(&self, item: SourceItem) {
        {
            let mut q = self.inner.lock().unwrap();
            if q.len() >= QUEUE_CAP {
                q.pop_front();
                self.status.dropped.fetch_add(1, Ordering::Relaxed);
            }
            q.push_back(item);
        }
        self.notify.notify_one();
    }

    fn drain_into(&self, out: &mut Vec<SourceItem>) {
        let mut q = self.inner.lock().unwrap();
        out.extend(q.drain(..));
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Handles to the running source layer.
pub struct SourceManager {
    pub statuses: Vec<Arc<SourceStatus>>,
    pub tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl SourceManager {
    /// True when every configured source is down.
    pub fn all_down(&self) -> bool {
        !self.statuses.is_empty() && self.statuses.iter().all(|s| !s.connected())
    }
}

/// Spawn one worker per configured source plus the merge task. Returns
/// the merged receiver and the manager handle.
pub fn spawn_sources(
    sources: &[SourceSection],
    shutdown: watch::Receiver<bool>,
) -> (mpsc::Receiver<SourceItem>, SourceManager) {
    let (tx, rx) = mpsc::channel(MERGED_CAP);
    let notify = Arc::new(Notify::new());

    let mut statuses = Vec::new();
    let mut queues = Vec::new();
    let mut tasks = Vec::new();

    for (idx, section) in sources.iter().enumerate() {
        let kind = match section.kind {
            SourceKindConfig::BeastTcp => SourceKind::BeastTcp,
            SourceKindConfig::AvrTcp => SourceKind::AvrTcp,
            SourceKindConfig::JsonPoll => SourceKind::JsonPoll,
            SourceKindConfig::RawFile => SourceKind::RawFile,
        };
        let status = SourceStatus::new(&section.name, kind);
        let queue = FrameQueue::new(notify.clone(), status.clone());

        let worker = SourceWorker {
            id: idx as SourceId,
            section: section.clone(),
            kind,
            status: status.clone(),
            queue: queue.clone(),
            shutdown: shutdown.clone(),
        };
        tasks.push(tokio::spawn(worker.run()));

        statuses.push(status);
        queues.push(queue);
    }

    // Merge task: drains every source queue into the decoder channel.
    let mut merge_shutdown = shutdown;
    tasks.push(tokio::spawn(async move {
        let mut batch = Vec::new();
        loop {
            for q in &queues {
                q.drain_into(&mut batch);
            }
            if batch.is_empty() {
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = merge_shutdown.changed() => {
                        if *merge_shutdown.borrow() {
                            return;
                        }
                    }
                }
                continue;
            }
            for item in batch.drain(..) {
                if tx.send(item).await.is_err() {
                    return; // decoder gone, we're shutting down
                }
            }
        }
    }));

    (rx, SourceManager { statuses, tasks })
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct SourceWorker {
    id: SourceId,
    section: SourceSection,
    kind: SourceKind,
    status: Arc<SourceStatus>,
    queue: Arc<FrameQueue>,
    shutdown: watch::Receiver<bool>,
}

impl SourceWorker {
    async fn run(mut self) {
        let mut backoff = self.section.reconnect_backoff_initial_sec;

        loop {
            if *self.shutdown.borrow() {
                return;
            }

            let result: Result<(), String> = match self.section.kind {
                SourceKindConfig::BeastTcp => {
                    self.run_beast().await.map_err(|e| e.to_string())
                }
                SourceKindConfig::AvrTcp => self.run_avr().await.map_err(|e| e.to_string()),
                SourceKindConfig::JsonPoll => self.run_json_poll().await,
                SourceKindConfig::RawFile => {
                    self.run_file().await;
                    // Replay sources do not reconnect.
                    self.status.connected.store(false, Ordering::Relaxed);
                    return;
                }
            };

            self.status.connected.store(false, Ordering::Relaxed);
            if *self.shutdown.borrow() {
                return;
            }

            match result {
                Ok(()) => backoff = self.section.reconnect_backoff_initial_sec,
                Err(e) => {
                    self.status.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(source = %self.section.name, error = %e, "source error, reconnecting");
                }
            }

            // Full jitter: sleep uniform in [0, backoff].
            let sleep_for = rand::thread_rng().gen_range(0.0..=backoff);
            debug!(source = %self.section.name, sleep = sleep_for, "backoff");
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(sleep_for)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
            backoff = (backoff * 2.0).min(self.section.reconnect_backoff_max_sec);
        }
    }

    async fn connect_tcp(&self) -> std::io::Result<TcpStream> {
        let stream = timeout(
            Duration::from_secs(10),
            TcpStream::connect(&self.section.address),
        )
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
        info!(source = %self.section.name, addr = %self.section.address, "connected");
        self.status.connected.store(true, Ordering::Relaxed);
        Ok(stream)
    }

    fn push_frame(&self, bytes: Vec<u8>, signal_level: Option<f64>) {
        let now = unix_now();
        self.status.mark_message(now);
        self.queue.push(SourceItem::Frame(RawFrame {
            bytes,
            timestamp: now,
            source: self.id,
            source_kind: self.kind,
            signal_level,
        }));
    }

    async fn run_beast(&mut self) -> std::io::Result<()> {
        let mut stream = self.connect_tcp().await?;
        let idle = Duration::from_secs_f64(self.section.read_idle_timeout_sec);
        let mut decoder = beast::BeastDecoder::new();
        let mut buf = vec![0u8; 4096];
        let mut frames = Vec::new();

        loop {
            let n = tokio::select! {
                read = timeout(idle, stream.read(&mut buf)) => match read {
                    Ok(Ok(0)) => return Ok(()), // peer closed
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "read idle timeout",
                        ))
                    }
                },
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        return Ok(());
                    }
                    continue;
                }
            };

            decoder.push(&buf[..n], &mut frames);
            for frame in frames.drain(..) {
                self.push_frame(frame.payload, Some(frame.signal_level as f64));
            }
        }
    }

    async fn run_avr(&mut self) -> std::io::Result<()> {
        let stream = self.connect_tcp().await?;
        let idle = Duration::from_secs_f64(self.section.read_idle_timeout_sec);
        let mut reader = tokio::io::BufReader::new(stream);
        let mut line = String::new();

        loop {
            line.clear();
            tokio::select! {
                read = timeout(idle, tokio::io::AsyncBufReadExt::read_line(&mut reader, &mut line)) => match read {
                    Ok(Ok(0)) => return Ok(()),
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "read idle timeout",
                        ))
                    }
                },
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        return Ok(());
                    }
                    continue;
                }
            }

            if let Some(bytes) = avr::parse_avr_line(&line) {
                self.push_frame(bytes, None);
            }
        }
    }

    async fn run_json_poll(&mut self) -> Result<(), String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| e.to_string())?;
        self.status.connected.store(true, Ordering::Relaxed);

        let mut consecutive_failures = 0u32;
        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            match self.poll_once(&client).await {
                Ok(count) => {
                    consecutive_failures = 0;
                    debug!(source = %self.section.name, aircraft = count, "polled");
                }
                Err(e) => {
                    consecutive_failures += 1;
                    self.status.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(source = %self.section.name, error = %e, "poll failed");
                    if consecutive_failures >= 3 {
                        // Hand control back for backoff + status flip.
                        return Err(e);
                    }
                }
            }

            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(self.section.poll_interval_sec)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn poll_once(&self, client: &reqwest::Client) -> Result<usize, String> {
        let resp = client
            .get(&self.section.address)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let snap: json::SnapshotJson = resp.json().await.map_err(|e| e.to_string())?;
        let msgs = json::map_snapshot(&snap, self.id);
        let count = msgs.len();
        let now = unix_now();
        for msg in msgs {
            self.status.mark_message(now);
            self.queue.push(SourceItem::Decoded(msg));
        }
        Ok(count)
    }

    /// Replay a file of hex / AVR lines once.
    async fn run_file(&mut self) {
        let content = match tokio::fs::read_to_string(&self.section.address).await {
            Ok(c) => c,
            Err(e) => {
                self.status.errors.fetch_add(1, Ordering::Relaxed);
                warn!(source = %self.section.name, error = %e, "cannot read replay file");
                return;
            }
        };
        self.status.connected.store(true, Ordering::Relaxed);

        for line in content.lines() {
            if *self.shutdown.borrow() {
                return;
            }
            let bytes = avr::parse_avr_line(line).or_else(|| {
                let line = line.trim();
                ((line.len() == 14 || line.len() == 28)
                    && line.bytes().all(|b| b.is_ascii_hexdigit()))
                .then(|| skymesh_core::types::hex_decode(line))
                .flatten()
            });
            if let Some(bytes) = bytes {
                self.push_frame(bytes, None);
            }
        }
        info!(source = %self.section.name, "replay finished");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceKindConfig;
    use std::io::Write;

    fn file_source(path: &str) -> SourceSection {
        SourceSection {
            name: "replay".into(),
            kind: SourceKindConfig::RawFile,
            address: path.into(),
            poll_interval_sec: 1.0,
            reconnect_backoff_initial_sec: 0.01,
            reconnect_backoff_max_sec: 0.1,
            read_idle_timeout_sec: 1.0,
        }
    }

    #[tokio::test]
    async fn test_file_replay_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "8D4840D6202CC371C32CE0576098").unwrap();
        writeln!(f, "*8D40621D58C382D690C8AC2863A7;").unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(f, "garbage").unwrap();
        drop(f);

        let (_tx, shutdown) = watch::channel(false);
        let (mut rx, manager) =
            spawn_sources(&[file_source(path.to_str().unwrap())], shutdown);

        let first = rx.recv().await.expect("first frame");
        let second = rx.recv().await.expect("second frame");
        let (SourceItem::Frame(f1), SourceItem::Frame(f2)) = (first, second) else {
            panic!("expected raw frames");
        };
        assert_eq!(f1.bytes.len(), 14);
        assert_eq!(f2.bytes.len(), 14);
        assert_eq!(f1.source, 0);
        assert_eq!(f1.source_kind, SourceKind::RawFile);

        assert_eq!(manager.statuses[0].messages(), 2);
    }

    #[tokio::test]
    async fn test_beast_tcp_roundtrip() {
        use tokio::io::AsyncWriteExt;

        // A throwaway TCP server standing in for a dump1090 beast port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // 1A '3' + 6 MLAT + 1 signal + 14 payload
            let payload = skymesh_core::types::hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
            let mut frame = vec![0x1A, b'3', 0, 0, 0, 0, 0, 0, 0x55];
            frame.extend_from_slice(&payload);
            sock.write_all(&frame).await.unwrap();
            sock.flush().await.unwrap();
            // Keep the socket open briefly so the reader sees the data.
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let section = SourceSection {
            name: "beast".into(),
            kind: SourceKindConfig::BeastTcp,
            address: addr.to_string(),
            poll_interval_sec: 1.0,
            reconnect_backoff_initial_sec: 0.01,
            reconnect_backoff_max_sec: 0.1,
            read_idle_timeout_sec: 5.0,
        };

        let (shutdown_tx, shutdown) = watch::channel(false);
        let (mut rx, _manager) = spawn_sources(&[section], shutdown);

        let item = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("frame within 5s")
            .expect("channel open");
        let SourceItem::Frame(frame) = item else {
            panic!("expected raw frame");
        };
        assert_eq!(frame.bytes.len(), 14);
        assert_eq!(frame.signal_level, Some(0x55 as f64));
        assert_eq!(frame.source_kind, SourceKind::BeastTcp);

        let _ = shutdown_tx.send(true);
    }

    #[tokio::test]
    async fn test_all_down_reporting() {
        let (_tx, shutdown) = watch::channel(false);
        let (_rx, manager) = spawn_sources(&[], shutdown);
        assert!(!manager.all_down(), "no sources configured is not an outage");
    }

    #[test]
    fn test_avr_and_beast_yield_identical_payloads() {
        // The same Mode S transmission through either framing must reach
        // the decoder byte-identical.
        let hex = "8D4840D6202CC371C32CE0576098";
        let via_avr = avr::parse_avr_line(&format!("*{hex};")).unwrap();

        let payload = skymesh_core::types::hex_decode(hex).unwrap();
        let mut stream = vec![0x1A, b'3', 0, 0, 0, 0, 0, 0, 0x20];
        stream.extend_from_slice(&payload);
        let mut dec = beast::BeastDecoder::new();
        let mut frames = Vec::new();
        dec.push(&stream, &mut frames);
        let via_beast = frames.remove(0).payload;

        assert_eq!(via_avr, via_beast);
    }
}
