//! The per-port capture task.
//!
//! Each port runs one task that owns its transport. The task reads with a
//! short poll timeout, frames output into lines, logs them, and publishes
//! them to expect waiters. Writes and lifecycle requests arrive as
//! [`PortCommand`]s and are handled between reads, so a slow caller never
//! stalls capture.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use chrono::Local;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::log_writer::{LogSource, LogWriter};
use super::CapturedLine;
use crate::channel::{strip_ansi, DataFramer};
use crate::config::SwitchboardConfig;
use crate::error::TransportError;
use crate::transport::{SerialControl, Transport, TransportResult, TransportState};

/// Requests handled by a port task.
#[derive(Debug)]
pub(crate) enum PortCommand {
    /// Start opening the transport and re-enable auto reopen. `done` fires
    /// once the request is applied.
    Open { done: oneshot::Sender<()> },
    /// Close the transport and disable auto reopen.
    Close { done: oneshot::Sender<()> },
    /// Write bytes, split into chunks. `slow` writes one byte per chunk.
    Write {
        data: Bytes,
        slow: bool,
        respond: oneshot::Sender<TransportResult<usize>>,
    },
    /// Write one frame on a framed transport.
    WriteFrame {
        address: u64,
        payload: Bytes,
        respond: oneshot::Sender<TransportResult<()>>,
    },
    /// Apply a serial line control.
    SerialControl {
        control: SerialControl,
        respond: oneshot::Sender<TransportResult<()>>,
    },
    /// Close the transport and end the task.
    Shutdown,
}

/// State a port shares with the switchboard.
#[derive(Debug)]
pub(crate) struct PortShared {
    state: watch::Sender<TransportState>,
    disconnected: AtomicBool,
    next_seq: AtomicU64,
    history: Mutex<VecDeque<CapturedLine>>,
    history_lines: usize,
}

impl PortShared {
    pub(crate) fn new(history_lines: usize) -> Self {
        let (state, _) = watch::channel(TransportState::Closed);
        Self {
            state,
            disconnected: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            history: Mutex::new(VecDeque::new()),
            history_lines,
        }
    }

    pub(crate) fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    pub(crate) fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Sequence number the next captured line will carry.
    pub(crate) fn next_seq(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst)
    }

    /// Lines from history with `seq >= from`, oldest first.
    pub(crate) fn lines_since(&self, from: u64) -> Vec<CapturedLine> {
        self.history()
            .iter()
            .filter(|line| line.seq >= from)
            .cloned()
            .collect()
    }

    fn set_state(&self, state: TransportState) {
        self.state.send_replace(state);
    }

    fn record(&self, line: &CapturedLine) {
        let mut history = self.history();
        if history.len() >= self.history_lines.max(1) {
            history.pop_front();
        }
        history.push_back(line.clone());
    }

    fn history(&self) -> MutexGuard<'_, VecDeque<CapturedLine>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Capture task for one port.
pub(crate) struct PortTask {
    index: usize,
    device_name: String,
    transport: Box<dyn Transport>,
    config: Arc<SwitchboardConfig>,
    framer: Arc<dyn DataFramer>,
    log: Arc<LogWriter>,
    lines: broadcast::Sender<CapturedLine>,
    shared: Arc<PortShared>,
    commands: mpsc::Receiver<PortCommand>,
    auto_reopen: bool,
    reopen_enabled: bool,
    pending: BytesMut,
    last_data: Instant,
    failures: VecDeque<Instant>,
}

impl PortTask {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: usize,
        device_name: impl Into<String>,
        transport: Box<dyn Transport>,
        config: Arc<SwitchboardConfig>,
        framer: Arc<dyn DataFramer>,
        log: Arc<LogWriter>,
        lines: broadcast::Sender<CapturedLine>,
        shared: Arc<PortShared>,
        commands: mpsc::Receiver<PortCommand>,
        auto_reopen: bool,
    ) -> Self {
        Self {
            index,
            device_name: device_name.into(),
            transport,
            config,
            framer,
            log,
            lines,
            shared,
            commands,
            auto_reopen,
            reopen_enabled: auto_reopen,
            pending: BytesMut::new(),
            last_data: Instant::now(),
            failures: VecDeque::new(),
        }
    }

    /// Run the task. `open` starts the port in `Opening`.
    pub(crate) fn spawn(self, open: bool) -> JoinHandle<()> {
        tokio::spawn(self.run(open))
    }

    async fn run(mut self, open: bool) {
        if open {
            self.shared.set_state(TransportState::Opening);
        }
        loop {
            let keep_running = match self.shared.state() {
                TransportState::Open => self.poll_open().await,
                TransportState::Opening => self.poll_opening().await,
                TransportState::Closed | TransportState::Errored => match self.commands.recv().await {
                    Some(command) => self.handle_command(command).await,
                    None => false,
                },
            };
            if !keep_running {
                break;
            }
        }
        if self.transport.is_open() {
            if let Err(e) = self.transport.close().await {
                debug!("{} port {} close on exit: {}", self.device_name, self.index, e);
            }
        }
        self.flush_partial(true);
        self.shared.set_state(TransportState::Closed);
        debug!("{} port {} capture task stopped", self.device_name, self.index);
    }

    /// Handle queued commands. Returns false when the task should stop.
    async fn drain_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(command) => {
                    if !self.handle_command(command).await {
                        return false;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    async fn poll_open(&mut self) -> bool {
        if !self.drain_commands().await {
            return false;
        }
        if self.shared.state() != TransportState::Open {
            return true;
        }
        let read = self
            .transport
            .read(self.config.max_read_bytes, self.config.read_timeout)
            .await;
        match read {
            Ok(data) if data.is_empty() => self.flush_partial(false),
            Ok(data) => {
                self.last_data = Instant::now();
                self.pending.extend_from_slice(&data);
                self.publish_complete_lines();
            }
            Err(e) => self.on_transport_error(e).await,
        }
        true
    }

    async fn poll_opening(&mut self) -> bool {
        if !self.drain_commands().await {
            return false;
        }
        if self.shared.state() != TransportState::Opening {
            return true;
        }

        let started = Instant::now();
        let opened = if self.transport.is_ready_to_open().await {
            match self.transport.open().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        "{} port {} failed to open {}: {}",
                        self.device_name,
                        self.index,
                        self.transport.address(),
                        e
                    );
                    false
                }
            }
        } else {
            debug!(
                "{} port {} transport {} not ready to open",
                self.device_name,
                self.index,
                self.transport.address()
            );
            false
        };

        if opened {
            self.failures.clear();
            self.shared.disconnected.store(false, Ordering::SeqCst);
            self.pending.clear();
            self.shared.set_state(TransportState::Open);
            info!(
                "{} port {} opened {} transport {}",
                self.device_name,
                self.index,
                self.transport.kind(),
                self.transport.address()
            );
            self.note(&format!(
                "opened transport for port {} in {:.2}s",
                self.index,
                started.elapsed().as_secs_f64()
            ));
            return true;
        }

        if self.record_failure() {
            error!(
                "{} port {} is disconnected after {} failed open attempts",
                self.device_name, self.index, self.config.reopen_failure_limit
            );
            self.shared.disconnected.store(true, Ordering::SeqCst);
            self.shared.set_state(TransportState::Errored);
            return true;
        }

        // Wait out the poll interval, but stay responsive to commands
        match tokio::time::timeout(self.config.ready_poll_interval, self.commands.recv()).await {
            Ok(Some(command)) => self.handle_command(command).await,
            Ok(None) => false,
            Err(_) => true,
        }
    }

    /// Count a failed open. True once the failure budget for the window is spent.
    fn record_failure(&mut self) -> bool {
        let now = Instant::now();
        self.failures.push_back(now);
        while let Some(first) = self.failures.front() {
            if now.duration_since(*first) > self.config.reopen_window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
        self.failures.len() > self.config.reopen_failure_limit
    }

    async fn handle_command(&mut self, command: PortCommand) -> bool {
        match command {
            PortCommand::Open { done } => {
                self.reopen_enabled = self.auto_reopen;
                if self.shared.state() != TransportState::Open {
                    self.failures.clear();
                    self.shared.disconnected.store(false, Ordering::SeqCst);
                    self.shared.set_state(TransportState::Opening);
                }
                let _ = done.send(());
            }
            PortCommand::Close { done } => {
                self.reopen_enabled = false;
                self.close_transport().await;
                self.shared.set_state(TransportState::Closed);
                let _ = done.send(());
            }
            PortCommand::Write {
                data,
                slow,
                respond,
            } => {
                let was_open = self.shared.state() == TransportState::Open;
                let result = self.write(&data, slow).await;
                if was_open && matches!(&result, Err(e) if e.is_disconnect()) {
                    self.on_transport_error(TransportError::Disconnected).await;
                }
                let _ = respond.send(result);
            }
            PortCommand::WriteFrame {
                address,
                payload,
                respond,
            } => {
                let result = if self.shared.state() == TransportState::Open {
                    self.transport.write_frame(address, &payload).await
                } else {
                    Err(self.not_open())
                };
                let _ = respond.send(result);
            }
            PortCommand::SerialControl { control, respond } => {
                // A baud rate change on a closed port applies at the next open
                let result = if self.shared.state() == TransportState::Open
                    || matches!(control, SerialControl::SetBaudRate(_))
                {
                    self.transport.serial_control(control).await
                } else {
                    Err(self.not_open())
                };
                let _ = respond.send(result);
            }
            PortCommand::Shutdown => return false,
        }
        true
    }

    async fn write(&mut self, data: &[u8], slow: bool) -> TransportResult<usize> {
        if self.shared.state() != TransportState::Open {
            return Err(self.not_open());
        }
        let chunk_size = if slow { 1 } else { self.config.max_write_bytes.max(1) };
        let attempts = self.config.write_attempts.max(1);
        let mut written = 0;
        for chunk in data.chunks(chunk_size) {
            let mut attempt = 1;
            loop {
                match self.transport.write(chunk).await {
                    Ok(n) => {
                        written += n;
                        break;
                    }
                    Err(e) if e.is_retryable() && attempt < attempts => {
                        warn!(
                            "{} port {} write attempt {}/{} failed: {}",
                            self.device_name, self.index, attempt, attempts, e
                        );
                        attempt += 1;
                        tokio::time::sleep(self.config.write_backoff).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(written)
    }

    async fn on_transport_error(&mut self, err: TransportError) {
        warn!(
            "{} port {} transport {} failed: {}",
            self.device_name,
            self.index,
            self.transport.address(),
            err
        );
        self.close_transport().await;
        if self.reopen_enabled {
            self.note(&format!("transport for port {} failed, reopening: {}", self.index, err));
            self.shared.set_state(TransportState::Opening);
        } else {
            self.shared.set_state(TransportState::Errored);
        }
    }

    async fn close_transport(&mut self) {
        self.flush_partial(true);
        if let Err(e) = self.transport.close().await {
            debug!("{} port {} close: {}", self.device_name, self.index, e);
        }
    }

    fn not_open(&self) -> TransportError {
        TransportError::NotOpen {
            address: self.transport.address().to_string(),
        }
    }

    /// Publish every complete line in the pending buffer.
    fn publish_complete_lines(&mut self) {
        let Some(end) = memchr::memrchr(b'\n', &self.pending) else {
            return;
        };
        let complete = self.pending.split_to(end + 1);
        self.publish_text(&complete);
    }

    /// Publish a held partial line once it has waited long enough, or
    /// unconditionally when `force` is set.
    fn flush_partial(&mut self, force: bool) {
        if self.pending.is_empty() {
            return;
        }
        if force || self.last_data.elapsed() >= self.config.partial_line_timeout {
            let partial = self.pending.split();
            self.publish_text(&partial);
        }
    }

    fn publish_text(&mut self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let text = if self.config.strip_ansi {
            strip_ansi(&text)
        } else {
            text.into_owned()
        };
        for line in self.framer.get_lines(&text) {
            self.publish_line(line);
        }
    }

    fn publish_line(&mut self, text: String) {
        if let Err(e) = self.log.write_line(LogSource::Port(self.index), &text) {
            warn!("{} port {} log write failed: {}", self.device_name, self.index, e);
        }
        let line = CapturedLine {
            port: self.index,
            seq: self.shared.next_seq.fetch_add(1, Ordering::SeqCst),
            timestamp: Local::now(),
            text,
        };
        self.shared.record(&line);
        // No subscribers is normal when nobody is expecting
        let _ = self.lines.send(line);
    }

    fn note(&self, text: &str) {
        if let Err(e) = self.log.add_note(text) {
            warn!("{} log note failed: {}", self.device_name, e);
        }
    }
}

/// Spawned port: the command sender and the task's join handle.
#[derive(Debug)]
pub(crate) struct PortHandle {
    pub(crate) commands: mpsc::Sender<PortCommand>,
    pub(crate) shared: Arc<PortShared>,
    pub(crate) task: Mutex<Option<JoinHandle<()>>>,
}

impl PortHandle {
    /// Wait for the port to reach `Open`, up to `timeout`.
    pub(crate) async fn wait_open(&self, timeout: Duration) -> bool {
        let mut state = self.shared.subscribe_state();
        let wait = state.wait_for(|s| *s == TransportState::Open || *s == TransportState::Errored);
        matches!(
            tokio::time::timeout(timeout, wait).await,
            Ok(Ok(s)) if *s == TransportState::Open
        )
    }

    pub(crate) fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::channel::NewlineFramer;
    use crate::parser::{event_file_path_for, EventParser};
    use crate::transport::testing::pipe;

    struct Harness {
        _dir: tempfile::TempDir,
        handle: PortHandle,
        lines: broadcast::Receiver<CapturedLine>,
        log: Arc<LogWriter>,
    }

    fn start(transport: Box<dyn Transport>, config: SwitchboardConfig, auto_reopen: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("dut.txt");
        let parser = Arc::new(EventParser::new("dut", event_file_path_for(&log_path)));
        let log = Arc::new(LogWriter::open("dut", &log_path, 0, parser).unwrap());
        let (lines_tx, lines) = broadcast::channel(256);
        let (commands_tx, commands) = mpsc::channel(16);
        let shared = Arc::new(PortShared::new(config.history_lines));
        let task = PortTask::new(
            0,
            "dut",
            transport,
            Arc::new(config),
            Arc::new(NewlineFramer),
            log.clone(),
            lines_tx,
            shared.clone(),
            commands,
            auto_reopen,
        );
        let join = task.spawn(true);
        Harness {
            _dir: dir,
            handle: PortHandle {
                commands: commands_tx,
                shared,
                task: Mutex::new(Some(join)),
            },
            lines,
            log,
        }
    }

    fn fast_config() -> SwitchboardConfig {
        let mut config = SwitchboardConfig::new("dut");
        config.ready_poll_interval = Duration::from_millis(20);
        config.partial_line_timeout = Duration::from_millis(50);
        config
    }

    async fn next_line(lines: &mut broadcast::Receiver<CapturedLine>) -> CapturedLine {
        tokio::time::timeout(Duration::from_secs(2), lines.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_captures_lines_in_order() {
        let (transport, mut device) = pipe();
        let mut h = start(Box::new(transport), fast_config(), true);
        assert!(h.handle.wait_open(Duration::from_secs(2)).await);

        device.write_all(b"one\r\ntwo\nthr").await.unwrap();
        device.write_all(b"ee\n").await.unwrap();
        assert_eq!(next_line(&mut h.lines).await.text, "one\n");
        let two = next_line(&mut h.lines).await;
        assert_eq!(two.text, "two\n");
        assert_eq!(two.seq, 1);
        assert_eq!(next_line(&mut h.lines).await.text, "three\n");

        let history = h.handle.shared.lines_since(1);
        assert_eq!(history.len(), 2);
        let log = std::fs::read_to_string(h.log.path()).unwrap();
        assert!(log.contains(" GDM-0: two\n"));
    }

    #[tokio::test]
    async fn test_partial_line_published_after_timeout() {
        let (transport, mut device) = pipe();
        let mut h = start(Box::new(transport), fast_config(), true);
        assert!(h.handle.wait_open(Duration::from_secs(2)).await);

        device.write_all(b"login: ").await.unwrap();
        assert_eq!(next_line(&mut h.lines).await.text, "login: ");
        let log = std::fs::read_to_string(h.log.path()).unwrap();
        assert!(log.contains("login: [NO EOL]\n"));
    }

    #[tokio::test]
    async fn test_write_reaches_device_in_chunks() {
        let (transport, mut device) = pipe();
        let mut config = fast_config();
        config.max_write_bytes = 4;
        let h = start(Box::new(transport), config, true);
        assert!(h.handle.wait_open(Duration::from_secs(2)).await);

        let (respond, rx) = oneshot::channel();
        h.handle
            .commands
            .send(PortCommand::Write {
                data: Bytes::from_static(b"reboot now\n"),
                slow: false,
                respond,
            })
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), 11);
        let mut buf = [0u8; 11];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"reboot now\n");
    }

    #[tokio::test]
    async fn test_close_is_sticky_until_open() {
        let (transport, _device) = pipe();
        let h = start(Box::new(transport), fast_config(), true);
        assert!(h.handle.wait_open(Duration::from_secs(2)).await);

        let (done, rx) = oneshot::channel();
        h.handle.commands.send(PortCommand::Close { done }).await.unwrap();
        rx.await.unwrap();
        assert_eq!(h.handle.shared.state(), TransportState::Closed);

        let (respond, rx) = oneshot::channel();
        h.handle
            .commands
            .send(PortCommand::Write {
                data: Bytes::from_static(b"x"),
                slow: false,
                respond,
            })
            .await
            .unwrap();
        assert!(matches!(rx.await.unwrap(), Err(TransportError::NotOpen { .. })));

        let (done, rx) = oneshot::channel();
        h.handle.commands.send(PortCommand::Open { done }).await.unwrap();
        rx.await.unwrap();
        assert!(h.handle.wait_open(Duration::from_secs(2)).await);

        h.handle.commands.send(PortCommand::Shutdown).await.unwrap();
        h.handle.take_task().unwrap().await.unwrap();
        assert_eq!(h.handle.shared.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn test_unready_port_escalates_to_disconnected() {
        let (transport, _device) = pipe();
        transport.ready_flag().store(false, Ordering::SeqCst);
        let mut config = fast_config();
        config.ready_poll_interval = Duration::from_millis(5);
        config.reopen_failure_limit = 3;
        let h = start(Box::new(transport), config, true);

        let mut state = h.handle.shared.subscribe_state();
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == TransportState::Errored),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(h.handle.shared.is_disconnected());
        assert!(!h.handle.wait_open(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_device_hangup_without_reopen_errors_port() {
        let (transport, device) = pipe();
        let h = start(Box::new(transport), fast_config(), false);
        assert!(h.handle.wait_open(Duration::from_secs(2)).await);

        drop(device);
        let mut state = h.handle.shared.subscribe_state();
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == TransportState::Errored),
        )
        .await
        .unwrap()
        .unwrap();
    }
}
