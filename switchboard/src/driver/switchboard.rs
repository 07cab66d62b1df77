//! The switchboard: one device, its ports, its log and its events.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc, oneshot, MutexGuard};

use super::line_identifier::LineIdentifier;
use crate::capture::{CapturedLine, LogWriter, PortCommand, PortHandle, PortShared, PortTask};
use crate::channel::{DataFramer, LineClassifier, LineType};
use crate::config::SwitchboardConfig;
use crate::device::DeviceDescriptor;
use crate::error::{Error, Result};
use crate::expect::{
    ExpectEngine, ExpectOptions, ExpectResponse, ExpectWaiter, DEFAULT_EXPECT_TIMEOUT,
};
use crate::parser::{event_file_path_for, EventParser};
use crate::transport::hdlc::RPC_ADDRESS;
use crate::transport::{RpcDispatcher, SerialControl, Transport, TransportKind, TransportState};

/// Lines buffered for slow expect waiters before they start lagging.
const LINE_CHANNEL_CAPACITY: usize = 4096;

const PORT_COMMAND_CAPACITY: usize = 32;

/// Ports one device can have, typically a console and a log port.
pub const MAX_PORTS: usize = 2;

/// A transport and how its port should be run.
pub(crate) struct PortSetup {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) auto_reopen: bool,
    pub(crate) open_on_start: bool,
}

/// How a command is written by `send_with` and `send_and_expect_with`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    /// Write one byte at a time.
    pub slow: bool,

    /// Append `newline` when the command does not already end in it, a
    /// newline or NUL.
    pub add_newline: bool,

    pub newline: String,

    /// Times the command is sent while the expect keeps timing out.
    pub command_tries: usize,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            slow: false,
            add_newline: true,
            newline: "\n".to_string(),
            command_tries: 1,
        }
    }
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(mut self, slow: bool) -> Self {
        self.slow = slow;
        self
    }

    /// Send the command exactly as given.
    pub fn raw(mut self) -> Self {
        self.add_newline = false;
        self
    }

    pub fn newline(mut self, newline: impl Into<String>) -> Self {
        self.add_newline = true;
        self.newline = newline.into();
        self
    }

    pub fn command_tries(mut self, tries: usize) -> Self {
        self.command_tries = tries;
        self
    }

    /// `command` with the line ending these options ask for.
    fn terminate(&self, command: &str) -> String {
        let mut data = command.to_string();
        let terminated = data.ends_with('\n')
            || data.ends_with('\0')
            || (!self.newline.is_empty() && data.ends_with(self.newline.as_str()));
        if self.add_newline && !terminated {
            data.push_str(&self.newline);
        }
        data
    }
}

/// Owner of every port of one device.
///
/// Capture runs in one task per port from the moment the switchboard is
/// built until [`close`](Self::close). All operations take `&self`, so a
/// switchboard shared through an `Arc` can be closed by one task while
/// another is blocked in an expect.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use switchboard::driver::SwitchboardBuilder;
/// use switchboard::expect::ExpectOptions;
/// use switchboard::transport::TransportSpec;
///
/// # async fn example() -> Result<(), switchboard::Error> {
/// let sb = SwitchboardBuilder::new("rpi-01")
///     .log_directory("/tmp/logs")
///     .port(TransportSpec::Socket { host: "10.0.0.5".into(), port: 4000 })
///     .build()
///     .await?;
///
/// let options = ExpectOptions::new().timeout(Duration::from_secs(5));
/// let response = sb.send_and_expect("uname -a", &[r"Linux (\S+)"], &options).await?;
/// println!("hostname: {:?}", response.groups);
/// sb.close().await
/// # }
/// ```
pub struct Switchboard {
    device_name: String,
    config: Arc<SwitchboardConfig>,
    ports: Vec<PortHandle>,
    kinds: Vec<TransportKind>,
    dispatchers: Vec<Option<Arc<RpcDispatcher>>>,
    expect_guards: Vec<tokio::sync::Mutex<()>>,
    lines: broadcast::Sender<CapturedLine>,
    log: Arc<LogWriter>,
    classifier: Arc<dyn LineClassifier>,
    descriptor: Option<DeviceDescriptor>,
    closed: AtomicBool,
}

impl Switchboard {
    /// Open the log, load filters and spawn one capture task per port.
    pub(crate) fn start(
        config: SwitchboardConfig,
        ports: Vec<PortSetup>,
        classifier: Arc<dyn LineClassifier>,
        framer: Arc<dyn DataFramer>,
        descriptor: Option<DeviceDescriptor>,
    ) -> Result<Self> {
        let device_name = config.device_name.clone();
        if ports.is_empty() || ports.len() > MAX_PORTS {
            return Err(Error::InvalidArgument {
                device: device_name,
                message: format!(
                    "a switchboard needs 1 to {} ports, got {}",
                    MAX_PORTS,
                    ports.len()
                ),
            });
        }

        let log_path = config.log_path();
        let parser = Arc::new(EventParser::new(
            device_name.clone(),
            event_file_path_for(&log_path),
        ));
        parser.load_filters(&config.filter_paths)?;
        let log = LogWriter::open(device_name.clone(), &log_path, config.max_log_size, parser)
            .map_err(|source| Error::Log {
                device: device_name.clone(),
                source,
            })?;
        let log = Arc::new(log);

        let config = Arc::new(config);
        let (lines, _) = broadcast::channel(LINE_CHANNEL_CAPACITY);
        let mut handles = Vec::with_capacity(ports.len());
        let mut dispatchers = Vec::with_capacity(ports.len());
        let mut kinds = Vec::with_capacity(ports.len());

        for (index, setup) in ports.into_iter().enumerate() {
            dispatchers.push(setup.transport.rpc_dispatcher());
            kinds.push(setup.transport.kind());
            let (commands_tx, commands) = mpsc::channel(PORT_COMMAND_CAPACITY);
            let shared = Arc::new(PortShared::new(config.history_lines));
            let task = PortTask::new(
                index,
                device_name.clone(),
                setup.transport,
                config.clone(),
                framer.clone(),
                log.clone(),
                lines.clone(),
                shared.clone(),
                commands,
                setup.auto_reopen,
            );
            let join = task.spawn(setup.open_on_start);
            handles.push(PortHandle {
                commands: commands_tx,
                shared,
                task: Mutex::new(Some(join)),
            });
        }

        info!(
            "{} switchboard started with {} port(s), logging to {}",
            device_name,
            handles.len(),
            log_path.display()
        );

        Ok(Self {
            expect_guards: handles.iter().map(|_| tokio::sync::Mutex::new(())).collect(),
            device_name,
            config,
            ports: handles,
            kinds,
            dispatchers,
            lines,
            log,
            classifier,
            descriptor,
            closed: AtomicBool::new(false),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn config(&self) -> &SwitchboardConfig {
        &self.config
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Configured line classifier.
    pub fn classifier(&self) -> Arc<dyn LineClassifier> {
        self.classifier.clone()
    }

    pub fn descriptor(&self) -> Option<&DeviceDescriptor> {
        self.descriptor.as_ref()
    }

    /// Event parser fed by this switchboard's log.
    pub fn parser(&self) -> &Arc<EventParser> {
        self.log.parser()
    }

    /// Current log file.
    pub fn log_path(&self) -> PathBuf {
        self.log.path()
    }

    /// Receive every line captured from now on, from every port.
    pub fn subscribe_lines(&self) -> broadcast::Receiver<CapturedLine> {
        self.lines.subscribe()
    }

    /// Lifecycle state of a port.
    pub fn transport_state(&self, port: usize) -> Option<TransportState> {
        self.ports.get(port).map(|p| p.shared.state())
    }

    /// Whether capture gave up reopening `port`.
    pub fn is_disconnected(&self, port: usize) -> bool {
        self.ports.get(port).is_some_and(|p| p.shared.is_disconnected())
    }

    // --- writes ---

    /// Write `command` to `port`, adding a newline unless it already ends in
    /// one or in NUL. Does not wait for a response.
    pub async fn send(&self, command: &str, port: usize) -> Result<()> {
        self.send_with(command, port, &SendOptions::default()).await
    }

    /// Like [`send`](Self::send), one byte at a time.
    pub async fn send_slow(&self, command: &str, port: usize) -> Result<()> {
        self.send_with(command, port, &SendOptions::new().slow(true)).await
    }

    /// Write `command` to `port` as `options` describe. `command_tries` is
    /// ignored.
    pub async fn send_with(&self, command: &str, port: usize, options: &SendOptions) -> Result<()> {
        self.port(port, "send")?;
        self.note(&format!("wrote command {:?} to port {}", command, port));
        let data = options.terminate(command);
        debug!("{} port {} <- {:?}", self.device_name, port, data);
        self.write_to_port(port, Bytes::from(data), options.slow, command)
            .await
            .map(|_| ())
    }

    async fn write_to_port(&self, port: usize, data: Bytes, slow: bool, command: &str) -> Result<usize> {
        let handle = self.port(port, "send")?;
        let gone = || self.not_available(port, format!("writing {:?}", command));
        let (respond, written) = oneshot::channel();
        handle
            .commands
            .send(PortCommand::Write {
                data,
                slow,
                respond,
            })
            .await
            .map_err(|_| gone())?;
        written
            .await
            .map_err(|_| gone())?
            .map_err(|source| Error::Device {
                device: self.device_name.clone(),
                command: command.to_string(),
                source,
            })
    }

    // --- expect ---

    /// Wait for `patterns` in output captured from now on.
    pub async fn expect<S: AsRef<str>>(
        &self,
        patterns: &[S],
        options: &ExpectOptions,
    ) -> Result<ExpectResponse> {
        let engine = self.engine(patterns, options)?;
        let ports = self.listen_ports(options)?;
        let _guards = self.lock_expect(&ports)?;
        let lines = self.lines.subscribe();
        self.waiter().wait(engine, options, lines, self.states(&ports)).await
    }

    /// Run `action`, then wait for `patterns`. Output produced while the
    /// action runs is not missed.
    pub async fn do_and_expect<F, Fut, S>(
        &self,
        action: F,
        patterns: &[S],
        options: &ExpectOptions,
    ) -> Result<ExpectResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
        S: AsRef<str>,
    {
        let engine = self.engine(patterns, options)?;
        let ports = self.listen_ports(options)?;
        let _guards = self.lock_expect(&ports)?;
        let lines = self.lines.subscribe();
        let states = self.states(&ports);
        action().await?;
        self.waiter().wait(engine, options, lines, states).await
    }

    /// Send `command` to `options.port` (default 0) and wait for `patterns`
    /// on that port.
    pub async fn send_and_expect<S: AsRef<str>>(
        &self,
        command: &str,
        patterns: &[S],
        options: &ExpectOptions,
    ) -> Result<ExpectResponse> {
        self.send_and_expect_with(command, patterns, options, &SendOptions::default())
            .await
    }

    /// [`send_and_expect`](Self::send_and_expect) with control over how the
    /// command is written and how often it is retried after a timeout.
    pub async fn send_and_expect_with<S: AsRef<str>>(
        &self,
        command: &str,
        patterns: &[S],
        options: &ExpectOptions,
        send: &SendOptions,
    ) -> Result<ExpectResponse> {
        let port = options.port.unwrap_or(0);
        self.port(port, "send_and_expect")?;
        let listen = ExpectOptions {
            port: Some(port),
            raise_for_timeout: false,
            ..options.clone()
        };
        self.engine(patterns, &listen)?;
        let _guards = self.lock_expect(&[port])?;

        let tries = send.command_tries.max(1);
        let mut attempt = 1;
        let response = loop {
            let engine = self.engine(patterns, &listen)?;
            // Subscribe before writing so the response cannot slip past
            let lines = self.lines.subscribe();
            let states = self.states(&[port]);
            self.send_with(command, port, send).await?;
            let response = self.waiter().wait(engine, &listen, lines, states).await?;
            if !response.timed_out || attempt >= tries {
                break response;
            }
            debug!(
                "{} send_and_expect attempt {}/{} timed out for {:?}, resending",
                self.device_name, attempt, tries, command
            );
            attempt += 1;
        };

        if response.timed_out && options.raise_for_timeout {
            return Err(Error::CommunicationTimeout {
                device: self.device_name.clone(),
                action: format!("send_and_expect for command {:?}", command),
                timeout: options.timeout,
            });
        }
        Ok(response)
    }

    /// Send a command from the device descriptor and wait for its named
    /// response patterns.
    pub async fn send_descriptor_command(
        &self,
        command_name: &str,
        regex_names: &[&str],
        timeout_name: Option<&str>,
        port: usize,
    ) -> Result<ExpectResponse> {
        let descriptor = self.descriptor.as_ref().ok_or_else(|| Error::InvalidArgument {
            device: self.device_name.clone(),
            message: "no device descriptor configured".to_string(),
        })?;
        let (command, patterns, timeout) =
            descriptor.resolve(command_name, regex_names, timeout_name)?;
        let options = ExpectOptions::new()
            .port(port)
            .line_type(LineType::Response)
            .timeout(timeout.unwrap_or(DEFAULT_EXPECT_TIMEOUT));
        self.send_and_expect(&command, &patterns, &options).await
    }

    fn engine<S: AsRef<str>>(&self, patterns: &[S], options: &ExpectOptions) -> Result<ExpectEngine> {
        if patterns.is_empty() {
            return Err(Error::InvalidArgument {
                device: self.device_name.clone(),
                message: "expecting at least one pattern in list, found none".to_string(),
            });
        }
        let window = options
            .search_window_size
            .unwrap_or(self.config.search_window_size);
        ExpectEngine::new(patterns, options.mode, window).map_err(|e| {
            Error::InvalidArgument {
                device: self.device_name.clone(),
                message: format!("invalid expect pattern: {}", e),
            }
        })
    }

    fn listen_ports(&self, options: &ExpectOptions) -> Result<Vec<usize>> {
        match options.port {
            Some(port) => {
                self.port(port, "expect")?;
                Ok(vec![port])
            }
            None => Ok((0..self.ports.len()).collect()),
        }
    }

    /// Claim the expect slot of every port in `ports`.
    fn lock_expect(&self, ports: &[usize]) -> Result<Vec<MutexGuard<'_, ()>>> {
        ports
            .iter()
            .map(|&port| {
                self.expect_guards[port]
                    .try_lock()
                    .map_err(|_| Error::ExpectBusy {
                        device: self.device_name.clone(),
                        port,
                    })
            })
            .collect()
    }

    fn states(&self, ports: &[usize]) -> Vec<(usize, tokio::sync::watch::Receiver<TransportState>)> {
        ports
            .iter()
            .map(|&port| (port, self.ports[port].shared.subscribe_state()))
            .collect()
    }

    fn waiter(&self) -> ExpectWaiter<'_> {
        ExpectWaiter {
            device_name: &self.device_name,
            classifier: self.classifier.as_ref(),
            log: &self.log,
        }
    }

    // --- rpc ---

    /// Call an RPC method over the first framed RPC port.
    ///
    /// Returns `(false, empty)` on NACK or when no reply arrives within
    /// `timeout`; fails only when the transport does.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        request: &[u8],
        timeout: Duration,
    ) -> Result<(bool, Bytes)> {
        let (port, dispatcher) = self
            .dispatchers
            .iter()
            .enumerate()
            .find_map(|(i, d)| d.as_ref().map(|d| (i, d.clone())))
            .ok_or_else(|| Error::InvalidArgument {
                device: self.device_name.clone(),
                message: "no framed rpc port configured".to_string(),
            })?;
        let command = format!("{}.{}", service, method);
        let gone = || self.not_available(port, format!("calling {}", command));

        let (call_id, reply) = dispatcher.register();
        let packet = match RpcDispatcher::encode_request(call_id, service, method, request) {
            Ok(packet) => packet,
            Err(source) => {
                dispatcher.cancel(call_id);
                return Err(self.device_error(&command, source));
            }
        };

        let (respond, written) = oneshot::channel();
        let sent = self.ports[port]
            .commands
            .send(PortCommand::WriteFrame {
                address: RPC_ADDRESS,
                payload: packet,
                respond,
            })
            .await;
        let written = match sent {
            Ok(()) => written.await,
            Err(_) => {
                dispatcher.cancel(call_id);
                return Err(gone());
            }
        };
        match written {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                dispatcher.cancel(call_id);
                return Err(self.device_error(&command, source));
            }
            Err(_) => {
                dispatcher.cancel(call_id);
                return Err(gone());
            }
        }
        debug!("{} rpc {} sent as call {}", self.device_name, command, call_id);

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(reply)) => Ok((reply.ack, reply.payload)),
            // Pending calls are dropped when the transport closes
            Ok(Err(_)) => Err(gone()),
            Err(_) => {
                dispatcher.cancel(call_id);
                warn!(
                    "{} rpc {} got no reply within {:?}",
                    self.device_name, command, timeout
                );
                Ok((false, Bytes::new()))
            }
        }
    }

    // --- serial controls ---

    /// Switch the baud rate of a serial port, flushing around the change.
    pub async fn transport_serial_set_baudrate(&self, baud_rate: u32, port: usize) -> Result<()> {
        self.serial_control(SerialControl::SetBaudRate(baud_rate), port).await
    }

    /// Send the XON flow control byte to a serial port.
    pub async fn transport_serial_send_xon(&self, port: usize) -> Result<()> {
        self.serial_control(SerialControl::Xon, port).await
    }

    /// Send the XOFF flow control byte to a serial port.
    pub async fn transport_serial_send_xoff(&self, port: usize) -> Result<()> {
        self.serial_control(SerialControl::Xoff, port).await
    }

    /// Send Ctrl-C to a serial port.
    pub async fn transport_serial_send_break_byte(&self, port: usize) -> Result<()> {
        self.serial_control(SerialControl::BreakByte, port).await
    }

    async fn serial_control(&self, control: SerialControl, port: usize) -> Result<()> {
        let handle = self.port(port, "serial control")?;
        let kind = self.kinds[port];
        if kind != TransportKind::Serial {
            return Err(Error::InvalidArgument {
                device: self.device_name.clone(),
                message: format!(
                    "{} failed, port {} is a {} transport, expecting serial",
                    control,
                    port,
                    kind.as_str()
                ),
            });
        }
        self.note(&format!("sending {} to port {}", control, port));
        let gone = || self.not_available(port, format!("sending {}", control));
        let (respond, applied) = oneshot::channel();
        handle
            .commands
            .send(PortCommand::SerialControl { control, respond })
            .await
            .map_err(|_| gone())?;
        applied
            .await
            .map_err(|_| gone())?
            .map_err(|source| self.device_error(&control.to_string(), source))
    }

    // --- log ---

    /// Write a host note into the device log.
    pub fn add_log_note(&self, note: &str) -> Result<()> {
        self.log.add_note(note).map_err(|source| self.log_error(source))
    }

    /// Load another filter file. Returns the number of filters added.
    pub fn add_new_filter(&self, path: impl AsRef<Path>) -> Result<usize> {
        Ok(self.log.parser().load_filter_file(path)?)
    }

    /// Rotate the log once it reaches `max_log_size` bytes. Zero disables
    /// rotation.
    pub fn set_max_log_size(&self, max_log_size: u64) -> Result<()> {
        self.log
            .set_max_log_size(max_log_size)
            .map_err(|source| self.log_error(source))
    }

    /// Continue logging, and event parsing, in a new file.
    pub fn start_new_log(&self, path: impl AsRef<Path>) -> Result<()> {
        self.log
            .start_new_log(path)
            .map_err(|source| self.log_error(source))
    }

    /// Handle for reading only lines captured after this call.
    pub fn get_line_identifier(&self) -> LineIdentifier {
        LineIdentifier::new(self.ports.iter().map(|p| p.shared.next_seq()).collect())
    }

    /// Lines captured since `identifier` was taken or last read, oldest
    /// first, filtered by the classifier. Advances the identifier.
    pub fn read_new_lines(&self, identifier: &mut LineIdentifier, line_type: LineType) -> Vec<CapturedLine> {
        let mut lines = Vec::new();
        for (port, handle) in self.ports.iter().enumerate() {
            let Some(mark) = identifier.mark(port) else {
                continue;
            };
            let new = handle.shared.lines_since(mark);
            let Some(last) = new.last() else {
                continue;
            };
            if new[0].seq > mark {
                debug!(
                    "{} port {}: {} line(s) left history before they were read",
                    self.device_name,
                    port,
                    new[0].seq - mark
                );
            }
            identifier.advance(port, last.seq + 1);
            lines.extend(
                new.into_iter()
                    .filter(|l| self.classifier.accept(l.port, &l.text, line_type)),
            );
        }
        lines.sort_by_key(|l| l.timestamp);
        lines
    }

    // --- lifecycle ---

    /// Open `port` and wait until it is capturing. Opening an open port is a
    /// no-op.
    pub async fn open_transport(&self, port: usize) -> Result<()> {
        let handle = self.port(port, "open_transport")?;
        if handle.shared.state() == TransportState::Open {
            return Ok(());
        }
        self.note(&format!("opening transport for port {}", port));
        let (done, applied) = oneshot::channel();
        let gone = || self.not_available(port, "opening transport");
        handle
            .commands
            .send(PortCommand::Open { done })
            .await
            .map_err(|_| gone())?;
        applied.await.map_err(|_| gone())?;

        let timeout = self.config.open_timeout;
        if handle.wait_open(timeout).await {
            return Ok(());
        }
        if handle.shared.is_disconnected() {
            return Err(Error::Disconnected {
                device: self.device_name.clone(),
                port,
            });
        }
        Err(Error::CommunicationTimeout {
            device: self.device_name.clone(),
            action: format!("opening transport for port {}", port),
            timeout,
        })
    }

    /// Close `port` and keep it closed until the next `open_transport`.
    /// Closing a closed port is a no-op.
    pub async fn close_transport(&self, port: usize) -> Result<()> {
        let handle = self.port(port, "close_transport")?;
        if handle.shared.state() == TransportState::Closed {
            return Ok(());
        }
        self.note(&format!("closing transport for port {}", port));
        let started = Instant::now();
        let (done, applied) = oneshot::channel();
        if handle.commands.send(PortCommand::Close { done }).await.is_ok() {
            // A stopped task has already closed its transport
            let _ = applied.await;
        }
        self.note(&format!(
            "closed transport for port {} in {:.3}s",
            port,
            started.elapsed().as_secs_f64()
        ));
        Ok(())
    }

    pub async fn open_all_transports(&self) -> Result<()> {
        for port in 0..self.ports.len() {
            self.open_transport(port).await?;
        }
        Ok(())
    }

    pub async fn close_all_transports(&self) -> Result<()> {
        for port in 0..self.ports.len() {
            self.close_transport(port).await?;
        }
        Ok(())
    }

    /// Close every port and stop capture. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.close_all_transports().await?;
        for (port, handle) in self.ports.iter().enumerate() {
            // The task may already be gone
            let _ = handle.commands.send(PortCommand::Shutdown).await;
            if let Some(task) = handle.take_task() {
                if let Err(e) = task.await {
                    warn!("{} port {} capture task failed: {}", self.device_name, port, e);
                }
            }
        }
        info!("{} switchboard closed", self.device_name);
        Ok(())
    }

    // --- helpers ---

    fn port(&self, port: usize, action: &str) -> Result<&PortHandle> {
        self.ports.get(port).ok_or_else(|| Error::InvalidArgument {
            device: self.device_name.clone(),
            message: format!(
                "{} failed, port {} is out of range (device has {} port(s))",
                action,
                port,
                self.ports.len()
            ),
        })
    }

    fn note(&self, text: &str) {
        if let Err(e) = self.log.add_note(text) {
            warn!("{} log note failed: {}", self.device_name, e);
        }
    }

    fn not_available(&self, port: usize, action: impl Into<String>) -> Error {
        Error::TransportNotAvailable {
            device: self.device_name.clone(),
            port,
            action: action.into(),
        }
    }

    fn device_error(&self, command: &str, source: crate::error::TransportError) -> Error {
        Error::Device {
            device: self.device_name.clone(),
            command: command.to_string(),
            source,
        }
    }

    fn log_error(&self, source: std::io::Error) -> Error {
        Error::Log {
            device: self.device_name.clone(),
            source,
        }
    }
}

impl fmt::Debug for Switchboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Switchboard")
            .field("device_name", &self.device_name)
            .field("ports", &self.ports.len())
            .field("log", &self.log)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
