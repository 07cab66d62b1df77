//! Async side of expect: deliver captured lines to an engine until it is
//! satisfied, the deadline passes, or the ports go away.

use futures_util::future::select_all;
use log::{debug, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};

use super::{ExpectEngine, ExpectOptions, ExpectResponse};
use crate::capture::{CapturedLine, LogWriter};
use crate::channel::LineClassifier;
use crate::error::{Error, Result};
use crate::transport::TransportState;

/// Port state receivers an expect watches.
pub(crate) type PortStates = Vec<(usize, watch::Receiver<TransportState>)>;

/// Everything an expect needs from its switchboard.
pub(crate) struct ExpectWaiter<'a> {
    pub(crate) device_name: &'a str,
    pub(crate) classifier: &'a dyn LineClassifier,
    pub(crate) log: &'a LogWriter,
}

impl ExpectWaiter<'_> {
    /// Run `engine` against lines from `lines` until it completes.
    ///
    /// `lines` must be subscribed before any command whose output is
    /// expected is written.
    pub(crate) async fn wait(
        &self,
        mut engine: ExpectEngine,
        options: &ExpectOptions,
        mut lines: broadcast::Receiver<CapturedLine>,
        mut states: PortStates,
    ) -> Result<ExpectResponse> {
        self.note(&format!(
            "expecting {} patterns from {:?} using {} lines and {} search window in {}s",
            engine.mode(),
            engine.patterns(),
            options.line_type,
            engine.search_window_size(),
            options.timeout.as_secs_f64()
        ));

        let deadline = tokio::time::sleep(options.timeout);
        tokio::pin!(deadline);
        let mut noted = 0;

        loop {
            tokio::select! {
                biased;

                received = lines.recv() => match received {
                    Ok(line) => {
                        if options.port.is_some_and(|p| p != line.port)
                            || !self.classifier.accept(line.port, &line.text, options.line_type)
                        {
                            continue;
                        }
                        let response = engine.feed(&line.text);
                        for found in &engine.matches()[noted..] {
                            self.note(&format!(
                                "found pattern {:?} at index {}",
                                engine.patterns()[found.pattern_index],
                                found.pattern_index
                            ));
                        }
                        noted = engine.matches().len();
                        if let Some(response) = response {
                            self.note(&format!(
                                "mode {} expect completed with {:?} remaining patterns in {:.3}s",
                                response.mode,
                                response.remaining.join(", "),
                                response.elapsed.as_secs_f64()
                            ));
                            return Ok(response);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("{} expect fell behind, {} line(s) skipped", self.device_name, skipped);
                    }
                    Err(RecvError::Closed) => {
                        return Err(self.not_available(options.port.unwrap_or(0)));
                    }
                },

                port = wait_unavailable(&mut states) => {
                    debug!("{} expect interrupted, port {} closed", self.device_name, port);
                    return Err(self.not_available(port));
                }

                _ = &mut deadline => break,
            }
        }

        let response = engine.finish_timed_out();
        let remaining = response.remaining.join(", ");
        self.note(&format!(
            "expect timed out after waiting {:.3}s for {:?} remaining patterns",
            response.elapsed.as_secs_f64(),
            remaining
        ));
        if options.raise_for_timeout {
            return Err(Error::CommunicationTimeout {
                device: self.device_name.to_string(),
                action: format!("expect for {:?} remaining patterns", remaining),
                timeout: options.timeout,
            });
        }
        Ok(response)
    }

    fn not_available(&self, port: usize) -> Error {
        Error::TransportNotAvailable {
            device: self.device_name.to_string(),
            port,
            action: "expecting patterns".to_string(),
        }
    }

    fn note(&self, text: &str) {
        if let Err(e) = self.log.add_note(text) {
            warn!("{} log note failed: {}", self.device_name, e);
        }
    }
}

/// First port once every watched port is closed or errored.
fn unavailable_port(states: &PortStates) -> Option<usize> {
    let (first, _) = states.first()?;
    states
        .iter()
        .all(|(_, rx)| !rx.borrow().is_available())
        .then_some(*first)
}

/// Resolve once every watched port is unavailable. Never resolves for an
/// empty list.
async fn wait_unavailable(states: &mut PortStates) -> usize {
    if states.is_empty() {
        return std::future::pending().await;
    }
    loop {
        if let Some(port) = unavailable_port(states) {
            return port;
        }
        let changes = states.iter_mut().map(|(_, rx)| Box::pin(rx.changed()));
        let (changed, _, _) = select_all(changes).await;
        if changed.is_err() {
            return states[0].0;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Local;

    use super::*;
    use crate::channel::{AllUnknown, PortLog, LineType};
    use crate::config::SEARCH_WINDOW_SIZE;
    use crate::expect::ExpectMode;
    use crate::parser::{event_file_path_for, EventParser};

    struct Fixture {
        _dir: tempfile::TempDir,
        log: LogWriter,
        lines: broadcast::Sender<CapturedLine>,
        state: watch::Sender<TransportState>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dut.txt");
        let parser = Arc::new(EventParser::new("dut", event_file_path_for(&path)));
        let log = LogWriter::open("dut", &path, 0, parser).unwrap();
        let (lines, _) = broadcast::channel(64);
        let (state, _) = watch::channel(TransportState::Open);
        Fixture {
            _dir: dir,
            log,
            lines,
            state,
        }
    }

    fn line(port: usize, text: &str) -> CapturedLine {
        CapturedLine {
            port,
            seq: 0,
            timestamp: Local::now(),
            text: text.to_string(),
        }
    }

    async fn run(
        f: &Fixture,
        classifier: &dyn LineClassifier,
        patterns: &[&str],
        options: ExpectOptions,
        feed: Vec<(u64, CapturedLine)>,
    ) -> Result<ExpectResponse> {
        let waiter = ExpectWaiter {
            device_name: "dut",
            classifier,
            log: &f.log,
        };
        let engine = ExpectEngine::new(patterns, options.mode, SEARCH_WINDOW_SIZE).unwrap();
        let rx = f.lines.subscribe();
        let states = vec![(0, f.state.subscribe())];
        let sender = f.lines.clone();
        tokio::spawn(async move {
            for (delay_ms, l) in feed {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                let _ = sender.send(l);
            }
        });
        waiter.wait(engine, &options, rx, states).await
    }

    #[tokio::test]
    async fn test_all_mode_over_spread_lines() {
        let f = fixture();
        let options = ExpectOptions::new()
            .mode(ExpectMode::All)
            .timeout(Duration::from_secs(2));
        let feed = vec![(10, line(0, "X\n")), (500, line(0, "Y\n"))];
        let r = run(&f, &AllUnknown, &["X", "Y"], options, feed).await.unwrap();
        assert!(!r.timed_out);
        assert_eq!(r.matched_indices(), vec![0, 1]);

        let log = std::fs::read_to_string(f.log.path()).unwrap();
        assert!(log.contains("Note: expecting all patterns"));
        assert!(log.contains("found pattern \"Y\" at index 1"));
        assert!(log.contains("mode all expect completed"));
    }

    #[tokio::test]
    async fn test_timeout_returns_partial_response() {
        let f = fixture();
        let options = ExpectOptions::new()
            .mode(ExpectMode::All)
            .timeout(Duration::from_millis(100));
        let r = run(&f, &AllUnknown, &["X", "Y"], options, vec![(0, line(0, "X\n"))])
            .await
            .unwrap();
        assert!(r.timed_out);
        assert_eq!(r.remaining, vec!["Y"]);
        let log = std::fs::read_to_string(f.log.path()).unwrap();
        assert!(log.contains("expect timed out after waiting"));
    }

    #[tokio::test]
    async fn test_raise_for_timeout() {
        let f = fixture();
        let options = ExpectOptions::new()
            .timeout(Duration::from_millis(20))
            .raise_for_timeout(true);
        let err = run(&f, &AllUnknown, &["never"], options, Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::CommunicationTimeout { .. }));
    }

    #[tokio::test]
    async fn test_port_and_line_type_filters() {
        let f = fixture();
        let classifier = PortLog::new(vec![1]);
        let options = ExpectOptions::new()
            .port(0)
            .line_type(LineType::Response)
            .timeout(Duration::from_secs(2));
        let feed = vec![(5, line(1, "prompt> \n")), (5, line(0, "other\n")), (5, line(0, "prompt> \n"))];
        let r = run(&f, &classifier, &["prompt> "], options, feed).await.unwrap();
        assert!(!r.timed_out);
        assert_eq!(r.before, "other\n");
    }

    #[tokio::test]
    async fn test_closing_port_interrupts_wait() {
        let f = fixture();
        let options = ExpectOptions::new().timeout(Duration::from_secs(30));
        let state = f.state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            state.send_replace(TransportState::Closed);
        });
        let started = std::time::Instant::now();
        let err = run(&f, &AllUnknown, &["never"], options, Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::TransportNotAvailable { port: 0, .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_reopening_port_keeps_waiting() {
        let f = fixture();
        let options = ExpectOptions::new().timeout(Duration::from_secs(2));
        let state = f.state.clone();
        let sender = f.lines.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            state.send_replace(TransportState::Opening);
            tokio::time::sleep(Duration::from_millis(20)).await;
            state.send_replace(TransportState::Open);
            let _ = sender.send(line(0, "login: "));
        });
        let r = run(&f, &AllUnknown, &["login:"], options, Vec::new()).await.unwrap();
        assert!(r.is_success());
    }
}
