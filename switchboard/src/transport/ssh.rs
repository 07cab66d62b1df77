//! SSH transport implementation using russh.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use russh::client::{self, Handle, Msg};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use russh::{Channel, ChannelMsg};
use secrecy::ExposeSecret;

use super::config::{AuthMethod, HostKeyVerification, SshConfig};
use super::{Transport, TransportKind, TransportResult};
use crate::error::TransportError;

/// SSH transport: a PTY shell, or a single exec'd log command.
pub struct SshTransport {
    config: SshConfig,
    address: String,
    session: Option<Handle<SshHandler>>,
    channel: Option<Channel<Msg>>,
}

impl SshTransport {
    /// Create an unopened SSH transport.
    pub fn new(config: SshConfig) -> Self {
        Self {
            address: config.socket_addr(),
            config,
            session: None,
            channel: None,
        }
    }

    async fn connect(&self) -> TransportResult<Handle<SshHandler>> {
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));

        let handler = SshHandler {
            host: self.config.host.clone(),
            port: self.config.port,
            host_key_verification: self.config.host_key_verification.clone(),
            known_hosts_path: self.config.known_hosts_path.clone(),
            host_key_error: host_key_error.clone(),
        };

        let mut session = tokio::time::timeout(
            self.config.timeout,
            client::connect(
                ssh_config,
                (self.config.host.as_str(), self.config.port),
                handler,
            ),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.config.timeout))?
        .map_err(|e| {
            // Prefer the detailed host key error over russh's generic UnknownKey
            match host_key_error.lock().ok().and_then(|mut slot| slot.take()) {
                Some(hk_err) => hk_err,
                None => TransportError::Ssh(e),
            }
        })?;

        Self::authenticate(&mut session, &self.config).await?;
        Ok(session)
    }

    async fn open_channel(&self, session: &Handle<SshHandler>) -> TransportResult<Channel<Msg>> {
        let channel = session.channel_open_session().await?;

        match &self.config.log_cmd {
            Some(cmd) => {
                channel.exec(true, cmd.as_str()).await?;
            }
            None => {
                channel
                    .request_pty(
                        true,
                        "xterm",
                        self.config.terminal_width,
                        self.config.terminal_height,
                        0,
                        0,
                        &[],
                    )
                    .await?;
                channel.request_shell(true).await?;
            }
        }

        Ok(channel)
    }

    async fn authenticate(session: &mut Handle<SshHandler>, config: &SshConfig) -> TransportResult<()> {
        let success = match &config.auth {
            AuthMethod::None => session.authenticate_none(&config.username).await?.success(),
            AuthMethod::Password(password) => session
                .authenticate_password(&config.username, password.expose_secret())
                .await?
                .success(),
            AuthMethod::PrivateKey { path, passphrase } => {
                let key = load_secret_key(path, passphrase.as_ref().map(|p| p.expose_secret()))
                    .map_err(|e| TransportError::Key(e.to_string()))?;

                let hash_alg = session.best_supported_rsa_hash().await?.flatten();

                session
                    .authenticate_publickey(
                        &config.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await?
                    .success()
            }
        };

        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: config.username.clone(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ssh
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn open(&mut self) -> TransportResult<()> {
        if self.is_open() {
            return Ok(());
        }
        let session = self.connect().await?;
        let channel = self.open_channel(&session).await?;
        debug!("ssh {} open", self.address);
        self.session = Some(session);
        self.channel = Some(channel);
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        if let Some(channel) = self.channel.take() {
            let _ = channel.eof().await;
        }
        if let Some(session) = self.session.take() {
            session
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.channel.is_some() && self.session.as_ref().is_some_and(|s| !s.is_closed())
    }

    async fn read(&mut self, _max_size: usize, timeout: Duration) -> TransportResult<Bytes> {
        let channel = self.channel.as_mut().ok_or_else(|| TransportError::NotOpen {
            address: self.address.clone(),
        })?;

        let deadline = tokio::time::Instant::now() + timeout;
        let outcome = loop {
            match tokio::time::timeout_at(deadline, channel.wait()).await {
                Err(_) => return Ok(Bytes::new()),
                Ok(Some(ChannelMsg::Data { data }))
                | Ok(Some(ChannelMsg::ExtendedData { data, .. })) => {
                    return Ok(Bytes::copy_from_slice(&data[..]));
                }
                Ok(Some(ChannelMsg::ExitStatus { exit_status })) => break Some(exit_status),
                Ok(Some(ChannelMsg::Eof)) | Ok(Some(ChannelMsg::Close)) | Ok(None) => break None,
                Ok(Some(_)) => continue,
            }
        };

        // Channel is finished either way
        self.channel = None;
        Err(match outcome {
            Some(status) => TransportError::ProcessExited {
                program: self
                    .config
                    .log_cmd
                    .clone()
                    .unwrap_or_else(|| "shell".to_string()),
                status: status.to_string(),
            },
            None => TransportError::Disconnected,
        })
    }

    async fn write(&mut self, data: &[u8]) -> TransportResult<usize> {
        let channel = self.channel.as_ref().ok_or_else(|| TransportError::NotOpen {
            address: self.address.clone(),
        })?;
        channel.data(data).await?;
        Ok(data.len())
    }

    async fn is_ready_to_open(&mut self) -> bool {
        let probe = tokio::net::TcpStream::connect((self.config.host.as_str(), self.config.port));
        matches!(
            tokio::time::timeout(Duration::from_secs(1), probe).await,
            Ok(Ok(_))
        )
    }
}

/// SSH client handler for russh.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Detailed host key failure, surfaced by `connect` in place of UnknownKey.
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    /// `Ok(true)` if matched, `Ok(false)` if the host is unknown.
    fn check_known_hosts(&self, pubkey: &PublicKey) -> Result<bool, TransportError> {
        let result = match self.known_hosts_path {
            Some(ref path) => russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path),
            None => russh::keys::check_known_hosts(&self.host, self.port, pubkey),
        };

        match result {
            Ok(matched) => Ok(matched),
            Err(russh::keys::Error::KeyChanged { line }) => Err(TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            }),
            Err(e) => Err(TransportError::KnownHosts(e.to_string())),
        }
    }

    fn learn_host_key(&self, pubkey: &PublicKey) -> Result<(), TransportError> {
        let result = match self.known_hosts_path {
            Some(ref path) => {
                russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
            }
            None => russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey),
        };

        result.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    fn reject(&self, err: TransportError) -> bool {
        if let Ok(mut slot) = self.host_key_error.lock() {
            *slot = Some(err);
        }
        false
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let accepted = match self.host_key_verification {
            HostKeyVerification::Disabled => true,
            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => true,
                Ok(false) => {
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("Failed to save host key for {}: {}", self.host, e);
                    }
                    true
                }
                Err(e) => self.reject(e),
            },
            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => true,
                Ok(false) => self.reject(TransportError::HostKeyUnknown {
                    host: self.host.clone(),
                    port: self.port,
                }),
                Err(e) => self.reject(e),
            },
        };
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unopened_transport() {
        let mut transport = SshTransport::new(SshConfig::new("127.0.0.1", "root").port(1));
        assert!(!transport.is_open());
        assert_eq!(transport.address(), "127.0.0.1:1");
        let err = transport
            .read(64, Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotOpen { .. }));
        // Closing an unopened transport is a no-op
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_readiness_probe_fails_without_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let mut transport = SshTransport::new(SshConfig::new("127.0.0.1", "root").port(port));
        assert!(!transport.is_ready_to_open().await);
    }
}
