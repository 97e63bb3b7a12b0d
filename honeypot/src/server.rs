use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use metrics::counter;
use russh::server::{Auth, Msg, Server, Session};
use russh::{Channel, SshId};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::attempt::{AttemptRecord, AuthAttempt, ConnectionMeta};
use crate::config::Config;
use crate::geoip::service::EnrichmentService;
use crate::pipeline::Pipeline;
use crate::retry::RetryPolicy;
use crate::sinks::influx::{BufferedInfluxSink, InfluxClient, InfluxSink};
use crate::sinks::print::PrintSink;
use crate::sinks::PointSink;

/// The SSH front of the honeypot. The protocol library owns the transport;
/// this layer only turns its callbacks into pipeline runs and rejects every
/// authentication attempt so the attacker keeps probing.
pub struct HoneypotServer {
    pipeline: Arc<Pipeline>,
    listen_address: SocketAddr,
    max_session: Duration,
}

impl HoneypotServer {
    pub fn new(
        pipeline: Arc<Pipeline>,
        listen_address: SocketAddr,
        max_session: Duration,
    ) -> HoneypotServer {
        HoneypotServer {
            pipeline,
            listen_address,
            max_session,
        }
    }
}

impl Server for HoneypotServer {
    type Handler = ClientHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> ClientHandler {
        info!("opened connection from {:?}", peer_addr);
        counter!("honeypot_connections_total").increment(1);

        let cancel = CancellationToken::new();

        // Hard session deadline, independent of the idle timeout: pipelines
        // for this connection stop retrying once the watchdog fires.
        let watchdog = cancel.clone();
        let max_session = self.max_session;
        tokio::spawn(async move {
            tokio::select! {
                _ = watchdog.cancelled() => {}
                _ = tokio::time::sleep(max_session) => watchdog.cancel(),
            }
        });

        ClientHandler {
            pipeline: Arc::clone(&self.pipeline),
            meta: ConnectionMeta {
                remote_addr: peer_addr,
                local_addr: Some(self.listen_address),
                // russh does not expose the client's banner to auth
                // callbacks; the tag stays empty on the wire.
                client_version: String::new(),
            },
            user: String::new(),
            cancel,
        }
    }
}

/// Per-connection state. Dropped when the connection closes, which cancels
/// all pipeline retries still running for its attempts.
pub struct ClientHandler {
    pipeline: Arc<Pipeline>,
    meta: ConnectionMeta,
    user: String,
    cancel: CancellationToken,
}

impl ClientHandler {
    fn record(&self, user: &str, auth: AuthAttempt) {
        let record = AttemptRecord::capture(&self.meta, user, auth);
        self.pipeline.spawn(record, self.cancel.child_token());
    }
}

impl Drop for ClientHandler {
    fn drop(&mut self) {
        info!("closed connection from {:?}", self.meta.remote_addr);
        self.cancel.cancel();
    }
}

#[async_trait]
impl russh::server::Handler for ClientHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        info!(
            "password attempt for '{}' from {:?}",
            user, self.meta.remote_addr
        );
        self.user = user.to_string();
        self.record(user, AuthAttempt::Password(password.to_string()));

        Ok(Auth::Reject {
            proceed_with_methods: None,
        })
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        info!(
            "public key attempt for '{}' from {:?}",
            user, self.meta.remote_addr
        );
        self.user = user.to_string();

        let marshalled = format!("{} {}", public_key.name(), public_key.public_key_base64());
        self.record(user, AuthAttempt::PublicKey(marshalled));

        Ok(Auth::Reject {
            proceed_with_methods: None,
        })
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let user = self.user.clone();
        self.record(&user, AuthAttempt::Session);

        Ok(true)
    }
}

/// Wire the pipeline from configuration and run the SSH server until it
/// fails or `shutdown` resolves.
pub async fn serve<F>(config: Config, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let host_key = crate::hostkey::load_or_generate(&config.host_key_path)?;

    let client = reqwest::Client::new();
    let enrichment = EnrichmentService::from_config(&config, client.clone());

    let sink: Arc<dyn PointSink + Send + Sync> = if config.print_sink {
        Arc::new(PrintSink)
    } else if config.non_blocking_writes {
        Arc::new(BufferedInfluxSink::new(
            InfluxClient::new(client, &config),
            config.write_queue_depth,
        ))
    } else {
        Arc::new(InfluxSink::new(InfluxClient::new(client, &config)))
    };

    let pipeline = Arc::new(Pipeline::new(
        enrichment,
        sink,
        RetryPolicy::from_config(&config),
        config.write_private_ips,
    ));

    let ssh_config = Arc::new(russh::server::Config {
        server_id: SshId::Standard(config.server_id.clone()),
        inactivity_timeout: Some(Duration::from_secs(config.idle_timeout_secs)),
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::ZERO),
        keys: vec![host_key],
        ..Default::default()
    });

    let mut server = HoneypotServer::new(
        pipeline,
        config.listen_address,
        Duration::from_secs(config.max_session_secs),
    );

    info!("listening for ssh on {}", config.listen_address);
    tokio::select! {
        result = server.run_on_address(ssh_config, config.listen_address) => {
            result.context("ssh server terminated")?;
        }
        _ = shutdown => {
            info!("shutting down gracefully...");
        }
    }

    Ok(())
}
