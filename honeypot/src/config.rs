use std::net::SocketAddr;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "SSH_LISTEN_ADDRESS", default = "0.0.0.0:2222")]
    pub listen_address: SocketAddr,

    #[envconfig(from = "SERVER_ID", default = "SSH-2.0-OpenSSH_7.4p1 Debian-10+deb9u7")]
    pub server_id: String,

    #[envconfig(from = "HOST_KEY_PATH", default = "./host_key")]
    pub host_key_path: String,

    #[envconfig(from = "IDLE_TIMEOUT_SECS", default = "10")]
    pub idle_timeout_secs: u64,

    #[envconfig(from = "MAX_SESSION_SECS", default = "30")]
    pub max_session_secs: u64,

    pub influxdb_url: String,
    pub influxdb_token: String,
    pub influxdb_org: String,
    pub influxdb_bucket: String,

    #[envconfig(from = "INFLUXDB_NON_BLOCKING_WRITES", default = "false")]
    pub non_blocking_writes: bool,

    /// Attempts from private or loopback addresses are suppressed unless set.
    #[envconfig(from = "INFLUXDB_WRITE_PRIVATE_IPS", default = "false")]
    pub write_private_ips: bool,

    #[envconfig(from = "WRITE_QUEUE_DEPTH", default = "1024")]
    pub write_queue_depth: usize,

    /// When present, enrichment uses ipinfo.io instead of the rate-limited
    /// ip-api.com. Selected once at startup.
    #[envconfig(from = "IPINFO_TOKEN")]
    pub ipinfo_token: Option<String>,

    #[envconfig(from = "RATE_LIMIT_TTL_SECS", default = "300")]
    pub rate_limit_ttl_secs: u64,

    #[envconfig(from = "RETRY_INITIAL_INTERVAL_MS", default = "500")]
    pub retry_initial_interval_ms: u64,

    #[envconfig(from = "RETRY_MAX_INTERVAL_SECS", default = "10")]
    pub retry_max_interval_secs: u64,

    #[envconfig(from = "RETRY_MAX_ELAPSED_SECS", default = "30")]
    pub retry_max_elapsed_secs: u64,

    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(from = "PROMETHEUS_ADDRESS", default = "0.0.0.0:9090")]
    pub prometheus_address: SocketAddr,

    #[envconfig(from = "OTEL_URL")]
    pub otel_url: Option<String>,

    #[envconfig(from = "OTEL_SAMPLING_RATE", default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(from = "OTEL_SERVICE_NAME", default = "ssh-honeypot")]
    pub otel_service_name: String,
}
