use std::net::SocketAddr;

use time::OffsetDateTime;

/// What the attacker supplied on this attempt. Exactly one variant per
/// attempt; the credential lives inside the variant, never alongside it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthAttempt {
    /// Bare session open, no credential.
    Session,
    Password(String),
    /// Public key in authorized_keys form: "<algo> <base64>".
    PublicKey(String),
}

/// One inbound login attempt, captured from a single protocol callback.
/// Immutable after construction; owned by the pipeline task processing it.
#[derive(Clone, Debug)]
pub struct AttemptRecord {
    pub user: String,
    pub remote_host: String,
    pub remote_port: String,
    pub local_host: String,
    pub local_port: String,
    pub client_version: String,
    pub timestamp: OffsetDateTime,
    pub auth: AuthAttempt,
}

/// Connection-level metadata the protocol server hands to each callback.
#[derive(Clone, Debug)]
pub struct ConnectionMeta {
    pub remote_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
    pub client_version: String,
}

fn split_addr(addr: Option<SocketAddr>) -> (String, String) {
    match addr {
        Some(addr) => (addr.ip().to_string(), addr.port().to_string()),
        None => (String::new(), String::new()),
    }
}

impl AttemptRecord {
    /// Stamp an attempt with the current time.
    pub fn capture(meta: &ConnectionMeta, user: &str, auth: AuthAttempt) -> AttemptRecord {
        let (remote_host, remote_port) = split_addr(meta.remote_addr);
        let (local_host, local_port) = split_addr(meta.local_addr);

        AttemptRecord {
            user: user.to_string(),
            remote_host,
            remote_port,
            local_host,
            local_port,
            client_version: meta.client_version.clone(),
            timestamp: OffsetDateTime::now_utc(),
            auth,
        }
    }

    /// Tag value identifying the callback that produced this attempt.
    pub fn function(&self) -> &'static str {
        match self.auth {
            AuthAttempt::Session => "session",
            AuthAttempt::Password(_) => "password",
            AuthAttempt::PublicKey(_) => "public_key",
        }
    }

    pub fn password(&self) -> Option<&str> {
        match &self.auth {
            AuthAttempt::Password(password) => Some(password),
            _ => None,
        }
    }

    pub fn public_key(&self) -> Option<&str> {
        match &self.auth {
            AuthAttempt::PublicKey(key) => Some(key),
            _ => None,
        }
    }
}
