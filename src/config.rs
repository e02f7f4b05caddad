// src/config.rs

//! Driver configuration: the single options record a `Session` is built
//! from, plus named execution profiles and the TLS context.

use crate::connection::auth::AuthProvider;
use crate::core::errors::ZirconError;
use crate::core::metrics::{MetricsRef, NoopMetricsSink};
use crate::core::policies::address::{AddressTranslator, IdentityTranslator};
use crate::core::policies::load_balancing::LoadBalancingPolicy;
use crate::core::policies::reconnection::{ExponentialReconnectionPolicy, ReconnectionPolicy};
use crate::core::policies::retry::{DefaultRetryPolicy, RetryPolicy};
use crate::core::policies::speculative::{
    NoSpeculativeExecutionPolicy, SpeculativeExecutionPolicy,
};
use crate::core::policies::timestamp::{MonotonicTimestampGenerator, TimestampGenerator};
use crate::core::protocol::consistency::Consistency;
use crate::core::protocol::frame::ProtocolVersion;
use bytes::Bytes;
use once_cell::sync::Lazy;
use rustls::pki_types::ServerName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::TlsConnector;

/// Default CQL native transport port.
pub const DEFAULT_PORT: u16 = 9042;

/// One shared no-op sink rather than an allocation per default config.
static NOOP_METRICS: Lazy<MetricsRef> = Lazy::new(|| Arc::new(NoopMetricsSink));

/// Connection pool sizing and keep-alive.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PoolingOptions {
    /// Connections per host at distance `local`.
    #[serde(default = "default_core_connections_local")]
    pub core_connections_per_host_local: usize,
    /// Connections per host at distance `remote`.
    #[serde(default = "default_core_connections_remote")]
    pub core_connections_per_host_remote: usize,
    /// Seconds of send-side silence before an OPTIONS heartbeat. `0`
    /// disables the heartbeat.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Cap on concurrent requests multiplexed over one connection.
    #[serde(default = "default_max_requests_per_connection")]
    pub max_requests_per_connection: usize,
}

impl Default for PoolingOptions {
    fn default() -> Self {
        Self {
            core_connections_per_host_local: default_core_connections_local(),
            core_connections_per_host_remote: default_core_connections_remote(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            max_requests_per_connection: default_max_requests_per_connection(),
        }
    }
}

fn default_core_connections_local() -> usize {
    2
}
fn default_core_connections_remote() -> usize {
    1
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_max_requests_per_connection() -> usize {
    2048
}

/// Socket-level timeouts.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SocketOptions {
    /// Bound on initial socket establishment, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Default per-request timeout, measured from frame handoff to
    /// response, in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_read_timeout_ms() -> u64 {
    12_000
}

/// Per-request defaults, overridable per execution profile.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub consistency: Consistency,
    pub serial_consistency: Option<Consistency>,
    pub fetch_size: i32,
    /// Prepare statements transparently when `execute` is called with bound
    /// values against a plain query string.
    pub prepare: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            consistency: Consistency::LocalOne,
            serial_consistency: None,
            fetch_size: 5_000,
            prepare: true,
        }
    }
}

/// Value-encoding preferences.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct EncodingOptions {
    /// Treat missing named parameters as `unset` (protocol v4+) rather than
    /// as an error.
    #[serde(default)]
    pub use_undefined_as_unset: bool,
}

/// TLS parameters. Building these into a context happens once at `connect`.
#[derive(Debug, Clone, Default)]
pub struct SslOptions {
    /// Extra trusted CA certificates, PEM.
    pub ca_certificate_path: Option<String>,
    /// Override for the name verified against the server certificate;
    /// defaults to the host's IP address.
    pub server_name: Option<String>,
}

/// The ready-to-use TLS context shared by every connection.
pub struct SslContext {
    connector: TlsConnector,
    server_name: Option<ServerName<'static>>,
}

impl SslContext {
    pub fn from_options(options: &SslOptions) -> Result<Self, ZirconError> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(path) = &options.ca_certificate_path {
            let pem = fs::read(path)?;
            for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
                roots
                    .add(cert.map_err(|e| ZirconError::Tls(e.to_string()))?)
                    .map_err(|e| ZirconError::Tls(e.to_string()))?;
            }
        }
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let server_name = options
            .server_name
            .as_deref()
            .map(|name| {
                ServerName::try_from(name.to_owned())
                    .map_err(|e| ZirconError::Tls(format!("Invalid TLS server name: {e}")))
            })
            .transpose()?;
        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
        })
    }

    pub fn connector(&self) -> &TlsConnector {
        &self.connector
    }

    /// The name to verify for a connection to `ip`: the configured override,
    /// or the IP itself.
    pub fn server_name(&self, ip: IpAddr) -> ServerName<'static> {
        match &self.server_name {
            Some(name) => name.clone(),
            None => ServerName::IpAddress(ip.into()),
        }
    }
}

impl std::fmt::Debug for SslContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SslContext")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// One named way of executing requests: consistency, timeouts and policy
/// overrides. Everything unset falls back to the session defaults.
#[derive(Debug, Clone)]
pub struct ExecutionProfile {
    pub consistency: Consistency,
    pub serial_consistency: Option<Consistency>,
    pub request_timeout: Duration,
    pub fetch_size: i32,
    pub is_idempotent: bool,
    pub tracing: bool,
    pub custom_payload: Option<HashMap<String, Bytes>>,
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
    pub load_balancing: Option<Arc<dyn LoadBalancingPolicy>>,
    pub speculative: Option<Arc<dyn SpeculativeExecutionPolicy>>,
}

impl ExecutionProfile {
    /// The profile implied by the session-wide defaults.
    pub fn from_defaults(query: &QueryOptions, socket: &SocketOptions) -> Self {
        Self {
            consistency: query.consistency,
            serial_consistency: query.serial_consistency,
            request_timeout: Duration::from_millis(socket.read_timeout_ms),
            fetch_size: query.fetch_size,
            is_idempotent: false,
            tracing: false,
            custom_payload: None,
            retry_policy: None,
            load_balancing: None,
            speculative: None,
        }
    }
}

/// The pluggable behaviors; every field has a production-grade default.
#[derive(Debug, Clone)]
pub struct Policies {
    pub load_balancing: Option<Arc<dyn LoadBalancingPolicy>>,
    pub retry: Arc<dyn RetryPolicy>,
    pub reconnection: Arc<dyn ReconnectionPolicy>,
    pub speculative_execution: Arc<dyn SpeculativeExecutionPolicy>,
    pub address_translator: Arc<dyn AddressTranslator>,
    pub timestamp_generator: Arc<dyn TimestampGenerator>,
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            // The default LBP needs the local datacenter, so it is built at
            // connect time from `local_datacenter`; `None` means "default".
            load_balancing: None,
            retry: Arc::new(DefaultRetryPolicy),
            reconnection: Arc::new(ExponentialReconnectionPolicy::default()),
            speculative_execution: Arc::new(NoSpeculativeExecutionPolicy),
            address_translator: Arc::new(IdentityTranslator),
            timestamp_generator: Arc::new(MonotonicTimestampGenerator::new()),
        }
    }
}

/// Everything a `Session` is built from.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Initial hosts, as `host`, `host:port`, or IP literals.
    pub contact_points: Vec<String>,
    /// Port applied to contact points that do not carry one.
    pub port: u16,
    /// Required by datacenter-aware load balancing.
    pub local_datacenter: Option<String>,
    /// Upper bound for protocol negotiation.
    pub max_protocol_version: ProtocolVersion,
    pub pooling: PoolingOptions,
    pub socket: SocketOptions,
    pub query: QueryOptions,
    pub encoding: EncodingOptions,
    pub policies: Policies,
    pub ssl: Option<SslOptions>,
    pub auth_provider: Option<Arc<dyn AuthProvider>>,
    pub metrics: MetricsRef,
    /// Named execution profiles selectable per request.
    pub profiles: HashMap<String, ExecutionProfile>,
    /// Re-prepare cached statements on every host eagerly, not just on
    /// first use per host.
    pub prepare_on_all_hosts: bool,
    /// Keep schema metadata in sync with SCHEMA_CHANGE events.
    pub metadata_sync_enabled: bool,
    /// Quarantine before a host announced UP is probed and published.
    pub status_up_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            contact_points: Vec::new(),
            port: DEFAULT_PORT,
            local_datacenter: None,
            max_protocol_version: ProtocolVersion::DseV2,
            pooling: PoolingOptions::default(),
            socket: SocketOptions::default(),
            query: QueryOptions::default(),
            encoding: EncodingOptions::default(),
            policies: Policies::default(),
            ssl: None,
            auth_provider: None,
            metrics: NOOP_METRICS.clone(),
            profiles: HashMap::new(),
            prepare_on_all_hosts: true,
            metadata_sync_enabled: true,
            status_up_delay: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn new(contact_points: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            contact_points: contact_points.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Sanity checks that do not need the network.
    pub fn validate(&self) -> Result<(), ZirconError> {
        if self.contact_points.is_empty() {
            return Err(ZirconError::Config(
                "At least one contact point is required".into(),
            ));
        }
        if self.query.fetch_size <= 0 {
            return Err(ZirconError::Config(format!(
                "fetch_size must be positive, got {}",
                self.query.fetch_size
            )));
        }
        if self.pooling.core_connections_per_host_local == 0 {
            return Err(ZirconError::Config(
                "core_connections_per_host_local cannot be 0".into(),
            ));
        }
        if let Some(serial) = self.query.serial_consistency {
            if !serial.is_serial() {
                return Err(ZirconError::Config(format!(
                    "{serial} is not a serial consistency level"
                )));
            }
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        match self.pooling.heartbeat_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.socket.connect_timeout_ms)
    }

    pub fn default_profile(&self) -> ExecutionProfile {
        ExecutionProfile::from_defaults(&self.query, &self.socket)
    }
}
