//! Configuration types for mesos-dns.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::DnsError;
use crate::labels::LabelScheme;
use crate::template;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS server configuration. Immutable once finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Mesos masters as `ip:port`, in fallback order (required, at least
    /// one).
    pub masters: Vec<String>,

    /// Cluster zone, without trailing dot.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// IPv4 address to bind (UDP and TCP).
    #[serde(default = "default_listener")]
    pub listener: String,

    /// DNS server port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// TTL for generated A and SRV records, in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Record regeneration period, in seconds.
    #[serde(default = "default_refresh")]
    pub refresh_secs: u64,

    /// Upstream resolver IPs for out-of-zone queries, in preference
    /// order. Defaults to the system resolver configuration minus local
    /// addresses.
    #[serde(default)]
    pub resolvers: Vec<String>,

    /// Task IP sources, in preference order.
    #[serde(default = "default_ip_sources")]
    pub ip_sources: Vec<IpSource>,

    /// Additional name templates beyond the canonical one.
    #[serde(default)]
    pub templates: Vec<String>,

    /// Authoritative server name used in SOA replies and for the
    /// listener's own A record. Defaults to `mesos-dns.<domain>.`.
    #[serde(default)]
    pub soa_name: String,

    /// Enforce RFC 952 label syntax instead of RFC 1123.
    #[serde(default)]
    pub enforce_rfc952: bool,

    /// Task-id hash scheme used in canonical task names.
    #[serde(default)]
    pub task_hash: HashScheme,
}

/// Source of a task's IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpSource {
    /// Latest running status' first network info.
    Mesos,
    /// Docker containerizer's address on the last status update.
    Docker,
    /// Any network info address, newest status first.
    Netinfo,
    /// The resolved slave address.
    Host,
}

/// Hash scheme for the `task-id-hash` name component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashScheme {
    /// Historical 17-bit fold of FNV-1a (decimal). Collides readily but
    /// keeps names stable for existing deployments.
    #[default]
    Fold17,
    /// Full 32-bit FNV-1a encoded in base 36.
    Base36,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g. "info", "mesos_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_domain() -> String {
    "mesos".to_string()
}

fn default_listener() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    53
}

fn default_ttl() -> u32 {
    60
}

fn default_refresh() -> u64 {
    60
}

fn default_ip_sources() -> Vec<IpSource> {
    vec![
        IpSource::Netinfo,
        IpSource::Mesos,
        IpSource::Docker,
        IpSource::Host,
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Local interface addresses, used to exclude ourselves from the upstream
/// resolver list.
fn local_addresses() -> HashSet<IpAddr> {
    match local_ip_address::list_afinet_netifas() {
        Ok(ifas) => ifas.into_iter().map(|(_, ip)| ip).collect(),
        Err(e) => {
            warn!("failed to enumerate local interfaces: {e}");
            HashSet::new()
        }
    }
}

/// Upstream resolvers from the system configuration, excluding local
/// addresses. May be empty.
fn system_resolvers() -> Vec<String> {
    let (resolver_config, _) = match hickory_resolver::system_conf::read_system_conf() {
        Ok(conf) => conf,
        Err(e) => {
            warn!("failed to read system resolver configuration: {e}");
            return Vec::new();
        }
    };

    let local = local_addresses();
    let mut seen = HashSet::new();
    resolver_config
        .name_servers()
        .iter()
        .map(|ns| ns.socket_addr.ip())
        .filter(|ip| !ip.is_loopback() && !local.contains(ip))
        .filter(|ip| seen.insert(*ip))
        .map(|ip| ip.to_string())
        .collect()
}

impl DnsConfig {
    /// The label scheme selected by `enforce_rfc952`.
    pub fn label_scheme(&self) -> LabelScheme {
        if self.enforce_rfc952 {
            LabelScheme::Rfc952
        } else {
            LabelScheme::Rfc1123
        }
    }

    /// Record regeneration period.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs.max(1))
    }

    /// The socket address to bind.
    pub fn listen_addr(&self) -> Result<SocketAddr, DnsError> {
        let ip: IpAddr = self
            .listener
            .parse()
            .map_err(|_| DnsError::Config(format!("invalid listener address {:?}", self.listener)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Upstream resolver socket addresses (port 53), skipping entries that
    /// do not parse.
    pub fn upstream_addrs(&self) -> Vec<SocketAddr> {
        self.resolvers
            .iter()
            .filter_map(|r| {
                r.parse::<IpAddr>()
                    .map(|ip| SocketAddr::new(ip, 53))
                    .or_else(|_| r.parse::<SocketAddr>())
                    .ok()
            })
            .collect()
    }

    /// Validate and fill derived defaults. Must be called once before the
    /// configuration is handed to the server.
    ///
    /// Fails on an empty master list or an uncompilable user template;
    /// both are operator-correctable and fatal at startup.
    pub fn finalize(&mut self) -> Result<(), DnsError> {
        if self.masters.is_empty() {
            return Err(DnsError::Config("no masters configured".to_string()));
        }

        self.domain = self.domain.trim_end_matches('.').to_string();
        if self.domain.is_empty() {
            return Err(DnsError::Config("empty domain".to_string()));
        }

        if self.soa_name.is_empty() {
            self.soa_name = format!("mesos-dns.{}.", self.domain);
        } else if !self.soa_name.ends_with('.') {
            self.soa_name.push('.');
        }

        if self.ip_sources.is_empty() {
            self.ip_sources = default_ip_sources();
        }

        let spec = self.label_scheme();
        for t in &self.templates {
            template::compile(t, spec)?;
        }

        if self.resolvers.is_empty() {
            self.resolvers = system_resolvers();
            if self.resolvers.is_empty() {
                warn!("no upstream resolvers available; out-of-zone queries will fail");
            }
        }

        Ok(())
    }
}
