//! Typed view of the Mesos master state document.
//!
//! Only the fields consumed by record generation are modeled; everything
//! else in the document is ignored during deserialization.

use std::net::Ipv4Addr;

use serde::Deserialize;

use crate::config::IpSource;

/// Root of the `/master/state.json` document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct State {
    /// Leading master as `name@ip:port`; empty when the responder is not
    /// the leader.
    #[serde(default)]
    pub leader: String,

    /// Registered frameworks and their tasks.
    #[serde(default)]
    pub frameworks: Vec<Framework>,

    /// Registered slaves.
    #[serde(default)]
    pub slaves: Vec<Slave>,
}

/// A framework (scheduler) registered with the cluster.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Framework {
    /// Framework name as registered (arbitrary UTF-8).
    #[serde(default)]
    pub name: String,

    /// Hostname the scheduler reported.
    #[serde(default)]
    pub hostname: String,

    /// Scheduler process identifier (`name@host:port`).
    #[serde(default)]
    pub pid: String,

    /// Tasks owned by this framework.
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Framework {
    /// Host and port the scheduler is reachable at. Prefers the registered
    /// PID; falls back to the reported hostname with no port.
    pub fn host_port(&self) -> (String, String) {
        match Pid::parse(&self.pid) {
            Some(pid) => (pid.host, pid.port),
            None => (self.hostname.clone(), String::new()),
        }
    }
}

/// A slave (agent) node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Slave {
    /// Cluster-assigned slave identifier.
    #[serde(default)]
    pub id: String,

    /// Hostname the slave registered with.
    #[serde(default)]
    pub hostname: String,

    /// Slave process identifier (`slave(N)@ip:port`).
    #[serde(default)]
    pub pid: String,
}

impl Slave {
    /// Parsed process identifier, when well-formed.
    pub fn upid(&self) -> Option<Pid> {
        Pid::parse(&self.pid)
    }
}

/// A `name@host:port` process identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pid {
    /// Process name before the `@`.
    pub name: String,
    /// Host part.
    pub host: String,
    /// Port part (decimal string).
    pub port: String,
}

impl Pid {
    /// Parse `name@host:port`. Returns `None` when either separator is
    /// missing.
    pub fn parse(s: &str) -> Option<Pid> {
        let (name, address) = s.split_once('@')?;
        let (host, port) = address.split_once(':')?;
        if host.is_empty() || port.is_empty() {
            return None;
        }
        Some(Pid {
            name: name.to_string(),
            host: host.to_string(),
            port: port.to_string(),
        })
    }
}

/// A task scheduled on a slave.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    #[serde(default)]
    pub id: String,

    /// Task name (arbitrary UTF-8).
    #[serde(default)]
    pub name: String,

    /// Identifier of the slave running the task.
    #[serde(default)]
    pub slave_id: String,

    /// Task state, e.g. `TASK_RUNNING`.
    #[serde(default)]
    pub state: String,

    /// Declared resources; only the port ranges are consumed.
    #[serde(default)]
    pub resources: Resources,

    /// Optional service discovery metadata.
    #[serde(default)]
    pub discovery: Option<DiscoveryInfo>,

    /// Status updates, oldest first; container IPs live here.
    #[serde(default)]
    pub statuses: Vec<Status>,
}

/// Task resource declaration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Resources {
    /// Port ranges as `"[lo-hi, lo-hi, ...]"`.
    #[serde(default)]
    pub ports: String,
}

/// A single task status update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Status {
    /// Status state, e.g. `TASK_RUNNING`.
    #[serde(default)]
    pub state: String,

    /// Status timestamp (seconds).
    #[serde(default)]
    pub timestamp: f64,

    /// Container runtime status.
    #[serde(default)]
    pub container_status: ContainerStatus,
}

/// Container status attached to a task status update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerStatus {
    /// Network attachments of the container.
    #[serde(default)]
    pub network_infos: Vec<NetworkInfo>,
}

/// A single network attachment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkInfo {
    /// Legacy single-address field.
    #[serde(default)]
    pub ip_address: String,

    /// Current multi-address form.
    #[serde(default)]
    pub ip_addresses: Vec<IpAddress>,
}

/// One address of a network attachment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpAddress {
    /// The address literal.
    #[serde(default)]
    pub ip_address: String,
}

/// Service discovery metadata attached to a task.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryInfo {
    /// Discovered service name; replaces the task name in generated names.
    #[serde(default)]
    pub name: String,

    /// Optional version string.
    #[serde(default)]
    pub version: String,

    /// Optional location string.
    #[serde(default)]
    pub location: String,

    /// Optional environment string.
    #[serde(default)]
    pub environment: String,

    /// Free-form key/value labels.
    #[serde(default)]
    pub labels: Labels,

    /// Named, typed service ports.
    #[serde(default)]
    pub ports: DiscoveryPorts,
}

/// Label container mirroring the document nesting.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Labels {
    /// The labels themselves.
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// A single discovery label.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Label {
    /// Label key.
    #[serde(default)]
    pub key: String,
    /// Label value.
    #[serde(default)]
    pub value: String,
}

/// Port container mirroring the document nesting.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryPorts {
    /// The ports themselves.
    #[serde(default)]
    pub ports: Vec<DiscoveryPort>,
}

/// A single discovery port.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryPort {
    /// Port number.
    #[serde(default)]
    pub number: u32,
    /// Protocol, e.g. `tcp` or `udp`.
    #[serde(default)]
    pub protocol: String,
    /// Port name, e.g. `http`.
    #[serde(default)]
    pub name: String,
}

fn parse_ipv4(s: &str) -> Option<String> {
    s.parse::<Ipv4Addr>().ok().map(|ip| ip.to_string())
}

impl Task {
    /// True when the task carries non-empty discovery metadata.
    pub fn has_discovery_info(&self) -> bool {
        self.discovery.as_ref().is_some_and(|d| !d.name.is_empty())
    }

    /// Expand the declared port ranges into individual decimal port
    /// strings. Malformed input yields the empty sequence.
    pub fn ports(&self) -> Vec<String> {
        let s = self.resources.ports.trim();
        let Some(inner) = s.strip_prefix('[').and_then(|s| s.strip_suffix(']')) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for range in inner.split(',') {
            let range = range.trim();
            if range.is_empty() {
                continue;
            }
            let Some((lo, hi)) = range.split_once('-') else {
                return Vec::new();
            };
            let (Ok(lo), Ok(hi)) = (lo.trim().parse::<u32>(), hi.trim().parse::<u32>()) else {
                return Vec::new();
            };
            for port in lo..=hi {
                out.push(port.to_string());
            }
        }
        out
    }

    /// Walk the configured IP sources in order, returning the first one
    /// that yields an IPv4 address. `slave_ip` backs the `host` source.
    pub fn ip(&self, sources: &[IpSource], slave_ip: &str) -> Option<String> {
        for source in sources {
            let found = match source {
                IpSource::Mesos => self.mesos_ip(),
                IpSource::Docker => self.docker_ip(),
                IpSource::Netinfo => self.netinfo_ip(),
                IpSource::Host => parse_ipv4(slave_ip),
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Address reported by the latest running status, first network info.
    fn mesos_ip(&self) -> Option<String> {
        let status = self
            .statuses
            .iter()
            .rev()
            .find(|s| s.state == "TASK_RUNNING")?;
        let netinfo = status.container_status.network_infos.first()?;
        netinfo
            .ip_addresses
            .first()
            .and_then(|a| parse_ipv4(&a.ip_address))
            .or_else(|| parse_ipv4(&netinfo.ip_address))
    }

    /// Address from the last status update's legacy single-address field,
    /// as populated by the docker containerizer.
    fn docker_ip(&self) -> Option<String> {
        let status = self.statuses.last()?;
        status
            .container_status
            .network_infos
            .iter()
            .find_map(|n| parse_ipv4(&n.ip_address))
    }

    /// First address across all network infos, newest status first.
    fn netinfo_ip(&self) -> Option<String> {
        self.statuses.iter().rev().find_map(|status| {
            status.container_status.network_infos.iter().find_map(|n| {
                n.ip_addresses
                    .iter()
                    .find_map(|a| parse_ipv4(&a.ip_address))
                    .or_else(|| parse_ipv4(&n.ip_address))
            })
        })
    }
}
