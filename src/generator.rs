//! Record generation from Mesos master state.
//!
//! A [`RecordGenerator`] fetches `/master/state.json` from the current
//! leader (falling back through the configured masters) and transforms the
//! document into a [`RecordSnapshot`]. Assembly itself is a pure function
//! of the fetched state and the configuration.

use std::net::{Ipv4Addr, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{DnsConfig, HashScheme};
use crate::error::DnsError;
use crate::labels::LabelScheme;
use crate::records::{RecordKind, RecordSnapshot};
use crate::state::{Pid, State, Task};
use crate::template::{self, CompiledTemplate, Context, TemplateError};

/// Timeout for a single master state fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Canonical task name template, always generated.
const CANONICAL_TEMPLATE: &str = "{name}-{task-id-hash}-{slave-id-short}.{framework}";
/// RFC 2782 task service templates.
const TCP_SRV_TEMPLATE: &str = "_{name}._tcp.{framework}";
const UDP_SRV_TEMPLATE: &str = "_{name}._udp.{framework}";
/// Discovery-port service template.
const DISCOVERY_SRV_TEMPLATE: &str = "_{name}._{port-protocol}.{framework}";

/// Fetches master state and produces record snapshots.
pub struct RecordGenerator {
    http: reqwest::Client,
}

impl Default for RecordGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordGenerator {
    /// Create a generator with its own HTTP client.
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// Run one full generation cycle: discover the leading master, fetch
    /// its state and assemble a fresh snapshot.
    pub async fn generate(
        &self,
        leader_hint: Option<&str>,
        config: &DnsConfig,
    ) -> Result<RecordSnapshot, DnsError> {
        let state = self.find_master(leader_hint, &config.masters).await?;
        if state.leader.is_empty() {
            return Err(DnsError::NoMaster);
        }
        insert_state(&state, config)
    }

    /// Try the hinted leader first, then each configured master in order.
    /// Fails only when no candidate claims leadership.
    pub async fn find_master(
        &self,
        leader_hint: Option<&str>,
        masters: &[String],
    ) -> Result<State, DnsError> {
        if let Some(hint) = leader_hint {
            debug!(leader = hint, "trying hinted leader");
            match Pid::parse(hint) {
                Some(pid) => match self.load_wrap(&pid.host, &pid.port).await {
                    Ok(state) if !state.leader.is_empty() => return Ok(state),
                    Ok(_) => warn!(leader = hint, "hinted leader did not claim leadership"),
                    Err(e) => warn!(leader = hint, "hinted leader unreachable: {e}"),
                },
                None => warn!(leader = hint, "malformed leader hint"),
            }
            if masters.is_empty() {
                return Err(DnsError::NoMaster);
            }
            info!("falling back to configured masters");
        }

        for master in masters {
            let Some((host, port)) = master.split_once(':') else {
                error!(master = %master, "unable to split master into host and port");
                continue;
            };
            match self.load_wrap(host, port).await {
                Ok(state) if !state.leader.is_empty() => return Ok(state),
                Ok(_) => debug!(master = %master, "not a leader, trying next one"),
                Err(e) => debug!(master = %master, "master unreachable: {e}"),
            }
        }

        Err(DnsError::NoMaster)
    }

    /// Fetch state from one candidate, following at most one redirect to
    /// the master the response names as leader.
    async fn load_wrap(&self, host: &str, port: &str) -> Result<State, DnsError> {
        debug!(host, "reloading from master");
        let state = self.load_from_master(host, port).await?;

        if let Some(pid) = Pid::parse(&state.leader) {
            if pid.host != host {
                debug!(leader = %pid.host, "master changed, following once");
                return self.load_from_master(&pid.host, port).await;
            }
        }
        Ok(state)
    }

    async fn load_from_master(&self, host: &str, port: &str) -> Result<State, DnsError> {
        let url = format!("http://{host}:{port}/master/state.json");
        let resp = self.http.get(&url).send().await?.error_for_status()?;
        Ok(resp.json::<State>().await?)
    }
}

/// Assemble a snapshot from a state document. Pure except for IPv4
/// resolution of hostnames appearing in the document and, for a wildcard
/// listener, local interface enumeration.
pub fn insert_state(state: &State, config: &DnsConfig) -> Result<RecordSnapshot, DnsError> {
    let spec = config.label_scheme();
    let mut snap = RecordSnapshot::new();

    framework_records(&mut snap, state, &config.domain, spec);
    slave_records(&mut snap, state, &config.domain);
    master_record(&mut snap, &config.domain, &config.masters, &state.leader);
    listener_record(&mut snap, &config.listener, &config.soa_name);
    task_records(&mut snap, state, config, spec)?;

    Ok(snap)
}

/// `<framework>.<domain>.` A plus `_framework._tcp.<framework>.<domain>.`
/// SRV per framework.
fn framework_records(snap: &mut RecordSnapshot, state: &State, domain: &str, spec: LabelScheme) {
    for framework in &state.frameworks {
        let fname = spec.domain_frag(&framework.name);
        let (host, port) = framework.host_port();
        let Some(address) = resolve_ipv4(&host) else {
            error!(host = %host, framework = %framework.name, "cannot resolve framework host");
            continue;
        };
        let a = format!("{fname}.{domain}.");
        snap.insert(&a, &address, RecordKind::A);
        if !port.is_empty() {
            let srv = format!("{a}:{port}");
            snap.insert(&format!("_framework._tcp.{a}"), &srv, RecordKind::Srv);
        }
    }
}

/// `slave.<domain>.` A and `_slave._tcp.<domain>.` SRV per slave, plus the
/// slave IP table consumed by task records. Slaves whose host does not
/// resolve to IPv4 are omitted from the table.
fn slave_records(snap: &mut RecordSnapshot, state: &State, domain: &str) {
    for slave in &state.slaves {
        let Some(pid) = slave.upid() else {
            warn!(slave = %slave.id, pid = %slave.pid, "malformed slave pid");
            continue;
        };
        let Some(address) = resolve_ipv4(&pid.host) else {
            warn!(slave = %slave.id, host = %pid.host, "slave host is not resolvable to IPv4");
            continue;
        };
        let a = format!("slave.{domain}.");
        snap.insert(&a, &address, RecordKind::A);
        snap.insert(
            &format!("_slave._tcp.{domain}."),
            &format!("{a}:{}", pid.port),
            RecordKind::Srv,
        );
        snap.set_slave_ip(&slave.id, &address);
    }
}

/// `leader.<domain>.`, `master.<domain>.` and enumerated
/// `masterN.<domain>.` A records, plus `_leader._tcp/_udp` SRV.
///
/// The masters are indexed in their configured order so that `masterN`
/// assignments stay stable across refreshes; operators read these to
/// identify nodes. A leader missing from the list is appended as the
/// final index.
fn master_record(snap: &mut RecordSnapshot, domain: &str, masters: &[String], leader: &str) {
    let Some(pid) = Pid::parse(leader) else {
        if !leader.is_empty() {
            error!(leader = %leader, "malformed leader pid");
        }
        return;
    };
    let leader_address = format!("{}:{}", pid.host, pid.port);

    let arec = format!("leader.{domain}.");
    snap.insert(&arec, &pid.host, RecordKind::A);
    snap.insert(&format!("master.{domain}."), &pid.host, RecordKind::A);

    let srv_target = format!("leader.{domain}.:{}", pid.port);
    snap.insert(&format!("_leader._tcp.{domain}."), &srv_target, RecordKind::Srv);
    snap.insert(&format!("_leader._udp.{domain}."), &srv_target, RecordKind::Srv);

    let mut added_leader_index = false;
    let mut idx = 0;
    for master in masters {
        let Some((host, _)) = master.split_once(':') else {
            error!(master = %master, "unable to split master into host and port");
            continue;
        };

        if master != &leader_address {
            // a duplicate master takes no index
            if !snap.insert(&format!("master.{domain}."), host, RecordKind::A) {
                continue;
            }
        }
        if master == &leader_address && added_leader_index {
            continue;
        }

        snap.insert(&format!("master{idx}.{domain}."), host, RecordKind::A);
        idx += 1;

        if master == &leader_address {
            added_leader_index = true;
        }
    }

    if !added_leader_index {
        if !masters.is_empty() {
            warn!(leader = %leader, "leader is not in the configured master list");
        }
        snap.insert(&format!("master{idx}.{domain}."), &pid.host, RecordKind::A);
    }
}

/// The server's own A record under the SOA name.
fn listener_record(snap: &mut RecordSnapshot, listener: &str, soa_name: &str) {
    if listener == "0.0.0.0" {
        match local_ip_address::list_afinet_netifas() {
            Ok(ifas) => {
                for (_, ip) in ifas {
                    if let std::net::IpAddr::V4(v4) = ip {
                        if !v4.is_loopback() {
                            snap.insert(soa_name, &v4.to_string(), RecordKind::A);
                        }
                    }
                }
            }
            Err(e) => error!("failed to enumerate local interfaces: {e}"),
        }
    } else {
        snap.insert(soa_name, listener, RecordKind::A);
    }
}

/// A record template rooted below a fixed domain, with the record target
/// picked out of the host context by key.
struct RecordTemplate<'a> {
    templates: Vec<&'a CompiledTemplate>,
    domain: String,
    host_key: &'static str,
}

fn add_task_records(
    snap: &mut RecordSnapshot,
    rt: &RecordTemplate<'_>,
    name_ctx: &Context,
    host_ctx: &Context,
    host_postfix: &str,
    kind: RecordKind,
) {
    let Some(host) = host_ctx.get(rt.host_key).filter(|h| !h.is_empty()) else {
        return;
    };
    for template in &rt.templates {
        match template.execute(name_ctx) {
            Ok(name) => {
                snap.insert(
                    &format!("{name}.{}.", rt.domain),
                    &format!("{host}{host_postfix}"),
                    kind,
                );
            }
            // expected whenever an optional variable is unbound
            Err(TemplateError::UndefinedVariable(_)) => continue,
            Err(e) => {
                debug!(template = %template, "template execution failed: {e}");
                continue;
            }
        }
    }
}

/// Template context for a task's name components, everything sanitized
/// under the active scheme.
fn name_context(task: &Task, framework: &str, scheme: HashScheme, spec: LabelScheme) -> Context {
    let mut ctx = Context::new();
    ctx.insert("framework".to_string(), framework.to_string());
    ctx.insert("slave-id-short".to_string(), slave_id_tail(&task.slave_id));
    ctx.insert("slave-id".to_string(), task.slave_id.clone());
    ctx.insert("task-id".to_string(), task.id.clone());
    ctx.insert("task-id-hash".to_string(), task_id_hash(scheme, &task.id));
    ctx.insert("name".to_string(), spec.each_label(&task.name));

    if task.has_discovery_info() {
        if let Some(discovery) = &task.discovery {
            let mut possibly_set = |key: &str, value: &str| {
                if !value.is_empty() {
                    ctx.insert(key.to_string(), spec.each_label(value));
                }
            };
            possibly_set("name", &discovery.name);
            possibly_set("version", &discovery.version);
            possibly_set("location", &discovery.location);
            possibly_set("environment", &discovery.environment);

            for label in &discovery.labels.labels {
                possibly_set(&format!("label:{}", label.key), &label.value);
            }
        }
    }

    ctx
}

/// Template context for a task's record targets: the task and slave IPs
/// plus the canonical names both record roots hang off of.
fn host_context(
    task: &Task,
    name_ctx: &Context,
    domain: &str,
    slave_ip: &str,
    config: &DnsConfig,
    canonical: &CompiledTemplate,
) -> Result<Context, TemplateError> {
    let mut ctx = Context::new();
    ctx.insert("slave-ip".to_string(), slave_ip.to_string());
    ctx.insert(
        "task-ip".to_string(),
        task.ip(&config.ip_sources, slave_ip).unwrap_or_default(),
    );

    let canonical_name = canonical.execute(name_ctx)?;
    ctx.insert("canonical".to_string(), format!("{canonical_name}.{domain}."));
    ctx.insert(
        "slave-canonical".to_string(),
        format!("{canonical_name}.slave.{domain}."),
    );
    Ok(ctx)
}

/// Task A and SRV records for every running task on a known slave.
fn task_records(
    snap: &mut RecordSnapshot,
    state: &State,
    config: &DnsConfig,
    spec: LabelScheme,
) -> Result<(), DnsError> {
    // user templates were validated at startup; skip any that fail anyway
    let mut user_templates = Vec::new();
    for t in &config.templates {
        match template::compile(t, spec) {
            Ok(compiled) => user_templates.push(compiled),
            Err(e) => error!(template = %t, "skipping invalid template: {e}"),
        }
    }

    let canonical = template::compile(CANONICAL_TEMPLATE, spec)?;
    let tcp_srv = template::compile(TCP_SRV_TEMPLATE, spec)?;
    let udp_srv = template::compile(UDP_SRV_TEMPLATE, spec)?;
    let discovery_srv = template::compile(DISCOVERY_SRV_TEMPLATE, spec)?;

    let mut a_templates: Vec<&CompiledTemplate> = user_templates.iter().collect();
    a_templates.push(&canonical);

    let domain = &config.domain;
    let a_tmpls = [
        RecordTemplate {
            templates: a_templates.clone(),
            domain: domain.clone(),
            host_key: "task-ip",
        },
        RecordTemplate {
            templates: a_templates,
            domain: format!("slave.{domain}"),
            host_key: "slave-ip",
        },
    ];
    let srv_task_tmpl = RecordTemplate {
        templates: vec![&tcp_srv, &udp_srv],
        domain: format!("slave.{domain}"),
        host_key: "slave-canonical",
    };
    let srv_plain_tmpl = RecordTemplate {
        templates: vec![&tcp_srv, &udp_srv],
        domain: domain.clone(),
        host_key: "canonical",
    };
    let srv_discovery_tmpl = RecordTemplate {
        templates: vec![&discovery_srv],
        domain: domain.clone(),
        host_key: "canonical",
    };

    for framework in &state.frameworks {
        let fname = spec.domain_frag(&framework.name);
        for task in &framework.tasks {
            let Some(slave_ip) = snap.slave_ip(&task.slave_id).map(str::to_string) else {
                continue;
            };
            if task.state != "TASK_RUNNING" {
                continue;
            }

            let mut name_ctx = name_context(task, &fname, config.task_hash, spec);
            let host_ctx =
                match host_context(task, &name_ctx, domain, &slave_ip, config, &canonical) {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        error!(task = %task.id, "cannot build canonical name: {e}");
                        continue;
                    }
                };

            for rt in &a_tmpls {
                add_task_records(snap, rt, &name_ctx, &host_ctx, "", RecordKind::A);
            }

            for port in task.ports() {
                add_task_records(
                    snap,
                    &srv_task_tmpl,
                    &name_ctx,
                    &host_ctx,
                    &format!(":{port}"),
                    RecordKind::Srv,
                );
            }

            if task.has_discovery_info() {
                if let Some(discovery) = &task.discovery {
                    for port in &discovery.ports.ports {
                        name_ctx
                            .insert("port-protocol".to_string(), spec.apply(&port.protocol));
                        name_ctx.insert("port-name".to_string(), spec.apply(&port.name));
                        add_task_records(
                            snap,
                            &srv_discovery_tmpl,
                            &name_ctx,
                            &host_ctx,
                            &format!(":{}", port.number),
                            RecordKind::Srv,
                        );
                    }
                }
            } else {
                for port in task.ports() {
                    add_task_records(
                        snap,
                        &srv_plain_tmpl,
                        &name_ctx,
                        &host_ctx,
                        &format!(":{port}"),
                        RecordKind::Srv,
                    );
                }
            }
        }
    }

    Ok(())
}

/// Translate a hostname into a dotted-quad IPv4 string. IP literals pass
/// through; anything else goes through the system resolver.
pub fn resolve_ipv4(host: &str) -> Option<String> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Some(ip.to_string());
    }
    let addrs = (host, 0u16).to_socket_addrs().ok()?;
    for addr in addrs {
        if let std::net::SocketAddr::V4(v4) = addr {
            return Some(v4.ip().to_string());
        }
    }
    None
}

/// The trailing field of a slave id, e.g. `S1` out of
/// `20160107-001256-134875658-5050-27524-S1`, lower-cased.
fn slave_id_tail(slave_id: &str) -> String {
    slave_id
        .rsplit('-')
        .next()
        .unwrap_or(slave_id)
        .to_lowercase()
}

fn fnv1a32(s: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in s.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

fn base36(mut n: u32) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ASCII")
}

/// Hash a task id for use in canonical names.
///
/// The default folds FNV-1a 32 into 17 bits (lower half plus upper half);
/// it collides readily but is what existing deployments have in their
/// zones. `base36` encodes the full 32-bit sum.
pub fn task_id_hash(scheme: HashScheme, id: &str) -> String {
    let sum = fnv1a32(id);
    match scheme {
        HashScheme::Fold17 => {
            let lower = u32::from(sum as u16);
            let upper = sum >> 16;
            (lower + upper).to_string()
        }
        HashScheme::Base36 => base36(sum),
    }
}
