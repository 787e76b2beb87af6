//! In-memory record set and its atomic publication handle.
//!
//! A [`RecordSnapshot`] is built in full by the generator, then published
//! through [`PublishedRecords`]. Published snapshots are immutable;
//! in-flight queries keep reading the snapshot they loaded while the next
//! refresh swaps in a new one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::trace;

/// Mapping from fully-qualified name to its values, insertion-ordered and
/// de-duplicated per name.
pub type Rrs = HashMap<String, Vec<String>>;

/// Which record map an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Address record; values are IPv4 dotted quads.
    A,
    /// Service record; values are `host.:port` targets.
    Srv,
}

/// A generated record set plus the slave IP table used while building
/// task records.
#[derive(Debug, Default)]
pub struct RecordSnapshot {
    a: Rrs,
    srv: Rrs,
    slave_ips: HashMap<String, String>,
}

impl RecordSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record unless the `(name, value)` pair is already present
    /// in the map for `kind`. Empty values are rejected. Returns whether
    /// the record was added.
    pub fn insert(&mut self, name: &str, value: &str, kind: RecordKind) -> bool {
        if value.is_empty() || self.contains(name, value, kind) {
            return false;
        }
        trace!(kind = ?kind, name, value, "insert record");
        let map = match kind {
            RecordKind::A => &mut self.a,
            RecordKind::Srv => &mut self.srv,
        };
        map.entry(name.to_string())
            .or_default()
            .push(value.to_string());
        true
    }

    /// Whether the exact `(name, value)` pair exists in the map for `kind`.
    pub fn contains(&self, name: &str, value: &str, kind: RecordKind) -> bool {
        let map = match kind {
            RecordKind::A => &self.a,
            RecordKind::Srv => &self.srv,
        };
        map.get(name).is_some_and(|vals| vals.iter().any(|v| v == value))
    }

    /// A values for a name, in insertion order.
    pub fn a_values(&self, name: &str) -> &[String] {
        self.a.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// SRV targets for a name, in insertion order.
    pub fn srv_values(&self, name: &str) -> &[String] {
        self.srv.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether the name exists in either record map.
    pub fn has_name(&self, name: &str) -> bool {
        self.a.contains_key(name) || self.srv.contains_key(name)
    }

    /// Record the resolved IP of a slave for later task-record assembly.
    pub fn set_slave_ip(&mut self, slave_id: &str, ip: &str) {
        self.slave_ips
            .insert(slave_id.to_string(), ip.to_string());
    }

    /// Resolved IP of a slave, when it resolved to IPv4 during generation.
    pub fn slave_ip(&self, slave_id: &str) -> Option<&str> {
        self.slave_ips.get(slave_id).map(String::as_str)
    }

    /// Number of distinct A names.
    pub fn a_count(&self) -> usize {
        self.a.len()
    }

    /// Number of distinct SRV names.
    pub fn srv_count(&self) -> usize {
        self.srv.len()
    }

    /// Number of slaves with a resolved IP.
    pub fn slave_count(&self) -> usize {
        self.slave_ips.len()
    }
}

/// Shared handle to the currently published snapshot.
///
/// Readers load the current snapshot once per query; the refresh loop is
/// the single writer. The swap is a plain atomic pointer exchange, so
/// visibility is monotonic: a reader that has seen generation N never
/// observes an earlier one.
#[derive(Clone)]
pub struct PublishedRecords {
    current: Arc<ArcSwap<RecordSnapshot>>,
    generation: Arc<AtomicU32>,
}

impl Default for PublishedRecords {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishedRecords {
    /// Create a handle holding an empty snapshot at generation zero.
    pub fn new() -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(RecordSnapshot::new())),
            generation: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Load the current snapshot.
    pub fn load(&self) -> Arc<RecordSnapshot> {
        self.current.load_full()
    }

    /// Replace the published snapshot and bump the generation counter.
    pub fn publish(&self, snapshot: RecordSnapshot) {
        self.current.store(Arc::new(snapshot));
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    /// Generation counter; doubles as the SOA serial.
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Relaxed)
    }
}
