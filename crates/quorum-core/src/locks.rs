//! Lock state machine
//!
//! Deterministically translates committed `LockCommand`s into updates of the
//! lock and wait tables. Mutations only ever happen from the consensus apply
//! path, which is serialized; the internal mutex additionally gives `/status`
//! a consistent snapshot. Conflicting acquires join a FIFO wait list unless
//! doing so would close a cycle in the wait-for graph, in which case the
//! request is rejected outright. Releases do not promote waiters; a waiter
//! must retry its acquire.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use quorum_traits::{LockCommand, LockMode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result class of one applied command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    GrantedNew,
    GrantedReentrant,
    GrantedJoined,
    Waiting,
    AlreadyWaiting,
    RejectedDeadlock,
    ReleasedPartial,
    ReleasedFinal,
    NotOwner,
}

impl ApplyOutcome {
    pub fn success(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::GrantedNew
                | ApplyOutcome::GrantedReentrant
                | ApplyOutcome::GrantedJoined
                | ApplyOutcome::ReleasedPartial
                | ApplyOutcome::ReleasedFinal
        )
    }

    /// External message for the client reply
    pub fn message(&self) -> &'static str {
        match self {
            ApplyOutcome::GrantedNew => "Lock granted",
            ApplyOutcome::GrantedReentrant => "Lock already held (re-entrant)",
            ApplyOutcome::GrantedJoined => "Shared lock granted",
            ApplyOutcome::Waiting => "Resource locked, request added to wait list.",
            ApplyOutcome::AlreadyWaiting => "Resource locked, request already in wait list.",
            ApplyOutcome::RejectedDeadlock => "Deadlock detected! Request aborted",
            ApplyOutcome::ReleasedPartial | ApplyOutcome::ReleasedFinal => "Lock released",
            ApplyOutcome::NotOwner => "You do not hold this lock",
        }
    }

    fn audit_label(&self) -> &'static str {
        match self {
            ApplyOutcome::GrantedNew => "GRANTED_NEW",
            ApplyOutcome::GrantedReentrant => "GRANTED_REENTRANT",
            ApplyOutcome::GrantedJoined => "GRANTED_JOINED",
            ApplyOutcome::Waiting => "WAITING",
            ApplyOutcome::AlreadyWaiting => "ALREADY_WAITING",
            ApplyOutcome::RejectedDeadlock => "REJECTED_DEADLOCK",
            ApplyOutcome::ReleasedPartial => "RELEASED_PARTIAL",
            ApplyOutcome::ReleasedFinal => "RELEASED_FINAL",
            ApplyOutcome::NotOwner => "NOT_OWNER",
        }
    }
}

/// Audit record emitted for every completed acquire/release
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub operation: String,
    pub client: String,
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_type: Option<LockMode>,
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

/// Observer sink for the audit trail. Recording is infallible so audit can
/// never fail an apply.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord);
}

/// Default sink: structured tracing events on the `audit` target
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) {
        let lock_type = record
            .lock_type
            .map(|mode| mode.to_string())
            .unwrap_or_else(|| "-".to_string());
        info!(
            target: "audit",
            operation = %record.operation,
            client = %record.client,
            resource = %record.resource,
            lock_type = %lock_type,
            result = %record.result,
            timestamp = %record.timestamp.to_rfc3339(),
        );
    }
}

/// Buffering sink for tests and diagnostics
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) {
        self.records.lock().push(record.clone());
    }
}

#[derive(Debug, Clone)]
struct LockRecord {
    mode: LockMode,
    owners: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct LockTables {
    locks: HashMap<String, LockRecord>,
    // resource -> waiting clients, FIFO
    wait_list: HashMap<String, Vec<String>>,
}

/// Snapshot of the lock tables for `/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocksStatus {
    pub active_locks: BTreeMap<String, LockStatusEntry>,
    pub wait_list: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatusEntry {
    #[serde(rename = "type")]
    pub mode: LockMode,
    pub owners: Vec<String>,
}

/// State machine over the lock and wait tables
pub struct LockManager {
    tables: Mutex<LockTables>,
    audit: Arc<dyn AuditSink>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_audit_sink(Arc::new(TracingAuditSink))
    }

    pub fn with_audit_sink(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            tables: Mutex::new(LockTables::default()),
            audit,
        }
    }

    /// Apply one committed command. Deterministic and total: the same
    /// command sequence produces the same tables on every replica.
    pub fn apply(&self, command: &LockCommand) -> ApplyOutcome {
        let (outcome, audit) = {
            let mut tables = self.tables.lock();
            match command {
                LockCommand::Acquire {
                    resource_id,
                    client_id,
                    mode,
                } => {
                    let outcome = Self::acquire(&mut tables, resource_id, client_id, *mode);
                    let audit = Self::acquire_audit(&outcome, resource_id, client_id, *mode);
                    (outcome, audit)
                }
                LockCommand::Release {
                    resource_id,
                    client_id,
                } => {
                    let outcome = Self::release(&mut tables, resource_id, client_id);
                    let audit = Self::release_audit(&outcome, resource_id, client_id);
                    (outcome, audit)
                }
            }
        };

        // Audit happens outside the table lock and cannot fail the apply.
        if let Some(record) = audit {
            self.audit.record(&record);
        }
        outcome
    }

    fn acquire(
        tables: &mut LockTables,
        resource_id: &str,
        client_id: &str,
        mode: LockMode,
    ) -> ApplyOutcome {
        if let Some(record) = tables.locks.get_mut(resource_id) {
            if record.owners.contains(client_id) {
                // Re-entrant, unless a shared holder asks to upgrade.
                if record.mode == LockMode::Exclusive || mode == LockMode::Shared {
                    debug!("Lock already held (re-entrant) by {client_id} on {resource_id}");
                    return ApplyOutcome::GrantedReentrant;
                }
            }

            let conflict = record.mode == LockMode::Exclusive
                || (mode == LockMode::Exclusive && !record.owners.is_empty());

            if !conflict {
                record.owners.insert(client_id.to_string());
                Self::remove_from_all_wait_lists(tables, client_id);
                info!("Lock GRANTED (shared, joining) for {client_id} on {resource_id}");
                return ApplyOutcome::GrantedJoined;
            }

            debug!("Lock conflict for {client_id} on {resource_id}, checking for deadlock");

            let waiters = tables.wait_list.entry(resource_id.to_string()).or_default();
            if waiters.iter().any(|w| w == client_id) {
                return ApplyOutcome::AlreadyWaiting;
            }

            // The tentative wait entry must be present while the wait-for
            // graph is checked; it is withdrawn again if it closes a cycle.
            waiters.push(client_id.to_string());
            if Self::detect_deadlock(tables, client_id) {
                if let Some(waiters) = tables.wait_list.get_mut(resource_id) {
                    waiters.retain(|w| w != client_id);
                    if waiters.is_empty() {
                        tables.wait_list.remove(resource_id);
                    }
                }
                warn!("Deadlock detected involving {client_id}, acquire of {resource_id} aborted");
                return ApplyOutcome::RejectedDeadlock;
            }

            info!("{client_id} added to wait list for {resource_id}");
            return ApplyOutcome::Waiting;
        }

        // First acquire on this resource.
        tables.locks.insert(
            resource_id.to_string(),
            LockRecord {
                mode,
                owners: BTreeSet::from([client_id.to_string()]),
            },
        );
        Self::remove_from_all_wait_lists(tables, client_id);
        info!("Lock GRANTED (new) for {client_id} on {resource_id} ({mode})");
        ApplyOutcome::GrantedNew
    }

    fn release(tables: &mut LockTables, resource_id: &str, client_id: &str) -> ApplyOutcome {
        let Some(record) = tables.locks.get_mut(resource_id) else {
            return ApplyOutcome::NotOwner;
        };
        if !record.owners.remove(client_id) {
            return ApplyOutcome::NotOwner;
        }

        if record.owners.is_empty() {
            tables.locks.remove(resource_id);
            tables.wait_list.remove(resource_id);
            info!("Lock RELEASED and removed for {client_id} on {resource_id}");
            ApplyOutcome::ReleasedFinal
        } else {
            info!("Lock RELEASED for {client_id} on {resource_id}, still held by others");
            ApplyOutcome::ReleasedPartial
        }
    }

    /// Cycle check on the wait-for graph. The graph is rebuilt from the
    /// authoritative tables on every check: an edge runs from each waiter of
    /// a currently-held resource to each of its owners. Iterative DFS from
    /// `start_client`; an edge back into the DFS stack is a cycle.
    fn detect_deadlock(tables: &LockTables, start_client: &str) -> bool {
        let mut graph: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        for (resource, waiters) in &tables.wait_list {
            let Some(record) = tables.locks.get(resource) else {
                continue;
            };
            if record.owners.is_empty() {
                continue;
            }
            for waiter in waiters {
                graph
                    .entry(waiter.as_str())
                    .or_default()
                    .extend(record.owners.iter().map(String::as_str));
            }
        }

        let mut visiting: HashSet<&str> = HashSet::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![start_client];

        while let Some(&client) = stack.last() {
            if visited.insert(client) {
                visiting.insert(client);
            }

            let mut pushed = false;
            if let Some(neighbors) = graph.get(client) {
                for &neighbor in neighbors {
                    if visiting.contains(neighbor) {
                        debug!("Wait-for cycle found at {neighbor}");
                        return true;
                    }
                    if !visited.contains(neighbor) {
                        stack.push(neighbor);
                        pushed = true;
                        break;
                    }
                }
            }

            if !pushed {
                let done = stack.pop().expect("stack is non-empty");
                visiting.remove(done);
            }
        }
        false
    }

    /// A granted client stops waiting everywhere
    fn remove_from_all_wait_lists(tables: &mut LockTables, client_id: &str) {
        tables.wait_list.retain(|_, waiters| {
            waiters.retain(|w| w != client_id);
            !waiters.is_empty()
        });
    }

    /// Consistent snapshot of both tables
    pub fn status(&self) -> LocksStatus {
        let tables = self.tables.lock();
        LocksStatus {
            active_locks: tables
                .locks
                .iter()
                .map(|(resource, record)| {
                    (
                        resource.clone(),
                        LockStatusEntry {
                            mode: record.mode,
                            owners: record.owners.iter().cloned().collect(),
                        },
                    )
                })
                .collect(),
            wait_list: tables
                .wait_list
                .iter()
                .filter(|(_, waiters)| !waiters.is_empty())
                .map(|(resource, waiters)| (resource.clone(), waiters.clone()))
                .collect(),
        }
    }

    fn acquire_audit(
        outcome: &ApplyOutcome,
        resource_id: &str,
        client_id: &str,
        mode: LockMode,
    ) -> Option<AuditRecord> {
        let operation = match outcome {
            ApplyOutcome::GrantedNew | ApplyOutcome::GrantedReentrant | ApplyOutcome::GrantedJoined => {
                "LOCK_ACQUIRED"
            }
            ApplyOutcome::Waiting => "LOCK_ACQUIRE_WAITING",
            ApplyOutcome::RejectedDeadlock => "LOCK_ACQUIRE_FAILED",
            // No state change, nothing to audit.
            ApplyOutcome::AlreadyWaiting => return None,
            _ => return None,
        };
        Some(AuditRecord {
            operation: operation.to_string(),
            client: client_id.to_string(),
            resource: resource_id.to_string(),
            lock_type: Some(mode),
            result: outcome.audit_label().to_string(),
            timestamp: Utc::now(),
        })
    }

    fn release_audit(
        outcome: &ApplyOutcome,
        resource_id: &str,
        client_id: &str,
    ) -> Option<AuditRecord> {
        let operation = match outcome {
            ApplyOutcome::ReleasedPartial | ApplyOutcome::ReleasedFinal => "LOCK_RELEASED",
            ApplyOutcome::NotOwner => "LOCK_RELEASE_FAILED",
            _ => return None,
        };
        Some(AuditRecord {
            operation: operation.to_string(),
            client: client_id.to_string(),
            resource: resource_id.to_string(),
            lock_type: None,
            result: outcome.audit_label().to_string(),
            timestamp: Utc::now(),
        })
    }
}
