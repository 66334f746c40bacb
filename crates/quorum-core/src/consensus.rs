//! Leader-based consensus engine
//!
//! Replicates an ordered command log to a majority of peers and applies
//! committed commands to the lock state machine in log order. The protocol
//! is deliberately simplified: no per-follower retry bookkeeping and no
//! persistence. A client command either commits in one synchronous
//! replication round or is rolled back out of the leader's log.
//!
//! All consensus state lives behind a single async mutex. Replication and
//! vote rounds release the mutex while the RPCs are in flight and
//! re-validate term and role before acting on the outcome.

use crate::locks::{ApplyOutcome, LockManager};
use crate::rpc::PeerClient;
use quorum_traits::{CoordinationError, LockCommand, NodeId, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const REQUEST_VOTE_PATH: &str = "request_vote";
pub const APPEND_ENTRIES_PATH: &str = "append_entries";

const FOLLOWER_TICK: Duration = Duration::from_millis(100);

/// Consensus role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeState {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Follower => write!(f, "FOLLOWER"),
            NodeState::Candidate => write!(f, "CANDIDATE"),
            NodeState::Leader => write!(f, "LEADER"),
        }
    }
}

/// One replicated log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub command: LockCommand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: u64,
    pub candidate_id: NodeId,
    pub last_log_index: i64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub leader_id: NodeId,
    #[serde(default = "no_index")]
    pub prev_log_index: i64,
    #[serde(default)]
    pub prev_log_term: u64,
    #[serde(default)]
    pub entries: Vec<LogEntry>,
    pub leader_commit: i64,
}

fn no_index() -> i64 {
    -1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub success: bool,
}

/// Snapshot of consensus state for `/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusStatus {
    pub node_id: NodeId,
    pub state: NodeState,
    pub term: u64,
    pub leader: Option<NodeId>,
    pub log_length: usize,
    pub commit_index: i64,
}

#[derive(Debug)]
struct RaftState {
    state: NodeState,
    current_term: u64,
    voted_for: Option<NodeId>,
    log: Vec<LogEntry>,
    // Highest index known committed; -1 while empty.
    commit_index: i64,
    last_applied: i64,
    leader_id: Option<NodeId>,
    election_timeout: Duration,
    last_contact: Instant,
}

impl RaftState {
    fn new(election_range: (f64, f64)) -> Self {
        Self {
            state: NodeState::Follower,
            current_term: 0,
            voted_for: None,
            log: Vec::new(),
            commit_index: -1,
            last_applied: -1,
            leader_id: None,
            election_timeout: random_timeout(election_range),
            last_contact: Instant::now(),
        }
    }

    fn reset_election_timer(&mut self, election_range: (f64, f64)) {
        self.election_timeout = random_timeout(election_range);
        self.last_contact = Instant::now();
    }

    fn last_log_index(&self) -> i64 {
        self.log.len() as i64 - 1
    }

    fn last_log_term(&self) -> u64 {
        self.log.last().map(|entry| entry.term).unwrap_or(0)
    }
}

fn random_timeout(range: (f64, f64)) -> Duration {
    Duration::from_secs_f64(rand::thread_rng().gen_range(range.0..range.1))
}

/// Consensus engine for one node
pub struct ConsensusEngine {
    node_id: NodeId,
    peers: HashMap<NodeId, String>,
    election_range: (f64, f64),
    heartbeat_interval: Duration,
    rpc: Arc<PeerClient>,
    locks: Arc<LockManager>,
    state: Mutex<RaftState>,
    running: AtomicBool,
}

impl ConsensusEngine {
    pub fn new(
        node_id: NodeId,
        peers: HashMap<NodeId, String>,
        election_range: (f64, f64),
        heartbeat_interval: Duration,
        rpc: Arc<PeerClient>,
        locks: Arc<LockManager>,
    ) -> Self {
        Self {
            node_id,
            peers,
            election_range,
            heartbeat_interval,
            rpc,
            locks,
            state: Mutex::new(RaftState::new(election_range)),
            running: AtomicBool::new(true),
        }
    }

    fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// Strict majority including self
    fn is_majority(&self, count: usize) -> bool {
        count * 2 > self.cluster_size()
    }

    /// Drive the role loop until shutdown
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run().await })
    }

    pub async fn run(&self) {
        info!("[{}] starting consensus loop as FOLLOWER", self.node_id);
        while self.running.load(Ordering::Relaxed) {
            let role = { self.state.lock().await.state };
            match role {
                NodeState::Follower => self.run_follower().await,
                NodeState::Candidate => self.run_candidate().await,
                NodeState::Leader => self.run_leader().await,
            }
        }
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    async fn run_follower(&self) {
        tokio::time::sleep(FOLLOWER_TICK).await;
        let mut state = self.state.lock().await;
        if state.state != NodeState::Follower {
            return;
        }
        if state.last_contact.elapsed() > state.election_timeout {
            info!("[{}] election timeout, becoming CANDIDATE", self.node_id);
            state.state = NodeState::Candidate;
        }
    }

    async fn run_candidate(&self) {
        let (term, request) = {
            let mut state = self.state.lock().await;
            if state.state != NodeState::Candidate {
                return;
            }
            state.current_term += 1;
            state.voted_for = Some(self.node_id.clone());
            state.reset_election_timer(self.election_range);
            let request = RequestVoteRequest {
                term: state.current_term,
                candidate_id: self.node_id.clone(),
                last_log_index: state.last_log_index(),
                last_log_term: state.last_log_term(),
            };
            (state.current_term, request)
        };

        let replies: Vec<Option<RequestVoteResponse>> = self
            .rpc
            .broadcast(&self.peers, REQUEST_VOTE_PATH, &request)
            .await;

        let mut votes = 1; // self
        let mut highest_term = term;
        for reply in replies.into_iter().flatten() {
            if reply.vote_granted {
                votes += 1;
            }
            highest_term = highest_term.max(reply.term);
        }

        let mut state = self.state.lock().await;
        if highest_term > state.current_term {
            state.current_term = highest_term;
            state.voted_for = None;
            state.state = NodeState::Follower;
            return;
        }
        if state.state != NodeState::Candidate || state.current_term != term {
            return;
        }
        if self.is_majority(votes) {
            info!(
                "[{}] won election for term {} with {} votes, becoming LEADER",
                self.node_id, term, votes
            );
            state.state = NodeState::Leader;
            state.leader_id = Some(self.node_id.clone());
        } else {
            info!(
                "[{}] lost election for term {}, reverting to FOLLOWER",
                self.node_id, term
            );
            state.state = NodeState::Follower;
        }
    }

    async fn run_leader(&self) {
        let heartbeat = {
            let state = self.state.lock().await;
            if state.state != NodeState::Leader {
                return;
            }
            AppendEntriesRequest {
                term: state.current_term,
                leader_id: self.node_id.clone(),
                prev_log_index: -1,
                prev_log_term: 0,
                entries: Vec::new(),
                leader_commit: state.commit_index,
            }
        };

        let replies: Vec<Option<AppendEntriesResponse>> = self
            .rpc
            .broadcast(&self.peers, APPEND_ENTRIES_PATH, &heartbeat)
            .await;

        if let Some(highest_term) = replies.into_iter().flatten().map(|r| r.term).max() {
            let mut state = self.state.lock().await;
            if highest_term > state.current_term {
                warn!(
                    "[{}] discovered term {} from heartbeat reply, stepping down",
                    self.node_id, highest_term
                );
                state.current_term = highest_term;
                state.voted_for = None;
                state.state = NodeState::Follower;
                return;
            }
        }

        tokio::time::sleep(self.heartbeat_interval).await;
    }

    /// Handle an inbound vote request from a candidate
    pub async fn handle_request_vote(&self, request: RequestVoteRequest) -> RequestVoteResponse {
        let mut state = self.state.lock().await;

        if request.term < state.current_term {
            return RequestVoteResponse {
                term: state.current_term,
                vote_granted: false,
            };
        }
        if request.term > state.current_term {
            state.current_term = request.term;
            state.state = NodeState::Follower;
            state.voted_for = None;
        }

        let may_vote = state.voted_for.is_none()
            || state.voted_for.as_deref() == Some(request.candidate_id.as_str());
        let candidate_up_to_date = request.last_log_term > state.last_log_term()
            || (request.last_log_term == state.last_log_term()
                && request.last_log_index >= state.last_log_index());

        let vote_granted = may_vote && candidate_up_to_date;
        if vote_granted {
            state.voted_for = Some(request.candidate_id.clone());
            state.reset_election_timer(self.election_range);
            info!(
                "[{}] voted for {} in term {}",
                self.node_id, request.candidate_id, state.current_term
            );
        }

        RequestVoteResponse {
            term: state.current_term,
            vote_granted,
        }
    }

    /// Handle a heartbeat or log entries from the leader
    pub async fn handle_append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> AppendEntriesResponse {
        let mut state = self.state.lock().await;

        if request.term < state.current_term {
            return AppendEntriesResponse {
                term: state.current_term,
                success: false,
            };
        }

        state.reset_election_timer(self.election_range);
        if request.term > state.current_term {
            state.current_term = request.term;
            state.voted_for = None;
        }
        state.state = NodeState::Follower;
        state.leader_id = Some(request.leader_id.clone());

        if request.prev_log_index >= 0 {
            let prev = request.prev_log_index as usize;
            let matches = state
                .log
                .get(prev)
                .map(|entry| entry.term == request.prev_log_term)
                .unwrap_or(false);
            if !matches {
                warn!(
                    "[{}] log consistency check failed at index {}",
                    self.node_id, request.prev_log_index
                );
                return AppendEntriesResponse {
                    term: state.current_term,
                    success: false,
                };
            }
        }

        if !request.entries.is_empty() {
            let keep = (request.prev_log_index + 1) as usize;
            state.log.truncate(keep);
            state.log.extend(request.entries.iter().cloned());
            debug!(
                "[{}] accepted {} entries from {}",
                self.node_id,
                request.entries.len(),
                request.leader_id
            );
        }

        if request.leader_commit > state.commit_index {
            state.commit_index = request.leader_commit.min(state.last_log_index());
            self.apply_committed(&mut state);
        }

        AppendEntriesResponse {
            term: state.current_term,
            success: true,
        }
    }

    /// Submit a client command. On the leader this runs one synchronous
    /// replication round; the entry is committed and applied on strict
    /// majority, rolled back otherwise.
    pub async fn submit(&self, command: LockCommand) -> Result<ApplyOutcome> {
        let (term, new_index, request) = {
            let mut state = self.state.lock().await;
            if state.state != NodeState::Leader {
                return Err(CoordinationError::NotLeader {
                    leader: state.leader_id.clone(),
                });
            }

            let new_index = state.log.len() as i64;
            let entry = LogEntry {
                term: state.current_term,
                command,
            };
            state.log.push(entry.clone());
            info!(
                "[{}] leader appended command at index {}",
                self.node_id, new_index
            );

            let prev_log_index = new_index - 1;
            let prev_log_term = if prev_log_index >= 0 {
                state.log[prev_log_index as usize].term
            } else {
                0
            };
            let request = AppendEntriesRequest {
                term: state.current_term,
                leader_id: self.node_id.clone(),
                prev_log_index,
                prev_log_term,
                entries: vec![entry],
                leader_commit: state.commit_index,
            };
            (state.current_term, new_index, request)
        };

        let replies: Vec<Option<AppendEntriesResponse>> = self
            .rpc
            .broadcast(&self.peers, APPEND_ENTRIES_PATH, &request)
            .await;

        let mut acks = 1; // self
        let mut highest_term = term;
        for reply in replies.into_iter().flatten() {
            if reply.success {
                acks += 1;
            }
            highest_term = highest_term.max(reply.term);
        }

        let mut state = self.state.lock().await;
        if highest_term > state.current_term {
            state.current_term = highest_term;
            state.voted_for = None;
            state.state = NodeState::Follower;
        }

        let entry_intact = state.log.len() as i64 == new_index + 1
            && state.log[new_index as usize].term == term;
        let round_valid =
            state.state == NodeState::Leader && state.current_term == term && entry_intact;

        if !round_valid {
            if entry_intact && state.commit_index < new_index {
                state.log.pop();
            }
            warn!(
                "[{}] replication round for index {} invalidated by role or term change",
                self.node_id, new_index
            );
            return Err(CoordinationError::consensus_failed(
                "lost leadership during replication",
            ));
        }

        if self.is_majority(acks) {
            state.commit_index = new_index;
            info!(
                "[{}] committed entry at index {} with {} acks",
                self.node_id, new_index, acks
            );
            match self.apply_committed(&mut state) {
                Some(outcome) => Ok(outcome),
                None => Err(CoordinationError::consensus_failed(
                    "commit advanced without an apply outcome",
                )),
            }
        } else {
            state.log.pop();
            warn!(
                "[{}] failed to replicate index {}: only {} of {} acknowledged",
                self.node_id,
                new_index,
                acks,
                self.cluster_size()
            );
            Err(CoordinationError::consensus_failed(
                "Failed to achieve consensus for the command",
            ))
        }
    }

    /// Apply every committed-but-unapplied entry in log order; returns the
    /// outcome of the last applied command.
    fn apply_committed(&self, state: &mut RaftState) -> Option<ApplyOutcome> {
        let mut last = None;
        while state.last_applied < state.commit_index {
            state.last_applied += 1;
            let entry = &state.log[state.last_applied as usize];
            debug!(
                "[{}] applying command at index {}: {:?}",
                self.node_id, state.last_applied, entry.command
            );
            last = Some(self.locks.apply(&entry.command));
        }
        last
    }

    /// Consistent snapshot for `/status`
    pub async fn status(&self) -> ConsensusStatus {
        let state = self.state.lock().await;
        ConsensusStatus {
            node_id: self.node_id.clone(),
            state: state.state,
            term: state.current_term,
            leader: state.leader_id.clone(),
            log_length: state.log.len(),
            commit_index: state.commit_index,
        }
    }

    pub fn is_leader_sync(&self) -> bool {
        // Non-blocking view for metrics; falls back to false under contention.
        self.state
            .try_lock()
            .map(|state| state.state == NodeState::Leader)
            .unwrap_or(false)
    }
}
