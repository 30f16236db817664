//! `RoleStateMachine`: the Follower / Candidate / Leader state machine,
//! dispatched on `(role, event)` with an explicit tagged role variant
//! rather than a role-as-trait mixin. This is the core of the node.
//!
//! `ConsensusModule` itself never performs I/O or awaits anything; every
//! inbound call mutates local state and returns outbound effects through a
//! `Tick`, which `node::RaftNode` executes (sending messages, persisting
//! metadata/log ops, invoking the async `ClientStateMachineAdapter`,
//! rearming timers).

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::config_state::ConfigurationStateMachine;
use crate::constraint::MustPersistMetadata;
use crate::election_timer::ElectionTimer;
use crate::errors::*;
use crate::events::{RaftEvent, TestEventStream};
use crate::log::{LogPosition, ReplicatedLog};
use crate::log_index_map::LogIndexMap;
use crate::protos::*;
use crate::state::*;
use std::sync::Arc;

/// A position an entry was proposed at; resolves to committed, failed, or
/// still pending as the cluster converges.
pub type Proposal = LogPosition;

pub type ProposeResult = std::result::Result<Proposal, ProposeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposeError {
	/// A configuration change is already in flight; retry once the proposal
	/// at this position resolves ("a new configuration change is
	/// blocked until the previous change is committed").
	RetryAfter(Proposal),

	/// This server is not the leader. `leader_hint` is the best guess at who
	/// is.
	NotLeader { leader_hint: Option<MemberId> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalStatus {
	Committed,
	Failed,
	Pending,
	/// Considering the replying server's own log, this proposal cannot be
	/// evaluated (too far ahead of its log, or it was never the leader for
	/// that term).
	Missing,
}

/// A single committed entry ready to run through the application state
/// machine ("Applying committed entries"). Produced for *every*
/// node that commits a `Command` entry, since the state machine must stay in
/// sync on every replica; `client` is only meaningful to reply to when the
/// producing node is (or was, at commit time) the leader — `node::RaftNode`
/// is responsible for that distinction since `ConsensusModule` does not
/// award this node exclusive ownership of the reply.
#[derive(Debug, Clone)]
pub struct ReadyApply {
	pub index: LogIndex,
	pub client: Option<MemberId>,
	pub command: Vec<u8>,
}

/// A log mutation that a `PersistentState` adapter needs mirrored, in the
/// order it happened (persistence boundary).
#[derive(Debug, Clone)]
pub enum LogOp {
	Append(LogEntry),
	TruncateAfter(LogIndex),
}

/// All external side effects requested by one call into `ConsensusModule`
/// ("handlers return `(new_role, new_meta, outbound_msgs,
/// timer_ops)`"). `ConsensusModule` mutates its own in-memory `ReplicatedLog`
/// and `Metadata` directly since those are authoritative in memory;
/// `log_ops`/`meta_dirty` tell the caller what to mirror onto a durable
/// `PersistentState` adapter, if one is wired up.
pub struct Tick {
	pub time: Instant,
	pub messages: Vec<Envelope>,
	pub applies: Vec<ReadyApply>,
	pub log_ops: Vec<LogOp>,
	pub meta_dirty: bool,
	/// If no other event wakes this node sooner, it should be ticked again
	/// after this much time (the election or heartbeat deadline).
	pub next_tick: Option<Duration>,
}

impl Tick {
	pub fn empty(time: Instant) -> Self {
		Tick {
			time,
			messages: Vec::new(),
			applies: Vec::new(),
			log_ops: Vec::new(),
			meta_dirty: false,
			next_tick: None,
		}
	}

	fn send(&mut self, from: MemberId, to: MemberId, body: Message) {
		self.messages.push(Envelope { from, to, body });
	}
}

pub struct ConsensusModule {
	id: MemberId,
	meta: Metadata,
	config: ConfigurationStateMachine,
	log: ReplicatedLog,
	state: ServerState,
	election_timer: ElectionTimer,
	heartbeat_interval: Duration,
	batch_size: usize,
	events: Arc<dyn TestEventStream>,
}

impl ConsensusModule {
	/// Creates a new module bootstrapped with `config`. The caller,
	/// `node::RaftNode::new`, is responsible for rejecting an empty or
	/// self-less configuration before calling this, since that failure is
	/// fatal at the node-startup boundary rather than something this type
	/// can recover from later.
	pub fn new(
		id: MemberId,
		meta: Metadata,
		config: ClusterConfiguration,
		log: ReplicatedLog,
		election_timer: ElectionTimer,
		heartbeat_interval: Duration,
		batch_size: usize,
		events: Arc<dyn TestEventStream>,
		now: Instant,
	) -> ConsensusModule {
		ConsensusModule {
			id,
			meta,
			config: ConfigurationStateMachine::new(config),
			log,
			state: ServerState::new_follower(now, election_timer.next()),
			election_timer,
			heartbeat_interval,
			batch_size,
			events,
		}
	}

	pub fn id(&self) -> MemberId {
		self.id
	}

	pub fn meta(&self) -> &Metadata {
		&self.meta
	}

	pub fn log(&self) -> &ReplicatedLog {
		&self.log
	}

	pub fn config(&self) -> &ClusterConfiguration {
		self.config.value()
	}

	pub fn role(&self) -> RoleKind {
		match &self.state {
			ServerState::Follower(_) => RoleKind::Follower,
			ServerState::Candidate(_) => RoleKind::Candidate,
			ServerState::Leader(_) => RoleKind::Leader,
		}
	}

	/// Best-effort guess at the current leader, used to fill in
	/// `ClientMessageRejected::leader_hint`. A candidate always votes for
	/// itself, so its own `voted_for` is not a
	/// useful hint; only a follower's `last_leader_id` or the fact that this
	/// node itself is leader are.
	fn last_known_leader(&self) -> Option<MemberId> {
		match &self.state {
			ServerState::Follower(s) => s.last_leader_id,
			ServerState::Candidate(_) => None,
			ServerState::Leader(_) => Some(self.id),
		}
	}

	/// Proposes a user command (Leader, `ClientCommand`).
	pub fn propose_command(&mut self, command: Vec<u8>, client: Option<MemberId>, tick: &mut Tick) -> ProposeResult {
		self.propose_entry(LogEntryData::Command(command), client, tick)
	}

	fn propose_noop(&mut self, tick: &mut Tick) -> ProposeResult {
		self.propose_entry(LogEntryData::Noop, None, tick)
	}

	/// Proposes a membership change as a `Joint(old, new)` configuration
	/// ("Configuration-in-log rule"; the follow-up `Stable` is
	/// proposed automatically once the joint entry commits, see
	/// `advance_commit_to`). Refused with `RetryAfter` while a previous
	/// configuration change is still pending.
	pub fn propose_config_change(&mut self, new_members: HashSet<MemberId>, tick: &mut Tick) -> ProposeResult {
		if let Some(pending) = self.config.pending {
			return Err(ProposeError::RetryAfter(Proposal {
				term: self.log.term_at(pending.last_change),
				index: pending.last_change,
			}));
		}

		let old_members = self.config.value().all_members();
		let joint = ClusterConfiguration::Joint(old_members, new_members);
		self.propose_entry(LogEntryData::Config(joint), None, tick)
	}

	/// Checks the progress of a previously initiated proposal. Safe to call
	/// on any server, though only the leader's view converges promptly.
	pub fn proposal_status(&self, prop: &Proposal) -> ProposalStatus {
		if prop.index > self.log.last_index() {
			return ProposalStatus::Missing;
		}

		if !self.log.contains(prop.index) {
			return ProposalStatus::Missing;
		}

		let current_term = self.log.term_at(prop.index);
		if current_term != prop.term {
			// The slot was overwritten by a later leader's entry: this
			// proposal will never appear in the log again.
			return ProposalStatus::Failed;
		}

		if self.log.committed_index() >= prop.index {
			ProposalStatus::Committed
		} else {
			ProposalStatus::Pending
		}
	}

	/// Appends an entry locally (only valid while leader) and immediately
	/// drives replication. Internal: bypasses the `propose_config_change`
	/// pending-guard so that the automatic joint->stable follow-up can
	/// always land even though a config change is nominally still
	/// "pending" at that point.
	fn propose_entry(&mut self, data: LogEntryData, client: Option<MemberId>, tick: &mut Tick) -> ProposeResult {
		if !self.state.is_leader() {
			let leader_hint = self.last_known_leader();
			return Err(ProposeError::NotLeader { leader_hint });
		}

		let index = self.log.last_index() + 1;
		let term = self.meta.current_term;
		assert!(term > 0, "a leader must have been elected in a term >= 1");

		let entry = LogEntry { index, term, data, client };
		self.log.append(entry.clone());
		tick.log_ops.push(LogOp::Append(entry.clone()));

		if let LogEntryData::Config(ref cfg) = entry.data {
			self.config.apply(cfg.clone(), index);
		}

		if let ServerState::Leader(ref mut s) = self.state {
			s.progress.put(self.id, index + 1, index);
		}

		// A client command broadcasts immediately rather than waiting for
		// the next heartbeat tick.
		self.broadcast_append_entries(tick);
		self.cycle(tick);

		Ok(Proposal { term, index })
	}

	/// Main driver: advances election/heartbeat timers and re-evaluates
	/// whatever the current role implies should happen next (the
	/// per-node event loop). Called after every inbound event as well as on
	/// a bare timer wakeup.
	pub fn cycle(&mut self, tick: &mut Tick) {
		if self.config.value().all_members().is_empty() {
			// Nothing to do until a `ChangeConfiguration` bootstraps us.
			tick.next_tick = Some(Duration::from_secs(1));
			return;
		}
		if !self.config.value().all_members().contains(&self.id) {
			// Not (or no longer) a voting member: never start an election.
			tick.next_tick = Some(Duration::from_secs(1));
			return;
		}

		match self.state {
			ServerState::Follower(ref s) => {
				let elapsed = tick.time.saturating_duration_since(s.last_heartbeat);
				let timeout = s.election_timeout;
				if elapsed >= timeout {
					self.start_election(tick);
				} else {
					tick.next_tick = Some(timeout - elapsed);
				}
			}
			ServerState::Candidate(ref s) => {
				let elapsed = tick.time.saturating_duration_since(s.election_start);
				let timeout = s.election_timeout;
				if elapsed >= timeout {
					self.start_election(tick);
				} else {
					tick.next_tick = Some(timeout - elapsed);
				}
			}
			ServerState::Leader(_) => {
				self.try_advance_commit(tick);
				tick.next_tick = Some(self.heartbeat_interval);
			}
		}
	}

	/// Whether `granted` (plus this node, if it is itself a member of the
	/// relevant side) constitutes a quorum under the current configuration:
	/// a majority of `members` for `Stable`, or a majority of `old` AND a
	/// majority of `new` for `Joint` ("Quorum").
	fn has_quorum(&self, granted: &HashSet<MemberId>) -> bool {
		self.config.value().quorums().iter().all(|side| {
			if side.is_empty() {
				return true;
			}
			let count = side.iter().filter(|m| **m == self.id || granted.contains(*m)).count();
			count > side.len() / 2
		})
	}

	fn start_election(&mut self, tick: &mut Tick) {
		self.meta.current_term += 1;
		self.meta.voted_for = Some(self.id);
		tick.meta_dirty = true;

		let timeout = self.election_timer.next();
		self.state = ServerState::Candidate(ServerCandidateState {
			election_start: tick.time,
			votes_received: HashSet::new(),
			election_timeout: timeout,
		});

		tracing::info!(member = self.id, term = self.meta.current_term, "starting election");
		self.events.publish(RaftEvent::BeginElection { member: self.id, term: self.meta.current_term });

		let (last_index, last_term) = (self.log.last_index(), self.log.last_term());
		let req = RequestVoteRequest {
			term: self.meta.current_term,
			candidate_id: self.id,
			last_log_index: last_index,
			last_log_term: last_term,
		};
		for peer in self.config.value().all_members() {
			if peer != self.id {
				tick.send(self.id, peer, Message::RequestVote(req.clone()));
			}
		}

		// Single-node (or already-satisfied-by-self) clusters win instantly.
		if self.has_quorum(&HashSet::new()) {
			self.become_leader(tick);
		}
	}

	fn become_leader(&mut self, tick: &mut Tick) {
		let last_index = self.log.last_index();
		let mut progress = LogIndexMap::new();
		for peer in self.config.value().all_members() {
			if peer != self.id {
				progress.put(peer, last_index + 1, 0);
			}
		}
		progress.put(self.id, last_index + 1, last_index);
		self.state = ServerState::Leader(ServerLeaderState { progress });

		tracing::info!(member = self.id, term = self.meta.current_term, "elected leader");
		self.events.publish(RaftEvent::ElectedAsLeader { member: self.id, term: self.meta.current_term });

		// Commit any entries left over from a previous term as soon as
		// possible: they can only become committed transitively once an
		// entry from *this* term also reaches quorum (commit
		// rule's `log[N].term == currentTerm` guard).
		if self.log.committed_index() < last_index {
			let _ = self.propose_noop(tick);
			return;
		}

		self.broadcast_append_entries(tick);
	}

	/// Sends every peer an `AppendEntries` starting at its own `nextIndex`
	/// (Leader, both the `ClientCommand` broadcast and the
	/// heartbeat-tick path; an empty batch is a heartbeat).
	///
	/// Targets the union of the *currently effective* configuration and
	/// every peer this leader has ever tracked progress for, not just
	/// `config.value().all_members()` alone: the append-time adoption rule
	/// ("Configuration-in-log rule") means a member dropped by a
	/// just-appended `Stable` entry is excluded from `all_members()` the
	/// instant that entry lands locally — before it has had any chance to
	/// replicate that very entry to the outgoing member. Without this, a
	/// removed member would never learn it was removed and would keep
	/// treating itself as part of the old configuration indefinitely.
	fn broadcast_append_entries(&mut self, tick: &mut Tick) {
		let mut peers = self.config.value().all_members();
		if let ServerState::Leader(ref s) = self.state {
			peers.extend(s.progress.ids().cloned());
		}
		for peer in peers {
			if peer != self.id {
				self.send_append_entries_to(peer, tick);
			}
		}
	}

	fn send_append_entries_to(&mut self, peer: MemberId, tick: &mut Tick) {
		let next_index = match &mut self.state {
			ServerState::Leader(s) => {
				s.progress.ensure(peer, self.log.last_index() + 1);
				s.progress.next_index(peer).unwrap()
			}
			_ => return,
		};

		let prev_index = next_index.saturating_sub(1);
		let prev_term = self.log.term_at(prev_index);
		let entries = self.log.entries_from(next_index, self.batch_size);

		let req = AppendEntriesRequest {
			term: self.meta.current_term,
			leader_id: self.id,
			prev_log_index: prev_index,
			prev_log_term: prev_term,
			entries,
			leader_commit: self.log.committed_index(),
		};
		tick.send(self.id, peer, Message::AppendEntries(req));
	}

	/// On-heartbeat-timer entry point: resend to every peer regardless of
	/// whether anything changed ("On heartbeat tick").
	pub fn on_heartbeat_timer(&mut self, tick: &mut Tick) {
		if !self.state.is_leader() {
			return;
		}
		self.broadcast_append_entries(tick);
		tick.next_tick = Some(self.heartbeat_interval);
	}

	/// Run on every inbound RPC carrying a term ("A uniform
	/// precondition runs on every inbound RPC").
	fn observe_term(&mut self, term: Term, tick: &mut Tick) {
		if term > self.meta.current_term {
			self.meta.current_term = term;
			self.meta.voted_for = None;
			tick.meta_dirty = true;
			self.become_follower(tick);
		}
	}

	fn become_follower(&mut self, tick: &mut Tick) {
		self.state = ServerState::new_follower(tick.time, self.election_timer.next());
	}

	/// Advances `committed_index` to `index` and runs every newly committed
	/// entry through the apply/config-commit machinery (used by
	/// both the follower `leaderCommit` path and the leader's commit rule).
	fn advance_commit_to(&mut self, index: LogIndex, tick: &mut Tick) {
		let old_committed = self.log.committed_index();
		if index <= old_committed {
			return;
		}
		self.log.commit(index);

		let newly_committed = self.log.between(old_committed, index);
		for entry in newly_committed {
			match &entry.data {
				LogEntryData::Command(cmd) => {
					tick.applies.push(ReadyApply { index: entry.index, client: entry.client, command: cmd.clone() });
				}
				LogEntryData::Config(_) => {
					// Already took effect at append time; never handed to
					// the application state machine.
				}
				LogEntryData::Noop => {}
			}
			self.events.publish(RaftEvent::EntryCommitted { member: self.id, index: entry.index });
		}

		if self.config.commit(index) {
			// A `Stable` configuration just committed. If it no longer
			// includes us, step down.
			if self.state.is_leader() && !self.config.value().contains(self.id) {
				self.become_follower(tick);
				return;
			}
		} else if self.state.is_leader() {
			if let Some(stable) = self.config.joint_awaiting_stable(index) {
				let _ = self.propose_entry(LogEntryData::Config(stable), None, tick);
			}
		}
	}

	/// Leader-only: finds the best next commit index per `LogIndexMap`'s
	/// consensus rule and advances to it if found.
	fn try_advance_commit(&mut self, tick: &mut Tick) {
		let next = match &self.state {
			ServerState::Leader(s) => {
				let n = s.progress.consensus_for_index(self.config.value(), self.id, self.log.last_index());
				if n > self.log.committed_index() && self.log.term_at(n) == self.meta.current_term {
					Some(n)
				} else {
					None
				}
			}
			_ => None,
		};
		if let Some(n) = next {
			self.advance_commit_to(n, tick);
		}
	}

	/// Called when another server is requesting our vote.
	pub fn request_vote(&mut self, req: RequestVoteRequest, tick: &mut Tick) -> MustPersistMetadata<RequestVoteResponse> {
		self.observe_term(req.term, tick);

		let granted = self.should_grant_vote(&req);

		if granted {
			tracing::debug!(member = self.id, candidate = req.candidate_id, term = req.term, "granting vote");
			self.meta.voted_for = Some(req.candidate_id);
			tick.meta_dirty = true;
			let new_timeout = self.election_timer.next();
			if let ServerState::Follower(ref mut s) = self.state {
				s.last_heartbeat = tick.time;
				s.election_timeout = new_timeout;
			}
		}

		MustPersistMetadata::new(RequestVoteResponse { term: self.meta.current_term, vote_granted: granted })
	}

	fn should_grant_vote(&self, req: &RequestVoteRequest) -> bool {
		if req.term < self.meta.current_term {
			return false;
		}

		let (last_index, last_term) = (self.log.last_index(), self.log.last_term());
		let up_to_date =
			req.last_log_term > last_term || (req.last_log_term == last_term && req.last_log_index >= last_index);
		if !up_to_date {
			return false;
		}

		match self.meta.voted_for {
			Some(id) => id == req.candidate_id,
			None => true,
		}
	}

	/// Handles a `RequestVote` reply (Candidate, "Tally vote
	/// grants"). Keyed by the actual sender identity carried in the
	/// envelope, never by an ambient "last peer we talked to" accessor.
	pub fn request_vote_callback(&mut self, from: MemberId, resp: RequestVoteResponse, tick: &mut Tick) {
		self.observe_term(resp.term, tick);
		if resp.term != self.meta.current_term {
			return;
		}

		let became_leader = if let ServerState::Candidate(ref mut s) = self.state {
			if resp.vote_granted {
				s.votes_received.insert(from);
			}
			self.has_quorum(&s.votes_received)
		} else {
			false
		};

		if became_leader {
			self.become_leader(tick);
		}
	}

	/// Handles `AppendEntries` (Follower). Returns `Rejected` if
	/// the request is stale or doesn't match our log, `Successful`
	/// otherwise.
	pub fn append_entries(&mut self, req: AppendEntriesRequest, tick: &mut Tick) -> MustPersistMetadata<AppendEntriesResponse> {
		self.observe_term(req.term, tick);

		if req.term == self.meta.current_term && self.state.is_candidate() {
			self.become_follower(tick);
		}

		let current_term = self.meta.current_term;

		if req.term < current_term {
			tracing::debug!(member = self.id, leader = req.leader_id, req.term, current_term, "rejecting stale append_entries");
			return MustPersistMetadata::new(AppendEntriesResponse::Rejected {
				term: current_term,
				last_index: self.log.last_index(),
			});
		}

		// `observe_term`/the candidate step-down above guarantee we are a
		// Follower here, *unless* this node is itself the leader of
		// `current_term` and some other node also believes it leads this
		// term — a violation of Election Safety that should never happen in
		// a correct run. Rather than trust that and panic on a malformed or
		// malicious peer, reject defensively instead of processing the log.
		let new_timeout = self.election_timer.next();
		match &mut self.state {
			ServerState::Follower(s) => {
				s.last_heartbeat = tick.time;
				s.election_timeout = new_timeout;
				s.last_leader_id = Some(req.leader_id);
			}
			ServerState::Leader(_) | ServerState::Candidate(_) => {
				return MustPersistMetadata::new(AppendEntriesResponse::Rejected {
					term: current_term,
					last_index: self.log.last_index(),
				});
			}
		}

		if !self.log.contains(req.prev_log_index) || self.log.term_at(req.prev_log_index) != req.prev_log_term {
			tracing::debug!(
				member = self.id, prev_log_index = req.prev_log_index,
				"rejecting append_entries: log mismatch at prev_log_index",
			);
			return MustPersistMetadata::new(AppendEntriesResponse::Rejected {
				term: current_term,
				last_index: self.log.last_index(),
			});
		}

		let mut last_new_index = req.prev_log_index;
		for entry in req.entries {
			if self.log.contains(entry.index) {
				if self.log.term_at(entry.index) == entry.term {
					// Already present: idempotent replay (// round-trip property).
					last_new_index = entry.index;
					continue;
				}
				if entry.index <= self.log.committed_index() {
					// A correct leader never disagrees with an entry we have
					// already committed (Leader Completeness). Reject rather
					// than truncate committed history out from under us.
					tracing::warn!(
						member = self.id, index = entry.index,
						"append_entries would overwrite a committed entry; rejecting",
					);
					return MustPersistMetadata::new(AppendEntriesResponse::Rejected {
						term: current_term,
						last_index: self.log.last_index(),
					});
				}
				// Conflict: truncate this and everything after it.
				self.config.revert(entry.index);
				self.log.truncate_after(entry.index - 1);
				tick.log_ops.push(LogOp::TruncateAfter(entry.index - 1));
			}

			self.log.append(entry.clone());
			tick.log_ops.push(LogOp::Append(entry.clone()));
			if let LogEntryData::Config(ref cfg) = entry.data {
				self.config.apply(cfg.clone(), entry.index);
			}
			last_new_index = entry.index;
		}

		if req.leader_commit > self.log.committed_index() {
			let new_commit = req.leader_commit.min(self.log.last_index());
			self.advance_commit_to(new_commit, tick);
		}

		MustPersistMetadata::new(AppendEntriesResponse::Successful { term: current_term, match_index: last_new_index })
	}

	/// Handles an `AppendEntries` reply, keyed by the actual sender identity
	/// rather than an ambient "last peer we talked to" accessor.
	pub fn append_entries_callback(&mut self, from: MemberId, resp: AppendEntriesResponse, tick: &mut Tick) {
		self.observe_term(resp.term(), tick);
		if resp.term() != self.meta.current_term {
			return;
		}

		let leader = match &mut self.state {
			ServerState::Leader(s) => s,
			_ => return,
		};

		match resp {
			AppendEntriesResponse::Successful { match_index, .. } => {
				leader.progress.put_if_greater_match_index(from, match_index);
			}
			AppendEntriesResponse::Rejected { last_index, .. } => {
				leader.progress.put_if_smaller_next_index(from, (last_index + 1).max(1));
				self.send_append_entries_to(from, tick);
				return;
			}
		}

		self.try_advance_commit(tick);
	}

	/// Handles a `ClientMessage` (Leader `ClientCommand`). A non-leader
	/// rejects with a hint at the best-known leader instead of a silent drop.
	pub fn client_message(&mut self, msg: ClientMessage, tick: &mut Tick) {
		match self.propose_command(msg.command, Some(msg.client), tick) {
			Ok(_) => {}
			Err(ProposeError::NotLeader { leader_hint }) => {
				tick.send(self.id, msg.client, Message::ClientMessageRejected(ClientMessageRejected { leader_hint }));
			}
			Err(ProposeError::RetryAfter(_)) => {
				tick.send(
					self.id,
					msg.client,
					Message::ClientMessageRejected(ClientMessageRejected { leader_hint: Some(self.id) }),
				);
			}
		}
	}

	/// Bootstrap injection (`ChangeConfiguration`): only accepted
	/// while this node has never been configured (no log entries and still
	/// on an empty configuration). A live node's configuration can only ever
	/// change through the joint-consensus log protocol.
	pub fn receive_bootstrap_configuration(&mut self, config: ClusterConfiguration) -> Result<()> {
		if self.log.last_index() != 0 || !self.config.value().all_members().is_empty() {
			return Err("node is already configured; configuration changes must go through the log".into());
		}
		self.config = ConfigurationStateMachine::new(config);
		Ok(())
	}

	pub fn request_configuration(&self) -> ChangeConfiguration {
		ChangeConfiguration { config: self.config.value().clone() }
	}

	pub fn ask_for_state(&self) -> IAmInState {
		IAmInState { role: self.role(), term: self.meta.current_term }
	}
}

/// Drives whole-cluster scenarios straight against
/// `ConsensusModule`, bypassing `node::RaftNode`'s async actor entirely: the
/// module is synchronous and does no I/O, so these tests route `Envelope`s
/// between a handful of in-memory instances by hand and assert on the
/// resulting roles/logs, with no `tokio` runtime required.
#[cfg(test)]
mod tests {
	use super::*;
	use crate::events::NoopEventStream;
	use std::collections::{HashMap, VecDeque};

	/// A degenerate (non-randomized) timer keeps these tests deterministic;
	/// `election_timer.rs` already covers the randomization itself.
	fn make_node(id: MemberId, members: &[MemberId], now: Instant) -> ConsensusModule {
		make_node_with_config(id, ClusterConfiguration::Stable(members.iter().cloned().collect()), now)
	}

	/// A node with no bootstrap configuration yet, as a newly-discovered
	/// cluster member would start ("ChangeConfiguration (bootstrap
	/// injection)") — used for the joint-consensus scenario where a member
	/// joins mid-log rather than at cluster creation.
	fn make_unconfigured_node(id: MemberId, now: Instant) -> ConsensusModule {
		make_node_with_config(id, ClusterConfiguration::Stable(HashSet::new()), now)
	}

	fn make_node_with_config(id: MemberId, config: ClusterConfiguration, now: Instant) -> ConsensusModule {
		ConsensusModule::new(
			id,
			Metadata::default(),
			config,
			ReplicatedLog::new(),
			ElectionTimer::new(Duration::from_millis(150), Duration::from_millis(150)),
			Duration::from_millis(50),
			5,
			Arc::new(NoopEventStream::default()),
			now,
		)
	}

	/// Routes one envelope into whichever node it's addressed to and returns
	/// whatever further envelopes that handling produced. An envelope to a
	/// node absent from `nodes` (a crashed/removed member) is simply dropped,
	/// matching the bus's best-effort contract.
	fn deliver(nodes: &mut HashMap<MemberId, ConsensusModule>, envelope: Envelope, now: Instant) -> Vec<Envelope> {
		let (from, to) = (envelope.from, envelope.to);
		let node = match nodes.get_mut(&to) {
			Some(node) => node,
			None => return Vec::new(),
		};

		let mut tick = Tick::empty(now);
		match envelope.body {
			Message::RequestVote(req) => {
				let resp = node.request_vote(req, &mut tick).persisted();
				tick.messages.push(Envelope { from: to, to: from, body: Message::RequestVoteResponse(resp) });
			}
			Message::RequestVoteResponse(resp) => node.request_vote_callback(from, resp, &mut tick),
			Message::AppendEntries(req) => {
				let resp = node.append_entries(req, &mut tick).persisted();
				tick.messages.push(Envelope { from: to, to: from, body: Message::AppendEntriesResponse(resp) });
			}
			Message::AppendEntriesResponse(resp) => node.append_entries_callback(from, resp, &mut tick),
			other => panic!("test harness does not route {:?}", other),
		}
		node.cycle(&mut tick);
		tick.messages
	}

	/// Breadth-first message-passing simulation: drains `seed` and everything
	/// it transitively produces until no envelope remains that `allow`
	/// passes (used to model a partition by dropping sends to/from an
	/// unreachable member).
	fn run_to_quiescence(
		nodes: &mut HashMap<MemberId, ConsensusModule>,
		seed: Vec<Envelope>,
		now: Instant,
		allow: impl Fn(&Envelope) -> bool,
	) {
		let mut queue: VecDeque<Envelope> = seed.into_iter().filter(|e| allow(e)).collect();
		let mut rounds = 0;
		while let Some(envelope) = queue.pop_front() {
			rounds += 1;
			assert!(rounds < 10_000, "simulation did not quiesce");
			for out in deliver(nodes, envelope, now) {
				if allow(&out) {
					queue.push_back(out);
				}
			}
		}
	}

	fn run_all(nodes: &mut HashMap<MemberId, ConsensusModule>, seed: Vec<Envelope>, now: Instant) {
		run_to_quiescence(nodes, seed, now, |_| true)
	}

	fn elect(nodes: &mut HashMap<MemberId, ConsensusModule>, candidate: MemberId, now: Instant) {
		let mut tick = Tick::empty(now);
		nodes.get_mut(&candidate).unwrap().cycle(&mut tick);
		assert_eq!(nodes[&candidate].role(), RoleKind::Candidate, "expected the timed-out node to start an election");
		run_all(nodes, tick.messages, now);
		assert_eq!(nodes[&candidate].role(), RoleKind::Leader, "expected the sole candidate to win the election");
	}

	/// Proposes a command on `leader` and runs it to full replication, then
	/// drives one extra heartbeat round so followers also learn the new
	/// commit index (Leader: commit is discovered by the leader
	/// first and only propagated to followers on a subsequent AppendEntries).
	fn propose_and_commit_everywhere(
		nodes: &mut HashMap<MemberId, ConsensusModule>,
		leader: MemberId,
		command: &[u8],
		now: Instant,
	) -> Proposal {
		let mut tick = Tick::empty(now);
		let proposal = nodes.get_mut(&leader).unwrap().propose_command(command.to_vec(), None, &mut tick).unwrap();
		run_all(nodes, tick.messages, now);

		let mut heartbeat = Tick::empty(now);
		nodes.get_mut(&leader).unwrap().on_heartbeat_timer(&mut heartbeat);
		run_all(nodes, heartbeat.messages, now);

		proposal
	}

	#[test]
	fn s1_election_happy_path() {
		let now = Instant::now();
		let members = [1, 2, 3];
		let mut nodes: HashMap<MemberId, ConsensusModule> =
			members.iter().map(|&id| (id, make_node(id, &members, now))).collect();

		elect(&mut nodes, 1, now + Duration::from_millis(200));

		assert_eq!(nodes[&1].meta().current_term, 1);
		assert_eq!(nodes[&2].role(), RoleKind::Follower);
		assert_eq!(nodes[&3].role(), RoleKind::Follower);
	}

	#[test]
	fn s2_client_commit_propagates_to_every_replica() {
		let now = Instant::now();
		let members = [1, 2, 3];
		let mut nodes: HashMap<MemberId, ConsensusModule> =
			members.iter().map(|&id| (id, make_node(id, &members, now))).collect();
		elect(&mut nodes, 1, now + Duration::from_millis(200));

		let proposal = propose_and_commit_everywhere(&mut nodes, 1, b"w1", now);

		assert_eq!(proposal.index, 1);
		for id in members {
			assert_eq!(nodes[&id].log().committed_index(), 1, "member {} should have committed index 1", id);
			assert!(matches!(nodes[&id].log().entry(1).unwrap().data, LogEntryData::Command(ref c) if c == b"w1"));
		}
		assert_eq!(nodes[&1].proposal_status(&proposal), ProposalStatus::Committed);
	}

	#[test]
	fn s3_leader_failure_and_reelection_preserves_committed_entries() {
		let now = Instant::now();
		let members = [1, 2, 3];
		let mut nodes: HashMap<MemberId, ConsensusModule> =
			members.iter().map(|&id| (id, make_node(id, &members, now))).collect();
		elect(&mut nodes, 1, now + Duration::from_millis(200));
		propose_and_commit_everywhere(&mut nodes, 1, b"w1", now);

		// A crashes: simply remove it, so the bus drops anything addressed
		// to or received from it from here on.
		nodes.remove(&1);

		let t2 = now + Duration::from_millis(500);
		let mut tick = Tick::empty(t2);
		nodes.get_mut(&2).unwrap().cycle(&mut tick);
		assert_eq!(nodes[&2].role(), RoleKind::Candidate);
		run_all(&mut nodes, tick.messages, t2);

		assert_eq!(nodes[&2].role(), RoleKind::Leader);
		assert_eq!(nodes[&2].meta().current_term, 2);
		// Leader Completeness: the new leader still has the entry committed
		// under the old leader.
		assert_eq!(nodes[&2].log().entry(1).unwrap().client, None);
		assert!(matches!(nodes[&2].log().entry(1).unwrap().data, LogEntryData::Command(ref c) if c == b"w1"));
	}

	#[test]
	fn s4_log_repair_converges_after_follower_restart_with_empty_log() {
		let now = Instant::now();
		let members = [1, 2, 3];
		let mut nodes: HashMap<MemberId, ConsensusModule> =
			members.iter().map(|&id| (id, make_node(id, &members, now))).collect();
		elect(&mut nodes, 1, now + Duration::from_millis(200));
		for i in 0..5 {
			propose_and_commit_everywhere(&mut nodes, 1, format!("w{}", i).as_bytes(), now);
		}
		assert_eq!(nodes[&1].log().last_index(), 5);
		assert_eq!(nodes[&3].log().last_index(), 5);

		// Follower 3 "restarts" with its volatile in-memory log gone while
		// the leader's nextIndex/matchIndex bookkeeping still assumes it was
		// fully caught up (S4).
		nodes.insert(3, make_node(3, &members, now));
		assert_eq!(nodes[&3].log().last_index(), 0);

		let mut heartbeat = Tick::empty(now);
		nodes.get_mut(&1).unwrap().on_heartbeat_timer(&mut heartbeat);
		run_all(&mut nodes, heartbeat.messages, now);

		assert_eq!(nodes[&3].log().last_index(), 5);
		for i in 1..=5 {
			assert_eq!(nodes[&3].log().term_at(i), nodes[&1].log().term_at(i));
		}
	}

	#[test]
	fn s5_joint_consensus_membership_change_adds_and_drops_a_member() {
		let now = Instant::now();
		let members = [1, 2, 3];
		let mut nodes: HashMap<MemberId, ConsensusModule> =
			members.iter().map(|&id| (id, make_node(id, &members, now))).collect();
		nodes.insert(4, make_unconfigured_node(4, now));
		elect(&mut nodes, 1, now + Duration::from_millis(200));

		let new_members: HashSet<MemberId> = [1, 2, 4].iter().cloned().collect();
		let mut tick = Tick::empty(now);
		let change_proposal = nodes.get_mut(&1).unwrap().propose_config_change(new_members.clone(), &mut tick).unwrap();
		run_all(&mut nodes, tick.messages, now);

		// A few more heartbeat rounds so the follow-up Stable entry (proposed
		// automatically once the Joint entry commits) fully propagates, even
		// to a peer whose `nextIndex` needed more than one backoff round.
		for _ in 0..5 {
			let mut heartbeat = Tick::empty(now);
			nodes.get_mut(&1).unwrap().on_heartbeat_timer(&mut heartbeat);
			run_all(&mut nodes, heartbeat.messages, now);
		}

		assert_eq!(nodes[&1].proposal_status(&change_proposal), ProposalStatus::Committed);
		assert_eq!(nodes[&1].config(), &ClusterConfiguration::Stable(new_members.clone()));
		assert_eq!(nodes[&1].role(), RoleKind::Leader, "leader is in the new configuration, should not step down");

		// Member 3 is no longer part of the configuration: its own view
		// converges to the same Stable entry, and it stops trying to start
		// elections for a cluster it is no longer in.
		assert_eq!(nodes[&3].config(), &ClusterConfiguration::Stable(new_members.clone()));
		assert!(!nodes[&3].config().all_members().contains(&3));

		// Member 4 joined and has the full log, including the config entries.
		assert_eq!(nodes[&4].config(), &ClusterConfiguration::Stable(new_members));
		assert_eq!(nodes[&4].log().last_index(), nodes[&1].log().last_index());
	}

	#[test]
	fn s6_split_vote_resolves_on_the_next_term() {
		let now = Instant::now();
		// A 4-member cluster lets two simultaneous candidates each pick up
		// exactly one outside vote, so neither reaches the 3-of-4 quorum in
		// the first term (S6).
		let members = [1, 2, 3, 4];
		let mut nodes: HashMap<MemberId, ConsensusModule> =
			members.iter().map(|&id| (id, make_node(id, &members, now))).collect();

		let t1 = now + Duration::from_millis(200);
		let mut tick_a = Tick::empty(t1);
		nodes.get_mut(&1).unwrap().cycle(&mut tick_a);
		let mut tick_b = Tick::empty(t1);
		nodes.get_mut(&2).unwrap().cycle(&mut tick_b);
		assert_eq!(nodes[&1].role(), RoleKind::Candidate);
		assert_eq!(nodes[&2].role(), RoleKind::Candidate);
		assert_eq!(nodes[&1].meta().current_term, 1);
		assert_eq!(nodes[&2].meta().current_term, 1);

		// Candidate 1 is only heard by member 3; candidate 2 only by member 4.
		let mut seed = tick_a.messages;
		seed.extend(tick_b.messages);
		run_to_quiescence(&mut nodes, seed, t1, |e| !((e.from == 1 && e.to == 4) || (e.from == 2 && e.to == 3)));

		assert_eq!(nodes[&1].role(), RoleKind::Candidate, "2 of 4 votes is not a quorum");
		assert_eq!(nodes[&2].role(), RoleKind::Candidate, "2 of 4 votes is not a quorum");

		// The tie breaks because candidate 1's next randomized timeout fires
		// first; every other member observes the higher term and falls in
		// line.
		let t2 = t1 + Duration::from_millis(400);
		let mut tick_a2 = Tick::empty(t2);
		nodes.get_mut(&1).unwrap().cycle(&mut tick_a2);
		assert_eq!(nodes[&1].meta().current_term, 2);
		run_all(&mut nodes, tick_a2.messages, t2);

		assert_eq!(nodes[&1].role(), RoleKind::Leader);
		assert_eq!(nodes[&1].meta().current_term, 2);
		assert_eq!(nodes[&2].role(), RoleKind::Follower);
	}

	#[test]
	fn follower_denies_a_second_vote_in_the_same_term() {
		let now = Instant::now();
		let mut follower = make_node(3, &[1, 2, 3], now);
		let mut tick = Tick::empty(now);

		let req_a = RequestVoteRequest { term: 1, candidate_id: 1, last_log_index: 0, last_log_term: 0 };
		let resp_a = follower.request_vote(req_a, &mut tick).persisted();
		assert!(resp_a.vote_granted);

		let req_b = RequestVoteRequest { term: 1, candidate_id: 2, last_log_index: 0, last_log_term: 0 };
		let resp_b = follower.request_vote(req_b, &mut tick).persisted();
		assert!(!resp_b.vote_granted, "already voted for 1 in term 1");

		// Replaying the exact same request the follower already granted is
		// still granted: it is idempotently "the same" vote (// round-trip property).
		let resp_a_again = follower.request_vote(req_a, &mut tick).persisted();
		assert!(resp_a_again.vote_granted);
	}

	#[test]
	fn stale_term_append_entries_is_rejected_with_the_current_term() {
		let now = Instant::now();
		let mut follower = make_node(3, &[1, 2, 3], now);
		follower.meta.current_term = 5;

		let mut tick = Tick::empty(now);
		let req = AppendEntriesRequest {
			term: 3,
			leader_id: 1,
			prev_log_index: 0,
			prev_log_term: 0,
			entries: Vec::new(),
			leader_commit: 0,
		};
		let resp = follower.append_entries(req, &mut tick).persisted();
		match resp {
			AppendEntriesResponse::Rejected { term, .. } => assert_eq!(term, 5),
			other => panic!("expected Rejected, got {:?}", other),
		}
	}

	#[test]
	fn replaying_the_same_append_entries_batch_is_idempotent() {
		let now = Instant::now();
		let mut follower = make_node(3, &[1, 2, 3], now);
		let entries = vec![
			LogEntry { index: 1, term: 1, data: LogEntryData::Command(b"a".to_vec()), client: None },
			LogEntry { index: 2, term: 1, data: LogEntryData::Command(b"b".to_vec()), client: None },
		];
		let req = AppendEntriesRequest {
			term: 1,
			leader_id: 1,
			prev_log_index: 0,
			prev_log_term: 0,
			entries: entries.clone(),
			leader_commit: 0,
		};

		let mut tick1 = Tick::empty(now);
		let resp1 = follower.append_entries(req.clone(), &mut tick1).persisted();
		let mut tick2 = Tick::empty(now);
		let resp2 = follower.append_entries(req, &mut tick2).persisted();

		assert!(matches!(resp1, AppendEntriesResponse::Successful { match_index: 2, .. }));
		assert!(matches!(resp2, AppendEntriesResponse::Successful { match_index: 2, .. }));
		assert_eq!(follower.log().last_index(), 2);
	}
}
