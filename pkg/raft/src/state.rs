//! The three `ServerState` variants a node can be in, each carrying its own
//! private bookkeeping. `consensus.rs` dispatches on this tag directly.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::log_index_map::LogIndexMap;
use crate::protos::MemberId;

pub struct ServerFollowerState {
	/// Instant at which the current randomized election timeout was armed.
	pub last_heartbeat: Instant,

	/// The randomized duration drawn for this arming ("a fresh
	/// randomized duration ... each time it is (re)armed").
	pub election_timeout: Duration,

	/// The leader this follower most recently accepted an `AppendEntries`
	/// from, used to answer `ClientMessage` redirect hints when this node
	/// is not the leader.
	pub last_leader_id: Option<MemberId>,
}

pub struct ServerCandidateState {
	/// Instant this election (this term) started, used to detect the
	/// election timeout expiring with no quorum reached.
	pub election_start: Instant,

	/// The randomized duration drawn when this election started.
	pub election_timeout: Duration,

	/// Members (other than self) that have granted us a vote this term.
	pub votes_received: HashSet<MemberId>,
}

pub struct ServerLeaderState {
	/// `nextIndex`/`matchIndex` for every peer. Cleared entirely on role
	/// exit ("Mutable per-peer index tables").
	pub progress: LogIndexMap,
}

pub enum ServerState {
	Follower(ServerFollowerState),
	Candidate(ServerCandidateState),
	Leader(ServerLeaderState),
}

impl ServerState {
	pub fn new_follower(now: Instant, election_timeout: Duration) -> Self {
		ServerState::Follower(ServerFollowerState { last_heartbeat: now, election_timeout, last_leader_id: None })
	}

	pub fn is_leader(&self) -> bool {
		matches!(self, ServerState::Leader(_))
	}

	pub fn is_candidate(&self) -> bool {
		matches!(self, ServerState::Candidate(_))
	}

	pub fn is_follower(&self) -> bool {
		matches!(self, ServerState::Follower(_))
	}
}
