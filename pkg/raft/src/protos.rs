use std::collections::HashSet;

/*
	NOTE: When two servers first connect to each other, they should exchange
	cluster ids to validate that both of them are operating in the same
	namespace of members.

	Types of entries that ever occupy a log index:
	- Noop: occupies a slot without carrying an application command (used by
	  a freshly elected leader to commit an entry from its own term before it
	  accepts client traffic).
	- Command: an opaque blob handed to the `ClientStateMachineAdapter`.
	- Config: a membership change, either a joint-consensus entry or the
	  stable configuration that follows it once the joint entry commits.
*/

/// Type used to uniquely identify each server. These are assigned
/// out-of-band (e.g. by cluster discovery) and never repeat within a
/// cluster's lifetime.
pub type MemberId = u64;

pub type Term = u64;

pub type LogIndex = u64;

/// Persistent information describing the state of the current server.
/// `current_term` and `voted_for` must be durable before the corresponding
/// `RequestVote` response or `AppendEntries` is sent (see
/// `constraint::MustPersistMetadata`). `commit_index` deliberately does not
/// live here: `ReplicatedLog::committed_index` is the single source of
/// truth for it (monotonicity is easiest to keep if there is only one
/// place it can regress).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Metadata {
	/// Latest term seen by this server (starts at 0).
	pub current_term: Term,

	/// The id of the server we voted for in `current_term`.
	pub voted_for: Option<MemberId>,
}

impl Default for Metadata {
	fn default() -> Self {
		Metadata { current_term: 0, voted_for: None }
	}
}

/// The effective cluster membership at some point in the log.
///
/// `Stable` is the steady state; `Joint` is the transitional state a
/// membership change passes through so that quorums of the old and new
/// configurations overlap (Raft §6 joint consensus).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ClusterConfiguration {
	Stable(HashSet<MemberId>),
	Joint(HashSet<MemberId>, HashSet<MemberId>),
}

impl ClusterConfiguration {
	pub fn bootstrap(members: HashSet<MemberId>) -> Self {
		ClusterConfiguration::Stable(members)
	}

	/// True if `id` is a voting member under this configuration. For a joint
	/// configuration this considers `id` a member if it is a member of
	/// either side, since both sides may be sent entries.
	pub fn contains(&self, id: MemberId) -> bool {
		match self {
			ClusterConfiguration::Stable(members) => members.contains(&id),
			ClusterConfiguration::Joint(old, new) => old.contains(&id) || new.contains(&id),
		}
	}

	/// All members that should be sent entries under this configuration
	/// (the union of both sides for a joint configuration).
	pub fn all_members(&self) -> HashSet<MemberId> {
		match self {
			ClusterConfiguration::Stable(members) => members.clone(),
			ClusterConfiguration::Joint(old, new) => old.union(new).cloned().collect(),
		}
	}

	/// Used by a leader mid joint-consensus change to decide whether it must
	/// step down once the stable configuration that follows the joint entry
	/// commits.
	pub fn is_part_of_new_configuration(&self, id: MemberId) -> bool {
		match self {
			ClusterConfiguration::Stable(members) => members.contains(&id),
			ClusterConfiguration::Joint(_, new) => new.contains(&id),
		}
	}

	/// Version ordering used by `ConfigurationStateMachine::revert` to
	/// decide which of two in-log configurations is the more recent.
	///
	/// A joint configuration that carries `other` as its `old` side is
	/// newer than `other`. A stable configuration derived from a joint one
	/// (i.e. whose members equal the joint's `new` side) is newer than that
	/// joint.
	pub fn is_newer_than(&self, other: &ClusterConfiguration) -> bool {
		match (self, other) {
			(ClusterConfiguration::Joint(old, _), _) if old == &other.all_members() => true,
			(ClusterConfiguration::Stable(members), ClusterConfiguration::Joint(_, new)) => {
				members == new
			}
			_ => false,
		}
	}

	/// Minimum quorum size(s) that must agree for this configuration. For a
	/// stable configuration, a strict majority of its members; for a joint
	/// configuration, a strict majority of `old` AND a strict majority of
	/// `new` independently (see `log_index_map::consensus_for_index`).
	pub fn quorums(&self) -> Vec<&HashSet<MemberId>> {
		match self {
			ClusterConfiguration::Stable(members) => vec![members],
			ClusterConfiguration::Joint(old, new) => vec![old, new],
		}
	}
}

/// A single record in the replicated log. `index` is strictly increasing
/// starting at 1; `term` is nondecreasing along the log (Log Matching).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum LogEntryData {
	/// Does nothing but occupies a single log index; used by a freshly
	/// elected leader to commit an entry from its own term before serving
	/// client traffic (Raft §8, "Leader Completeness").
	Noop,

	/// Used internally for managing changes to the configuration of the
	/// cluster.
	Config(ClusterConfiguration),

	/// Opaque data handed verbatim to the `ClientStateMachineAdapter`.
	Command(Vec<u8>),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LogEntry {
	pub index: LogIndex,
	pub term: Term,
	pub data: LogEntryData,

	/// Address to route the apply result to, if this entry originated from
	/// a client rather than from internal bookkeeping (a no-op or a
	/// configuration change never carries a client).
	pub client: Option<MemberId>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppendEntriesRequest {
	pub term: Term,
	pub leader_id: MemberId,
	pub prev_log_index: LogIndex,
	pub prev_log_term: Term,
	pub entries: Vec<LogEntry>,
	pub leader_commit: LogIndex,
}

/// `AppendSuccessful{term, matchIndex}` / `AppendRejected{term, lastIndex}`,
/// kept as one wire type since every other RPC's response is too and the
/// two carry meaningfully different payloads (a match point to advance
/// `matchIndex` to, versus a hint for where to resend from).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum AppendEntriesResponse {
	/// `matchIndex` is the index of the last entry in the request that this
	/// follower now has durably in its log.
	Successful { term: Term, match_index: LogIndex },

	/// `last_index` is a hint for where the leader should resend from: the
	/// responder's own last log index, letting the leader decrement
	/// `nextIndex[P]` straight to `theirLastIndex` instead of one at a time.
	Rejected { term: Term, last_index: LogIndex },
}

impl AppendEntriesResponse {
	pub fn term(&self) -> Term {
		match self {
			AppendEntriesResponse::Successful { term, .. } => *term,
			AppendEntriesResponse::Rejected { term, .. } => *term,
		}
	}
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RequestVoteRequest {
	pub term: Term,
	pub candidate_id: MemberId,
	pub last_log_index: LogIndex,
	pub last_log_term: Term,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RequestVoteResponse {
	pub term: Term,
	pub vote_granted: bool,
}

/// Asks the leader to append a single entry on behalf of a client.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientMessage {
	pub client: MemberId,
	pub command: Vec<u8>,
}

/// Bootstrap injection: tells a freshly started node what configuration it
/// should start with. Also usable as the reply to `RequestConfiguration`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChangeConfiguration {
	pub config: ClusterConfiguration,
}

/// Asks any server for its currently effective configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RequestConfiguration {}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
	Follower,
	Candidate,
	Leader,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AskForState {}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IAmInState {
	pub role: RoleKind,
	pub term: Term,
}

/// Reply to a `ClientMessage` received by a non-leader: a redirect hint
/// naming the last known/voted-for leader rather than silently dropping
/// the request.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientMessageRejected {
	pub leader_hint: Option<MemberId>,
}

/// The result of applying a committed command, routed back to the entry's
/// originating client once it commits via the `MessageBus`. `Err` carries
/// an application-level failure: it is surfaced to the client through the
/// reply channel but does not halt the log.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientReply {
	pub result: Result<Vec<u8>, String>,
}

/// The full set of messages that can cross the `MessageBus`. All variants
/// aside from the purely client-facing ones carry a `term` inside their
/// payload, which every inbound handler inspects before dispatch (see
/// `ConsensusModule::observe_term`).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum Message {
	RequestVote(RequestVoteRequest),
	RequestVoteResponse(RequestVoteResponse),
	AppendEntries(AppendEntriesRequest),
	AppendEntriesResponse(AppendEntriesResponse),
	ClientMessage(ClientMessage),
	ClientMessageRejected(ClientMessageRejected),
	ClientReply(ClientReply),
	ChangeConfiguration(ChangeConfiguration),
	RequestConfiguration(RequestConfiguration),
	AskForState(AskForState),
	IAmInState(IAmInState),
}

/// An envelope carrying a `Message` with routing information, exchanged
/// over the `MessageBus` (see `bus::MessageBus`).
#[derive(Debug, Clone)]
pub struct Envelope {
	pub from: MemberId,
	pub to: MemberId,
	pub body: Message,
}
