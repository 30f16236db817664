//! The append-only, term-tagged log every node maintains locally.
//!
//! Index `0` is a sentinel meaning "empty": `term_at(0)` is always `0` and
//! there is no entry stored at that index. The log is conceptually infinite;
//! compaction/snapshotting is out of scope.

use std::sync::RwLock;

use crate::protos::{LogEntry, LogIndex, Term};

/// A single point in the log, as returned by a successful append or
/// matched against by `ConsensusModule::proposal_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPosition {
	pub term: Term,
	pub index: LogIndex,
}

/// The persistence boundary. `ConsensusModule` calls every
/// method here at the point it would need to be durable before the
/// corresponding reply or append is allowed to go out, but never inspects
/// the return value: whether and how durability is achieved is entirely up
/// to the adapter. `InMemoryPersistentState` (below) is a valid
/// implementation that makes no additional durability guarantee beyond
/// what `ReplicatedLog` already holds in memory; an embedder that wants
/// crash recovery implements this trait against a file or database instead,
/// and nothing else in this crate needs to change.
pub trait PersistentState: Send + Sync {
	fn persist_vote(&self, term: Term, voted_for: Option<crate::protos::MemberId>);
	fn persist_term(&self, term: Term);
	fn append_entry(&self, entry: &LogEntry);
	fn truncate_after(&self, index: LogIndex);
	fn read_all(&self) -> Vec<LogEntry>;
}

/// The no-op adapter: satisfies `PersistentState` without writing anything
/// anywhere, since `ReplicatedLog` is already authoritative in memory. This
/// is the default used by `RaftNode` when no durable adapter is supplied.
#[derive(Default)]
pub struct InMemoryPersistentState;

impl PersistentState for InMemoryPersistentState {
	fn persist_vote(&self, _term: Term, _voted_for: Option<crate::protos::MemberId>) {}
	fn persist_term(&self, _term: Term) {}
	fn append_entry(&self, _entry: &LogEntry) {}
	fn truncate_after(&self, _index: LogIndex) {}
	fn read_all(&self) -> Vec<LogEntry> {
		Vec::new()
	}
}

/// The in-memory, append-only log itself.
///
/// Invariants upheld by this type alone (the surrounding
/// `ConsensusModule` is responsible for the cross-node invariants like Log
/// Matching and Leader Completeness):
/// - `committed_index <= last_index` at all times.
/// - `committed_index` is monotonically nondecreasing (`commit` panics on
///   regression).
/// - entries are stored in strictly increasing `index` order with
///   nondecreasing `term`.
pub struct ReplicatedLog {
	entries: RwLock<Vec<LogEntry>>,
	committed_index: RwLock<LogIndex>,
}

impl ReplicatedLog {
	pub fn new() -> Self {
		ReplicatedLog {
			entries: RwLock::new(Vec::new()),
			committed_index: RwLock::new(0),
		}
	}

	pub fn restore(entries: Vec<LogEntry>, committed_index: LogIndex) -> Self {
		ReplicatedLog {
			entries: RwLock::new(entries),
			committed_index: RwLock::new(committed_index),
		}
	}

	/// Offset of `index` into the backing vector. Only valid for `index`
	/// actually present in the log; callers must check `first_index()` /
	/// `last_index()` first.
	fn offset_of(&self, entries: &[LogEntry], index: LogIndex) -> Option<usize> {
		if index == 0 {
			return None;
		}
		let first = entries.first()?.index;
		if index < first {
			return None;
		}
		let offset = (index - first) as usize;
		if offset < entries.len() {
			Some(offset)
		} else {
			None
		}
	}

	pub fn first_index(&self) -> LogIndex {
		self.entries.read().unwrap().first().map(|e| e.index).unwrap_or(0)
	}

	pub fn last_index(&self) -> LogIndex {
		self.entries.read().unwrap().last().map(|e| e.index).unwrap_or(0)
	}

	pub fn last_term(&self) -> Term {
		self.term_at(self.last_index())
	}

	pub fn committed_index(&self) -> LogIndex {
		*self.committed_index.read().unwrap()
	}

	/// Term of the entry at `index`, or `0` for the sentinel empty index.
	/// Panics if `index` is nonzero but not present in the log: callers are
	/// expected to have already checked bounds via `contains`.
	pub fn term_at(&self, index: LogIndex) -> Term {
		if index == 0 {
			return 0;
		}
		let entries = self.entries.read().unwrap();
		match self.offset_of(&entries, index) {
			Some(offset) => entries[offset].term,
			None => panic!("term_at({}) out of range of the local log", index),
		}
	}

	/// Whether the log has an entry at `index` (or `index == 0`, the
	/// always-present sentinel).
	pub fn contains(&self, index: LogIndex) -> bool {
		if index == 0 {
			return true;
		}
		let entries = self.entries.read().unwrap();
		self.offset_of(&entries, index).is_some()
	}

	/// Appends a single entry. Callers (leader on propose, follower on
	/// accepting `AppendEntries`) are responsible for ensuring `entry.index`
	/// immediately follows `last_index()`.
	pub fn append(&self, entry: LogEntry) {
		let mut entries = self.entries.write().unwrap();
		debug_assert_eq!(entry.index, entries.last().map(|e| e.index + 1).unwrap_or(1));
		entries.push(entry);
	}

	/// Returns up to `max_count` entries starting at `index` (inclusive).
	pub fn entries_from(&self, index: LogIndex, max_count: usize) -> Vec<LogEntry> {
		let entries = self.entries.read().unwrap();
		match self.offset_of(&entries, index) {
			Some(offset) => entries[offset..].iter().take(max_count).cloned().collect(),
			None => Vec::new(),
		}
	}

	/// All entries with `from_exclusive < index <= to_inclusive`, in order.
	pub fn between(&self, from_exclusive: LogIndex, to_inclusive: LogIndex) -> Vec<LogEntry> {
		let entries = self.entries.read().unwrap();
		entries
			.iter()
			.filter(|e| e.index > from_exclusive && e.index <= to_inclusive)
			.cloned()
			.collect()
	}

	pub fn entry(&self, index: LogIndex) -> Option<LogEntry> {
		let entries = self.entries.read().unwrap();
		self.offset_of(&entries, index).map(|offset| entries[offset].clone())
	}

	/// Drops every entry with `index > index`. Only a follower ever calls
	/// this, and only when the leader reports a conflicting suffix.
	pub fn truncate_after(&self, index: LogIndex) {
		let mut entries = self.entries.write().unwrap();
		if let Some(offset) = self.offset_of(&entries, index + 1) {
			entries.truncate(offset);
		}
	}

	/// Advances `committed_index`. Monotonic: panics if asked to regress,
	/// since a committed index must never become uncommitted.
	pub fn commit(&self, index: LogIndex) {
		let mut committed = self.committed_index.write().unwrap();
		assert!(index >= *committed, "commit index must never regress");
		assert!(index <= self.last_index(), "cannot commit past the end of the log");
		*committed = index;
	}
}

impl Default for ReplicatedLog {
	fn default() -> Self {
		Self::new()
	}
}
