//! Per-peer progress tracking for a leader (`LogIndexMap`).
//!
//! A `LogIndexMap` is just `nextIndex`/`matchIndex` bookkeeping plus the
//! majority computation that drives the leader's commit rule; it carries no
//! notion of role or term and is cleared whenever its owning `ServerState`
//! leaves `Leader` (see `state::ServerLeaderState`).

use std::collections::HashMap;

use crate::protos::{ClusterConfiguration, LogIndex, MemberId};

#[derive(Debug, Clone, Copy, Default)]
pub struct PeerProgress {
	/// Index of the next entry to send this peer.
	pub next_index: LogIndex,

	/// Highest index known to be durably present on this peer's log.
	pub match_index: LogIndex,
}

/// Mapping `MemberId -> index`, with the majority-consensus query the
/// leader uses to find the next commit point.
#[derive(Default)]
pub struct LogIndexMap {
	progress: HashMap<MemberId, PeerProgress>,
}

impl LogIndexMap {
	pub fn new() -> Self {
		LogIndexMap { progress: HashMap::new() }
	}

	pub fn ensure(&mut self, id: MemberId, next_index: LogIndex) {
		self.progress.entry(id).or_insert(PeerProgress { next_index, match_index: 0 });
	}

	pub fn remove(&mut self, id: MemberId) {
		self.progress.remove(&id);
	}

	pub fn next_index(&self, id: MemberId) -> Option<LogIndex> {
		self.progress.get(&id).map(|p| p.next_index)
	}

	pub fn match_index(&self, id: MemberId) -> Option<LogIndex> {
		self.progress.get(&id).map(|p| p.match_index)
	}

	pub fn put(&mut self, id: MemberId, next_index: LogIndex, match_index: LogIndex) {
		self.progress.insert(id, PeerProgress { next_index, match_index });
	}

	/// Walks `next_index` back on an `AppendRejected` (Leader). `candidate`
	/// is the rejecting peer's reported `last_index + 1`; the new
	/// `next_index` is `min(candidate, current_next_index - 1)`, floored at
	/// 1, so it is *always* strictly smaller than the current value,
	/// regardless of `candidate`.
	///
	/// Clamping only to `candidate` (as a plain "smaller of the two" update
	/// would) is not enough: a peer with a longer but conflicting log (e.g.
	/// a stale ex-leader rejoining with uncommitted entries the new leader
	/// never wrote) reports a `last_index` at or above the current
	/// `next_index`, so `candidate >= current_next_index` and a "take the
	/// smaller" update would leave `next_index` unchanged. The leader would
	/// then resend the identical batch, the peer would reject it
	/// identically, and the two would never converge — the unconditional
	/// `- 1` below guarantees the backwards search for the last matching
	/// entry always makes progress, while `candidate` still lets it jump
	/// straight there when the peer is simply behind rather than
	/// conflicting.
	pub fn put_if_smaller_next_index(&mut self, id: MemberId, candidate: LogIndex) {
		let entry = self.progress.entry(id).or_insert(PeerProgress { next_index: candidate, match_index: 0 });
		let decremented = entry.next_index.saturating_sub(1).max(1);
		entry.next_index = candidate.min(decremented).max(1);
	}

	/// Sets `match_index` (and the implied `next_index`) only if it's
	/// greater than the current one. Used on `AppendSuccessful`, where
	/// out-of-order replies for the same peer must never regress progress.
	pub fn put_if_greater_match_index(&mut self, id: MemberId, match_index: LogIndex) {
		let entry = self.progress.entry(id).or_insert(PeerProgress { next_index: match_index + 1, match_index });
		if match_index > entry.match_index {
			entry.match_index = match_index;
			entry.next_index = match_index + 1;
		}
	}

	pub fn ids(&self) -> impl Iterator<Item = &MemberId> {
		self.progress.keys()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&MemberId, &PeerProgress)> {
		self.progress.iter()
	}

	/// Largest index `k` such that a quorum under `config` has
	/// `match_index >= k`, counting `self_match_index` as this node's own
	/// entry (the leader is always implicitly part of every quorum it
	/// computes over). For `Joint(old, new)` this is
	/// `min(consensus_over(old), consensus_over(new))`.
	pub fn consensus_for_index(
		&self,
		config: &ClusterConfiguration,
		self_id: MemberId,
		self_match_index: LogIndex,
	) -> LogIndex {
		config
			.quorums()
			.into_iter()
			.map(|members| self.consensus_over(members, self_id, self_match_index))
			.min()
			.unwrap_or(0)
	}

	/// Lower-median of `match_index` across `members` (counting `self_id`'s
	/// match index as `self_match_index` if it is itself a member of this
	/// set, which is always true for one side of whatever configuration the
	/// leader is operating under).
	fn consensus_over(
		&self,
		members: &std::collections::HashSet<MemberId>,
		self_id: MemberId,
		self_match_index: LogIndex,
	) -> LogIndex {
		if members.is_empty() {
			return 0;
		}

		let mut indexes: Vec<LogIndex> = members
			.iter()
			.map(|id| {
				if *id == self_id {
					self_match_index
				} else {
					self.match_index(*id).unwrap_or(0)
				}
			})
			.collect();

		indexes.sort_unstable();
		// Lower median: for n members this is the majority threshold entry,
		// i.e. the largest index present on at least ceil(n/2) members.
		indexes[(indexes.len() - 1) / 2]
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashSet;

	fn set(ids: &[MemberId]) -> HashSet<MemberId> {
		ids.iter().cloned().collect()
	}

	#[test]
	fn stable_consensus_is_lower_median() {
		let mut map = LogIndexMap::new();
		map.put(2, 0, 5);
		map.put(3, 0, 3);

		let config = ClusterConfiguration::Stable(set(&[1, 2, 3]));
		// self (1) has match_index 7; sorted [3, 5, 7] -> lower median index 1 -> 5
		assert_eq!(map.consensus_for_index(&config, 1, 7), 5);
	}

	#[test]
	fn even_membership_uses_lower_median() {
		let mut map = LogIndexMap::new();
		map.put(2, 0, 4);
		map.put(3, 0, 4);
		map.put(4, 0, 1);

		let config = ClusterConfiguration::Stable(set(&[1, 2, 3, 4]));
		// self (1) has match_index 9; sorted [1, 4, 4, 9] -> lower median index 1 -> 4
		assert_eq!(map.consensus_for_index(&config, 1, 9), 4);
	}

	#[test]
	fn joint_consensus_is_min_of_both_sides() {
		let mut map = LogIndexMap::new();
		map.put(2, 0, 5);
		map.put(3, 0, 5);
		map.put(4, 0, 2);

		let old = set(&[1, 2, 3]);
		let new = set(&[1, 3, 4]);
		let config = ClusterConfiguration::Joint(old, new);

		// old side: self=1 -> 5, sorted with 2(5),3(5) => median 5
		// new side: self=1 -> 5, sorted with 3(5),4(2) => median 5
		assert_eq!(map.consensus_for_index(&config, 1, 5), 5);

		// Now member 4 is way behind and 3 drops too: new side median becomes 2
		map.put(3, 0, 1);
		assert_eq!(map.consensus_for_index(&config, 1, 5), 1);
	}

	#[test]
	fn put_if_smaller_never_increases() {
		let mut map = LogIndexMap::new();
		map.ensure(2, 10);
		map.put_if_smaller_next_index(2, 3);
		assert_eq!(map.next_index(2), Some(3));
	}

	#[test]
	fn put_if_smaller_always_strictly_decrements_even_when_the_candidate_does_not() {
		// A peer with a longer but conflicting log (e.g. a stale ex-leader)
		// reports a `last_index` at or above `next_index`, so the candidate
		// (`last_index + 1`) is >= the current value. Taking the smaller of
		// the two would leave `next_index` unchanged every round and never
		// converge; it must retreat by at least one regardless.
		let mut map = LogIndexMap::new();
		map.ensure(2, 6);
		map.put_if_smaller_next_index(2, 8);
		assert_eq!(map.next_index(2), Some(5));
		map.put_if_smaller_next_index(2, 8);
		assert_eq!(map.next_index(2), Some(4));
	}

	#[test]
	fn put_if_smaller_never_drops_below_one() {
		let mut map = LogIndexMap::new();
		map.ensure(2, 1);
		map.put_if_smaller_next_index(2, 1);
		assert_eq!(map.next_index(2), Some(1));
	}

	#[test]
	fn put_if_greater_never_decreases() {
		let mut map = LogIndexMap::new();
		map.ensure(2, 1);
		map.put_if_greater_match_index(2, 5);
		assert_eq!(map.match_index(2), Some(5));
		assert_eq!(map.next_index(2), Some(6));
		map.put_if_greater_match_index(2, 3);
		assert_eq!(map.match_index(2), Some(5));
	}
}
