//! The append-time configuration adoption rule: a node's effective
//! `ClusterConfiguration` changes the instant a config entry is appended to
//! its log, not when that entry commits. `ConfigurationStateMachine` tracks
//! that effective value plus enough history to revert it correctly if the
//! entry that introduced it is later truncated away.

use crate::protos::{ClusterConfiguration, LogIndex};

/// A configuration paired with the log index at which it was introduced,
/// so that `revert` can tell whether a truncation removed it.
#[derive(Debug, Clone)]
struct Versioned {
	config: ClusterConfiguration,
	introduced_at: LogIndex,
}

/// A config change that has been appended but not yet committed. Proposing
/// a second configuration change is refused (with
/// `ProposeError::RetryAfter`) while this is set, per "a new
/// configuration change is blocked until the previous change is committed".
#[derive(Debug, Clone, Copy)]
pub struct PendingChange {
	pub last_change: LogIndex,
}

pub struct ConfigurationStateMachine {
	/// The configuration currently in effect, and the bootstrap
	/// configuration used as the fallback floor once every in-log
	/// configuration has been reverted away.
	current: Versioned,
	bootstrap: ClusterConfiguration,

	/// History of in-log configurations still reachable by truncation,
	/// most recent first. Bounded in practice by how far back an
	/// in-flight config change can be before it commits.
	history: Vec<Versioned>,

	pub pending: Option<PendingChange>,
}

impl ConfigurationStateMachine {
	pub fn new(bootstrap: ClusterConfiguration) -> Self {
		ConfigurationStateMachine {
			current: Versioned { config: bootstrap.clone(), introduced_at: 0 },
			bootstrap,
			history: Vec::new(),
			pending: None,
		}
	}

	pub fn value(&self) -> &ClusterConfiguration {
		&self.current.config
	}

	/// Applies a configuration appearing in a freshly appended log entry at
	/// `index`. Adopts it immediately regardless of `commit_index` (the
	/// append-time rule); ignores it (`ConfigRegression`) if it is
	/// not newer than the currently effective one, which can happen on a
	/// duplicate/replayed `AppendEntries`.
	pub fn apply(&mut self, config: ClusterConfiguration, index: LogIndex) {
		if !config.is_newer_than(&self.current.config) {
			return;
		}

		self.history.push(self.current.clone());
		self.pending = Some(PendingChange { last_change: index });
		self.current = Versioned { config, introduced_at: index };
	}

	/// Clears `pending` once the configuration at `index` commits. A
	/// `Joint` configuration committing does not end the change (the
	/// leader still must propose and commit the follow-up `Stable`); only
	/// committing a `Stable` configuration resolves `pending`.
	///
	/// Returns `true` if this call changed `pending` (used by the caller to
	/// decide whether the configuration needs to be persisted).
	pub fn commit(&mut self, commit_index: LogIndex) -> bool {
		if let Some(pending) = self.pending {
			if commit_index >= pending.last_change {
				if let ClusterConfiguration::Stable(_) = self.current.config {
					self.pending = None;
					return true;
				}
			}
		}
		false
	}

	/// Called by a leader after advancing `committed_index`. If the
	/// currently effective configuration is a `Joint` one whose introducing
	/// entry has just committed, returns the `Stable` configuration the
	/// leader must propose next ("Applying committed entries":
	/// "`JointConsensusClusterConfiguration` entries, when committed by the
	/// leader, cause the leader to propose a corresponding
	/// `StableClusterConfiguration(new)`"). Returns `None` once that
	/// follow-up has itself been proposed, since the append-time rule means
	/// `current` is by then already the `Stable` entry.
	pub fn joint_awaiting_stable(&self, commit_index: LogIndex) -> Option<ClusterConfiguration> {
		let pending = self.pending?;
		if commit_index < pending.last_change {
			return None;
		}
		match &self.current.config {
			ClusterConfiguration::Joint(_, new) => Some(ClusterConfiguration::Stable(new.clone())),
			ClusterConfiguration::Stable(_) => None,
		}
	}

	/// Reverts the effective configuration after the follower-only log
	/// truncation at `truncate_from` (the first index being dropped): if the
	/// currently effective configuration was introduced at or after that
	/// index, it is discarded and replaced by the most recent configuration
	/// still present in the log, or the bootstrap configuration if none
	/// remain.
	pub fn revert(&mut self, truncate_from: LogIndex) {
		while self.current.introduced_at >= truncate_from && self.current.introduced_at != 0 {
			match self.history.pop() {
				Some(previous) => self.current = previous,
				None => {
					self.current = Versioned { config: self.bootstrap.clone(), introduced_at: 0 };
					break;
				}
			}
		}

		self.history.retain(|v| v.introduced_at < truncate_from);

		if let Some(pending) = self.pending {
			if pending.last_change >= truncate_from {
				self.pending = None;
			}
		}
	}
}
