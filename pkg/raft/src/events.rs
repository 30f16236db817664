//! `TestEventStream`: purely observational publication of
//! internal milestones, gated behind `publish-testing-events`
//! (`config::RaftConfig::publish_testing_events`). These must never
//! influence state transitions — `ConsensusModule` only ever calls `publish`
//! after a transition has already happened.

use crate::protos::{LogIndex, MemberId, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftEvent {
	/// A node became a candidate and started soliciting votes.
	BeginElection { member: MemberId, term: Term },

	/// A node reached quorum and became leader.
	ElectedAsLeader { member: MemberId, term: Term },

	/// An entry was committed and applied.
	EntryCommitted { member: MemberId, index: LogIndex },
}

/// Injected into a node at construction: a no-op in production, a
/// collecting channel in tests.
pub trait TestEventStream: Send + Sync {
	fn publish(&self, event: RaftEvent);
}

#[derive(Default)]
pub struct NoopEventStream;

impl TestEventStream for NoopEventStream {
	fn publish(&self, _event: RaftEvent) {}
}

/// Forwards every published event onto an unbounded `tokio` channel, for
/// tests that want to assert on the exact sequence of milestones a node
/// goes through.
pub struct ChannelEventStream {
	sender: tokio::sync::mpsc::UnboundedSender<RaftEvent>,
}

impl ChannelEventStream {
	pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<RaftEvent>) {
		let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
		(ChannelEventStream { sender }, receiver)
	}
}

impl TestEventStream for ChannelEventStream {
	fn publish(&self, event: RaftEvent) {
		// Best-effort: if nobody is listening anymore there is nothing
		// useful to do with the error.
		let _ = self.sender.send(event);
	}
}

/// Wraps any `TestEventStream` so that `publish` is a no-op unless
/// `enabled`, regardless of which stream was injected — the single place
/// `config::RaftConfig::publish_testing_events` actually takes effect
/// (`node::RaftNode::spawn` wraps whatever `NodeConfig::events` is with
/// this, keyed off `config.raft.publish_testing_events`).
pub struct GatedEventStream {
	inner: std::sync::Arc<dyn TestEventStream>,
	enabled: bool,
}

impl GatedEventStream {
	pub fn new(inner: std::sync::Arc<dyn TestEventStream>, enabled: bool) -> Self {
		GatedEventStream { inner, enabled }
	}
}

impl TestEventStream for GatedEventStream {
	fn publish(&self, event: RaftEvent) {
		if self.enabled {
			self.inner.publish(event);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	#[test]
	fn disabled_gate_swallows_every_event_even_with_a_real_stream_injected() {
		let (stream, mut receiver) = ChannelEventStream::new();
		let gated = GatedEventStream::new(Arc::new(stream), false);

		gated.publish(RaftEvent::BeginElection { member: 1, term: 1 });
		gated.publish(RaftEvent::ElectedAsLeader { member: 1, term: 1 });

		receiver.close();
		assert!(receiver.try_recv().is_err(), "a disabled gate must not forward to the inner stream");
	}

	#[test]
	fn enabled_gate_forwards_every_event() {
		let (stream, mut receiver) = ChannelEventStream::new();
		let gated = GatedEventStream::new(Arc::new(stream), true);

		gated.publish(RaftEvent::EntryCommitted { member: 1, index: 3 });

		assert_eq!(receiver.try_recv().unwrap(), RaftEvent::EntryCommitted { member: 1, index: 3 });
	}
}
