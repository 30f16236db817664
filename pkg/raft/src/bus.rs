//! `MessageBus` adapter: the sole seam between a node and the
//! rest of the cluster. The core only ever calls `send`; delivering a
//! message back into a node's mailbox is entirely up to whatever wires the
//! bus up (`node::RaftNode::run` for `InMemoryMessageBus`).
//!
//! Only an in-memory implementation ships here: picking a real wire
//! transport is explicitly out of scope, so an embedder
//! supplies their own `MessageBus` the same way they supply a
//! `ClientStateMachineAdapter`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::protos::{Envelope, MemberId, Message};

/// Delivers `Envelope`s between members. Delivery is best-effort, unordered,
/// and may drop or duplicate a message — the core tolerates this
/// through idempotent `AppendEntries` replay and at-most-one-vote-per-term
/// voting, so no implementation needs to provide stronger guarantees than
/// that.
#[async_trait]
pub trait MessageBus: Send + Sync {
	async fn send(&self, envelope: Envelope);
}

/// An in-process bus backed by one bounded `mpsc` channel per registered
/// member. Bounded rather than unbounded so that a slow or wedged member
/// applies backpressure instead of letting senders buffer unboundedly; a
/// full channel is treated as "dropped" per the best-effort contract rather
/// than awaited, since blocking the sender's mailbox on a stuck peer would
/// violate the no-I/O-in-a-handler rule.
pub struct InMemoryMessageBus {
	members: Mutex<HashMap<MemberId, mpsc::Sender<Envelope>>>,
}

impl InMemoryMessageBus {
	pub fn new() -> Self {
		InMemoryMessageBus { members: Mutex::new(HashMap::new()) }
	}

	/// Registers `id` with the bus and returns the receiving half of its
	/// mailbox. `capacity` bounds how many undelivered envelopes may queue
	/// before further sends to this member are silently dropped.
	pub fn register(&self, id: MemberId, capacity: usize) -> mpsc::Receiver<Envelope> {
		let (tx, rx) = mpsc::channel(capacity);
		self.members.lock().unwrap().insert(id, tx);
		rx
	}

	pub fn unregister(&self, id: MemberId) {
		self.members.lock().unwrap().remove(&id);
	}
}

impl Default for InMemoryMessageBus {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
	async fn send(&self, envelope: Envelope) {
		let sender = self.members.lock().unwrap().get(&envelope.to).cloned();
		if let Some(sender) = sender {
			// try_send, not send().await: a full mailbox means the peer is
			// behind, and this is best-effort delivery, not a
			// reliable queue.
			let _ = sender.try_send(envelope);
		}
	}
}
