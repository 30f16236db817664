//! `ClientStateMachineAdapter`: the capability the embedding
//! application supplies so committed commands actually do something. The
//! core invokes `apply` exactly once per committed user entry, in commit
//! order, never for configuration entries ("Applying committed
//! entries").

use async_trait::async_trait;

/// Implemented by the embedding application (see `demos/wordcat` for a
/// worked example: a state machine that concatenates words). `apply` must
/// be deterministic given the sequence of commands applied so far, since
/// every node in the cluster runs it over the same committed log.
#[async_trait]
pub trait ClientStateMachineAdapter: Send + Sync {
	/// Applies one committed command and returns the value to route back to
	/// the client that submitted it. A failure here is surfaced to
	/// the client through the reply channel but never halts the log — the
	/// entry is still considered committed.
	async fn apply(&self, command: Vec<u8>) -> Result<Vec<u8>, String>;
}

/// An adapter that does nothing but echo the command back. Useful as a
/// default for nodes that only need to participate in replication (e.g. a
/// learner-less voting member in a test cluster) without running a real
/// application.
#[derive(Default)]
pub struct NoopStateMachine;

#[async_trait]
impl ClientStateMachineAdapter for NoopStateMachine {
	async fn apply(&self, command: Vec<u8>) -> Result<Vec<u8>, String> {
		Ok(command)
	}
}
