//! `RaftNode`: the async actor that owns one `ConsensusModule`
//! and turns its pure `Tick` output into real work — sending envelopes on
//! the `MessageBus`, mirroring log mutations onto a `PersistentState`
//! adapter, invoking the `ClientStateMachineAdapter`, and rearming the
//! election/heartbeat timer. `ConsensusModule` itself never does any of
//! this ("no event handler blocks on I/O"); this module is where
//! that boundary is crossed.
//!
//! Scheduling model: a single `tokio::task` per node runs `RaftNode::run`,
//! which `select!`s over the node's mailbox (inbound envelopes, client
//! proposals, admin queries) and the next scheduled tick, processing one
//! event to completion before looking at the next — a single-threaded
//! cooperative actor.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::bus::MessageBus;
use crate::config::RaftConfig;
use crate::consensus::{ConsensusModule, ProposeResult, Tick};
use crate::errors::*;
use crate::events::{GatedEventStream, NoopEventStream, TestEventStream};
use crate::log::{PersistentState, ReplicatedLog};
use crate::protos::*;
use crate::state_machine::{ClientStateMachineAdapter, NoopStateMachine};

/// Everything needed to construct a `RaftNode`. Every capability is injected
/// ("Dependency injection of capabilities") so that tests can swap
/// in in-memory/no-op implementations and an embedder can swap in real ones
/// without touching this module.
pub struct NodeConfig {
	pub id: MemberId,

	/// The configuration to bootstrap with. Only honored if this node has
	/// never been configured before ("ChangeConfiguration (bootstrap
	/// injection)"); a live cluster's membership can only change through the
	/// joint-consensus log protocol afterwards.
	pub bootstrap: ClusterConfiguration,

	pub raft: RaftConfig,
	pub bus: Arc<dyn MessageBus>,
	pub state_machine: Box<dyn ClientStateMachineAdapter>,
	pub persistent: Arc<dyn PersistentState>,

	/// Wrapped in a `GatedEventStream` at `spawn` time: publishing through
	/// it is a no-op whenever `raft.publish_testing_events` is false, no
	/// matter what's injected here.
	pub events: Arc<dyn TestEventStream>,
}

impl NodeConfig {
	/// A config usable for tests that don't care about persistence, a real
	/// state machine, or test events: just `id`, `bootstrap`, and a bus.
	pub fn minimal(id: MemberId, bootstrap: ClusterConfiguration, bus: Arc<dyn MessageBus>) -> Self {
		NodeConfig {
			id,
			bootstrap,
			raft: RaftConfig::default(),
			bus,
			state_machine: Box::new(NoopStateMachine::default()),
			persistent: Arc::new(crate::log::InMemoryPersistentState::default()),
			events: Arc::new(NoopEventStream::default()),
		}
	}
}

enum Command {
	Propose { command: Vec<u8>, reply: oneshot::Sender<ProposeResult> },
	AskForState(oneshot::Sender<IAmInState>),
	ProposalStatus(crate::consensus::Proposal, oneshot::Sender<crate::consensus::ProposalStatus>),
}

/// A handle to a running node's mailbox. Cloning it is cheap (it is just a
/// channel sender); the actor task itself keeps running as long as at least
/// one handle or the inbound envelope receiver exists.
#[derive(Clone)]
pub struct RaftNode {
	id: MemberId,
	commands: mpsc::Sender<Command>,
}

impl RaftNode {
	/// Validates `config` (`ConfigurationInvariantViolation`,
	/// `TimerMisconfigured` — both fatal on start) and, if valid, spawns the
	/// actor task. `inbound` is the receiving half of this node's mailbox on
	/// `config.bus` (typically `InMemoryMessageBus::register(id, ..)`).
	pub fn spawn(config: NodeConfig, inbound: mpsc::Receiver<Envelope>) -> Result<RaftNode> {
		config.raft.validate()?;

		let members = config.bootstrap.all_members();
		if members.is_empty() || !members.contains(&config.id) {
			return Err(ErrorKind::ConfigurationInvariantViolation(
				"bootstrap configuration is empty or does not include this node's id".to_string(),
			)
			.into());
		}

		let (commands_tx, commands_rx) = mpsc::channel(256);

		// `publish_testing_events` is the one knob that must take effect
		// regardless of which `TestEventStream` the embedder injected: gate
		// it here rather than leaving emission solely up to whether a
		// no-op or a real stream was wired up.
		let events: Arc<dyn TestEventStream> =
			Arc::new(GatedEventStream::new(config.events, config.raft.publish_testing_events));

		let consensus = ConsensusModule::new(
			config.id,
			Metadata::default(),
			config.bootstrap,
			ReplicatedLog::new(),
			config.raft.election_timer(),
			config.raft.heartbeat_interval(),
			config.raft.default_append_entries_batch_size,
			events,
			Instant::now(),
		);

		let actor = NodeActor {
			id: config.id,
			consensus,
			bus: config.bus,
			state_machine: config.state_machine,
			persistent: config.persistent,
			inbound,
			commands: commands_rx,
			next_deadline: Instant::now(),
		};

		let span = tracing::info_span!("raft_node", member_id = config.id);
		tokio::spawn(async move {
			use tracing::Instrument;
			actor.run().instrument(span).await;
		});

		Ok(RaftNode { id: config.id, commands: commands_tx })
	}

	pub fn id(&self) -> MemberId {
		self.id
	}

	/// Submits a command for replication. Resolves once the entry has been
	/// appended locally (leader) or is rejected (not leader / a change is
	/// already pending) — not once it commits; poll `ConsensusModule`'s
	/// status separately (e.g. via `ask_for_state` plus a `TestEventStream`
	/// subscription) for that.
	pub async fn propose(&self, command: Vec<u8>) -> std::result::Result<ProposeResult, ()> {
		let (tx, rx) = oneshot::channel();
		if self.commands.send(Command::Propose { command, reply: tx }).await.is_err() {
			return Err(());
		}
		rx.await.map_err(|_| ())
	}

	pub async fn ask_for_state(&self) -> std::result::Result<IAmInState, ()> {
		let (tx, rx) = oneshot::channel();
		if self.commands.send(Command::AskForState(tx)).await.is_err() {
			return Err(());
		}
		rx.await.map_err(|_| ())
	}

	/// Polls whether a previously returned `Proposal` has committed, failed,
	/// or is still pending (`proposal_status`).
	pub async fn proposal_status(
		&self,
		proposal: crate::consensus::Proposal,
	) -> std::result::Result<crate::consensus::ProposalStatus, ()> {
		let (tx, rx) = oneshot::channel();
		if self.commands.send(Command::ProposalStatus(proposal, tx)).await.is_err() {
			return Err(());
		}
		rx.await.map_err(|_| ())
	}
}

struct NodeActor {
	id: MemberId,
	consensus: ConsensusModule,
	bus: Arc<dyn MessageBus>,
	state_machine: Box<dyn ClientStateMachineAdapter>,
	persistent: Arc<dyn PersistentState>,
	inbound: mpsc::Receiver<Envelope>,
	commands: mpsc::Receiver<Command>,
	/// Absolute time of the next scheduled wakeup, set from `tick.next_tick`
	/// every time a `Tick` is drained ("Arming a timer replaces any
	/// previously armed instance of the same name atomically" — there is
	/// only ever one deadline in flight, this field).
	next_deadline: Instant,
}

impl NodeActor {
	async fn run(mut self) {
		let mut tick = Tick::empty(Instant::now());
		self.consensus.cycle(&mut tick);
		self.drain(tick).await;

		loop {
			tokio::select! {
				envelope = self.inbound.recv() => {
					match envelope {
						Some(envelope) => self.handle_envelope(envelope).await,
						None => {
							tracing::info!(member = self.id, "inbound mailbox closed, shutting down");
							return;
						}
					}
				}
				command = self.commands.recv() => {
					match command {
						Some(command) => self.handle_command(command).await,
						None => {
							// No handle holders left, but the bus may still
							// deliver to us; keep serving the inbound side.
						}
					}
				}
				_ = tokio::time::sleep_until(self.next_deadline.into()) => {
					let mut tick = Tick::empty(Instant::now());
					self.consensus.on_heartbeat_timer(&mut tick);
					self.consensus.cycle(&mut tick);
					self.drain(tick).await;
				}
			}
		}
	}

	async fn handle_envelope(&mut self, envelope: Envelope) {
		let from = envelope.from;
		let mut tick = Tick::empty(Instant::now());

		match envelope.body {
			Message::RequestVote(req) => {
				let resp = self.consensus.request_vote(req, &mut tick).persisted();
				tick.messages.push(Envelope { from: self.id, to: from, body: Message::RequestVoteResponse(resp) });
			}
			Message::RequestVoteResponse(resp) => {
				self.consensus.request_vote_callback(from, resp, &mut tick);
			}
			Message::AppendEntries(req) => {
				let resp = self.consensus.append_entries(req, &mut tick).persisted();
				tick.messages.push(Envelope { from: self.id, to: from, body: Message::AppendEntriesResponse(resp) });
			}
			Message::AppendEntriesResponse(resp) => {
				self.consensus.append_entries_callback(from, resp, &mut tick);
			}
			Message::ClientMessage(msg) => {
				self.consensus.client_message(msg, &mut tick);
			}
			Message::ClientMessageRejected(_) | Message::ClientReply(_) => {
				// Client-facing replies; nothing for a peer node to do with
				// one of its own. An embedder's client-facing layer is the
				// intended recipient, not another `RaftNode`.
			}
			Message::ChangeConfiguration(change) => {
				if let Err(err) = self.consensus.receive_bootstrap_configuration(change.config) {
					tracing::warn!(member = self.id, %err, "ignoring bootstrap configuration");
				}
			}
			Message::RequestConfiguration(_) => {
				let reply = self.consensus.request_configuration();
				tick.messages.push(Envelope { from: self.id, to: from, body: Message::ChangeConfiguration(reply) });
			}
			Message::AskForState(_) => {
				let reply = self.consensus.ask_for_state();
				tick.messages.push(Envelope { from: self.id, to: from, body: Message::IAmInState(reply) });
			}
			Message::IAmInState(_) => {}
		}

		self.consensus.cycle(&mut tick);
		self.drain(tick).await;
	}

	async fn handle_command(&mut self, command: Command) {
		match command {
			Command::Propose { command, reply } => {
				let mut tick = Tick::empty(Instant::now());
				let result = self.consensus.propose_command(command, None, &mut tick);
				self.consensus.cycle(&mut tick);
				self.drain(tick).await;
				let _ = reply.send(result);
			}
			Command::AskForState(reply) => {
				let _ = reply.send(self.consensus.ask_for_state());
			}
			Command::ProposalStatus(proposal, reply) => {
				let _ = reply.send(self.consensus.proposal_status(&proposal));
			}
		}
	}

	/// Executes every side effect a `Tick` accumulated, in the order the
	/// persistence boundary cares about: metadata, then log mutations, then
	/// applies, then outbound sends.
	async fn drain(&mut self, tick: Tick) {
		if let Some(delay) = tick.next_tick {
			self.next_deadline = tick.time + delay;
		}

		if tick.meta_dirty {
			let meta = self.consensus.meta();
			self.persistent.persist_term(meta.current_term);
			self.persistent.persist_vote(meta.current_term, meta.voted_for);
		}

		for op in &tick.log_ops {
			match op {
				crate::consensus::LogOp::Append(entry) => self.persistent.append_entry(entry),
				crate::consensus::LogOp::TruncateAfter(index) => self.persistent.truncate_after(*index),
			}
		}

		let is_leader = self.consensus.role() == RoleKind::Leader;
		for apply in tick.applies {
			let result = self.state_machine.apply(apply.command).await;
			if is_leader {
				if let Some(client) = apply.client {
					let envelope = Envelope {
						from: self.id,
						to: client,
						body: Message::ClientReply(ClientReply { result }),
					};
					self.bus.send(envelope).await;
				}
			}
		}

		for envelope in tick.messages {
			self.bus.send(envelope).await;
		}
	}
}
