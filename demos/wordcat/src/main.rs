//! The "example word-concatenation application" named as the core's external
//! collaborator: an in-process Raft cluster whose committed commands are
//! single words, applied by appending each to a running sentence. A small
//! `clap`-driven CLI harness spun up over an in-memory transport rather
//! than a real network protocol.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;

use raft::bus::InMemoryMessageBus;
use raft::events::NoopEventStream;
use raft::log::InMemoryPersistentState;
use raft::state_machine::ClientStateMachineAdapter;
use raft::{ClusterConfiguration, MemberId, NodeConfig, ProposalStatus, RaftConfig, RaftNode, RoleKind};

#[derive(Parser, Debug)]
#[command(name = "wordcat", about = "Demo Raft cluster that concatenates committed words")]
struct Args {
	/// Number of in-process cluster members to run.
	#[arg(long, default_value_t = 3)]
	nodes: u64,

	/// Words to submit, one at a time, waiting for each to commit before
	/// submitting the next.
	words: Vec<String>,
}

/// Applies each committed word by appending it to a shared sentence. Cheap
/// to clone: every clone shares the same backing `Mutex<String>`, which lets
/// the demo harness read a node's resulting text after the run without
/// going back through the wire.
#[derive(Clone, Default)]
struct WordCatStateMachine(Arc<Mutex<String>>);

impl WordCatStateMachine {
	fn snapshot(&self) -> String {
		self.0.lock().unwrap().clone()
	}
}

#[async_trait]
impl ClientStateMachineAdapter for WordCatStateMachine {
	async fn apply(&self, command: Vec<u8>) -> Result<Vec<u8>, String> {
		let word = String::from_utf8(command).map_err(|e| format!("non-utf8 command: {}", e))?;
		let mut text = self.0.lock().unwrap();
		if !text.is_empty() {
			text.push(' ');
		}
		text.push_str(&word);
		Ok(text.clone().into_bytes())
	}
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt::init();

	let args = Args::parse();
	let node_count = args.nodes.max(1);

	let bus = Arc::new(InMemoryMessageBus::new());
	let ids: Vec<MemberId> = (1..=node_count).collect();
	let bootstrap = ClusterConfiguration::Stable(ids.iter().cloned().collect());

	let mut nodes = Vec::new();
	let mut machines = Vec::new();
	for &id in &ids {
		let inbound = bus.register(id, 64);
		let machine = WordCatStateMachine::default();
		machines.push(machine.clone());

		let config = NodeConfig {
			id,
			bootstrap: bootstrap.clone(),
			raft: RaftConfig::default(),
			bus: bus.clone(),
			state_machine: Box::new(machine),
			persistent: Arc::new(InMemoryPersistentState::default()),
			events: Arc::new(NoopEventStream::default()),
		};

		let node = RaftNode::spawn(config, inbound).expect("bootstrap configuration includes every node's own id");
		nodes.push(node);
	}

	for word in &args.words {
		submit_word(&nodes, word).await;
	}

	// Give the last commit's apply a moment to land on every replica, then
	// print whichever node answers first: every node converges to the same
	// text since the state machine is deterministic over the same log.
	tokio::time::sleep(Duration::from_millis(50)).await;
	println!("{}", machines[0].snapshot());
}

async fn find_leader(nodes: &[RaftNode]) -> &RaftNode {
	loop {
		for node in nodes {
			if let Ok(state) = node.ask_for_state().await {
				if state.role == RoleKind::Leader {
					return node;
				}
			}
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
}

async fn submit_word(nodes: &[RaftNode], word: &str) {
	loop {
		let leader = find_leader(nodes).await;
		let proposal = match leader.propose(word.as_bytes().to_vec()).await {
			Ok(Ok(proposal)) => proposal,
			// Lost the leadership race, or a configuration change is still
			// in flight: retry against whoever is leader next.
			Ok(Err(_)) => continue,
			Err(()) => continue,
		};

		loop {
			match leader.proposal_status(proposal).await {
				Ok(ProposalStatus::Committed) => return,
				Ok(ProposalStatus::Failed) | Ok(ProposalStatus::Missing) => break,
				Ok(ProposalStatus::Pending) => tokio::time::sleep(Duration::from_millis(10)).await,
				Err(()) => break,
			}
		}
	}
}
