#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate serde_derive;

pub mod errors {
	use std::time::Duration;

	error_chain! {
		foreign_links {
			Io(::std::io::Error);
			Encode(::rmp_serde::encode::Error);
			Decode(::rmp_serde::decode::Error);
		}

		errors {
			/// `TimerMisconfigured`: fatal on start.
			TimerMisconfigured(heartbeat_interval: Duration, election_timeout_min: Duration) {
				description("heartbeat-interval must be strictly less than election-timeout.min")
				display(
					"heartbeat-interval ({:?}) must be < election-timeout.min ({:?})",
					heartbeat_interval, election_timeout_min
				)
			}

			/// `ConfigurationInvariantViolation`: fatal on start
			/// (e.g. empty membership, or self absent from the bootstrap
			/// configuration).
			ConfigurationInvariantViolation(reason: String) {
				description("invalid bootstrap configuration")
				display("invalid bootstrap configuration: {}", reason)
			}
		}
	}
}

pub mod bus;
pub mod config;
pub mod config_state;
pub mod constraint;
pub mod consensus;
pub mod election_timer;
pub mod events;
pub mod log;
pub mod log_index_map;
pub mod node;
pub mod protos; // TODO: Eventually make this private again
pub mod state;
pub mod state_machine;
pub mod wire;

pub use crate::config::RaftConfig;
pub use crate::consensus::{ConsensusModule, ProposalStatus, ProposeError, ProposeResult, Tick};
pub use crate::node::{NodeConfig, RaftNode};
pub use crate::protos::*;
