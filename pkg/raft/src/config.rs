//! `RaftConfig`: the knobs an embedder can set, loadable from TOML.
//! Field names mirror the documented configuration surface verbatim
//! (`election-timeout.min`, `heartbeat-interval`, ...), nested the way a
//! hand-written TOML file for this would naturally group them.

use std::time::Duration;

use serde::Deserialize;

use crate::election_timer::{validate_timer_config, ElectionTimer};
use crate::errors::Result;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ElectionTimeoutConfig {
	pub min_ms: u64,
	pub max_ms: u64,
}

impl Default for ElectionTimeoutConfig {
	fn default() -> Self {
		ElectionTimeoutConfig { min_ms: 150, max_ms: 300 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RaftConfig {
	pub election_timeout: ElectionTimeoutConfig,
	pub heartbeat_interval_ms: u64,
	pub default_append_entries_batch_size: usize,

	/// Gates `TestEventStream` emission (`events::GatedEventStream`,
	/// applied in `node::RaftNode::spawn`) regardless of which stream was
	/// injected into `node::NodeConfig::events`.
	pub publish_testing_events: bool,
}

impl Default for RaftConfig {
	fn default() -> Self {
		RaftConfig {
			election_timeout: ElectionTimeoutConfig::default(),
			heartbeat_interval_ms: 50,
			default_append_entries_batch_size: 5,
			publish_testing_events: false,
		}
	}
}

impl RaftConfig {
	/// Parses a TOML document, falling back to `Default` for any field (or
	/// whole table) it omits.
	pub fn from_toml(text: &str) -> Result<RaftConfig> {
		let config: RaftConfig = toml::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	pub fn election_timeout_min(&self) -> Duration {
		Duration::from_millis(self.election_timeout.min_ms)
	}

	pub fn election_timeout_max(&self) -> Duration {
		Duration::from_millis(self.election_timeout.max_ms)
	}

	pub fn heartbeat_interval(&self) -> Duration {
		Duration::from_millis(self.heartbeat_interval_ms)
	}

	pub fn election_timer(&self) -> ElectionTimer {
		ElectionTimer::new(self.election_timeout_min(), self.election_timeout_max())
	}

	/// Checks the `heartbeat-interval < election-timeout.min` invariant.
	/// Returns an error rather than panicking; only `RaftNode::new` treats
	/// this as fatal.
	pub fn validate(&self) -> Result<()> {
		validate_timer_config(&self.election_timer(), self.heartbeat_interval())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_the_documented_values() {
		let config = RaftConfig::default();
		assert_eq!(config.election_timeout_min(), Duration::from_millis(150));
		assert_eq!(config.election_timeout_max(), Duration::from_millis(300));
		assert_eq!(config.heartbeat_interval(), Duration::from_millis(50));
		assert_eq!(config.default_append_entries_batch_size, 5);
		assert!(!config.publish_testing_events);
		assert!(config.validate().is_ok());
	}

	#[test]
	fn parses_partial_toml_over_defaults() {
		let text = "heartbeat-interval-ms = 20\npublish-testing-events = true\n";
		let config = RaftConfig::from_toml(text).unwrap();
		assert_eq!(config.heartbeat_interval(), Duration::from_millis(20));
		assert_eq!(config.election_timeout_min(), Duration::from_millis(150));
		assert!(config.publish_testing_events);
	}

	#[test]
	fn parses_nested_election_timeout_table() {
		let text = "[election-timeout]\nmin-ms = 200\nmax-ms = 400\n";
		let config = RaftConfig::from_toml(text).unwrap();
		assert_eq!(config.election_timeout_min(), Duration::from_millis(200));
		assert_eq!(config.election_timeout_max(), Duration::from_millis(400));
	}

	#[test]
	fn rejects_misconfigured_timers() {
		let text = "heartbeat-interval-ms = 200\n";
		assert!(RaftConfig::from_toml(text).is_err());
	}
}
