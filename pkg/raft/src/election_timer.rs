//! `ElectionTimer`: a source of randomized follower/candidate timeouts,
//! plus the startup validation tying the heartbeat interval to the lower
//! bound of that range.

use std::time::Duration;

use rand::Rng;

use crate::errors::{Error, ErrorKind, Result};

/// Produces a fresh randomized duration uniformly in `[min, max]` each time
/// it is rearmed. Must be reset whenever a follower receives a valid
/// `AppendEntries`, grants a vote, or a candidate is elected —
/// callers do that by calling `next` again and replacing whatever deadline
/// they were tracking.
#[derive(Debug, Clone, Copy)]
pub struct ElectionTimer {
	min: Duration,
	max: Duration,
}

impl ElectionTimer {
	pub fn new(min: Duration, max: Duration) -> Self {
		assert!(min <= max, "election-timeout.min must not exceed election-timeout.max");
		ElectionTimer { min, max }
	}

	/// Draws a new randomized timeout in `[min, max]`.
	pub fn next(&self) -> Duration {
		if self.min == self.max {
			return self.min;
		}
		rand::thread_rng().gen_range(self.min..=self.max)
	}

	pub fn min(&self) -> Duration {
		self.min
	}
}

/// Validates the `heartbeat-interval < election-timeout.min` invariant.
/// Fatal on start: callers should propagate this out of node construction
/// rather than silently clamping the values.
pub fn validate_timer_config(timer: &ElectionTimer, heartbeat_interval: Duration) -> Result<()> {
	if heartbeat_interval >= timer.min() {
		return Err(Error::from_kind(ErrorKind::TimerMisconfigured(heartbeat_interval, timer.min())));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn draws_within_range() {
		let timer = ElectionTimer::new(Duration::from_millis(150), Duration::from_millis(300));
		for _ in 0..1000 {
			let d = timer.next();
			assert!(d >= Duration::from_millis(150));
			assert!(d <= Duration::from_millis(300));
		}
	}

	#[test]
	fn degenerate_range_is_constant() {
		let timer = ElectionTimer::new(Duration::from_millis(200), Duration::from_millis(200));
		assert_eq!(timer.next(), Duration::from_millis(200));
	}

	#[test]
	fn rejects_heartbeat_at_or_above_min() {
		let timer = ElectionTimer::new(Duration::from_millis(150), Duration::from_millis(300));
		assert!(validate_timer_config(&timer, Duration::from_millis(150)).is_err());
		assert!(validate_timer_config(&timer, Duration::from_millis(200)).is_err());
		assert!(validate_timer_config(&timer, Duration::from_millis(50)).is_ok());
	}
}
