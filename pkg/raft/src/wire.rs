//! Msgpack (de)serialization helpers for anything that needs to cross a real
//! transport (an embedder's `MessageBus` implementation, or the persistence
//! adapter). Kept independent of any particular transport since picking one
//! is explicitly out of scope.

use serde::{de::DeserializeOwned, Serialize};

use crate::errors::Result;

pub fn marshal<T: Serialize>(value: &T) -> Result<Vec<u8>> {
	Ok(rmp_serde::to_vec(value)?)
}

pub fn unmarshal<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
	Ok(rmp_serde::from_slice(data)?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::protos::{LogEntryData, RequestVoteRequest};

	#[test]
	fn round_trips_a_request() {
		let req = RequestVoteRequest { term: 4, candidate_id: 7, last_log_index: 10, last_log_term: 3 };
		let bytes = marshal(&req).unwrap();
		let decoded: RequestVoteRequest = unmarshal(&bytes).unwrap();
		assert_eq!(decoded.term, req.term);
		assert_eq!(decoded.candidate_id, req.candidate_id);
	}

	#[test]
	fn round_trips_command_bytes() {
		let entry = LogEntryData::Command(vec![1, 2, 3]);
		let bytes = marshal(&entry).unwrap();
		let decoded: LogEntryData = unmarshal(&bytes).unwrap();
		matches!(decoded, LogEntryData::Command(v) if v == vec![1, 2, 3]);
	}
}
