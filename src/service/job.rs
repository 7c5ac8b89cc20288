//! `Job` and `Batch`.

use std::time::Instant;

use crate::{model::ModelKey, streaming::Producer};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

/// A unit of inference work. Owned by the queue until claimed into a batch,
/// then by the worker until its terminal chunk is published, then by the
/// caller via its `StreamingResult` consumer handle.
pub struct Job {
	pub id: JobId,
	pub model: ModelKey,
	pub payload: Vec<u8>,
	pub result: Producer,
	pub created_at: Instant,
}

impl Job {
	#[must_use]
	pub fn age(&self) -> std::time::Duration { self.created_at.elapsed() }
}

/// A transient aggregation of jobs pulled off the queue together, size in
/// `[1, batch_size]`. Batches are never re-ordered: within a batch, job
/// order matches queue order.
pub struct Batch {
	pub jobs: Vec<Job>,
}

impl Batch {
	#[must_use]
	pub fn len(&self) -> usize { self.jobs.len() }

	#[must_use]
	pub fn is_empty(&self) -> bool { self.jobs.is_empty() }
}
