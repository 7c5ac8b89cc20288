//! Job Queue. The batcher itself lives in [`crate::worker::pool`],
//! since dispatching a drained batch requires picking an idle worker from
//! the same pool that owns this queue.

use std::{collections::VecDeque, sync::Mutex, time::Duration};

use serving_core::{err, Result};
use tokio::time::Instant as TokioInstant;

use crate::job::{Batch, Job};

/// Bounded FIFO of pending jobs for one model. Submissions beyond capacity
/// are rejected outright rather than blocking the producer.
pub struct JobQueue {
	capacity: usize,
	batch_size: usize,
	max_batch_delay: Duration,
	inner: Mutex<VecDeque<Job>>,
	notify: tokio::sync::Notify,
}

impl JobQueue {
	#[must_use]
	pub fn new(capacity: usize, batch_size: usize, max_batch_delay: Duration) -> Self {
		Self {
			capacity: capacity.max(batch_size),
			batch_size,
			max_batch_delay,
			inner: Mutex::new(VecDeque::new()),
			notify: tokio::sync::Notify::new(),
		}
	}

	pub fn push(&self, job: Job) -> Result<()> {
		let mut q = self.inner.lock().expect("queue lock poisoned");
		if q.len() >= self.capacity {
			return Err(err!(QueueFull("model {model}", model = job.model)));
		}
		q.push_back(job);
		drop(q);
		self.notify.notify_waiters();
		Ok(())
	}

	#[must_use]
	pub fn len(&self) -> usize { self.inner.lock().expect("queue lock poisoned").len() }

	#[must_use]
	pub fn max_batch_delay(&self) -> Duration { self.max_batch_delay }

	#[must_use]
	pub fn capacity(&self) -> usize { self.capacity }

	#[must_use]
	pub fn is_empty(&self) -> bool { self.len() == 0 }

	/// Batching policy: emit when the queue is at `batch_size`, when
	/// the head job has waited `>= max_batch_delay`, or — on a wake-up tick
	/// with no dispatch in the last `max_batch_delay` — whatever is queued.
	/// Jobs are removed atomically before being handed back.
	pub(crate) fn try_take_batch(&self) -> Option<Batch> {
		let mut q = self.inner.lock().expect("queue lock poisoned");
		if q.is_empty() {
			return None;
		}

		let full = q.len() >= self.batch_size;
		let oldest_stale = q.front().is_some_and(|j| j.age() >= self.max_batch_delay);

		if !full && !oldest_stale {
			return None;
		}

		let take = q.len().min(self.batch_size);
		let jobs = q.drain(..take).collect::<Vec<_>>();
		Some(Batch { jobs })
	}

	/// Force-take whatever is queued, regardless of size/age, used by the
	/// batcher's periodic wake-up tick when nothing has dispatched in a
	/// while (policy clause 3).
	pub(crate) fn take_whatever(&self) -> Option<Batch> {
		let mut q = self.inner.lock().expect("queue lock poisoned");
		if q.is_empty() {
			return None;
		}
		let take = q.len().min(self.batch_size);
		let jobs = q.drain(..take).collect::<Vec<_>>();
		Some(Batch { jobs })
	}

	/// Parks until a batch is actually dispatchable: returns immediately if
	/// the queue is already at `batch_size`, otherwise sleeps until either
	/// new work lands or the head job crosses `max_batch_delay`, whichever
	/// comes first. Never spins on a queue that merely holds a pending,
	/// non-stale job.
	pub(crate) async fn wait_for_work(&self) {
		let notified = self.notify.notified();

		let head_deadline = {
			let q = self.inner.lock().expect("queue lock poisoned");
			if q.len() >= self.batch_size {
				return;
			}
			q.front().map(|head| TokioInstant::from_std(head.created_at) + self.max_batch_delay)
		};

		match head_deadline {
			| Some(deadline) => {
				tokio::select! {
					() = notified => {},
					() = tokio::time::sleep_until(deadline) => {},
				}
			},
			| None => notified.await,
		}
	}
}

#[cfg(test)]
mod tests {
	use std::time::Instant;

	use super::*;
	use crate::{model::ModelKey, streaming};

	fn job(model: &str) -> Job {
		let (tx, _rx) = streaming::channel();
		Job {
			id: crate::job::JobId(0),
			model: ModelKey::new(model, None),
			payload: Vec::new(),
			result: tx,
			created_at: Instant::now(),
		}
	}

	#[test]
	fn rejects_beyond_capacity() {
		let q = JobQueue::new(2, 2, Duration::from_secs(1));
		q.push(job("m")).unwrap();
		q.push(job("m")).unwrap();
		assert!(q.push(job("m")).is_err());
	}

	#[test]
	fn batch_emits_when_full() {
		let q = JobQueue::new(4, 2, Duration::from_secs(10));
		q.push(job("m")).unwrap();
		assert!(q.try_take_batch().is_none());
		q.push(job("m")).unwrap();
		let batch = q.try_take_batch().unwrap();
		assert_eq!(batch.len(), 2);
		assert!(q.is_empty());
	}

	#[test]
	fn batch_never_exceeds_batch_size() {
		let q = JobQueue::new(8, 2, Duration::from_secs(10));
		for _ in 0..5 {
			q.push(job("m")).unwrap();
		}
		let batch = q.try_take_batch().unwrap();
		assert_eq!(batch.len(), 2);
		assert_eq!(q.len(), 3);
	}

	#[test]
	fn queue_slot_reopens_after_batch_dispatch() {
		let q = JobQueue::new(2, 2, Duration::from_secs(10));
		q.push(job("m")).unwrap();
		q.push(job("m")).unwrap();
		assert!(q.push(job("m")).is_err());
		q.try_take_batch().unwrap();
		assert!(q.push(job("m")).is_ok());
	}
}
