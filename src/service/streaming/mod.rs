//! Streaming Result: a finite, single-producer/single-consumer
//! sequence of byte chunks with cancellation and timeout semantics.

use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

use serving_core::{err, Error, Result};
use tokio::{sync::mpsc, time::Duration};

/// One chunk of a streamed response, or the terminal marker.
#[derive(Clone, Debug)]
pub struct Chunk {
	pub data: Vec<u8>,
	pub last: bool,
}

impl Chunk {
	#[must_use]
	pub fn new(data: Vec<u8>, last: bool) -> Self { Self { data, last } }
}

/// What a consumer's `next()` call can observe.
#[derive(Debug)]
pub enum Next {
	Chunk(Vec<u8>),
	End,
}

struct Shared {
	done: AtomicBool,
	cancelled: AtomicBool,
}

/// Producer handle, held by the [`crate::worker::Worker`] driving a job.
pub struct Producer {
	tx: mpsc::Sender<Result<Vec<u8>>>,
	shared: Arc<Shared>,
}

/// Consumer handle, returned to the caller by the admission façade.
pub struct StreamingResult {
	rx: mpsc::Receiver<Result<Vec<u8>>>,
	shared: Arc<Shared>,
}

/// The internal channel is bounded; this is the "backpressure watermark":
/// if the consumer hasn't drained within this many buffered chunks, a
/// `publish` is dropped with `ERR_BACKPRESSURE` rather than blocking the
/// worker indefinitely.
const BACKPRESSURE_BOUND: usize = 32;

#[must_use]
pub fn channel() -> (Producer, StreamingResult) {
	let (tx, rx) = mpsc::channel(BACKPRESSURE_BOUND);
	let shared = Arc::new(Shared {
		done: AtomicBool::new(false),
		cancelled: AtomicBool::new(false),
	});
	(
		Producer { tx, shared: shared.clone() },
		StreamingResult { rx, shared },
	)
}

impl Producer {
	/// Producer side. Non-blocking up to the internal bound; if the
	/// consumer has fallen behind (channel full) the chunk is dropped and
	/// `ERR_BACKPRESSURE` is returned. Once cancelled, all further
	/// publishes are silently discarded rather than erroring — the worker
	/// observes cancellation and winds down on its own.
	pub fn publish(&self, chunk: Chunk) -> Result<()> {
		if self.shared.cancelled.load(Ordering::Acquire) {
			return Ok(());
		}

		if self.shared.done.load(Ordering::Acquire) {
			// terminal is terminal: publishing after `last=true` is discarded.
			return Ok(());
		}

		if chunk.last {
			self.shared.done.store(true, Ordering::Release);
		}

		match self.tx.try_send(Ok(chunk.data)) {
			| Ok(()) => Ok(()),
			| Err(mpsc::error::TrySendError::Full(_)) => Err(err!(Backpressure)),
			| Err(mpsc::error::TrySendError::Closed(_)) => Ok(()),
		}
	}

	/// Publish a terminal error instead of a final chunk.
	pub fn publish_error(&self, error: Error) {
		if self.shared.cancelled.load(Ordering::Acquire) || self.shared.done.load(Ordering::Acquire) {
			return;
		}
		self.shared.done.store(true, Ordering::Release);
		_ = self.tx.try_send(Err(error));
	}

	#[must_use]
	pub fn is_cancelled(&self) -> bool { self.shared.cancelled.load(Ordering::Acquire) }
}

impl StreamingResult {
	/// `next(timeout) -> chunk | TIMEOUT | END | ERR`.
	pub async fn next(&mut self, timeout: Duration) -> Result<Next> {
		match tokio::time::timeout(timeout, self.rx.recv()).await {
			| Ok(Some(Ok(data))) => Ok(Next::Chunk(data)),
			| Ok(Some(Err(e))) => Err(e),
			| Ok(None) => Ok(Next::End),
			| Err(_) => Err(err!(Timeout)),
		}
	}

	/// Idempotent. Subsequent `publish` calls are discarded; the producer
	/// observes cancellation at its next chunk boundary.
	pub fn cancel(&self) { self.shared.cancelled.store(true, Ordering::Release); }

	#[must_use]
	pub fn is_done(&self) -> bool { self.shared.done.load(Ordering::Acquire) }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn delivers_chunks_in_order_then_end() {
		let (tx, mut rx) = channel();
		tx.publish(Chunk::new(b"a".to_vec(), false)).unwrap();
		tx.publish(Chunk::new(b"b".to_vec(), true)).unwrap();
		drop(tx);

		assert!(matches!(rx.next(Duration::from_millis(50)).await.unwrap(), Next::Chunk(d) if d == b"a"));
		assert!(matches!(rx.next(Duration::from_millis(50)).await.unwrap(), Next::Chunk(d) if d == b"b"));
		assert!(matches!(rx.next(Duration::from_millis(50)).await.unwrap(), Next::End));
	}

	#[tokio::test]
	async fn terminal_is_terminal() {
		let (tx, mut rx) = channel();
		tx.publish(Chunk::new(b"a".to_vec(), true)).unwrap();
		tx.publish(Chunk::new(b"b".to_vec(), false)).unwrap();
		drop(tx);

		assert!(matches!(rx.next(Duration::from_millis(50)).await.unwrap(), Next::Chunk(d) if d == b"a"));
		assert!(matches!(rx.next(Duration::from_millis(50)).await.unwrap(), Next::End));
	}

	#[tokio::test]
	async fn cancel_discards_future_publishes() {
		let (tx, rx) = channel();
		rx.cancel();
		assert!(tx.is_cancelled());
		tx.publish(Chunk::new(b"a".to_vec(), false)).unwrap();
	}

	#[tokio::test]
	async fn next_times_out_without_cancelling_producer() {
		let (_tx, mut rx) = channel();
		let err = rx.next(Duration::from_millis(5)).await.unwrap_err();
		assert!(matches!(err, Error::Timeout));
	}
}
