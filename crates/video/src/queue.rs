//! Fan-out and single-value queues used by the video pipeline.
//!
//! The MP4 fan-out queue must never block the transcoder reader: a slow or
//! absent HTTP client is the client's problem, not the pipeline's. A
//! `tokio::sync::broadcast` channel gives exactly this for free — once a
//! receiver falls behind the channel's capacity, its oldest unread values are
//! dropped and it is told so via `RecvError::Lagged`, which callers treat as
//! "skip ahead and keep streaming" rather than an error.

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};

/// Capacity of the MP4 fragment fan-out channel. Large enough to absorb a
/// few seconds of fragments at typical bitrates without every client falling
/// behind on every GOP boundary.
pub const MP4_QUEUE_CAPACITY: usize = 256;

/// Capacity of the single-value prompt response channel.
pub const RESPONSE_QUEUE_CAPACITY: usize = 1;

#[derive(Debug, Clone)]
pub enum Mp4Chunk {
    Data(Bytes),
    EndOfStream,
}

/// Producer handle for the MP4 fan-out queue.
#[derive(Clone)]
pub struct Mp4QueueSender(broadcast::Sender<Mp4Chunk>);

impl Mp4QueueSender {
    /// Publish a chunk. Never blocks; if there are no subscribers yet the
    /// chunk is simply dropped (there is nothing to fan out to).
    pub fn publish(&self, chunk: Bytes) {
        let _ = self.0.send(Mp4Chunk::Data(chunk));
    }

    pub fn end_of_stream(&self) {
        let _ = self.0.send(Mp4Chunk::EndOfStream);
    }

    pub fn subscribe(&self) -> Mp4QueueReceiver {
        Mp4QueueReceiver(self.0.subscribe())
    }
}

pub struct Mp4QueueReceiver(broadcast::Receiver<Mp4Chunk>);

impl Mp4QueueReceiver {
    /// Await the next chunk. On lag (this receiver's backlog overflowed the
    /// channel capacity) the dropped count is returned so the caller can log
    /// it and keep streaming from the new tail, matching the "producer never
    /// blocks, consumer may skip" contract.
    pub async fn recv(&mut self) -> Result<Mp4Chunk, u64> {
        loop {
            match self.0.recv().await {
                Ok(chunk) => return Ok(chunk),
                Err(broadcast::error::RecvError::Lagged(skipped)) => return Err(skipped),
                Err(broadcast::error::RecvError::Closed) => return Ok(Mp4Chunk::EndOfStream),
            }
        }
    }
}

pub fn mp4_fanout_queue() -> Mp4QueueSender {
    let (tx, _rx) = broadcast::channel(MP4_QUEUE_CAPACITY);
    Mp4QueueSender(tx)
}

/// The response channel carries at most one pending value: the user's
/// in-flight prompt. A second POST while one is already queued is rejected
/// (HTTP 500) rather than overwriting or blocking, matching the single live
/// prompt invariant.
pub fn response_channel() -> (mpsc::Sender<i64>, mpsc::Receiver<i64>) {
    mpsc::channel(RESPONSE_QUEUE_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_chunk_is_received() {
        let tx = mp4_fanout_queue();
        let mut rx = tx.subscribe();
        tx.publish(Bytes::from_static(b"frag"));
        match rx.recv().await {
            Ok(Mp4Chunk::Data(b)) => assert_eq!(&b[..], b"frag"),
            other => panic!("unexpected {:?}", matches!(other, Ok(_))),
        }
    }

    #[tokio::test]
    async fn end_of_stream_is_delivered() {
        let tx = mp4_fanout_queue();
        let mut rx = tx.subscribe();
        tx.end_of_stream();
        assert!(matches!(rx.recv().await, Ok(Mp4Chunk::EndOfStream)));
    }

    #[tokio::test]
    async fn slow_receiver_skips_ahead_instead_of_blocking_producer() {
        let tx = mp4_fanout_queue();
        let mut rx = tx.subscribe();
        for i in 0..(MP4_QUEUE_CAPACITY as u32 + 10) {
            tx.publish(Bytes::from(i.to_be_bytes().to_vec()));
        }
        // The producer above never blocked. The receiver either gets a
        // lagged error or the remaining tail; either is an acceptable
        // resolution of overflow.
        let _ = rx.recv().await;
    }

    #[tokio::test]
    async fn response_channel_rejects_second_value_when_full() {
        let (tx, _rx) = response_channel();
        tx.try_send(1).unwrap();
        assert!(tx.try_send(2).is_err());
    }
}
