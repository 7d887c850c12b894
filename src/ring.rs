//! Output ring - fixed-capacity SPSC buffer of response records.
//!
//! The matcher is the only writer, the consumer the only reader; the
//! underlying rtrb ring publishes with a release store on the write index
//! and acquires on the read index, so the consumer may drain from another
//! thread without locks.

use rtrb::{Consumer, Producer, RingBuffer};
use thiserror::Error;

use crate::order::Response;

/// The output ring has no free slot for another response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("output ring full")]
pub struct RingFull;

/// Create a response ring of the given capacity.
///
/// Returns the producer handle (owned by the matcher) and the consumer
/// handle (kept by the caller).
pub fn response_ring(capacity: usize) -> (ResponseWriter, ResponseReader) {
    let (producer, consumer) = RingBuffer::new(capacity);
    (
        ResponseWriter {
            producer,
            writes: 0,
        },
        ResponseReader { consumer },
    )
}

/// Producer half of the response ring.
pub struct ResponseWriter {
    producer: Producer<Response>,
    writes: u64,
}

impl ResponseWriter {
    /// Publish one response. Fails without writing when the ring is full.
    #[inline]
    pub fn push(&mut self, response: Response) -> Result<(), RingFull> {
        self.producer.push(response).map_err(|_| RingFull)?;
        self.writes += 1;
        Ok(())
    }

    /// Lifetime count of successfully published responses (diagnostics).
    #[inline]
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Number of slots currently free for writing.
    #[inline]
    pub fn slots(&self) -> usize {
        self.producer.slots()
    }
}

/// Consumer half of the response ring.
pub struct ResponseReader {
    consumer: Consumer<Response>,
}

impl ResponseReader {
    /// Take the next response, or `None` if the ring is drained.
    #[inline]
    pub fn pop(&mut self) -> Option<Response> {
        self.consumer.pop().ok()
    }

    /// Returns true if no responses are waiting.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }
}
