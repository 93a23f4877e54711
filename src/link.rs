//! Byte handoff from the receive side (ISR or I/O task) to the control loop.
//!
//! The producer and consumer never share a mutable buffer: bytes cross
//! through a single-producer/single-consumer queue or a channel, and the
//! control loop copies a bounded batch out at the start of each cycle.

use crate::error::LinkError;
use heapless::spsc::Consumer;
use heapless::{Deque, Vec};
use tokio::sync::mpsc::{self, error::TryRecvError};

/// Upper bound on bytes taken from the link in one poll.
pub const MAX_BYTES_PER_POLL: usize = 32;
pub const MAX_CHUNK: usize = 64;

pub type RxSnapshot = Vec<u8, MAX_BYTES_PER_POLL>;
pub type Chunk = Vec<u8, MAX_CHUNK>;

/// Non-blocking source of received bytes.
pub trait ByteSource {
    fn read_byte(&mut self) -> nb::Result<u8, LinkError>;
}

/// Consumer half of a lock-free SPSC queue, as fed by a UART interrupt.
pub struct SpscSource<'a, const N: usize> {
    consumer: Consumer<'a, u8, N>,
}

impl<'a, const N: usize> SpscSource<'a, N> {
    pub fn new(consumer: Consumer<'a, u8, N>) -> Self {
        Self { consumer }
    }
}

impl<const N: usize> ByteSource for SpscSource<'_, N> {
    fn read_byte(&mut self) -> nb::Result<u8, LinkError> {
        self.consumer.dequeue().ok_or(nb::Error::WouldBlock)
    }
}

/// Receiving end of the I/O task's channel. Chunks are split into bytes
/// locally so a poll budget can stop mid-chunk without losing data.
pub struct ChannelSource {
    rx: mpsc::Receiver<Chunk>,
    pending: Deque<u8, MAX_CHUNK>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Chunk>) -> Self {
        Self {
            rx,
            pending: Deque::new(),
        }
    }

    pub fn channel(capacity: usize) -> (mpsc::Sender<Chunk>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

impl ByteSource for ChannelSource {
    fn read_byte(&mut self) -> nb::Result<u8, LinkError> {
        if let Some(byte) = self.pending.pop_front() {
            return Ok(byte);
        }
        // Empty chunks carry nothing; keep draining until a byte turns up.
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => {
                    let mut bytes = chunk.into_iter();
                    if let Some(first) = bytes.next() {
                        for b in bytes {
                            let _ = self.pending.push_back(b);
                        }
                        return Ok(first);
                    }
                }
                Err(TryRecvError::Empty) => return Err(nb::Error::WouldBlock),
                Err(TryRecvError::Disconnected) => {
                    return Err(nb::Error::Other(LinkError::Disconnected))
                }
            }
        }
    }
}

/// Copies up to `budget` bytes out of `source`. Stops early when the source
/// would block; bytes already taken are kept even if the source then fails.
pub fn take_snapshot<S: ByteSource + ?Sized>(
    source: &mut S,
    budget: usize,
) -> Result<RxSnapshot, LinkError> {
    let budget = budget.min(MAX_BYTES_PER_POLL);
    let mut snapshot = RxSnapshot::new();
    while snapshot.len() < budget {
        match source.read_byte() {
            Ok(byte) => {
                let _ = snapshot.push(byte);
            }
            Err(nb::Error::WouldBlock) => break,
            Err(nb::Error::Other(err)) if snapshot.is_empty() => return Err(err),
            Err(nb::Error::Other(_)) => break,
        }
    }
    Ok(snapshot)
}

/// Splits a received buffer into channel-sized chunks.
pub fn chunks(bytes: &[u8]) -> impl Iterator<Item = Chunk> + '_ {
    bytes
        .chunks(MAX_CHUNK)
        .filter_map(|c| Chunk::from_slice(c).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::spsc::Queue;

    #[test]
    fn snapshot_respects_budget() {
        let mut queue: Queue<u8, 64> = Queue::new();
        let (mut producer, consumer) = queue.split();
        for b in 0..40u8 {
            producer.enqueue(b).unwrap();
        }
        let mut source = SpscSource::new(consumer);
        let first = take_snapshot(&mut source, 32).unwrap();
        assert_eq!(first.len(), 32);
        let second = take_snapshot(&mut source, 32).unwrap();
        assert_eq!(second.as_slice(), &[32, 33, 34, 35, 36, 37, 38, 39]);
    }

    #[test]
    fn channel_source_reports_disconnect_after_draining() {
        let (tx, mut source) = ChannelSource::channel(4);
        tx.try_send(Chunk::from_slice(&[1, 2, 3]).unwrap()).unwrap();
        drop(tx);
        assert_eq!(take_snapshot(&mut source, 8).unwrap().as_slice(), &[1, 2, 3]);
        assert_eq!(take_snapshot(&mut source, 8), Err(LinkError::Disconnected));
    }

    #[test]
    fn empty_chunks_do_not_stall_the_poll() {
        let (tx, mut source) = ChannelSource::channel(4);
        tx.try_send(Chunk::new()).unwrap();
        tx.try_send(Chunk::new()).unwrap();
        tx.try_send(Chunk::from_slice(&[7, 8]).unwrap()).unwrap();
        assert_eq!(take_snapshot(&mut source, 8).unwrap().as_slice(), &[7, 8]);
    }
}
