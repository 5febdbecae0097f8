//! Streaming-read completion state machine.
//!
//! Both backends drive a streaming read the same way: a loop delivers
//! chunks of already-destuffed bytes, and this sink decides after each
//! chunk whether the loop continues or stops. The sink always drains the
//! bank buffer before touching a new chunk, so bytes banked by the previous
//! call go out first and in order.

use crate::buffer::BankBuffer;
use crate::error::Result;

/// What the transfer loop should do after a chunk is absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamVerdict {
    /// Destination not yet full, deliver another chunk.
    Continue,
    /// Destination full; any leftover chunk bytes were banked.
    Done,
}

/// Per-call state of one streaming read: the caller's destination and how
/// much of it is filled. Lives only for the duration of the call; surplus
/// bytes persist across calls via the bank buffer alone.
pub(crate) struct StreamSink<'d> {
    dest: &'d mut [u8],
    filled: usize,
}

impl<'d> StreamSink<'d> {
    pub(crate) fn new(dest: &'d mut [u8]) -> Self {
        Self { dest, filled: 0 }
    }

    /// Bytes still needed to fill the destination.
    pub(crate) fn remaining(&self) -> usize {
        self.dest.len() - self.filled
    }

    fn absorb(&mut self, bytes: &[u8]) -> usize {
        let n = self.remaining().min(bytes.len());
        self.dest[self.filled..self.filled + n].copy_from_slice(&bytes[..n]);
        self.filled += n;
        n
    }

    /// Absorb one delivered chunk.
    ///
    /// Order matters: banked bytes from the previous call are withdrawn
    /// first (the bank resets itself once fully drained), then the chunk.
    /// If the destination fills with chunk bytes left over, the leftover is
    /// banked for the next call; bank overflow aborts the whole streaming
    /// call. Feeding an empty chunk is how a caller probes whether the bank
    /// alone can satisfy the request.
    pub(crate) fn feed(
        &mut self,
        bank: &mut BankBuffer,
        chunk: &[u8],
    ) -> Result<StreamVerdict> {
        let wanted = self.remaining();
        if wanted > 0 {
            let n = bank.withdraw(&mut self.dest[self.filled..]);
            self.filled += n;
        }

        let taken = self.absorb(chunk);
        if self.remaining() > 0 {
            debug_assert_eq!(taken, chunk.len());
            return Ok(StreamVerdict::Continue);
        }

        let leftover = &chunk[taken..];
        if !leftover.is_empty() {
            bank.bank(leftover)?;
        }
        Ok(StreamVerdict::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn short_chunks_keep_the_loop_running() {
        let mut bank = BankBuffer::new(64);
        let mut dest = [0u8; 10];
        let mut sink = StreamSink::new(&mut dest);

        assert_eq!(sink.feed(&mut bank, &[1, 2, 3]).unwrap(), StreamVerdict::Continue);
        assert_eq!(sink.feed(&mut bank, &[4, 5, 6]).unwrap(), StreamVerdict::Continue);
        assert_eq!(sink.feed(&mut bank, &[7, 8, 9, 10]).unwrap(), StreamVerdict::Done);
        assert!(bank.is_empty());
        assert_eq!(dest, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn oversized_chunk_banks_the_surplus() {
        let mut bank = BankBuffer::new(256);
        let mut dest = [0u8; 100];
        let chunk: Vec<u8> = (0..150u8).collect();

        let mut sink = StreamSink::new(&mut dest);
        assert_eq!(sink.feed(&mut bank, &chunk).unwrap(), StreamVerdict::Done);
        assert_eq!(bank.unread(), 50);
        assert_eq!(dest.to_vec(), chunk[..100]);

        // The next call is satisfied from the bank, no chunk needed.
        let mut dest2 = [0u8; 50];
        let mut sink2 = StreamSink::new(&mut dest2);
        assert_eq!(sink2.feed(&mut bank, &[]).unwrap(), StreamVerdict::Done);
        assert!(bank.is_empty());
        assert_eq!(dest2.to_vec(), chunk[100..]);
    }

    #[test]
    fn bank_drains_before_new_chunk_bytes() {
        let mut bank = BankBuffer::new(64);
        bank.bank(&[100, 101]).unwrap();

        let mut dest = [0u8; 5];
        let mut sink = StreamSink::new(&mut dest);
        assert_eq!(sink.feed(&mut bank, &[1, 2, 3]).unwrap(), StreamVerdict::Done);
        assert_eq!(dest, [100, 101, 1, 2, 3]);
        assert!(bank.is_empty());
    }

    #[test]
    fn bank_overflow_is_fatal() {
        let mut bank = BankBuffer::new(4);
        let mut dest = [0u8; 2];
        let mut sink = StreamSink::new(&mut dest);

        // 2 bytes fill the destination, 8 need banking into a 4-byte bank.
        let chunk = [0u8; 10];
        assert_eq!(sink.feed(&mut bank, &chunk), Err(Error::BankOverflow));
    }

    #[test]
    fn zero_length_request_is_immediately_done() {
        let mut bank = BankBuffer::new(16);
        let mut dest = [0u8; 0];
        let mut sink = StreamSink::new(&mut dest);
        assert_eq!(sink.feed(&mut bank, &[]).unwrap(), StreamVerdict::Done);
    }
}
