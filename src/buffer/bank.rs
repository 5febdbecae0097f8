//! Spill buffer for streaming overrun.
//!
//! A streaming transfer keeps delivering data after the caller's requested
//! byte count is met; the surplus is banked here and handed out at the start
//! of the next streaming call, before any new transfer is issued.

use crate::error::{Error, Result};

/// Large spill buffer with a read cursor and an unread-byte count.
///
/// Appends land after the unread region. Once a withdrawal drains the region
/// to zero the cursor snaps back to the start and the storage is zeroed, so
/// stale stream data never survives to confuse a later capture.
pub struct BankBuffer {
    buf: Box<[u8]>,
    /// Offset of the next unread byte.
    read_pos: usize,
    /// Bytes banked but not yet withdrawn.
    unread: usize,
}

impl BankBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            unread: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes available for withdrawal.
    pub fn unread(&self) -> usize {
        self.unread
    }

    pub fn is_empty(&self) -> bool {
        self.unread == 0
    }

    /// Discard all banked bytes.
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.unread = 0;
    }

    /// Append bytes after the unread region.
    ///
    /// An append that would run past capacity fails with
    /// [`Error::BankOverflow`] and leaves the buffer untouched. Overflow
    /// means the device outruns the consumer; it is not retryable within the
    /// same streaming call.
    pub fn bank(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.read_pos + self.unread;
        if end + bytes.len() > self.buf.len() {
            return Err(Error::BankOverflow);
        }
        self.buf[end..end + bytes.len()].copy_from_slice(bytes);
        self.unread += bytes.len();
        Ok(())
    }

    /// Copy unread bytes into `dest` and advance the cursor, returning how
    /// many were delivered.
    ///
    /// Draining the region to zero resets the cursor to the start and zeroes
    /// the storage.
    pub fn withdraw(&mut self, dest: &mut [u8]) -> usize {
        let had_data = self.unread != 0;
        let n = dest.len().min(self.unread);
        dest[..n].copy_from_slice(&self.buf[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        self.unread -= n;
        if had_data && self.unread == 0 {
            self.read_pos = 0;
            self.buf.fill(0);
        }
        n
    }
}
