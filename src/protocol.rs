//! Addressed register protocol and handle lifecycle.
//!
//! Every operation here is built purely from the transport's reliable
//! `write`/`read`; this layer never touches ring or bank buffers. Frames
//! are 16-bit little-endian words:
//!
//! | frame          | wire form                          |
//! |----------------|------------------------------------|
//! | register write | `[0x0300\|addr][len]` + `len` words |
//! | register read  | `[0x0200\|addr][len]` → `len` words |
//! | ping           | `[0x0100\|id]` → one word, low byte echoes `id` |
//! | stream enable  | `[0x0500\|addr]`                   |
//! | stream disable | `[0xFFFF]`                         |

use std::thread;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::transport::Transport;

const WRITE_TAG: u16 = 0x0300;
const READ_TAG: u16 = 0x0200;
const PING_TAG: u16 = 0x0100;
const STREAM_ON_TAG: u16 = 0x0500;
const STREAM_OFF_WORD: u16 = 0xFFFF;

/// Time the device needs to turn a ping around.
const PING_SETTLE: Duration = Duration::from_millis(1);

/// Lifecycle of a device handle.
///
/// Register traffic requires `Idle`; streaming reads require `Streaming`.
/// Transitions are checked: misuse is rejected before any bytes reach the
/// device rather than producing protocol garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Created,
    Opened,
    Idle,
    Streaming,
    Closed,
}

/// One exclusive session with a bridge device.
pub struct Bridge<T: Transport> {
    transport: T,
    state: HandleState,
}

impl<T: Transport> Bridge<T> {
    /// Wrap a transport. Touches no hardware.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: HandleState::Created,
        }
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Consume the bridge and hand back the transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    pub fn open(&mut self) -> Result<()> {
        match self.state {
            HandleState::Created | HandleState::Closed => {}
            _ => return Err(Error::AlreadyOpen),
        }
        self.transport.open()?;
        self.state = HandleState::Opened;
        Ok(())
    }

    /// USB-reset the device. Byte mode must be re-enabled afterward.
    pub fn reset(&mut self) -> Result<()> {
        match self.state {
            HandleState::Opened | HandleState::Idle => {}
            HandleState::Streaming => return Err(Error::StreamingEnabled),
            _ => return Err(Error::NotReady),
        }
        self.transport.reset()?;
        self.state = HandleState::Opened;
        Ok(())
    }

    pub fn enable_byte_mode(&mut self) -> Result<()> {
        match self.state {
            HandleState::Opened | HandleState::Idle => {}
            HandleState::Streaming => return Err(Error::StreamingEnabled),
            _ => return Err(Error::NotReady),
        }
        self.transport.enable_byte_mode()?;
        self.state = HandleState::Idle;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        match self.state {
            HandleState::Created | HandleState::Closed => return Err(Error::NotReady),
            _ => {}
        }
        self.transport.close()?;
        self.state = HandleState::Closed;
        Ok(())
    }

    fn require_idle(&self) -> Result<()> {
        match self.state {
            HandleState::Idle => Ok(()),
            HandleState::Streaming => Err(Error::StreamingEnabled),
            _ => Err(Error::NotReady),
        }
    }

    fn write_raw_word(&mut self, word: u16) -> Result<()> {
        let mut frame = BytesMut::with_capacity(2);
        frame.put_u16_le(word);
        self.transport.write(&frame)
    }

    fn encode_words(words: &[u16]) -> BytesMut {
        let mut buf = BytesMut::with_capacity(words.len() * 2);
        for &word in words {
            buf.put_u16_le(word);
        }
        buf
    }

    /// Write `words` to the register at `address`.
    ///
    /// Header and payload go out as two separate writes; either may fail
    /// independently and the first failure is surfaced.
    pub fn write_words(&mut self, address: u8, words: &[u16]) -> Result<()> {
        self.require_idle()?;
        debug_assert!(words.len() <= usize::from(u16::MAX));
        trace!(address, count = words.len(), "register write");
        let header = Self::encode_words(&[WRITE_TAG | u16::from(address), words.len() as u16]);
        self.transport.write(&header)?;
        let payload = Self::encode_words(words);
        self.transport.write(&payload)
    }

    /// Read `len` words from the register at `address`.
    pub fn read_words(&mut self, address: u8, len: u16) -> Result<Vec<u16>> {
        self.require_idle()?;
        trace!(address, count = len, "register read");
        let header = Self::encode_words(&[READ_TAG | u16::from(address), len]);
        self.transport.write(&header)?;

        let mut raw = vec![0u8; usize::from(len) * 2];
        self.transport.read(&mut raw)?;
        Ok(raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Write a single word to the register at `address`.
    pub fn write_word(&mut self, address: u8, value: u16) -> Result<()> {
        self.write_words(address, &[value])
    }

    /// Write a 32-bit value as two words, most-significant word first.
    pub fn write_int(&mut self, address: u8, value: u32) -> Result<()> {
        let words = [(value >> 16) as u16, value as u16];
        self.write_words(address, &words)
    }

    /// Read a 32-bit value written the way [`write_int`] writes it.
    ///
    /// [`write_int`]: Bridge::write_int
    pub fn read_int(&mut self, address: u8) -> Result<u32> {
        let words = self.read_words(address, 2)?;
        Ok(u32::from(words[0]) << 16 | u32::from(words[1]))
    }

    /// Liveness check: the device must echo `id` back in the low byte of a
    /// single reply word.
    ///
    /// A mismatch means the device is reachable but the protocol is out of
    /// sync; it is reported as [`Error::PingMismatch`], never as a
    /// transport failure.
    pub fn ping(&mut self, id: u8) -> Result<()> {
        self.require_idle()?;
        self.write_raw_word(PING_TAG | u16::from(id))?;
        thread::sleep(PING_SETTLE);

        let mut raw = [0u8; 2];
        self.transport.read(&mut raw)?;
        let received = (u16::from_le_bytes(raw) & 0xFF) as u8;
        if received != id {
            warn!(
                sent = %format_args!("{id:#04x}"),
                received = %format_args!("{received:#04x}"),
                "ping mismatch"
            );
            return Err(Error::PingMismatch { sent: id, received });
        }
        Ok(())
    }

    /// Tell the device to stream the register at `address` continuously.
    /// Pair with [`disable_streaming`] before any further register access.
    ///
    /// [`disable_streaming`]: Bridge::disable_streaming
    pub fn enable_streaming(&mut self, address: u8) -> Result<()> {
        self.require_idle()?;
        trace!(address, "enabling streaming");
        self.write_raw_word(STREAM_ON_TAG | u16::from(address))?;
        self.state = HandleState::Streaming;
        Ok(())
    }

    /// End the streaming session started by [`enable_streaming`].
    ///
    /// [`enable_streaming`]: Bridge::enable_streaming
    pub fn disable_streaming(&mut self) -> Result<()> {
        match self.state {
            HandleState::Streaming => {}
            HandleState::Idle | HandleState::Opened => return Err(Error::StreamingDisabled),
            _ => return Err(Error::NotReady),
        }
        trace!("disabling streaming");
        self.write_raw_word(STREAM_OFF_WORD)?;
        self.state = HandleState::Idle;
        Ok(())
    }

    /// Pull streamed sample data. Requires an active streaming session.
    pub fn stream_read(&mut self, dest: &mut [u8]) -> Result<()> {
        match self.state {
            HandleState::Streaming => {}
            HandleState::Idle | HandleState::Opened => return Err(Error::StreamingDisabled),
            _ => return Err(Error::NotReady),
        }
        self.transport.stream_read(dest)
    }
}
