//! Byte transports to the bridge device.
//!
//! Two backends speak to the same hardware through different stacks:
//!
//! - [`ftdi::FtdiTransport`] rides on libftdi, whose read path already
//!   strips the per-packet status overhead and hands back a clean byte
//!   stream.
//! - [`fifo::FifoTransport`] talks to the raw bulk endpoints through
//!   libusb and does its own destuffing and leftover buffering.
//!
//! Everything above this module sees one contract: writes either accept
//! every byte or report how far they got, reads either fill the caller's
//! buffer completely or fail, and streaming reads do the same with a
//! batching strategy tuned for sustained throughput.

pub mod fifo;
pub mod ftdi;

pub use fifo::{FifoConfig, FifoTransport, RusbBulk, UsbBulk};
pub use ftdi::{FtdiConfig, FtdiTransport};

use crate::error::Result;

/// USB vendor id of the bridge device.
pub const VENDOR_ID: u16 = 0x3524;
/// USB product id of the bridge data port.
pub const PRODUCT_ID: u16 = 0x0002;

/// Bulk-in packet stride in byte mode.
pub(crate) const PACKET_LEN: usize = 512;
/// Status prefix carried by every bulk-in packet.
pub(crate) const STATUS_LEN: usize = 2;

/// Consecutive transfers allowed to deliver zero payload bytes before a
/// blocking read gives up with `NoDataAvailable`.
pub(crate) const EMPTY_TRANSFER_LIMIT: u32 = 64;

/// Reliable byte channel to the device.
///
/// Both backends implement this; the register protocol and all tests are
/// written against it rather than against a concrete backend.
pub trait Transport {
    /// Open the device. Does not change chip modes.
    fn open(&mut self) -> Result<()>;

    /// USB-reset the open device.
    fn reset(&mut self) -> Result<()>;

    /// Run the chip-specific sequence that switches the device into raw
    /// byte-streaming mode. Opaque above this layer.
    fn enable_byte_mode(&mut self) -> Result<()>;

    /// Release the device.
    fn close(&mut self) -> Result<()>;

    /// Write all of `bytes`. A short acceptance surfaces as
    /// `Error::PartialWrite`.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Fill `dest` completely, retrying internally on partial progress.
    /// Never succeeds short; hard errors abort immediately.
    fn read(&mut self, dest: &mut [u8]) -> Result<()>;

    /// Fill `dest` completely from a continuous device stream, banking any
    /// overrun for the next call. Same completion contract as [`read`].
    ///
    /// [`read`]: Transport::read
    fn stream_read(&mut self, dest: &mut [u8]) -> Result<()>;
}
