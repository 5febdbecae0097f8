//! Host-side driver for a USB-attached FPGA sample bridge.
//!
//! The bridge device exposes a pair of USB bulk endpoints; this crate turns
//! them into a reliable byte channel, an addressed 16-bit register
//! protocol, and a continuous streaming-read mode for pulling high-rate
//! sample data off the device.
//!
//! Two interchangeable transport backends implement the same contract:
//!
//! - [`FtdiTransport`] goes through libftdi, which handles the chip's
//!   packet framing internally.
//! - [`FifoTransport`] talks to the raw bulk endpoints through libusb and
//!   strips the per-packet status overhead itself, buffering leftover
//!   bytes across calls.
//!
//! A [`Bridge`] wraps either backend and speaks the register protocol on
//! top, tracking the handle lifecycle so that register traffic and
//! streaming sessions cannot be interleaved by accident.
//!
//! One handle is one exclusive device session: operations are synchronous
//! and blocking, and access from multiple threads must be serialized by
//! the caller.
//!
//! # Example
//!
//! ```no_run
//! use fpga_bridge::{Bridge, FtdiConfig, FtdiTransport};
//!
//! fn main() -> fpga_bridge::Result<()> {
//!     let transport = FtdiTransport::new(FtdiConfig::default())?;
//!     let mut bridge = Bridge::new(transport);
//!     bridge.open()?;
//!     bridge.enable_byte_mode()?;
//!     bridge.ping(0x42)?;
//!
//!     bridge.write_int(0x10, 0x0000_1000)?;
//!     let status = bridge.read_words(0x11, 1)?;
//!     println!("status: {:#06x}", status[0]);
//!
//!     let mut samples = vec![0u8; 65536];
//!     bridge.enable_streaming(0x20)?;
//!     bridge.stream_read(&mut samples)?;
//!     bridge.disable_streaming()?;
//!     bridge.close()?;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod destuff;
pub mod error;
pub mod protocol;
mod stream;
pub mod transport;

pub use error::{Error, Result};
pub use protocol::{Bridge, HandleState};
pub use transport::{
    FifoConfig, FifoTransport, FtdiConfig, FtdiTransport, RusbBulk, Transport, UsbBulk,
    PRODUCT_ID, VENDOR_ID,
};
