//! Packetizing-library transport.
//!
//! This backend rides on libftdi, which owns the device protocol details:
//! its read path already strips the per-packet status prefix and returns a
//! clean byte stream, so no destuffing or ring buffering happens on this
//! side. What remains is session management (open, reset, byte mode,
//! close), the blocking read-until-satisfied loop, and the streaming loop
//! feeding library-delivered chunks into the shared stream sink.
//!
//! All FFI calls go through the owned `ftdi_context`; the unsafe surface
//! is confined to this module.

use std::os::raw::c_int;
use std::thread;
use std::time::Duration;

use libftdi1_sys as ffi;
use tracing::{debug, error, info, trace};

use crate::buffer::BankBuffer;
use crate::error::{Error, Result};
use crate::stream::{StreamSink, StreamVerdict};

use super::{Transport, EMPTY_TRANSFER_LIMIT, PRODUCT_ID, VENDOR_ID};

/// Bitmode written to disable any previous chip mode.
const BITMODE_RESET: u8 = 0x00;
/// Synchronous FIFO mode, the chip's raw byte-streaming mode.
const BITMODE_SYNCFF: u8 = 0x40;
/// All pins assigned to the FIFO bus.
const BITMASK_ALL: u8 = 0xFF;

/// Give the chip a moment to apply a mode change.
const SETTLE: Duration = Duration::from_millis(1);

/// Packetizing-library backend configuration.
#[derive(Debug, Clone)]
pub struct FtdiConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Library-side read chunk size in bytes.
    pub read_chunk_len: u32,
    /// Chip latency timer in milliseconds.
    pub latency_ms: u8,
    pub bank_capacity: usize,
    /// Chunk size requested per streaming read call.
    pub stream_chunk_len: usize,
    /// Library read timeout for register traffic.
    pub read_timeout_ms: i32,
    /// Short read timeout applied for the duration of a streaming call, so
    /// the session terminates promptly once the caller is satisfied.
    pub stream_read_timeout_ms: i32,
}

impl Default for FtdiConfig {
    fn default() -> Self {
        Self {
            vendor_id: VENDOR_ID,
            product_id: PRODUCT_ID,
            read_chunk_len: 16384,
            latency_ms: 1,
            bank_capacity: 1024 * 1024,
            stream_chunk_len: 4096,
            read_timeout_ms: 5000,
            stream_read_timeout_ms: 10,
        }
    }
}

/// Transport over libftdi.
pub struct FtdiTransport {
    ctx: *mut ffi::ftdi_context,
    cfg: FtdiConfig,
    open: bool,
    bank: BankBuffer,
    /// Landing area for streaming chunks.
    chunk: Vec<u8>,
}

// The context pointer is exclusively owned by this value for its whole
// lifetime; libftdi contexts are not tied to the creating thread.
unsafe impl Send for FtdiTransport {}

impl FtdiTransport {
    /// Allocate the library context and buffers. Does not touch hardware.
    pub fn new(cfg: FtdiConfig) -> Result<Self> {
        let ctx = unsafe { ffi::ftdi_new() };
        if ctx.is_null() {
            error!("failed to allocate ftdi context");
            return Err(Error::InvalidHandle);
        }
        Ok(Self {
            ctx,
            bank: BankBuffer::new(cfg.bank_capacity),
            chunk: vec![0u8; cfg.stream_chunk_len],
            cfg,
            open: false,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::InvalidHandle)
        }
    }

    fn run_stream(&mut self, dest: &mut [u8]) -> Result<()> {
        let mut sink = StreamSink::new(dest);
        if sink.feed(&mut self.bank, &[])? == StreamVerdict::Done {
            trace!("stream read satisfied from bank");
            return Ok(());
        }

        let mut empties = 0u32;
        loop {
            let rc = unsafe {
                ffi::ftdi_read_data(
                    self.ctx,
                    self.chunk.as_mut_ptr(),
                    self.chunk.len() as c_int,
                )
            };
            if rc < 0 {
                return Err(Error::from_ftdi_io_code(rc));
            }
            if rc == 0 {
                empties += 1;
                if empties >= EMPTY_TRANSFER_LIMIT {
                    return Err(Error::NoDataAvailable);
                }
                continue;
            }
            empties = 0;
            if sink.feed(&mut self.bank, &self.chunk[..rc as usize])? == StreamVerdict::Done {
                return Ok(());
            }
        }
    }
}

impl Transport for FtdiTransport {
    fn open(&mut self) -> Result<()> {
        if self.open {
            return Err(Error::AlreadyOpen);
        }

        let rc = unsafe {
            ffi::ftdi_read_data_set_chunksize(self.ctx, self.cfg.read_chunk_len)
        };
        if rc != 0 {
            error!(code = rc, "failed to set read chunk size");
            return Err(Error::Unclassified);
        }

        match unsafe { ffi::ftdi_set_interface(self.ctx, ffi::ftdi_interface::INTERFACE_A) } {
            0 => {}
            -1 => return Err(Error::UnknownInterface),
            -2 => return Err(Error::DeviceUnavailable),
            -3 => return Err(Error::AlreadyOpen),
            rc => {
                error!(code = rc, "unexpected interface-select result");
                return Err(Error::Unclassified);
            }
        }

        info!(
            vid = %format_args!("{:04x}", self.cfg.vendor_id),
            pid = %format_args!("{:04x}", self.cfg.product_id),
            "opening ftdi device"
        );
        match unsafe {
            ffi::ftdi_usb_open(
                self.ctx,
                c_int::from(self.cfg.vendor_id),
                c_int::from(self.cfg.product_id),
            )
        } {
            0 => {}
            -3 => return Err(Error::DeviceNotFound),
            -4 => return Err(Error::UnableToOpen),
            -5 => return Err(Error::UnableToClaim),
            -6 => return Err(Error::ResetFailed),
            rc => {
                error!(code = rc, "unexpected open result");
                return Err(Error::Unclassified);
            }
        }

        unsafe {
            (*self.ctx).usb_read_timeout = self.cfg.read_timeout_ms;
        }
        self.open = true;
        self.bank.clear();
        thread::sleep(SETTLE);
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.ensure_open()?;
        debug!("resetting ftdi device");
        match unsafe { ffi::ftdi_usb_reset(self.ctx) } {
            0 => {
                thread::sleep(SETTLE);
                Ok(())
            }
            -1 => Err(Error::ResetFailed),
            -2 => Err(Error::DeviceUnavailable),
            rc => {
                error!(code = rc, "unexpected reset result");
                Err(Error::Unclassified)
            }
        }
    }

    fn enable_byte_mode(&mut self) -> Result<()> {
        self.ensure_open()?;
        debug!("enabling byte mode");
        match unsafe { ffi::ftdi_set_bitmode(self.ctx, BITMASK_ALL, BITMODE_RESET) } {
            0 => {}
            -1 => return Err(Error::ModeEnableFailed),
            -2 => return Err(Error::DeviceUnavailable),
            rc => {
                error!(code = rc, "unexpected bitmode result");
                return Err(Error::Unclassified);
            }
        }
        match unsafe { ffi::ftdi_set_latency_timer(self.ctx, self.cfg.latency_ms) } {
            0 => {}
            -1 | -2 => return Err(Error::LatencyConfigFailed),
            -3 => return Err(Error::DeviceUnavailable),
            rc => {
                error!(code = rc, "unexpected latency-timer result");
                return Err(Error::Unclassified);
            }
        }
        match unsafe { ffi::ftdi_set_bitmode(self.ctx, BITMASK_ALL, BITMODE_SYNCFF) } {
            0 => {
                thread::sleep(SETTLE);
                Ok(())
            }
            -1 => Err(Error::ModeEnableFailed),
            -2 => Err(Error::DeviceUnavailable),
            rc => {
                error!(code = rc, "unexpected bitmode result");
                Err(Error::Unclassified)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        debug!("closing ftdi device");
        // Best-effort flush and reset on the way out.
        unsafe {
            let _ = ffi::ftdi_usb_purge_rx_buffer(self.ctx);
            let _ = ffi::ftdi_usb_purge_tx_buffer(self.ctx);
            let _ = ffi::ftdi_usb_reset(self.ctx);
        }
        self.open = false;
        match unsafe { ffi::ftdi_usb_close(self.ctx) } {
            0 => Ok(()),
            -1 => Err(Error::ReleaseFailed),
            -3 => Err(Error::InvalidHandle),
            rc => {
                error!(code = rc, "unexpected close result");
                Err(Error::Unclassified)
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let rc = unsafe {
            ffi::ftdi_write_data(self.ctx, bytes.as_ptr(), bytes.len() as c_int)
        };
        if rc == bytes.len() as c_int {
            return Ok(());
        }
        if rc > 0 {
            return Err(Error::PartialWrite {
                requested: bytes.len(),
                written: rc as usize,
            });
        }
        Err(Error::from_ftdi_io_code(rc))
    }

    fn read(&mut self, dest: &mut [u8]) -> Result<()> {
        self.ensure_open()?;
        let mut filled = 0usize;
        let mut empties = 0u32;
        while filled < dest.len() {
            let rc = unsafe {
                ffi::ftdi_read_data(
                    self.ctx,
                    dest[filled..].as_mut_ptr(),
                    (dest.len() - filled) as c_int,
                )
            };
            if rc < 0 {
                return Err(Error::from_ftdi_io_code(rc));
            }
            if rc == 0 {
                empties += 1;
                if empties >= EMPTY_TRANSFER_LIMIT {
                    return Err(Error::NoDataAvailable);
                }
                continue;
            }
            empties = 0;
            filled += rc as usize;
        }
        Ok(())
    }

    fn stream_read(&mut self, dest: &mut [u8]) -> Result<()> {
        self.ensure_open()?;
        // The register-traffic timeout makes stream termination wait out a
        // full period; drop it for the duration of the call.
        unsafe {
            (*self.ctx).usb_read_timeout = self.cfg.stream_read_timeout_ms;
        }
        let result = self.run_stream(dest);
        unsafe {
            (*self.ctx).usb_read_timeout = self.cfg.read_timeout_ms;
        }
        result
    }
}

impl Drop for FtdiTransport {
    fn drop(&mut self) {
        unsafe {
            if self.open {
                let _ = ffi::ftdi_usb_close(self.ctx);
            }
            ffi::ftdi_free(self.ctx);
        }
    }
}
