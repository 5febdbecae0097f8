//! Raw bulk-endpoint transport.
//!
//! This backend talks straight to the device's bulk endpoints through
//! libusb, so every inbound transfer still carries the chip's per-packet
//! status prefix. Each transfer is destuffed before a single byte is
//! surfaced; destuffed bytes the caller did not ask for are parked in the
//! ring buffer and handed out first on the next read.
//!
//! The backend is generic over [`UsbBulk`], the small capability the
//! hardware actually provides. `RusbBulk` implements it against a real
//! device; tests script a fake.

use std::thread;
use std::time::Duration;

use rusb::{Context, DeviceHandle, UsbContext};
use tracing::{debug, trace, warn};

use crate::buffer::{BankBuffer, RingBuffer};
use crate::destuff::Destuffer;
use crate::error::{Error, Result};
use crate::stream::{StreamSink, StreamVerdict};

use super::{
    Transport, EMPTY_TRANSFER_LIMIT, PACKET_LEN, PRODUCT_ID, STATUS_LEN, VENDOR_ID,
};

// FTDI vendor requests used by the mode-setup sequence. The same opaque
// sequence the packetizing library performs, issued here by hand.
const SIO_RESET_REQUEST: u8 = 0x00;
const SIO_SET_LATENCY_TIMER_REQUEST: u8 = 0x09;
const SIO_SET_BITMODE_REQUEST: u8 = 0x0B;

const SIO_RESET_SIO: u16 = 0;
const SIO_RESET_PURGE_RX: u16 = 1;
const SIO_RESET_PURGE_TX: u16 = 2;

const BITMODE_RESET: u8 = 0x00;
const BITMODE_SYNCFF: u8 = 0x40;

/// Give the chip a moment to apply a mode change.
const SETTLE: Duration = Duration::from_millis(1);

fn bitmode_value(bitmask: u8, mode: u8) -> u16 {
    u16::from(mode) << 8 | u16::from(bitmask)
}

/// Raw-bulk backend configuration.
#[derive(Debug, Clone)]
pub struct FifoConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Interface claimed for bulk traffic.
    pub interface: u8,
    /// wIndex for vendor control transfers (1 addresses channel A).
    pub control_index: u16,
    pub out_endpoint: u8,
    pub in_endpoint: u8,
    /// Chip latency timer in milliseconds.
    pub latency_ms: u8,
    /// Scratch size for blocking-read bulk transfers.
    pub transfer_len: usize,
    /// Bulk transfer size during streaming (8 packets per transfer).
    pub stream_transfer_len: usize,
    pub ring_capacity: usize,
    pub bank_capacity: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Short per-transfer timeout used while streaming, so the session
    /// terminates promptly once the caller is satisfied.
    pub stream_read_timeout: Duration,
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self {
            vendor_id: VENDOR_ID,
            product_id: PRODUCT_ID,
            interface: 0,
            control_index: 1,
            out_endpoint: 0x02,
            in_endpoint: 0x81,
            latency_ms: 1,
            transfer_len: 16384,
            stream_transfer_len: 8 * PACKET_LEN,
            ring_capacity: 1024 * 1024,
            bank_capacity: 1024 * 1024,
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            stream_read_timeout: Duration::from_millis(10),
        }
    }
}

/// The raw capability a bulk-endpoint device provides.
///
/// Kept deliberately small: open/close a claimed interface, vendor setup
/// transfers, and the two bulk directions with per-transfer byte counts.
pub trait UsbBulk {
    fn open(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    /// Vendor control transfer carrying no data stage.
    fn control_setup(&mut self, request: u8, value: u16) -> Result<()>;
    /// Returns bytes actually accepted by the endpoint.
    fn bulk_write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize>;
    /// Returns bytes actually transferred, including status prefixes.
    fn bulk_read(&mut self, dest: &mut [u8], timeout: Duration) -> Result<usize>;
}

/// [`UsbBulk`] implemented over libusb.
pub struct RusbBulk {
    cfg: FifoConfig,
    handle: Option<DeviceHandle<Context>>,
}

impl RusbBulk {
    pub fn new(cfg: FifoConfig) -> Self {
        Self { cfg, handle: None }
    }

    fn handle(&self) -> Result<&DeviceHandle<Context>> {
        self.handle.as_ref().ok_or(Error::InvalidHandle)
    }
}

impl UsbBulk for RusbBulk {
    fn open(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::AlreadyOpen);
        }
        let ctx = Context::new()?;
        let mut handle = ctx
            .open_device_with_vid_pid(self.cfg.vendor_id, self.cfg.product_id)
            .ok_or(Error::DeviceNotFound)?;
        debug!(
            vid = %format_args!("{:04x}", self.cfg.vendor_id),
            pid = %format_args!("{:04x}", self.cfg.product_id),
            "opened bulk device"
        );
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            // Not supported on all platforms; claiming will tell us if it
            // actually mattered.
            trace!(error = %e, "auto-detach not available");
        }
        handle.claim_interface(self.cfg.interface).map_err(|e| {
            debug!(error = %e, "interface claim failed");
            Error::UnableToClaim
        })?;
        self.handle = Some(handle);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut handle = self.handle.take().ok_or(Error::InvalidHandle)?;
        handle.release_interface(self.cfg.interface).map_err(|e| {
            debug!(error = %e, "interface release failed");
            Error::ReleaseFailed
        })?;
        Ok(())
    }

    fn control_setup(&mut self, request: u8, value: u16) -> Result<()> {
        let request_type = rusb::request_type(
            rusb::Direction::Out,
            rusb::RequestType::Vendor,
            rusb::Recipient::Device,
        );
        self.handle()?.write_control(
            request_type,
            request,
            value,
            self.cfg.control_index,
            &[],
            self.cfg.write_timeout,
        )?;
        Ok(())
    }

    fn bulk_write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize> {
        Ok(self
            .handle()?
            .write_bulk(self.cfg.out_endpoint, bytes, timeout)?)
    }

    fn bulk_read(&mut self, dest: &mut [u8], timeout: Duration) -> Result<usize> {
        Ok(self
            .handle()?
            .read_bulk(self.cfg.in_endpoint, dest, timeout)?)
    }
}

/// Transport over raw bulk endpoints with host-side destuffing.
pub struct FifoTransport<D: UsbBulk> {
    dev: D,
    cfg: FifoConfig,
    destuffer: Destuffer,
    ring: RingBuffer,
    bank: BankBuffer,
    /// Raw transfer landing area.
    scratch: Vec<u8>,
    /// Destuffed payload of the most recent transfer.
    payload: Vec<u8>,
}

impl FifoTransport<RusbBulk> {
    pub fn new(cfg: FifoConfig) -> Self {
        Self::with_device(RusbBulk::new(cfg.clone()), cfg)
    }
}

impl<D: UsbBulk> FifoTransport<D> {
    /// Build the transport over an already-constructed bulk capability.
    pub fn with_device(dev: D, cfg: FifoConfig) -> Self {
        let scratch_len = cfg.transfer_len.max(cfg.stream_transfer_len);
        Self {
            dev,
            destuffer: Destuffer::new(PACKET_LEN, STATUS_LEN),
            ring: RingBuffer::new(cfg.ring_capacity),
            bank: BankBuffer::new(cfg.bank_capacity),
            scratch: vec![0u8; scratch_len],
            payload: Vec::with_capacity(scratch_len),
            cfg,
        }
    }

    /// One bulk transfer, destuffed into `self.payload`. A timeout counts
    /// as an empty transfer, matching the packetizing library's read
    /// semantics; everything else is a hard error.
    fn pull_transfer(&mut self, len: usize, timeout: Duration) -> Result<()> {
        let n = match self.dev.bulk_read(&mut self.scratch[..len], timeout) {
            Ok(n) => n,
            Err(Error::Timeout) => 0,
            Err(e) => return Err(e),
        };
        trace!(raw = n, "bulk transfer complete");
        self.payload.clear();
        self.destuffer.destuff(&self.scratch[..n], &mut self.payload)
    }
}

impl<D: UsbBulk> Transport for FifoTransport<D> {
    fn open(&mut self) -> Result<()> {
        self.dev.open()?;
        self.ring.clear();
        self.bank.clear();
        thread::sleep(SETTLE);
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.dev
            .control_setup(SIO_RESET_REQUEST, SIO_RESET_SIO)
            .map_err(|e| match e {
                Error::NoDeviceFound => Error::DeviceUnavailable,
                Error::InvalidHandle => Error::InvalidHandle,
                _ => Error::ResetFailed,
            })?;
        thread::sleep(SETTLE);
        Ok(())
    }

    fn enable_byte_mode(&mut self) -> Result<()> {
        debug!("enabling byte mode");
        let mode_err = |e| match e {
            Error::NoDeviceFound => Error::DeviceUnavailable,
            Error::InvalidHandle => Error::InvalidHandle,
            _ => Error::ModeEnableFailed,
        };
        self.dev
            .control_setup(
                SIO_SET_BITMODE_REQUEST,
                bitmode_value(0xFF, BITMODE_RESET),
            )
            .map_err(mode_err)?;
        self.dev
            .control_setup(
                SIO_SET_LATENCY_TIMER_REQUEST,
                u16::from(self.cfg.latency_ms),
            )
            .map_err(|e| match e {
                Error::NoDeviceFound => Error::DeviceUnavailable,
                Error::InvalidHandle => Error::InvalidHandle,
                _ => Error::LatencyConfigFailed,
            })?;
        self.dev
            .control_setup(
                SIO_SET_BITMODE_REQUEST,
                bitmode_value(0xFF, BITMODE_SYNCFF),
            )
            .map_err(mode_err)?;
        thread::sleep(SETTLE);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        debug!("closing bulk device");
        // Best-effort flush and chip reset on the way out.
        let _ = self.dev.control_setup(SIO_RESET_REQUEST, SIO_RESET_PURGE_RX);
        let _ = self.dev.control_setup(SIO_RESET_REQUEST, SIO_RESET_PURGE_TX);
        let _ = self.dev.control_setup(SIO_RESET_REQUEST, SIO_RESET_SIO);
        self.dev.close()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let written = self.dev.bulk_write(bytes, self.cfg.write_timeout)?;
        if written != bytes.len() {
            return Err(Error::PartialWrite {
                requested: bytes.len(),
                written,
            });
        }
        Ok(())
    }

    fn read(&mut self, dest: &mut [u8]) -> Result<()> {
        let mut filled = self.ring.drain(dest);
        let mut empties = 0u32;
        while filled < dest.len() {
            self.pull_transfer(self.cfg.transfer_len, self.cfg.read_timeout)?;
            if self.payload.is_empty() {
                empties += 1;
                if empties >= EMPTY_TRANSFER_LIMIT {
                    return Err(Error::NoDataAvailable);
                }
                continue;
            }
            empties = 0;

            let take = self.payload.len().min(dest.len() - filled);
            dest[filled..filled + take].copy_from_slice(&self.payload[..take]);
            filled += take;

            let leftover = &self.payload[take..];
            if !leftover.is_empty() {
                let queued = self.ring.enqueue(leftover);
                if queued < leftover.len() {
                    warn!(
                        dropped = leftover.len() - queued,
                        "ring buffer full; dropping over-read bytes"
                    );
                }
            }
        }
        Ok(())
    }

    fn stream_read(&mut self, dest: &mut [u8]) -> Result<()> {
        let mut sink = StreamSink::new(dest);
        if sink.feed(&mut self.bank, &[])? == StreamVerdict::Done {
            trace!("stream read satisfied from bank");
            return Ok(());
        }

        let mut empties = 0u32;
        loop {
            self.pull_transfer(
                self.cfg.stream_transfer_len,
                self.cfg.stream_read_timeout,
            )?;
            if self.payload.is_empty() {
                empties += 1;
                if empties >= EMPTY_TRANSFER_LIMIT {
                    return Err(Error::NoDataAvailable);
                }
                continue;
            }
            empties = 0;
            if sink.feed(&mut self.bank, &self.payload)? == StreamVerdict::Done {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted stand-in for a bulk device: bulk reads pop a queue of
    /// canned transfers, everything else records what was asked of it.
    struct ScriptedBulk {
        reads: VecDeque<Result<Vec<u8>>>,
        writes: Vec<Vec<u8>>,
        controls: Vec<(u8, u16)>,
        accept_short: Option<usize>,
        transfers: u32,
        opened: bool,
    }

    impl ScriptedBulk {
        fn new() -> Self {
            Self {
                reads: VecDeque::new(),
                writes: Vec::new(),
                controls: Vec::new(),
                accept_short: None,
                transfers: 0,
                opened: false,
            }
        }

        fn queue_transfer(&mut self, raw: Vec<u8>) {
            self.reads.push_back(Ok(raw));
        }

        fn queue_error(&mut self, e: Error) {
            self.reads.push_back(Err(e));
        }
    }

    impl UsbBulk for ScriptedBulk {
        fn open(&mut self) -> Result<()> {
            self.opened = true;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.opened = false;
            Ok(())
        }

        fn control_setup(&mut self, request: u8, value: u16) -> Result<()> {
            self.controls.push((request, value));
            Ok(())
        }

        fn bulk_write(&mut self, bytes: &[u8], _timeout: Duration) -> Result<usize> {
            self.writes.push(bytes.to_vec());
            Ok(self.accept_short.unwrap_or(bytes.len()))
        }

        fn bulk_read(&mut self, dest: &mut [u8], _timeout: Duration) -> Result<usize> {
            self.transfers += 1;
            match self.reads.pop_front() {
                Some(Ok(raw)) => {
                    assert!(raw.len() <= dest.len(), "scripted transfer too large");
                    dest[..raw.len()].copy_from_slice(&raw);
                    Ok(raw.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(Error::Timeout),
            }
        }
    }

    fn transport(dev: ScriptedBulk) -> FifoTransport<ScriptedBulk> {
        FifoTransport::with_device(dev, FifoConfig::default())
    }

    /// Three full 512-byte packets with 2-byte prefixes and one continuous
    /// incrementing payload across them.
    fn three_packet_transfer() -> (Vec<u8>, Vec<u8>) {
        let payload: Vec<u8> = (0..3 * 510usize).map(|i| i as u8).collect();
        let mut raw = Vec::new();
        for part in payload.chunks(510) {
            raw.extend_from_slice(&[0xAA, 0xBB]);
            raw.extend_from_slice(part);
        }
        (raw, payload)
    }

    #[test]
    fn read_destuffs_and_banks_leftover_in_ring() {
        let mut dev = ScriptedBulk::new();
        let (raw, payload) = three_packet_transfer();
        dev.queue_transfer(raw);

        let mut t = transport(dev);
        let mut dest = vec![0u8; 1000];
        t.read(&mut dest).unwrap();
        assert_eq!(dest, payload[..1000]);
        assert_eq!(t.ring.len(), 530);

        // The remainder comes out of the ring with no further transfer.
        let mut rest = vec![0u8; 530];
        t.read(&mut rest).unwrap();
        assert_eq!(rest, payload[1000..]);
        assert_eq!(t.dev.transfers, 1);
    }

    #[test]
    fn read_spans_multiple_transfers() {
        let mut dev = ScriptedBulk::new();
        let first: Vec<u8> = (0..100u8).collect();
        let second: Vec<u8> = (100..180u8).collect();
        let mut raw1 = vec![0xAA, 0xBB];
        raw1.extend_from_slice(&first);
        let mut raw2 = vec![0xAA, 0xBB];
        raw2.extend_from_slice(&second);
        dev.queue_transfer(raw1);
        dev.queue_transfer(raw2);

        let mut t = transport(dev);
        let mut dest = vec![0u8; 180];
        t.read(&mut dest).unwrap();
        assert_eq!(&dest[..100], &first[..]);
        assert_eq!(&dest[100..], &second[..]);
        assert!(t.ring.is_empty());
    }

    #[test]
    fn hard_error_aborts_immediately() {
        let mut dev = ScriptedBulk::new();
        let mut raw = vec![0xAA, 0xBB];
        raw.extend_from_slice(&[7u8; 510]);
        dev.queue_transfer(raw);
        dev.queue_error(Error::Pipe);

        let mut t = transport(dev);
        let mut dest = vec![0u8; 600];
        assert_eq!(t.read(&mut dest), Err(Error::Pipe));
        // The first transfer's payload landed before the abort.
        assert_eq!(&dest[..510], &[7u8; 510][..]);
    }

    #[test]
    fn silent_device_reports_no_data() {
        let dev = ScriptedBulk::new();
        let mut t = transport(dev);
        let mut dest = vec![0u8; 4];
        assert_eq!(t.read(&mut dest), Err(Error::NoDataAvailable));
        assert_eq!(t.dev.transfers, EMPTY_TRANSFER_LIMIT);
    }

    #[test]
    fn malformed_transfer_is_rejected() {
        let mut dev = ScriptedBulk::new();
        let mut raw = vec![0u8; PACKET_LEN];
        raw.push(0xAA); // 1-byte tail, shorter than the status prefix
        dev.queue_transfer(raw);

        let mut t = transport(dev);
        let mut dest = vec![0u8; 16];
        assert_eq!(
            t.read(&mut dest),
            Err(Error::MalformedTransfer { tail: 1 })
        );
    }

    #[test]
    fn short_write_surfaces_partial_write() {
        let mut dev = ScriptedBulk::new();
        dev.accept_short = Some(3);
        let mut t = transport(dev);
        assert_eq!(
            t.write(&[1, 2, 3, 4, 5]),
            Err(Error::PartialWrite {
                requested: 5,
                written: 3
            })
        );
    }

    #[test]
    fn stream_read_banks_overrun_and_reuses_it() {
        let mut dev = ScriptedBulk::new();
        let payload: Vec<u8> = (0..150u8).collect();
        let mut raw = vec![0xAA, 0xBB];
        raw.extend_from_slice(&payload);
        dev.queue_transfer(raw);

        let mut t = transport(dev);
        let mut dest = vec![0u8; 100];
        t.stream_read(&mut dest).unwrap();
        assert_eq!(dest, payload[..100]);
        assert_eq!(t.bank.unread(), 50);
        assert_eq!(t.dev.transfers, 1);

        // Second request is satisfied from the bank without a transfer.
        let mut dest2 = vec![0u8; 50];
        t.stream_read(&mut dest2).unwrap();
        assert_eq!(dest2, payload[100..]);
        assert_eq!(t.dev.transfers, 1);
        assert!(t.bank.is_empty());
    }

    #[test]
    fn stream_read_spans_transfers_until_full() {
        let mut dev = ScriptedBulk::new();
        for base in [0u8, 60, 120] {
            let payload: Vec<u8> = (0..60u8).map(|i| base + i).collect();
            let mut raw = vec![0xAA, 0xBB];
            raw.extend_from_slice(&payload);
            dev.queue_transfer(raw);
        }

        let mut t = transport(dev);
        let mut dest = vec![0u8; 150];
        t.stream_read(&mut dest).unwrap();
        let expected: Vec<u8> = (0..150u8).collect();
        assert_eq!(dest, expected);
        assert_eq!(t.bank.unread(), 30);
    }

    #[test]
    fn byte_mode_sequence_matches_the_chip_recipe() {
        let mut t = transport(ScriptedBulk::new());
        t.enable_byte_mode().unwrap();
        assert_eq!(
            t.dev.controls,
            vec![
                (SIO_SET_BITMODE_REQUEST, 0x00FF),
                (SIO_SET_LATENCY_TIMER_REQUEST, 0x0001),
                (SIO_SET_BITMODE_REQUEST, 0x40FF),
            ]
        );
    }

    #[test]
    fn close_purges_and_resets() {
        let mut t = transport(ScriptedBulk::new());
        t.open().unwrap();
        t.close().unwrap();
        assert_eq!(
            t.dev.controls,
            vec![
                (SIO_RESET_REQUEST, SIO_RESET_PURGE_RX),
                (SIO_RESET_REQUEST, SIO_RESET_PURGE_TX),
                (SIO_RESET_REQUEST, SIO_RESET_SIO),
            ]
        );
        assert!(!t.dev.opened);
    }
}
