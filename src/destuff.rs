//! Per-packet status stripping for raw bulk transfers.
//!
//! In byte mode the chip prefixes every bulk-in packet with two status
//! bytes, so a raw transfer is a sequence of up-to-512-byte packets each
//! carrying overhead the logical byte stream must not contain. The
//! packetizing-library backend never sees this (its library strips the
//! prefix internally); the raw-bulk backend runs every transfer through
//! here before any byte reaches a ring buffer, bank buffer, or caller.

use crate::error::{Error, Result};

/// Strips a fixed-width header from every stride of a raw transfer.
#[derive(Debug, Clone, Copy)]
pub struct Destuffer {
    /// Packet stride in bytes (header included).
    stride: usize,
    /// Header width in bytes at the start of each stride.
    header: usize,
}

impl Destuffer {
    pub const fn new(stride: usize, header: usize) -> Self {
        assert!(header < stride);
        Self { stride, header }
    }

    /// Append the payload regions of `raw` to `out`.
    ///
    /// The final packet of a transfer may be shorter than the stride, but
    /// never shorter than the header: a transfer whose tail cannot hold a
    /// full header is rejected as [`Error::MalformedTransfer`] before any
    /// of its bytes are consumed. A tail of exactly the header width is
    /// well-formed and contributes no payload (the chip emits bare status
    /// when it has nothing to send).
    pub fn destuff(&self, raw: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let tail = raw.len() % self.stride;
        if tail != 0 && tail < self.header {
            return Err(Error::MalformedTransfer { tail });
        }
        for packet in raw.chunks(self.stride) {
            out.extend_from_slice(&packet[self.header..]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stuffed(packets: &[&[u8]]) -> Vec<u8> {
        let mut raw = Vec::new();
        for payload in packets {
            raw.extend_from_slice(&[0xAA, 0xBB]);
            raw.extend_from_slice(payload);
        }
        raw
    }

    #[test]
    fn full_strides_yield_exact_payload() {
        let destuffer = Destuffer::new(512, 2);
        let a: Vec<u8> = (0..510u16).map(|i| i as u8).collect();
        let b: Vec<u8> = (0..510u16).map(|i| (i + 7) as u8).collect();
        let raw = stuffed(&[&a, &b]);

        let mut out = Vec::new();
        destuffer.destuff(&raw, &mut out).unwrap();
        assert_eq!(out.len(), 2 * 510);
        assert_eq!(&out[..510], &a[..]);
        assert_eq!(&out[510..], &b[..]);
    }

    #[test]
    fn short_final_packet_keeps_its_payload() {
        let destuffer = Destuffer::new(8, 2);
        let raw = [0xAA, 0xBB, 1, 2, 3, 4, 5, 6, 0xAA, 0xBB, 7, 8];
        let mut out = Vec::new();
        destuffer.destuff(&raw, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn bare_status_tail_is_wellformed_and_empty() {
        let destuffer = Destuffer::new(8, 2);
        let raw = [0xAA, 0xBB, 1, 2, 3, 4, 5, 6, 0xAA, 0xBB];
        let mut out = Vec::new();
        destuffer.destuff(&raw, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);

        out.clear();
        destuffer.destuff(&[0xAA, 0xBB], &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn truncated_tail_is_rejected_without_output() {
        let destuffer = Destuffer::new(8, 2);
        let raw = [0xAA, 0xBB, 1, 2, 3, 4, 5, 6, 0xAA];
        let mut out = Vec::new();
        assert_eq!(
            destuffer.destuff(&raw, &mut out),
            Err(Error::MalformedTransfer { tail: 1 })
        );
        assert!(out.is_empty());
    }

    #[test]
    fn empty_transfer_is_empty_output() {
        let destuffer = Destuffer::new(512, 2);
        let mut out = Vec::new();
        destuffer.destuff(&[], &mut out).unwrap();
        assert!(out.is_empty());
    }
}
