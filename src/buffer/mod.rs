//! Byte buffers owned by a device handle.

pub mod bank;
pub mod ring;

pub use bank::BankBuffer;
pub use ring::RingBuffer;
