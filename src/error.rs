//! Error types for the bridge driver.

use thiserror::Error;
use tracing::error;

/// Bridge driver errors.
///
/// One kind per distinguishable failure cause. Backend libraries report
/// failures as negative return codes or library error enums; both are mapped
/// one-to-one onto this set, and anything unrecognized collapses to
/// [`Error::Unclassified`] after being logged with the raw code.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Unclassified device error
    #[error("unclassified device error")]
    Unclassified,

    /// USB device not found
    #[error("USB device not found")]
    DeviceNotFound,

    /// Unable to open device
    #[error("unable to open device")]
    UnableToOpen,

    /// Unable to claim device interface
    #[error("unable to claim device")]
    UnableToClaim,

    /// Device reset failed
    #[error("reset failed")]
    ResetFailed,

    /// USB device unavailable
    #[error("USB device unavailable")]
    DeviceUnavailable,

    /// Device already open
    #[error("device already open")]
    AlreadyOpen,

    /// Unknown chip interface selected
    #[error("unknown interface")]
    UnknownInterface,

    /// Byte-mode enable sequence failed
    #[error("cannot enable byte mode")]
    ModeEnableFailed,

    /// Latency timer configuration failed
    #[error("unable to configure latency timer")]
    LatencyConfigFailed,

    /// USB interface release failed
    #[error("USB release failed")]
    ReleaseFailed,

    /// Invalid device handle or library context
    #[error("invalid handle")]
    InvalidHandle,

    /// Transport I/O error
    #[error("transport I/O error")]
    Io,

    /// Invalid parameter passed to the transport
    #[error("transport invalid parameter")]
    InvalidParameter,

    /// Access denied by the transport
    #[error("transport access denied")]
    AccessDenied,

    /// Transport reports no device
    #[error("transport found no device")]
    NoDeviceFound,

    /// Transport entity not found
    #[error("transport entity not found")]
    EntityNotFound,

    /// Transport resource busy
    #[error("transport resource busy")]
    ResourceBusy,

    /// Transport operation timed out
    #[error("transport timeout")]
    Timeout,

    /// Transport buffer overflow
    #[error("transport overflow")]
    Overflow,

    /// Endpoint pipe error
    #[error("transport pipe error")]
    Pipe,

    /// Transfer interrupted
    #[error("transport interrupted")]
    Interrupted,

    /// Transport out of memory
    #[error("transport insufficient memory")]
    InsufficientMemory,

    /// Operation not supported by the transport
    #[error("transport operation not supported")]
    OperationNotSupported,

    /// Any other transport-level failure
    #[error("other transport error")]
    OtherTransport,

    /// Write accepted fewer bytes than requested
    #[error("partial write: {written} of {requested} bytes accepted")]
    PartialWrite { requested: usize, written: usize },

    /// Device produced no data within the retry limit
    #[error("no data available for read")]
    NoDataAvailable,

    /// Raw transfer not aligned to the packet framing
    #[error("malformed transfer: {tail}-byte tail shorter than the packet header")]
    MalformedTransfer { tail: usize },

    /// Streaming overrun spilled past the bank buffer capacity
    #[error("bank buffer overflow")]
    BankOverflow,

    /// Ping reply did not match the sent id
    #[error("ping mismatch: sent {sent:#04x}, received {received:#04x}")]
    PingMismatch { sent: u8, received: u8 },

    /// Operation requires an open handle in byte mode
    #[error("handle is not ready for data transfer")]
    NotReady,

    /// Register access attempted while streaming is enabled
    #[error("streaming is enabled; disable it before register access")]
    StreamingEnabled,

    /// Streaming operation attempted while streaming is disabled
    #[error("streaming is not enabled")]
    StreamingDisabled,
}

/// Convenient Result type for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<rusb::Error> for Error {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::Io => Error::Io,
            rusb::Error::InvalidParam => Error::InvalidParameter,
            rusb::Error::Access => Error::AccessDenied,
            rusb::Error::NoDevice => Error::NoDeviceFound,
            rusb::Error::NotFound => Error::EntityNotFound,
            rusb::Error::Busy => Error::ResourceBusy,
            rusb::Error::Timeout => Error::Timeout,
            rusb::Error::Overflow => Error::Overflow,
            rusb::Error::Pipe => Error::Pipe,
            rusb::Error::Interrupted => Error::Interrupted,
            rusb::Error::NoMem => Error::InsufficientMemory,
            rusb::Error::NotSupported => Error::OperationNotSupported,
            _ => Error::OtherTransport,
        }
    }
}

impl Error {
    /// Map a negative libftdi data-path return code.
    ///
    /// libftdi surfaces the underlying libusb error codes from its read and
    /// write paths, with -666 reserved for a vanished USB device.
    pub(crate) fn from_ftdi_io_code(code: i32) -> Self {
        match code {
            -666 => Error::DeviceUnavailable,
            -1 => Error::Io,
            -2 => Error::InvalidParameter,
            -3 => Error::AccessDenied,
            -4 => Error::NoDeviceFound,
            -5 => Error::EntityNotFound,
            -6 => Error::ResourceBusy,
            -7 => Error::Timeout,
            -8 => Error::Overflow,
            -9 => Error::Pipe,
            -10 => Error::Interrupted,
            -11 => Error::InsufficientMemory,
            -12 => Error::OperationNotSupported,
            code => {
                error!(code, "unmapped libftdi I/O error code");
                Error::Unclassified
            }
        }
    }
}
