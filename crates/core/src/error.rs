//! Error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid ROM: {0}")]
    InvalidRom(String),

    #[error("Firmware missing or invalid, refusing to boot")]
    FirmwareMissing,

    #[error("Device did not finish booting")]
    BootTimeout,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid save state file (bad magic)")]
    BadMagic,

    #[error("Unsupported save state version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Decompress error: {0}")]
    Decompress(String),

    #[error("Serialize error: {0}")]
    Serialize(#[from] bincode::Error),

    #[error("SysEx error: {0}")]
    Dump(#[from] DumpError),
}

/// Rejection reasons for incoming SysEx. These never escape the protocol
/// layer as errors; the message is dropped and the reason logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DumpError {
    #[error("message too short ({0} bytes)")]
    TooShort(usize),

    #[error("message not framed by F0/F7")]
    BadFraming,

    #[error("not addressed to this device")]
    WrongHeader,

    #[error("wrong dump size, expected {expected} got {actual}")]
    WrongSize { expected: usize, actual: usize },

    #[error("unknown command {0:#04x}")]
    UnknownCommand(u8),

    #[error("no buffer at {buffer:#04x}/{location}")]
    UnknownAddress { buffer: u8, location: u8 },

    #[error("parameter index {0} out of range")]
    BadParameter(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
