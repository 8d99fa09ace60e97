//! Remote result codes

use std::fmt;

use crate::{ProtocolError, Result};

/// A remote peer's answer to a delivered batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultCode {
    /// Batch accepted
    Ok = 0,
    /// Peer is overloaded; retry the whole batch later
    TryLater = 1,
}

impl ResultCode {
    /// Decode from the wire byte
    #[inline]
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Ok),
            1 => Ok(Self::TryLater),
            other => Err(ProtocolError::InvalidResultCode(other)),
        }
    }

    /// Wire byte for this code
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::TryLater => f.write_str("TRY_LATER"),
        }
    }
}
