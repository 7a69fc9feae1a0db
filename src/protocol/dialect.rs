//! Protocol dialects
//!
//! `Dialect` orders every protocol revision the client can speak, SMB1 first,
//! so range checks against the configured minimum and maximum are plain
//! comparisons.

use crate::error::{Error, Result};
use std::convert::TryFrom;
use std::fmt;

/// Negotiated protocol dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dialect {
    Smb1,
    Smb202,
    Smb210,
    Smb300,
    Smb302,
    Smb311,
}

/// Dialect revision returned by a server that wants a second, SMB2-only negotiate
pub const SMB2_WILDCARD_REVISION: u16 = 0x02FF;

impl Dialect {
    /// Every SMB2 family dialect, oldest first
    pub const SMB2_DIALECTS: [Dialect; 5] = [
        Dialect::Smb202,
        Dialect::Smb210,
        Dialect::Smb300,
        Dialect::Smb302,
        Dialect::Smb311,
    ];

    /// Wire revision for SMB2 dialects; `None` for SMB1
    pub fn revision(self) -> Option<u16> {
        match self {
            Dialect::Smb1 => None,
            Dialect::Smb202 => Some(0x0202),
            Dialect::Smb210 => Some(0x0210),
            Dialect::Smb300 => Some(0x0300),
            Dialect::Smb302 => Some(0x0302),
            Dialect::Smb311 => Some(0x0311),
        }
    }

    pub fn is_smb2(self) -> bool {
        self >= Dialect::Smb202
    }

    pub fn is_smb3(self) -> bool {
        self >= Dialect::Smb300
    }

    pub fn at_least(self, other: Dialect) -> bool {
        self >= other
    }

    /// SMB2 dialects inside the inclusive range `[min, max]`
    pub fn smb2_range(min: Dialect, max: Dialect) -> Vec<Dialect> {
        Self::SMB2_DIALECTS
            .iter()
            .copied()
            .filter(|d| *d >= min && *d <= max)
            .collect()
    }
}

impl TryFrom<u16> for Dialect {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0x0202 => Ok(Self::Smb202),
            0x0210 => Ok(Self::Smb210),
            0x0300 => Ok(Self::Smb300),
            0x0302 => Ok(Self::Smb302),
            0x0311 => Ok(Self::Smb311),
            _ => Err(Error::ParseError(format!(
                "Unknown SMB2 dialect: 0x{:04x}",
                value
            ))),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Smb1 => "SMB1",
            Dialect::Smb202 => "SMB 2.0.2",
            Dialect::Smb210 => "SMB 2.1",
            Dialect::Smb300 => "SMB 3.0",
            Dialect::Smb302 => "SMB 3.0.2",
            Dialect::Smb311 => "SMB 3.1.1",
        };
        f.write_str(name)
    }
}
