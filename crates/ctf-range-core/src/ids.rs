//! Core identifier types for ctf-range.
//!
//! Levels, challenges and deployments are numbered from per-entity sequences
//! owned by the store. Virtual machines carry the numeric identifier the
//! hypervisor knows them by. All IDs encode to big-endian bytes so that
//! storage keys sort in numeric order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The string is not a valid decimal number.
    #[error("invalid number: {0}")]
    InvalidNumber(String),

    /// The byte slice has the wrong length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes.
        got: usize,
    },

    /// Serial identifiers start at 1.
    #[error("identifier must be positive")]
    Zero,
}

macro_rules! serial_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw sequence value.
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Return the raw sequence value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Encode as big-endian bytes for use in storage keys.
            #[must_use]
            pub const fn to_be_bytes(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }

            /// Decode from big-endian bytes.
            ///
            /// # Errors
            ///
            /// Returns an error if the slice is not exactly 8 bytes.
            pub fn from_be_bytes(bytes: &[u8]) -> Result<Self, IdError> {
                let arr: [u8; 8] = bytes.try_into().map_err(|_| IdError::InvalidLength {
                    expected: 8,
                    got: bytes.len(),
                })?;
                Ok(Self(u64::from_be_bytes(arr)))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value: u64 = s
                    .trim()
                    .parse()
                    .map_err(|_| IdError::InvalidNumber(s.to_string()))?;
                if value == 0 {
                    return Err(IdError::Zero);
                }
                Ok(Self(value))
            }
        }
    };
}

serial_id!(
    /// Identifier of a challenge template.
    LevelId
);

serial_id!(
    /// Identifier of one team's instance of a level.
    ChallengeId
);

serial_id!(
    /// Identifier of the provisioned resource backing a challenge.
    DeploymentId
);

/// The hypervisor-assigned numeric identifier of a VM or container.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmId(u32);

impl VmId {
    /// Wrap a raw hypervisor identifier.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Return the raw identifier.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Encode as big-endian bytes for use in storage keys.
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VmId({})", self.0)
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VmId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse()
            .map(Self)
            .map_err(|_| IdError::InvalidNumber(s.to_string()))
    }
}
