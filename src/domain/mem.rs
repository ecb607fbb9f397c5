//! Memory quantities.
//!
//! Memory is tracked in bytes. Users write quantities like `512M` or `2G`;
//! those are normalized here before anything else sees them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SjqError};

const KIB: u64 = 1024;

/// Upper bound on memory: either a byte count or no limit at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemLimit {
    /// Memory is not constrained
    Unlimited,
    /// At most this many bytes
    Bytes(u64),
}

impl MemLimit {
    /// Build a limit from an optional configured maximum.
    pub fn from_option(bytes: Option<u64>) -> Self {
        match bytes {
            Some(b) => MemLimit::Bytes(b),
            None => MemLimit::Unlimited,
        }
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self, MemLimit::Bytes(_))
    }

    /// Byte count when bounded.
    pub fn bytes(&self) -> Option<u64> {
        match self {
            MemLimit::Unlimited => None,
            MemLimit::Bytes(b) => Some(*b),
        }
    }

    /// Check whether a demand of `mem` bytes fits under this limit.
    pub fn admits(&self, mem: u64) -> bool {
        match self {
            MemLimit::Unlimited => true,
            MemLimit::Bytes(avail) => mem <= *avail,
        }
    }
}

impl fmt::Display for MemLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemLimit::Unlimited => write!(f, "*"),
            MemLimit::Bytes(b) => write!(f, "{}", format_mem(*b)),
        }
    }
}

/// Parse a memory quantity into bytes.
///
/// Accepts a plain byte count or a number followed by `K`, `M`, `G` or `T`
/// (case-insensitive, optionally followed by `B`). Units are powers of 1024.
pub fn parse_mem(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SjqError::InvalidSubmission("empty memory value".to_string()));
    }

    let upper = trimmed.to_ascii_uppercase();
    let without_b = upper.strip_suffix('B').unwrap_or(&upper);

    let (digits, multiplier) = match without_b.chars().last() {
        Some('K') => (&without_b[..without_b.len() - 1], KIB),
        Some('M') => (&without_b[..without_b.len() - 1], KIB * KIB),
        Some('G') => (&without_b[..without_b.len() - 1], KIB * KIB * KIB),
        Some('T') => (&without_b[..without_b.len() - 1], KIB * KIB * KIB * KIB),
        _ => (without_b, 1),
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| SjqError::InvalidSubmission(format!("invalid memory value: {}", input)))?;

    value
        .checked_mul(multiplier)
        .ok_or_else(|| SjqError::InvalidSubmission(format!("memory value too large: {}", input)))
}

/// Render a byte count with the largest unit that divides it evenly.
pub fn format_mem(bytes: u64) -> String {
    const UNITS: [(&str, u64); 4] = [
        ("T", KIB * KIB * KIB * KIB),
        ("G", KIB * KIB * KIB),
        ("M", KIB * KIB),
        ("K", KIB),
    ];

    if bytes == 0 {
        return "0".to_string();
    }
    for (suffix, size) in UNITS {
        if bytes % size == 0 {
            return format!("{}{}", bytes / size, suffix);
        }
    }
    bytes.to_string()
}
