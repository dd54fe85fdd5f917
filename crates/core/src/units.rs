// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SI-suffixed quantity parsing for platform descriptions.
//!
//! Platform attributes arrive as strings like `"16GB"`, `"1Gf"`, `"125MBps"`
//! or `"20us"`. Decimal suffixes are powers of 1000, binary suffixes
//! (`KiB`, `MiB`, ...) powers of 1024.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("cannot parse {0:?} as a number")]
    BadNumber(String),
    #[error("unknown unit suffix in {0:?}")]
    UnknownSuffix(String),
    #[error("negative quantity {0:?}")]
    Negative(String),
}

/// Parse a byte quantity: `B`, `KB`, `MB`, `GB`, `TB`, `KiB`, `MiB`, `GiB`,
/// `TiB`, or a bare number.
pub fn parse_bytes(s: &str) -> Result<u64, UnitError> {
    let (value, suffix) = split_suffix(s);
    let multiplier: f64 = match suffix {
        "" | "B" => 1.0,
        "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0f64.powi(4),
        _ => return Err(UnitError::UnknownSuffix(s.to_string())),
    };
    let value = parse_value(value, s)?;
    Ok((value * multiplier).round() as u64)
}

/// Parse a compute speed in flop/s: `f`, `Kf`, `Mf`, `Gf`, `Tf`.
pub fn parse_flops(s: &str) -> Result<f64, UnitError> {
    let (value, suffix) = split_suffix(s);
    let multiplier = match suffix {
        "" | "f" => 1.0,
        "Kf" => 1e3,
        "Mf" => 1e6,
        "Gf" => 1e9,
        "Tf" => 1e12,
        _ => return Err(UnitError::UnknownSuffix(s.to_string())),
    };
    Ok(parse_value(value, s)? * multiplier)
}

/// Parse a bandwidth in bytes/s: `Bps`, `KBps`, `MBps`, `GBps`, `TBps`.
pub fn parse_bandwidth(s: &str) -> Result<f64, UnitError> {
    let (value, suffix) = split_suffix(s);
    let multiplier = match suffix {
        "" | "Bps" => 1.0,
        "KBps" => 1e3,
        "MBps" => 1e6,
        "GBps" => 1e9,
        "TBps" => 1e12,
        _ => return Err(UnitError::UnknownSuffix(s.to_string())),
    };
    Ok(parse_value(value, s)? * multiplier)
}

/// Parse a duration in seconds: `s`, `ms`, `us`, `ns`.
pub fn parse_duration_secs(s: &str) -> Result<f64, UnitError> {
    let (value, suffix) = split_suffix(s);
    let multiplier = match suffix {
        "" | "s" => 1.0,
        "ms" => 1e-3,
        "us" => 1e-6,
        "ns" => 1e-9,
        _ => return Err(UnitError::UnknownSuffix(s.to_string())),
    };
    Ok(parse_value(value, s)? * multiplier)
}

fn split_suffix(s: &str) -> (&str, &str) {
    let s = s.trim();
    let split = s
        .char_indices()
        .find(|(_, c)| c.is_ascii_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    (s[..split].trim(), s[split..].trim())
}

fn parse_value(value: &str, original: &str) -> Result<f64, UnitError> {
    let v: f64 = value.parse().map_err(|_| UnitError::BadNumber(original.to_string()))?;
    if v < 0.0 {
        return Err(UnitError::Negative(original.to_string()));
    }
    Ok(v)
}

#[cfg(test)]
#[path = "units_tests.rs"]
mod tests;
