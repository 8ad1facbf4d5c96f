// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Location report decoding.
//!
//! A normal frame payload is a comma-separated field list:
//!
//! ```text
//! 0     1       2         3  4    5    6  7         8  9          10 11     12
//! imei, keyword, datetime, _, fix, ..., _, latitude, NS, longitude, EW, speed, ...
//! ```
//!
//! Extended frames additionally carry altitude (13), accuracy (14) and
//! temperature (18).

use serde::Serialize;
use thiserror::Error;

/// Minimum number of fields in a decodable payload.
pub const MIN_FIELDS: usize = 13;

/// Fix flag value reported by a device with a valid signal lock.
pub const FIX_LOCKED: &str = "F";

const KEYWORD: usize = 1;
const DATETIME: usize = 2;
const FIX: usize = 4;
const LATITUDE: usize = 7;
const ALTITUDE: usize = 13;
const ACCURACY: usize = 14;
const TEMPERATURE: usize = 18;

/// Why a payload produced no report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("No fix lock")]
    NoFixLock,
}

/// One decoded location update with a valid signal lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    /// Identifier the device registered with.
    pub device_id: String,

    /// Keyword or command the device attached to the frame.
    pub keyword: String,

    /// Device-local timestamp, passed through verbatim.
    pub timestamp: String,

    /// Signed decimal degrees, negative south of the equator.
    pub latitude: f64,

    /// Signed decimal degrees, negative west of Greenwich.
    pub longitude: f64,

    pub speed_kmh: f64,

    /// Speed exactly as the device sent it.
    pub speed: String,

    pub altitude: Option<f64>,

    pub accuracy: Option<f64>,

    pub temperature: Option<f64>,

    /// The payload exactly as received.
    pub raw: String,
}

/// Hemisphere marker following a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    North,
    South,
    East,
    West,
}

impl Hemisphere {
    /// Parse a single-letter marker.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "N" => Some(Self::North),
            "S" => Some(Self::South),
            "E" => Some(Self::East),
            "W" => Some(Self::West),
            _ => None,
        }
    }

    /// Sign applied to a coordinate in this hemisphere.
    pub fn sign(self) -> f64 {
        match self {
            Self::North | Self::East => 1.0,
            Self::South | Self::West => -1.0,
        }
    }

    fn is_latitude(self) -> bool {
        matches!(self, Self::North | Self::South)
    }
}

/// Convert a `DDMM.MMMM` value to decimal degrees (unsigned).
pub fn ddmm_to_degrees(value: f64) -> f64 {
    let deg = (value / 100.0).floor();
    let minutes_fraction = (value / 100.0 - deg) / 0.6;
    deg + minutes_fraction
}

/// Decode a normal frame payload into a report.
pub fn decode(device_id: &str, payload: &str) -> Result<Report, DecodeError> {
    let fields: Vec<&str> = payload.split(',').collect();

    if fields.len() < MIN_FIELDS {
        return Err(DecodeError::MalformedFrame(format!(
            "{} fields, need at least {}",
            fields.len(),
            MIN_FIELDS
        )));
    }

    if fields[FIX].trim() != FIX_LOCKED {
        return Err(DecodeError::NoFixLock);
    }

    let at = coordinate_group(&fields)
        .ok_or_else(|| DecodeError::MalformedFrame("no hemisphere markers".into()))?;

    let latitude = parse_coordinate(fields[at], fields[at + 1])?;
    let longitude = parse_coordinate(fields[at + 2], fields[at + 3])?;

    let speed_field = fields[at + 4].trim();
    let speed_kmh = if speed_field.is_empty() {
        0.0
    } else {
        speed_field
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| DecodeError::MalformedFrame(format!("bad speed {:?}", speed_field)))?
    };

    let extended = fields.len() > MIN_FIELDS;
    let optional = |idx: usize| -> Option<f64> {
        if !extended {
            return None;
        }
        fields.get(idx).and_then(|f| f.trim().parse().ok())
    };

    Ok(Report {
        device_id: device_id.to_string(),
        keyword: fields[KEYWORD].to_string(),
        timestamp: fields[DATETIME].to_string(),
        latitude,
        longitude,
        speed_kmh,
        speed: speed_field.to_string(),
        altitude: optional(ALTITUDE),
        accuracy: optional(ACCURACY),
        temperature: optional(TEMPERATURE),
        raw: payload.to_string(),
    })
}

/// Index of the latitude field.
///
/// Normally field 7. Some firmware emits extra empty fields before the
/// coordinates, so the group is located by its `N|S` and `E|W` markers.
fn coordinate_group(fields: &[&str]) -> Option<usize> {
    (LATITUDE..)
        .take_while(|at| at + 4 < fields.len())
        .find(|&at| {
            let lat = Hemisphere::parse(fields[at + 1]);
            let lon = Hemisphere::parse(fields[at + 3]);
            matches!((lat, lon), (Some(a), Some(b)) if a.is_latitude() && !b.is_latitude())
        })
}

fn parse_coordinate(value: &str, hemisphere: &str) -> Result<f64, DecodeError> {
    let raw = value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DecodeError::MalformedFrame(format!("bad coordinate {:?}", value)))?;
    let hemisphere = Hemisphere::parse(hemisphere)
        .ok_or_else(|| DecodeError::MalformedFrame(format!("bad hemisphere {:?}", hemisphere)))?;

    Ok(ddmm_to_degrees(raw) * hemisphere.sign())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A locked report whose payload length does not depend on `seq`.
    pub fn report(seq: u32) -> Report {
        let payload = format!(
            "123456789012345,tracker,2024010112{:04},,F,120000.000,A,4916.45,N,12311.12,E,15,0",
            seq
        );
        decode("123456789012345", &payload).expect("valid test payload")
    }
}
