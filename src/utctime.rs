//! ASN.1 UTCTime parsing and formatting
//!
//! UTCTime values carry two-digit years: values below 50 belong to the
//! 2000s, the rest to the 1900s. Emission is always in GMT as the
//! 13-character `YYMMDDhhmmssZ` form; on parse the seconds and the
//! trailing `Z` are optional.

use chrono::{Datelike, TimeZone, Timelike, Utc};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{CmpError, Result};

/// Fixed month-name table used for textual rendering
const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// A parsed ASN.1 UTCTime value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcTime {
    year: i32,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
}

impl UtcTime {
    /// Build a UTCTime from a Unix timestamp
    ///
    /// Fails when the year falls outside the representable 1950..=2049
    /// window.
    pub fn from_timestamp(secs: i64) -> Result<Self> {
        let dt = Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| CmpError::BadTime(format!("timestamp {secs} not representable")))?;
        let year = dt.year();
        if !(1950..2050).contains(&year) {
            return Err(CmpError::BadTime(format!(
                "year {year} outside the UTCTime range"
            )));
        }
        Ok(Self {
            year,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
        })
    }

    /// Parse the `YYMMDDhhmm[ss][Z]` wire form
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        let digits = if bytes.last() == Some(&b'Z') {
            &bytes[..bytes.len() - 1]
        } else {
            bytes
        };
        if digits.len() != 10 && digits.len() != 12 {
            return Err(CmpError::BadTime(format!("'{s}' has unexpected length")));
        }
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(CmpError::BadTime(format!("'{s}' contains non-digits")));
        }

        let num = |i: usize| (digits[i] - b'0') * 10 + (digits[i + 1] - b'0');
        let yy = num(0) as i32;
        let year = if yy < 50 { 2000 + yy } else { 1900 + yy };
        let month = num(2);
        if !(1..=12).contains(&month) {
            return Err(CmpError::BadTime(format!("'{s}' has month {month}")));
        }
        let second = if digits.len() == 12 { num(10) } else { 0 };

        Ok(Self {
            year,
            month,
            day: num(4),
            hour: num(6),
            minute: num(8),
            second,
        })
    }

    /// Emit the canonical 13-character `YYMMDDhhmmssZ` form
    pub fn to_asn1_string(&self) -> String {
        format!(
            "{:02}{:02}{:02}{:02}{:02}{:02}Z",
            self.year % 100,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second
        )
    }

    /// Unix timestamp of this value
    pub fn to_timestamp(&self) -> Result<i64> {
        Utc.with_ymd_and_hms(
            self.year,
            self.month as u32,
            self.day as u32,
            self.hour as u32,
            self.minute as u32,
            self.second as u32,
        )
        .single()
        .map(|dt| dt.timestamp())
        .ok_or_else(|| CmpError::BadTime(format!("{self} is not a valid date-time")))
    }

    /// Three-way comparison against a Unix timestamp
    pub fn cmp_timestamp(&self, t: i64) -> Result<Ordering> {
        Ok(self.to_timestamp()?.cmp(&t))
    }
}

impl fmt::Display for UtcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:2} {:02}:{:02}:{:02} {} GMT",
            MONTH_NAMES[(self.month - 1) as usize],
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.year
        )
    }
}
