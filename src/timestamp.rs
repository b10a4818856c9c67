//! Meter time conversions
//!
//! Meters count seconds from 2000-01-01T00:00:00Z in a u32, and report
//! their clock as a 7 byte `MeterTime` with a two digit year.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc, Weekday};

use crate::codec::{DayOfWeek, MeterTime};
use crate::constants::METER_EPOCH_UNIX_SECS;
use crate::error::{CodecError, EmopError, Result};

/// Seconds since the meter epoch to UTC
pub fn from_meter_seconds(secs: u32) -> DateTime<Utc> {
    // Always in range: u32 seconds past 2000 ends in 2136
    DateTime::from_timestamp(METER_EPOCH_UNIX_SECS + i64::from(secs), 0)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// UTC to seconds since the meter epoch
///
/// # Errors
///
/// `InvalidArgument` before 2000 or past the u32 range.
pub fn to_meter_seconds(dt: &DateTime<Utc>) -> Result<u32> {
    let secs = dt.timestamp() - METER_EPOCH_UNIX_SECS;
    u32::try_from(secs).map_err(|_| {
        EmopError::invalid(
            "timestamp",
            format!("{} is outside the meter time range", dt.to_rfc3339()),
        )
    })
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => Self::Monday,
            Weekday::Tue => Self::Tuesday,
            Weekday::Wed => Self::Wednesday,
            Weekday::Thu => Self::Thursday,
            Weekday::Fri => Self::Friday,
            Weekday::Sat => Self::Saturday,
            Weekday::Sun => Self::Sunday,
        }
    }
}

impl MeterTime {
    /// Clock record for a UTC instant
    ///
    /// # Errors
    ///
    /// `InvalidArgument` outside the years 2000 to 2255.
    pub fn from_datetime(dt: &DateTime<Utc>) -> Result<Self> {
        let year = u8::try_from(dt.year() - 2000).map_err(|_| {
            EmopError::invalid("time", format!("year {} not representable", dt.year()))
        })?;
        Ok(Self {
            year,
            month: dt.month() as u8,
            date: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
            day_of_week: dt.weekday().into(),
        })
    }

    /// UTC instant of this clock record; the day of week is not checked
    pub fn to_datetime(&self) -> std::result::Result<DateTime<Utc>, CodecError> {
        NaiveDate::from_ymd_opt(
            2000 + i32::from(self.year),
            u32::from(self.month),
            u32::from(self.date),
        )
        .and_then(|d| {
            d.and_hms_opt(
                u32::from(self.hour),
                u32::from(self.minute),
                u32::from(self.second),
            )
        })
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| CodecError::InvalidEncoding {
            field: "time",
            reason: format!(
                "{}-{}-{} {}:{}:{} is not a calendar time",
                self.year, self.month, self.date, self.hour, self.minute, self.second
            ),
        })
    }
}
