//! Typed meter calls
//!
//! `MeterClient` wraps a [`TransactionRunner`] and turns registry objects
//! into the values callers actually want: trimmed strings, UTC times,
//! scaled amounts. Every call is one or more plain reads/writes.
//!
//! Prepay and tariff calls live in [`tariffs`]; per-meter locking in
//! [`shared`].

pub mod shared;
pub mod tariffs;

pub use shared::SharedMeter;
pub use tariffs::{FutureTariffs, PricingTable, TariffsActive, TariffsFuture, TimeSwitchElement};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::amount::Amount;
use crate::codec::record::THRESHOLD_COUNT;
use crate::codec::{
    registry, BitValues, MeterTime, ObjectId, ProfileLogFormat, ProfileLogRecord, Record,
    TransactionDetails,
};
use crate::constants::{PREPAY_ENABLE_MIN_BALANCE_RAW, PREPAY_TOKEN_LEN};
use crate::error::{CodecError, EmopError, Result};
use crate::transaction::TransactionRunner;
use crate::transport::{TcpTransport, Transport};

/// Hardware variant reported by the meter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "model", rename_all = "snake_case")]
pub enum Hardware {
    SinglePhase(String),
    /// Three-phase meters report a blank hardware string
    ThreePhase,
}

/// Signal quality of the meter modem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignalQuality {
    pub csq: u8,
    pub network_operator: u8,
}

/// Per-phase voltages in volts; L2/L3 are `None` when the meter cut the
/// reply short
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThreePhaseVoltage {
    pub l1: f64,
    pub l2: Option<f64>,
    pub l3: Option<f64>,
}

/// Typed client for one meter
pub struct MeterClient<T: Transport = TcpTransport> {
    runner: TransactionRunner<T>,
}

/// Registry id of a well-known object name
pub(crate) fn object(name: &'static str) -> Result<ObjectId> {
    registry::by_name(name)
        .map(|e| e.id)
        .ok_or_else(|| EmopError::invalid("object", format!("'{}' is not a known object", name)))
}

fn unexpected(id: ObjectId, record: &Record) -> EmopError {
    CodecError::ShapeMismatch {
        shape: registry::shape_for(id).name(),
        reason: format!("{} decoded as {}", registry::name_of(id), record.kind()),
    }
    .into()
}

/// Both fields of a `csq_net_op` record, neither defaulted
fn signal_quality(id: ObjectId, record: &Record) -> Result<SignalQuality> {
    let bits = record.as_bits().ok_or_else(|| unexpected(id, record))?;
    let field = |name: &str| -> Result<u8> {
        let value = bits.get(name).ok_or_else(|| {
            EmopError::from(CodecError::ShapeMismatch {
                shape: registry::shape_for(id).name(),
                reason: format!("{} has no {} field", registry::name_of(id), name),
            })
        })?;
        Ok(value as u8)
    };
    Ok(SignalQuality {
        csq: field("csq")?,
        network_operator: field("network_operator")?,
    })
}

/// `0142` style version codes read as `01.42`
fn format_firmware(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if bytes.len() == 4 && bytes.iter().all(u8::is_ascii_graphic) => {
            format!("{}.{}", &text[..2], &text[2..])
        }
        _ => hex::encode(bytes),
    }
}

impl<T: Transport> MeterClient<T> {
    pub fn new(runner: TransactionRunner<T>) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &TransactionRunner<T> {
        &self.runner
    }

    // =========================================================================
    // Generic access
    // =========================================================================

    /// Read any object, decoded with its registered shape
    pub fn read_object(&mut self, id: ObjectId) -> Result<Record> {
        self.runner.read(id)
    }

    /// Write raw bytes to any object
    pub fn write_object(&mut self, id: ObjectId, payload: &[u8]) -> Result<Bytes> {
        self.runner.write(id, payload)
    }

    pub fn send_raw(&mut self, data_field: &[u8]) -> Result<Bytes> {
        self.runner.send_raw(data_field)
    }

    pub(crate) fn write_named(&mut self, name: &'static str, payload: &[u8]) -> Result<()> {
        self.runner.write(object(name)?, payload)?;
        Ok(())
    }

    pub(crate) fn read_u32(&mut self, name: &'static str) -> Result<u32> {
        let id = object(name)?;
        let record = self.runner.read(id)?;
        record.as_u32().ok_or_else(|| unexpected(id, &record))
    }

    pub(crate) fn read_amount(&mut self, name: &'static str) -> Result<Amount> {
        let id = object(name)?;
        let record = self.runner.read(id)?;
        record
            .as_i64()
            .map(Amount::from_raw)
            .ok_or_else(|| unexpected(id, &record))
    }

    pub(crate) fn read_u16_array(&mut self, name: &'static str) -> Result<Vec<u16>> {
        let id = object(name)?;
        match self.runner.read(id)? {
            Record::U16Array(values) => Ok(values),
            other => Err(unexpected(id, &other)),
        }
    }

    pub(crate) fn read_bits(&mut self, name: &'static str) -> Result<BitValues> {
        let id = object(name)?;
        match self.runner.read(id)? {
            Record::Bits(bits) => Ok(bits),
            other => Err(unexpected(id, &other)),
        }
    }

    pub(crate) fn read_block(&mut self, name: &'static str) -> Result<Vec<u8>> {
        let id = object(name)?;
        match self.runner.read(id)? {
            Record::Block(bytes) => Ok(bytes),
            other => Err(unexpected(id, &other)),
        }
    }

    // =========================================================================
    // Identity
    // =========================================================================

    pub fn serial(&mut self) -> Result<String> {
        let id = object("serial")?;
        let record = self.runner.read(id)?;
        let serial = record
            .as_text()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| unexpected(id, &record))?;
        info!(serial = %serial, "received serial");
        Ok(serial)
    }

    pub fn hardware(&mut self) -> Result<Hardware> {
        let id = object("hardware_version")?;
        let record = self.runner.read(id)?;
        let text = record.as_text().ok_or_else(|| unexpected(id, &record))?;
        let cleaned = text.replace('\0', "");
        let cleaned = cleaned.trim();
        let hardware = if cleaned.is_empty() {
            Hardware::ThreePhase
        } else {
            Hardware::SinglePhase(cleaned.to_string())
        };
        info!(hardware = ?hardware, "received hardware");
        Ok(hardware)
    }

    /// Four ASCII digits on single-phase meters, hex otherwise
    pub fn firmware_version(&mut self) -> Result<String> {
        let block = self.read_block("firmware_version")?;
        let version = format_firmware(&block);
        info!(firmware_version = %version, "received firmware version");
        Ok(version)
    }

    // =========================================================================
    // Clock and signal
    // =========================================================================

    pub fn clock_time(&mut self) -> Result<DateTime<Utc>> {
        let id = object("time")?;
        match self.runner.read(id)? {
            Record::Time(time) => {
                let at = time.to_datetime()?;
                info!(time = %at.to_rfc3339(), "received time");
                Ok(at)
            }
            other => Err(unexpected(id, &other)),
        }
    }

    /// Set the meter clock, usually to `Utc::now()`
    pub fn clock_time_write(&mut self, at: DateTime<Utc>) -> Result<()> {
        let time = MeterTime::from_datetime(&at)?;
        self.runner.write_record(object("time")?, &Record::Time(time))?;
        info!(time = %at.to_rfc3339(), "meter clock set");
        Ok(())
    }

    pub fn csq(&mut self) -> Result<SignalQuality> {
        let id = object("csq_net_op")?;
        let record = self.runner.read(id)?;
        let quality = signal_quality(id, &record)?;
        info!(csq = quality.csq, "received csq");
        Ok(quality)
    }

    // =========================================================================
    // Voltage
    // =========================================================================

    /// Volts (the meter reports tenths)
    pub fn instantaneous_voltage(&mut self) -> Result<f64> {
        let raw = self.read_u32("instantaneous_voltage")?;
        let volts = f64::from(raw) / 10.0;
        info!(voltage = volts, "received instantaneous voltage");
        Ok(volts)
    }

    /// L1 must read; a truncated L2 or L3 reply is reported as `None`
    pub fn three_phase_voltage(&mut self) -> Result<ThreePhaseVoltage> {
        let l1 = f64::from(self.read_u32("three_phase_instantaneous_voltage_l1")?) / 10.0;
        let l2 = self.optional_voltage("three_phase_instantaneous_voltage_l2")?;
        let l3 = self.optional_voltage("three_phase_instantaneous_voltage_l3")?;
        let voltages = ThreePhaseVoltage { l1, l2, l3 };
        info!(voltages = ?voltages, "received three phase voltages");
        Ok(voltages)
    }

    fn optional_voltage(&mut self, name: &'static str) -> Result<Option<f64>> {
        match self.read_u32(name) {
            Ok(raw) => Ok(Some(f64::from(raw) / 10.0)),
            Err(e) if e.is_truncation() => {
                warn!(object = name, error = %e, "voltage unavailable");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Prepay
    // =========================================================================

    pub fn prepay_balance(&mut self) -> Result<Amount> {
        let balance = self.read_amount("prepay_balance")?;
        info!(balance = %balance, "received prepay balance");
        Ok(balance)
    }

    pub fn prepay_enabled(&mut self) -> Result<bool> {
        let enabled = self.read_u32("prepay_enabled_flag")? == 1;
        info!(prepay_enabled = enabled, "received prepay enabled flag");
        Ok(enabled)
    }

    /// Switch prepay mode; enabling needs a balance of at least 10
    pub fn prepay_enabled_write(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            let balance = self.prepay_balance()?;
            let minimum = Amount::from_raw(PREPAY_ENABLE_MIN_BALANCE_RAW);
            if balance < minimum {
                return Err(EmopError::invalid(
                    "prepay_enabled",
                    format!(
                        "balance {} too low to enable prepay mode (< {}), add credit and retry",
                        balance, minimum
                    ),
                ));
            }
        }
        self.write_named("prepay_enabled_flag", &[u8::from(enabled)])?;
        info!(prepay_enabled = enabled, "prepay mode written");
        Ok(())
    }

    /// Submit a top-up token, sent as its ASCII bytes
    pub fn prepay_send_token(&mut self, token: &str) -> Result<()> {
        if !token.is_ascii() || token.len() != PREPAY_TOKEN_LEN {
            return Err(EmopError::invalid(
                "token",
                format!("expected {} ASCII characters, got '{}'", PREPAY_TOKEN_LEN, token),
            ));
        }
        self.write_named("prepay_token_send", token.as_bytes())?;
        info!("prepay token sent");
        Ok(())
    }

    pub fn prepay_transaction_count(&mut self) -> Result<u32> {
        let count = self.read_u32("monetary_info_transaction_count")?;
        info!(transaction_count = count, "received prepay transaction count");
        Ok(count)
    }

    pub fn prepay_transaction_details(&mut self) -> Result<TransactionDetails> {
        let id = object("monetary_info_transaction_details")?;
        match self.runner.read(id)? {
            Record::TransactionDetails(details) => {
                info!(details = ?details, "received prepay transaction details");
                Ok(details)
            }
            other => Err(unexpected(id, &other)),
        }
    }

    // =========================================================================
    // Profile logs
    // =========================================================================

    pub fn profile_log(&mut self, log: ProfileLogFormat, at: DateTime<Utc>) -> Result<ProfileLogRecord> {
        let timestamp = crate::timestamp::to_meter_seconds(&at)?;
        let record = self.runner.profile_log(log, timestamp)?;
        info!(
            timestamp = %crate::timestamp::from_meter_seconds(record.timestamp).to_rfc3339(),
            has_payload = record.payload.is_some(),
            "received profile log"
        );
        Ok(record)
    }
}

/// Threshold values keyed `th1`..`th7`
pub(crate) fn threshold_map(values: &[u16]) -> BTreeMap<String, u16> {
    values
        .iter()
        .take(THRESHOLD_COUNT)
        .enumerate()
        .map(|(i, v)| (format!("th{}", i + 1), *v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::record::BitField;

    #[test]
    fn test_firmware_format() {
        assert_eq!(format_firmware(b"0142"), "01.42");
        assert_eq!(format_firmware(&[1, 2, 3, 4, 5]), "0102030405");
        assert_eq!(format_firmware(&[0x00, 0x01, 0x02, 0x03]), "00010203");
    }

    #[test]
    fn test_known_objects_resolve() {
        for name in [
            "serial",
            "hardware_version",
            "firmware_version",
            "time",
            "csq_net_op",
            "instantaneous_voltage",
            "prepay_balance",
            "prepay_enabled_flag",
            "prepay_token_send",
            "monetary_info_transaction_count",
            "monetary_info_transaction_details",
        ] {
            assert!(object(name).is_ok(), "{}", name);
        }
        assert!(object("no_such_object").is_err());
    }

    #[test]
    fn test_threshold_map_names() {
        let map = threshold_map(&[1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(map.get("th1"), Some(&1));
        assert_eq!(map.get("th7"), Some(&7));
        assert_eq!(map.len(), 7);
    }

    #[test]
    fn test_signal_quality_fields() {
        let id = object("csq_net_op").unwrap();
        let record = crate::codec::decode_payload(id, &[0x30]).unwrap();
        let quality = signal_quality(id, &record).unwrap();
        assert_eq!(quality.csq, 16);
        assert_eq!(quality.network_operator, 1);
    }

    #[test]
    fn test_signal_quality_missing_field_is_an_error() {
        const OPERATOR_ONLY: &[BitField] = &[BitField {
            name: "network_operator",
            bits: 8,
        }];
        let id = object("csq_net_op").unwrap();
        let bits = BitValues::from_layout(OPERATOR_ONLY, &[1]).unwrap();

        let err = signal_quality(id, &Record::Bits(bits)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Protocol);
        assert!(err.to_string().contains("no csq field"));
    }

    #[test]
    fn test_signal_quality_wrong_record_kind() {
        let id = object("csq_net_op").unwrap();
        assert!(signal_quality(id, &Record::U8(0x30)).is_err());
    }
}
