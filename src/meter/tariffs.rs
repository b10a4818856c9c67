//! Tariff settings
//!
//! The meter holds an active tariff and a future tariff that takes over at
//! its activation time. Only the future tariff is writable. Writes use a
//! single flat rate: block thresholds and TOU switching are turned off, the
//! element A rate goes on block 8 rate 1 and the element B rate on TOU
//! rate 1.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use super::{threshold_map, MeterClient};
use crate::amount::Amount;
use crate::codec::record::{THRESHOLD_COUNT, TIME_SWITCH_BLOCK_LEN};
use crate::codec::{registry, BitValues};
use crate::error::{EmopError, Result};
use crate::timestamp::{from_meter_seconds, to_meter_seconds};
use crate::transport::Transport;

/// Prices per block (rows) and rate (columns)
pub type PricingTable = [[Amount; 8]; 8];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TariffsActive {
    pub standing_charge: Amount,
    pub unit_rate_element_a: Amount,
    pub unit_rate_element_b: Amount,
    /// Element A rate as written by a flat-rate tariff
    pub block_8_rate_1: Amount,
    pub threshold_mask: BitValues,
    pub threshold_values: BTreeMap<String, u16>,
    pub block_rate: u8,
    pub tou_rate: u8,
    pub element_b_tou_rate: u8,
    pub prepayment_emergency_credit: Amount,
    pub prepayment_ecredit_availability: Amount,
    pub prepayment_debt_recovery_rate: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TariffsFuture {
    pub standing_charge: Amount,
    pub activation_datetime: DateTime<Utc>,
    pub unit_rate_element_a: Amount,
    pub unit_rate_element_b: Amount,
    pub threshold_mask: BitValues,
    pub threshold_values: BTreeMap<String, u16>,
    pub prepayment_emergency_credit: Amount,
    pub prepayment_ecredit_availability: Amount,
    pub prepayment_debt_recovery_rate: Amount,
}

/// Flat-rate future tariff to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FutureTariffs {
    pub activation: DateTime<Utc>,
    pub standing_charge: Amount,
    /// Applied to both elements
    pub unit_rate: Amount,
    pub emergency_credit: Amount,
    pub ecredit_availability: Amount,
    pub debt_recovery_rate: Amount,
}

impl FutureTariffs {
    /// Wire values in write order, checked before anything is sent
    fn encoded(&self) -> Result<EncodedFuture> {
        self.unit_rate.validate_rate()?;
        Ok(EncodedFuture {
            unit_rate: self.unit_rate.to_u32_raw()?,
            emergency_credit: self.emergency_credit.to_u32_raw()?,
            ecredit_availability: self.ecredit_availability.to_u32_raw()?,
            debt_recovery_rate: self.debt_recovery_rate.to_u32_raw()?,
            standing_charge: self.standing_charge.to_u32_raw()?,
            activation: to_meter_seconds(&self.activation)?,
        })
    }
}

struct EncodedFuture {
    unit_rate: u32,
    emergency_credit: u32,
    ecredit_availability: u32,
    debt_recovery_rate: u32,
    standing_charge: u32,
    activation: u32,
}

/// Which element's time switch table to address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSwitchElement {
    /// Element A, or the only element of a single element meter
    A,
    B,
}

impl TimeSwitchElement {
    fn object_name(self) -> &'static str {
        match self {
            Self::A => "tariff_time_switch_element_a_or_single",
            Self::B => "tariff_time_switch_element_b",
        }
    }
}

impl fmt::Display for TimeSwitchElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "a"),
            Self::B => write!(f, "b"),
        }
    }
}

impl FromStr for TimeSwitchElement {
    type Err = EmopError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "a" | "single" => Ok(Self::A),
            "b" => Ok(Self::B),
            other => Err(EmopError::invalid(
                "element",
                format!("'{}' is not an element, use a or b", other),
            )),
        }
    }
}

impl<T: Transport> MeterClient<T> {
    fn thresholds(&mut self, active: bool) -> Result<(BitValues, BTreeMap<String, u16>)> {
        let (mask_name, values_name) = if active {
            ("tariff_active_threshold_mask", "tariff_active_threshold_values")
        } else {
            ("tariff_future_threshold_mask", "tariff_future_threshold_values")
        };
        let mask = self.read_bits(mask_name)?;
        let values = self.read_u16_array(values_name)?;
        debug!(mask = ?mask, values = ?values, "thresholds");
        Ok((mask, threshold_map(&values)))
    }

    pub fn tariffs_active(&mut self) -> Result<TariffsActive> {
        let standing_charge = self.read_amount("tariff_active_standing_charge")?;
        let (threshold_mask, threshold_values) = self.thresholds(true)?;
        let block_8_rate_1 = self.read_amount("tariff_active_block_8_rate_1")?;
        let unit_rate_element_a = self.read_amount("tariff_active_price")?;
        let block_rate = self.read_u32("tariff_active_block_rate_current")? as u8;
        let tou_rate = self.read_u32("tariff_active_tou_rate_current")? as u8;
        let unit_rate_element_b = self.read_amount("tariff_active_element_b_price")?;
        let element_b_tou_rate = self.read_u32("tariff_active_element_b_tou_rate_current")? as u8;
        let prepayment_emergency_credit =
            self.read_amount("tariff_active_prepayment_emergency_credit")?;
        let prepayment_ecredit_availability =
            self.read_amount("tariff_active_prepayment_ecredit_availability")?;
        let prepayment_debt_recovery_rate =
            self.read_amount("tariff_active_prepayment_debt_recovery_rate")?;

        let tariffs = TariffsActive {
            standing_charge,
            unit_rate_element_a,
            unit_rate_element_b,
            block_8_rate_1,
            threshold_mask,
            threshold_values,
            block_rate,
            tou_rate,
            element_b_tou_rate,
            prepayment_emergency_credit,
            prepayment_ecredit_availability,
            prepayment_debt_recovery_rate,
        };
        info!(tariffs = ?tariffs, "active tariffs");
        Ok(tariffs)
    }

    pub fn tariffs_future(&mut self) -> Result<TariffsFuture> {
        let standing_charge = self.read_amount("tariff_future_standing_charge")?;
        let activation = self.read_u32("tariff_future_activation_datetime")?;
        let (threshold_mask, threshold_values) = self.thresholds(false)?;
        let unit_rate_element_a = self.read_amount("tariff_future_block_8_rate_1")?;
        let unit_rate_element_b = self.read_amount("tariff_future_element_b_tou_rate_1")?;
        let prepayment_emergency_credit =
            self.read_amount("tariff_future_prepayment_emergency_credit")?;
        let prepayment_ecredit_availability =
            self.read_amount("tariff_future_prepayment_ecredit_availability")?;
        let prepayment_debt_recovery_rate =
            self.read_amount("tariff_future_prepayment_debt_recovery_rate")?;

        let tariffs = TariffsFuture {
            standing_charge,
            activation_datetime: from_meter_seconds(activation),
            unit_rate_element_a,
            unit_rate_element_b,
            threshold_mask,
            threshold_values,
            prepayment_emergency_credit,
            prepayment_ecredit_availability,
            prepayment_debt_recovery_rate,
        };
        info!(tariffs = ?tariffs, "future tariffs");
        Ok(tariffs)
    }

    /// Program a flat-rate future tariff
    ///
    /// Every value is validated before the first write. The writes are not
    /// atomic: a failure part way leaves the earlier writes in place.
    pub fn tariffs_future_write(&mut self, tariffs: &FutureTariffs) -> Result<()> {
        let encoded = tariffs.encoded()?;

        debug!("zero out threshold mask");
        self.write_named("tariff_future_threshold_mask", &[0x00])?;
        debug!("zero out threshold values");
        self.write_named("tariff_future_threshold_values", &[0u8; THRESHOLD_COUNT * 2])?;
        debug!("switch off tou flag");
        self.write_named("tariff_future_tou_flag", &[0x00])?;

        let unit_rate = encoded.unit_rate.to_le_bytes();
        debug!(unit_rate = %tariffs.unit_rate, "set element a unit rate on block 8 rate 1");
        self.write_named("tariff_future_block_8_rate_1", &unit_rate)?;
        debug!(unit_rate = %tariffs.unit_rate, "set element b unit rate on tou rate 1");
        self.write_named("tariff_future_element_b_tou_rate_1", &unit_rate)?;

        debug!(
            emergency_credit = %tariffs.emergency_credit,
            ecredit_availability = %tariffs.ecredit_availability,
            debt_recovery_rate = %tariffs.debt_recovery_rate,
            "set prepayment amounts"
        );
        self.write_named(
            "tariff_future_prepayment_emergency_credit",
            &encoded.emergency_credit.to_le_bytes(),
        )?;
        self.write_named(
            "tariff_future_prepayment_ecredit_availability",
            &encoded.ecredit_availability.to_le_bytes(),
        )?;
        self.write_named(
            "tariff_future_prepayment_debt_recovery_rate",
            &encoded.debt_recovery_rate.to_le_bytes(),
        )?;

        debug!("set gas rate to zero");
        self.write_named("tariff_future_gas", &[0u8; 4])?;

        debug!(standing_charge = %tariffs.standing_charge, "set standing charge");
        self.write_named(
            "tariff_future_standing_charge",
            &encoded.standing_charge.to_le_bytes(),
        )?;

        debug!(activation = %tariffs.activation.to_rfc3339(), "set activation time");
        self.write_named(
            "tariff_future_activation_datetime",
            &encoded.activation.to_le_bytes(),
        )?;

        info!(
            activation = %tariffs.activation.to_rfc3339(),
            unit_rate = %tariffs.unit_rate,
            standing_charge = %tariffs.standing_charge,
            "future tariffs written"
        );
        Ok(())
    }

    /// All 64 block/rate prices; one read each
    pub fn tariffs_pricing_table(&mut self, active: bool) -> Result<PricingTable> {
        let mut table = [[Amount::ZERO; 8]; 8];
        for block in 1..=8u8 {
            for rate in 1..=8u8 {
                let id = registry::tariff_block_rate(active, block, rate).ok_or_else(|| {
                    EmopError::invalid("tariff", format!("block {} rate {}", block, rate))
                })?;
                let record = self.read_object(id)?;
                let raw = record.as_i64().ok_or_else(|| super::unexpected(id, &record))?;
                table[usize::from(block - 1)][usize::from(rate - 1)] = Amount::from_raw(raw);
            }
        }
        Ok(table)
    }

    /// Raw 80 byte switch table of one element
    pub fn tariffs_time_switches(&mut self, element: TimeSwitchElement) -> Result<Vec<u8>> {
        let settings = self.read_block(element.object_name())?;
        info!(element = %element, settings = %hex::encode(&settings), "time switch settings");
        Ok(settings)
    }

    /// Turn every switch of one element off
    pub fn tariffs_time_switches_clear(&mut self, element: TimeSwitchElement) -> Result<()> {
        self.write_named(element.object_name(), &[0u8; TIME_SWITCH_BLOCK_LEN])?;
        info!(element = %element, "time switches cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> FutureTariffs {
        FutureTariffs {
            activation: Utc.with_ymd_and_hms(2024, 4, 24, 0, 17, 4).unwrap(),
            standing_charge: "0.6".parse().unwrap(),
            unit_rate: "0.2345".parse().unwrap(),
            emergency_credit: "15".parse().unwrap(),
            ecredit_availability: "10".parse().unwrap(),
            debt_recovery_rate: "0.15".parse().unwrap(),
        }
    }

    #[test]
    fn test_encoded_values() {
        let encoded = sample().encoded().unwrap();
        assert_eq!(encoded.unit_rate, 23_450);
        assert_eq!(encoded.standing_charge, 60_000);
        assert_eq!(encoded.emergency_credit, 1_500_000);
        assert_eq!(encoded.activation, 0x2dbb0c00);
    }

    #[test]
    fn test_rate_above_one_rejected() {
        let tariffs = FutureTariffs {
            unit_rate: "1.5".parse().unwrap(),
            ..sample()
        };
        assert!(tariffs.encoded().is_err());
    }

    #[test]
    fn test_negative_amount_rejected() {
        let tariffs = FutureTariffs {
            standing_charge: "-1".parse().unwrap(),
            ..sample()
        };
        assert!(tariffs.encoded().is_err());
    }

    #[test]
    fn test_element_parse() {
        assert_eq!("A".parse::<TimeSwitchElement>().unwrap(), TimeSwitchElement::A);
        assert_eq!("b".parse::<TimeSwitchElement>().unwrap(), TimeSwitchElement::B);
        assert!("c".parse::<TimeSwitchElement>().is_err());
    }

    #[test]
    fn test_element_objects_registered() {
        for element in [TimeSwitchElement::A, TimeSwitchElement::B] {
            assert!(registry::by_name(element.object_name()).is_some());
        }
    }
}
