//! Command-line interface definition using clap
//!
//! Provides structured argument parsing with automatic help generation.

use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;

use crate::amount::Amount;
use crate::codec::{registry, ObjectId, ProfileLogFormat};
use crate::meter::TimeSwitchElement;

// =============================================================================
// Argument types
// =============================================================================

/// Hex encoded bytes (spaces allowed)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl FromStr for HexBytes {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let compact = compact.strip_prefix("0x").unwrap_or(compact.as_str());
        hex::decode(compact).map(HexBytes)
    }
}

/// Registry name, 6 hex digits or an OBIS triplet
pub fn parse_object(s: &str) -> Result<ObjectId, String> {
    if let Some(entry) = registry::by_name(s) {
        return Ok(entry.id);
    }
    s.parse::<ObjectId>()
        .map_err(|e| format!("{} (not a known object name either)", e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ElementArg {
    A,
    B,
}

impl From<ElementArg> for TimeSwitchElement {
    fn from(arg: ElementArg) -> Self {
        match arg {
            ElementArg::A => TimeSwitchElement::A,
            ElementArg::B => TimeSwitchElement::B,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProfileLogArg {
    #[value(name = "1")]
    One,
    #[value(name = "2")]
    Two,
}

impl From<ProfileLogArg> for ProfileLogFormat {
    fn from(arg: ProfileLogArg) -> Self {
        match arg {
            ProfileLogArg::One => ProfileLogFormat::First,
            ProfileLogArg::Two => ProfileLogFormat::Second,
        }
    }
}

// =============================================================================
// CLI Definition
// =============================================================================

/// Talk EMOP to Emlite smart meters
#[derive(Parser, Debug)]
#[command(name = "emop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (default: emop.toml next to the binary or in cwd)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Meter host (overrides config and EMLITE_HOST)
    #[arg(long, value_name = "HOST", global = true)]
    pub host: Option<String>,

    /// Meter port (overrides config and EMLITE_PORT)
    #[arg(long, value_name = "PORT", global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    // =========================================================================
    // Generic object access
    // =========================================================================
    /// Read an object and decode it
    Read {
        #[arg(value_parser = parse_object)]
        object: ObjectId,
    },

    /// Write raw hex bytes to an object
    Write {
        #[arg(value_parser = parse_object)]
        object: ObjectId,
        payload: HexBytes,
    },

    /// Send a hex encoded data field as-is
    SendRaw { data_field: HexBytes },

    // =========================================================================
    // Typed calls
    // =========================================================================
    Serial,
    Hardware,
    FirmwareVersion,
    ClockTime,
    /// Set the meter clock to the current UTC time
    ClockTimeWrite,
    Csq,
    InstantaneousVoltage,
    ThreePhaseVoltage,

    PrepayBalance,
    PrepayEnabled,
    PrepayEnabledWrite {
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
    PrepaySendToken { token: String },
    PrepayTransactionCount,
    PrepayTransactionDetails,

    TariffsActive {
        /// Also read all 64 block/rate prices
        #[arg(long)]
        pricings: bool,
    },
    TariffsFuture {
        #[arg(long)]
        pricings: bool,
    },
    /// Program a flat-rate future tariff
    TariffsFutureWrite {
        /// Activation time, RFC 3339
        #[arg(long, value_name = "RFC3339")]
        from_ts: DateTime<Utc>,
        #[arg(long)]
        standing_charge: Amount,
        #[arg(long)]
        unit_rate: Amount,
        #[arg(long, default_value = "0")]
        emergency_credit: Amount,
        #[arg(long, default_value = "0")]
        ecredit_availability: Amount,
        #[arg(long, default_value = "0")]
        debt_recovery_rate: Amount,
    },
    TariffsTimeSwitches {
        #[arg(value_enum)]
        element: ElementArg,
    },
    /// Switch every time switch of an element off
    TariffsTimeSwitchesClear {
        #[arg(value_enum)]
        element: ElementArg,
    },

    /// Read a profile log entry
    ProfileLog {
        #[arg(value_enum)]
        log: ProfileLogArg,
        /// Entry time, RFC 3339
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Offline
    // =========================================================================
    /// List known objects
    Objects,

    /// Decode a payload with an object's shape
    DecodeRecord {
        #[arg(value_parser = parse_object)]
        object: ObjectId,
        payload: HexBytes,
    },

    /// Decode a complete hex encoded frame
    DecodeFrame {
        frame: HexBytes,
        /// Skip CRC verification
        #[arg(long)]
        no_verify: bool,
    },
}

impl Command {
    /// Whether the command talks to a meter
    pub fn needs_meter(&self) -> bool {
        !matches!(
            self,
            Command::Objects | Command::DecodeRecord { .. } | Command::DecodeFrame { .. }
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
