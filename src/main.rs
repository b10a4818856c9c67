//! emop - EMOP client for Emlite smart meters
//!
//! Usage:
//!   emop --host 10.0.0.5 serial          Read the meter serial
//!   emop read 60.01.00                   Read any object
//!   emop decode-frame 7e15c06f...        Decode a captured frame offline
//!
//! Results are printed as JSON on stdout, logs go to stderr.
//!
//! Exit codes: 0 ok, 1 other, 2 invalid argument, 3 configuration,
//! 4 connection failure or meter busy, 5 protocol error.

use clap::Parser;
use serde_json::{json, Value};
use std::fmt;
use std::process::ExitCode;
use tracing::{debug, warn};

use emop::cli::{Cli, Command};
use emop::codec::{self, registry, Frame};
use emop::config::{self, Config};
use emop::logging;
use emop::meter::{FutureTariffs, MeterClient, SharedMeter, TimeSwitchElement};
use emop::transaction::TransactionRunner;
use emop::transport::Transport;
use emop::{EmopError, ErrorKind};

/// Anything that can stop a command
enum Failure {
    Emop(EmopError),
    Output(serde_json::Error),
}

impl From<EmopError> for Failure {
    fn from(e: EmopError) -> Self {
        Self::Emop(e)
    }
}

impl From<emop::CodecError> for Failure {
    fn from(e: emop::CodecError) -> Self {
        Self::Emop(e.into())
    }
}

impl From<serde_json::Error> for Failure {
    fn from(e: serde_json::Error) -> Self {
        Self::Output(e)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Emop(e) => write!(f, "{}", e),
            Self::Output(e) => write!(f, "cannot format output: {}", e),
        }
    }
}

impl Failure {
    fn exit_code(&self) -> ExitCode {
        let code = match self {
            Self::Emop(e) => match e.kind() {
                ErrorKind::InvalidArgument => 2,
                ErrorKind::Config => 3,
                ErrorKind::Connection | ErrorKind::Busy => 4,
                ErrorKind::Protocol => 5,
            },
            Self::Output(_) => 1,
        };
        ExitCode::from(code)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match config::load(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            let failure = Failure::from(e);
            eprintln!("error: {}", failure);
            return failure.exit_code();
        }
    };

    let config = loaded.config;
    logging::init_tracing(logging::level_for_verbosity(&config.logging.level, cli.verbose));
    if let Some(path) = &loaded.path {
        debug!("loaded config from {}", path.display());
    }
    for warning in &loaded.warnings {
        warn!("{}", warning);
    }

    match run(cli, config) {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                let failure = Failure::from(e);
                eprintln!("error: {}", failure);
                failure.exit_code()
            }
        },
        Err(failure) => {
            eprintln!("error: {}", failure);
            failure.exit_code()
        }
    }
}

fn run(cli: Cli, mut config: Config) -> Result<Value, Failure> {
    if let Some(host) = cli.host {
        config.meter.host = Some(host);
    }
    if let Some(port) = cli.port {
        config.meter.port = port;
    }

    if !cli.command.needs_meter() {
        return run_offline(cli.command);
    }

    let host = config.require_host()?;
    let runner = TransactionRunner::tcp(
        host,
        config.meter.port,
        config.tcp_settings(),
        config.runner_settings(),
    );
    let meter = SharedMeter::with_lock_timeout(MeterClient::new(runner), config.lock_timeout());
    debug!(endpoint = meter.endpoint(), "meter client ready");

    Ok(meter.with(|client| run_meter(client, cli.command))?)
}

// =============================================================================
// Meter commands
// =============================================================================

fn run_meter<T: Transport>(meter: &mut MeterClient<T>, command: Command) -> emop::Result<Value> {
    let output = match command {
        Command::Read { object } => {
            let record = meter.read_object(object)?;
            json!({ "object": registry::name_of(object), "record": record })
        }
        Command::Write { object, payload } => {
            let response = meter.write_object(object, &payload.0)?;
            json!({ "object": registry::name_of(object), "response": hex::encode(response) })
        }
        Command::SendRaw { data_field } => json!(hex::encode(meter.send_raw(&data_field.0)?)),

        Command::Serial => json!(meter.serial()?),
        Command::Hardware => json!(meter.hardware()?),
        Command::FirmwareVersion => json!(meter.firmware_version()?),
        Command::ClockTime => json!(meter.clock_time()?),
        Command::ClockTimeWrite => {
            let now = chrono::Utc::now();
            meter.clock_time_write(now)?;
            json!({ "written": now })
        }
        Command::Csq => json!(meter.csq()?),
        Command::InstantaneousVoltage => json!(meter.instantaneous_voltage()?),
        Command::ThreePhaseVoltage => json!(meter.three_phase_voltage()?),

        Command::PrepayBalance => json!(meter.prepay_balance()?),
        Command::PrepayEnabled => json!(meter.prepay_enabled()?),
        Command::PrepayEnabledWrite { enabled } => {
            meter.prepay_enabled_write(enabled)?;
            json!({ "prepay_enabled": enabled })
        }
        Command::PrepaySendToken { token } => {
            meter.prepay_send_token(&token)?;
            json!({ "token_sent": true })
        }
        Command::PrepayTransactionCount => json!(meter.prepay_transaction_count()?),
        Command::PrepayTransactionDetails => json!(meter.prepay_transaction_details()?),

        Command::TariffsActive { pricings } => {
            let mut output = json!(meter.tariffs_active()?);
            if pricings {
                output["pricings"] = json!(meter.tariffs_pricing_table(true)?);
            }
            output
        }
        Command::TariffsFuture { pricings } => {
            let mut output = json!(meter.tariffs_future()?);
            if pricings {
                output["pricings"] = json!(meter.tariffs_pricing_table(false)?);
            }
            output
        }
        Command::TariffsFutureWrite {
            from_ts,
            standing_charge,
            unit_rate,
            emergency_credit,
            ecredit_availability,
            debt_recovery_rate,
        } => {
            meter.tariffs_future_write(&FutureTariffs {
                activation: from_ts,
                standing_charge,
                unit_rate,
                emergency_credit,
                ecredit_availability,
                debt_recovery_rate,
            })?;
            json!(meter.tariffs_future()?)
        }
        Command::TariffsTimeSwitches { element } => {
            json!(hex::encode(meter.tariffs_time_switches(element.into())?))
        }
        Command::TariffsTimeSwitchesClear { element } => {
            meter.tariffs_time_switches_clear(element.into())?;
            json!({ "cleared": TimeSwitchElement::from(element).to_string() })
        }

        Command::ProfileLog { log, timestamp } => json!(meter.profile_log(log.into(), timestamp)?),

        Command::Objects | Command::DecodeRecord { .. } | Command::DecodeFrame { .. } => {
            return Err(EmopError::InvalidArgument {
                field: "command",
                reason: "offline command routed to a meter".into(),
            })
        }
    };
    Ok(output)
}

// =============================================================================
// Offline commands
// =============================================================================

fn run_offline(command: Command) -> Result<Value, Failure> {
    let output = match command {
        Command::Objects => {
            let objects: Vec<Value> = registry::OBJECTS
                .iter()
                .map(|e| {
                    json!({
                        "id": e.id,
                        "obis": e.id.to_triplet(),
                        "name": e.name,
                        "shape": e.shape.to_string(),
                    })
                })
                .collect();
            Value::Array(objects)
        }
        Command::DecodeRecord { object, payload } => {
            let record = codec::decode_payload(object, &payload.0)?;
            json!({ "object": registry::name_of(object), "record": record })
        }
        Command::DecodeFrame { frame, no_verify } => {
            let decoded = if no_verify {
                Frame::decode(&frame.0)?
            } else {
                Frame::decode_verified(&frame.0)?
            };
            serde_json::to_value(codec::FrameReport::new(decoded))?
        }
        _ => {
            return Err(EmopError::InvalidArgument {
                field: "command",
                reason: "command needs a meter".into(),
            }
            .into())
        }
    };
    Ok(output)
}
