//! EMOP client for Emlite smart meters
//!
//! Layers, bottom up:
//! - [`codec`]: frames, data fields and typed records (pure, no I/O)
//! - [`transport`]: one request/response exchange per TCP connection
//! - [`transaction`]: retries, pacing and response verification
//! - [`meter`]: typed calls (serial, clock, prepay, tariffs)
//!
//! ```ignore
//! use emop::meter::MeterClient;
//! use emop::transaction::{RunnerSettings, TransactionRunner};
//! use emop::transport::TcpSettings;
//!
//! let runner = TransactionRunner::tcp("10.0.0.5", 8080, TcpSettings::default(), RunnerSettings::default());
//! let mut meter = MeterClient::new(runner);
//! println!("{}", meter.serial()?);
//! ```

pub mod amount;
pub mod cli;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod meter;
pub mod timestamp;
pub mod transaction;
pub mod transport;

pub use amount::Amount;
pub use error::{CodecError, EmopError, ErrorKind, Result};
pub use meter::{MeterClient, SharedMeter};
pub use transaction::TransactionRunner;
