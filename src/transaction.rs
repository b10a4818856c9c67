//! Request/response transactions
//!
//! A `TransactionRunner` owns the transport for one meter and turns a data
//! field into a verified response frame:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Sending -> AwaitingResponse -> Done
//!                                                                \-> Failed
//! ```
//!
//! - requests to the same meter are spaced by a minimum interval
//! - a failed exchange (socket error or corrupted frame) is retried on a
//!   fresh connection, up to the attempt budget, without delay
//! - a short reply is a decode failure and is not retried
//!
//! The runner takes `&mut self`: one transaction at a time per meter. Share
//! a meter between threads with [`crate::meter::SharedMeter`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, debug_span, info, info_span, trace, warn, Span};

use crate::codec::{
    self, AckNak, DataField, DefaultRecord, Frame, ObjectId, ProfileLogFormat, ProfileLogRecord,
    Record,
};
use crate::constants::{DEFAULT_CONTROL, MAX_EXCHANGE_ATTEMPTS, MIN_REQUEST_INTERVAL_MS};
use crate::error::{CodecError, EmopError, Result};
use crate::transport::{Progress, TcpSettings, TcpTransport, Transport};

// =============================================================================
// Settings
// =============================================================================

/// How the control byte of requests is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SequenceMode {
    /// Always send control byte 5
    #[default]
    Static,
    /// Toggle the sequence bit (bit 0) on every transaction
    Alternating,
}

/// Retry, pacing and verification policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Exchanges per transaction, first attempt included
    pub max_attempts: u32,
    /// Minimum gap between the end of one exchange and the next request
    pub min_request_interval: Duration,
    /// Reject replies whose CRC does not match
    pub verify_checksum: bool,
    pub sequence: SequenceMode,
    /// Give up on a transaction once this much time has passed
    pub deadline: Option<Duration>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_attempts: MAX_EXCHANGE_ATTEMPTS,
            min_request_interval: Duration::from_millis(MIN_REQUEST_INTERVAL_MS),
            verify_checksum: true,
            sequence: SequenceMode::Static,
            deadline: None,
        }
    }
}

/// Where the current (or last) transaction got to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Connecting,
    Connected,
    Sending,
    AwaitingResponse,
    Done,
    Failed,
}

impl From<Progress> for TransactionState {
    fn from(progress: Progress) -> Self {
        match progress {
            Progress::Connected => Self::Connected,
            Progress::Sending => Self::Sending,
            Progress::AwaitingResponse => Self::AwaitingResponse,
        }
    }
}

fn advance(
    state: &mut TransactionState,
    transitions: &mut Vec<TransactionState>,
    next: TransactionState,
) {
    trace!(from = ?*state, to = ?next, "transaction state");
    *state = next;
    transitions.push(next);
}

// =============================================================================
// Runner
// =============================================================================

/// Runs EMOP transactions against one meter
pub struct TransactionRunner<T: Transport = TcpTransport> {
    transport: T,
    settings: RunnerSettings,
    last_request: Option<Instant>,
    sequence_bit: u8,
    state: TransactionState,
    transitions: Vec<TransactionState>,
    failed_in: Option<TransactionState>,
    span: Span,
}

impl TransactionRunner<TcpTransport> {
    /// Runner over TCP with the given socket and retry settings
    pub fn tcp(host: &str, port: u16, tcp: TcpSettings, settings: RunnerSettings) -> Self {
        Self::new(TcpTransport::with_settings(host, port, tcp), settings)
    }
}

impl<T: Transport> TransactionRunner<T> {
    pub fn new(transport: T, settings: RunnerSettings) -> Self {
        let span = info_span!("meter", endpoint = %transport.endpoint());
        Self {
            transport,
            settings,
            last_request: None,
            sequence_bit: DEFAULT_CONTROL & 0x01,
            state: TransactionState::Idle,
            transitions: Vec::new(),
            failed_in: None,
            span,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// States entered by the last transaction, in order
    pub fn transitions(&self) -> &[TransactionState] {
        &self.transitions
    }

    /// State the last failed attempt had reached, if any attempt failed
    pub fn failed_in(&self) -> Option<TransactionState> {
        self.failed_in
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    /// When the last exchange finished
    pub fn last_request(&self) -> Option<Instant> {
        self.last_request
    }

    fn enter(&mut self, next: TransactionState) {
        advance(&mut self.state, &mut self.transitions, next);
    }

    fn next_control(&mut self) -> u8 {
        match self.settings.sequence {
            SequenceMode::Static => DEFAULT_CONTROL,
            SequenceMode::Alternating => {
                let control = (DEFAULT_CONTROL & !0x01) | self.sequence_bit;
                self.sequence_bit ^= 0x01;
                control
            }
        }
    }

    fn pace(&self) {
        if let Some(last) = self.last_request {
            let since = last.elapsed();
            if since < self.settings.min_request_interval {
                let wait = self.settings.min_request_interval - since;
                debug!(wait_ms = wait.as_millis() as u64, "pacing request");
                std::thread::sleep(wait);
            }
        }
    }

    fn parse_reply(&self, reply: &[u8]) -> std::result::Result<Frame, CodecError> {
        if self.settings.verify_checksum {
            Frame::decode_verified(reply)
        } else {
            Frame::decode(reply)
        }
    }

    /// Send `data` and return the parsed response frame
    ///
    /// # Errors
    ///
    /// - `ConnectionFailure` once every attempt hit a socket error
    /// - `Codec` for an undecodable reply (after retries for corruption)
    /// - `DeadlineExceeded` if the configured deadline ran out
    pub fn transact(&mut self, data: &DataField) -> Result<Frame> {
        let meter_span = self.span.clone();
        let _meter = meter_span.enter();
        let object = match data {
            DataField::Default(rec) => rec.object_id.to_string(),
            DataField::ProfileLog { record, .. } => format!("log@{}", record.timestamp),
        };
        let tx_span = debug_span!("transaction", format = ?data.format(), object = %object);
        let _tx = tx_span.enter();

        let control = self.next_control();
        let request = Frame::request(control, data.clone())?.encode()?;
        debug!(request = %hex::encode(&request), "request frame built");

        self.pace();

        let started = Instant::now();
        let attempts = self.settings.max_attempts.max(1);
        let mut last_err: Option<EmopError> = None;
        self.failed_in = None;
        self.transitions.clear();

        for attempt in 1..=attempts {
            if let Some(deadline) = self.settings.deadline {
                if started.elapsed() >= deadline {
                    self.enter(TransactionState::Failed);
                    return Err(EmopError::DeadlineExceeded {
                        endpoint: self.endpoint(),
                        elapsed: started.elapsed(),
                    });
                }
            }

            self.enter(TransactionState::Connecting);
            trace!(attempt, "exchange");
            let outcome = {
                let Self {
                    transport,
                    state,
                    transitions,
                    ..
                } = self;
                transport.exchange_with(&request, &mut |progress| {
                    advance(state, transitions, progress.into())
                })
            };
            self.last_request = Some(Instant::now());

            let reply = match outcome {
                Ok(reply) => reply,
                Err(e @ EmopError::Transport { .. }) => {
                    self.failed_in = Some(self.state);
                    warn!(attempt, state = ?self.state, error = %e, "exchange failed");
                    last_err = Some(e);
                    continue;
                }
                Err(e) => {
                    self.enter(TransactionState::Failed);
                    return Err(e);
                }
            };

            match self.parse_reply(&reply) {
                Ok(frame) => {
                    self.enter(TransactionState::Done);
                    info!(frame = %frame, "response frame parsed");
                    if frame.ack_nak() != AckNak::Ok {
                        warn!(code = frame.ack_nak_code(), "meter flagged response as nak");
                    }
                    return Ok(frame);
                }
                Err(e) if e.is_frame_corruption() => {
                    self.failed_in = Some(self.state);
                    warn!(attempt, error = %e, reply = %hex::encode(&reply), "corrupt response");
                    last_err = Some(e.into());
                }
                Err(e) => {
                    self.enter(TransactionState::Failed);
                    warn!(error = %e, reply = %hex::encode(&reply), "undecodable response");
                    return Err(e.into());
                }
            }
        }

        self.enter(TransactionState::Failed);
        match last_err {
            Some(e @ EmopError::Codec(_)) => Err(e),
            Some(e) => Err(EmopError::ConnectionFailure {
                endpoint: self.endpoint(),
                attempts,
                source: Box::new(e),
            }),
            None => Err(EmopError::ConnectionFailure {
                endpoint: self.endpoint(),
                attempts,
                source: Box::new(EmopError::invalid("max_attempts", "no attempt made")),
            }),
        }
    }

    /// Send a pre-built data field and return the response payload
    ///
    /// The bytes are parsed first, so a malformed field never reaches the
    /// meter.
    pub fn send_raw(&mut self, data_field: &[u8]) -> Result<Bytes> {
        let data = DataField::decode(data_field)?;
        Ok(self.transact(&data)?.data.payload())
    }

    /// Raw response payload of an object read
    pub fn read_payload(&mut self, id: ObjectId) -> Result<Bytes> {
        let frame = self.transact(&DataField::Default(DefaultRecord::read(id)))?;
        Ok(frame.data.payload())
    }

    /// Read an object and decode it with its registered shape
    pub fn read(&mut self, id: ObjectId) -> Result<Record> {
        let payload = self.read_payload(id)?;
        let record = codec::decode_payload(id, &payload)?;
        debug!(object = %codec::registry::name_of(id), record = ?record, "decoded");
        Ok(record)
    }

    /// Write raw payload bytes to an object, returning the response payload
    pub fn write(&mut self, id: ObjectId, payload: &[u8]) -> Result<Bytes> {
        let data = DataField::Default(DefaultRecord::write(id, Bytes::copy_from_slice(payload)));
        Ok(self.transact(&data)?.data.payload())
    }

    /// Encode `value` with the registered shape of `id` and write it
    pub fn write_record(&mut self, id: ObjectId, value: &Record) -> Result<()> {
        let payload = codec::encode_payload(id, value)?;
        self.write(id, &payload)?;
        Ok(())
    }

    /// Request a profile log entry
    ///
    /// # Errors
    ///
    /// `MalformedFrame` if the meter answers with a non profile log field.
    pub fn profile_log(&mut self, log: ProfileLogFormat, timestamp: u32) -> Result<ProfileLogRecord> {
        let request = DataField::ProfileLog {
            log,
            record: ProfileLogRecord {
                timestamp,
                payload: None,
            },
        };
        match self.transact(&request)?.data {
            DataField::ProfileLog { record, .. } => Ok(record),
            other => Err(CodecError::malformed(format!(
                "expected profile log response, got {:?} field",
                other.format()
            ))
            .into()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
