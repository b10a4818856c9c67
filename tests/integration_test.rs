//! Integration tests for meter sessions
//!
//! Drives the public client API against a simulated meter, either through an
//! in-process transport or a loopback TCP listener.

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use emop::codec::{
    registry, DataField, DefaultRecord, Frame, ObjectId, ProfileLogFormat, ProfileLogRecord,
    ReadWrite, Record,
};
use emop::error::Phase;
use emop::meter::{FutureTariffs, Hardware, MeterClient, SharedMeter, TimeSwitchElement};
use emop::transaction::{RunnerSettings, SequenceMode, TransactionRunner, TransactionState};
use emop::transport::{Progress, TcpSettings, Transport};
use emop::{Amount, CodecError, EmopError, ErrorKind};

// =============================================================================
// Simulated meter
// =============================================================================

/// One-shot misbehaviour applied to the next exchange
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Refuse,
    Truncate(usize),
    CorruptCrc,
}

/// Object store answering EMOP requests the way a meter does
#[derive(Default)]
pub struct SimMeter {
    objects: HashMap<ObjectId, Vec<u8>>,
    /// Objects whose replies are cut one byte short
    short: HashSet<ObjectId>,
    faults: VecDeque<Fault>,
    requests: Vec<Frame>,
    writes: Vec<(String, Vec<u8>)>,
}

fn id(name: &str) -> ObjectId {
    registry::by_name(name)
        .unwrap_or_else(|| panic!("unknown object {}", name))
        .id
}

impl SimMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, payload: &[u8]) -> Self {
        self.objects.insert(id(name), payload.to_vec());
        self
    }

    pub fn short_reply(mut self, name: &str) -> Self {
        self.short.insert(id(name));
        self
    }

    pub fn fault(mut self, fault: Fault) -> Self {
        self.faults.push_back(fault);
        self
    }

    pub fn requests(&self) -> &[Frame] {
        &self.requests
    }

    pub fn writes(&self) -> &[(String, Vec<u8>)] {
        &self.writes
    }

    fn respond(
        &mut self,
        request: &[u8],
        progress: &mut dyn FnMut(Progress),
    ) -> emop::Result<Bytes> {
        let fault = self.faults.pop_front();
        if matches!(fault, Some(Fault::Refuse)) {
            return Err(EmopError::Transport {
                endpoint: "sim".into(),
                phase: Phase::Connect,
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }
        progress(Progress::Connected);
        progress(Progress::Sending);
        progress(Progress::AwaitingResponse);

        let frame = Frame::decode_verified(request).expect("client sent an invalid frame");
        self.requests.push(frame.clone());

        let data = match &frame.data {
            DataField::Default(rec) => {
                let payload = match rec.read_write {
                    ReadWrite::Write => {
                        self.writes
                            .push((registry::name_of(rec.object_id), rec.payload.to_vec()));
                        self.objects.insert(rec.object_id, rec.payload.to_vec());
                        Bytes::new()
                    }
                    ReadWrite::Read => {
                        let mut payload =
                            self.objects.get(&rec.object_id).cloned().unwrap_or_default();
                        if self.short.contains(&rec.object_id) {
                            payload.pop();
                        }
                        Bytes::from(payload)
                    }
                };
                DataField::Default(DefaultRecord {
                    object_id: rec.object_id,
                    read_write: rec.read_write,
                    payload,
                })
            }
            DataField::ProfileLog { log, record } => DataField::ProfileLog {
                log: *log,
                record: ProfileLogRecord {
                    timestamp: record.timestamp,
                    payload: Some(Box::new([0xab; 80])),
                },
            },
        };

        let reply = Frame::new(frame.source, frame.destination, frame.control, data)?.encode()?;
        Ok(match fault {
            Some(Fault::Truncate(len)) => reply.slice(..len.min(reply.len())),
            Some(Fault::CorruptCrc) => {
                let mut bytes = reply.to_vec();
                if let Some(last) = bytes.last_mut() {
                    *last ^= 0xff;
                }
                Bytes::from(bytes)
            }
            _ => reply,
        })
    }
}

// =============================================================================
// Mock Transport
// =============================================================================

/// In-process transport backed by a shared `SimMeter`
#[derive(Clone)]
pub struct MockTransport {
    meter: Arc<Mutex<SimMeter>>,
}

impl MockTransport {
    pub fn new(meter: SimMeter) -> Self {
        Self {
            meter: Arc::new(Mutex::new(meter)),
        }
    }

    pub fn meter(&self) -> parking_lot::MutexGuard<'_, SimMeter> {
        self.meter.lock()
    }
}

impl Transport for MockTransport {
    fn exchange_with(
        &mut self,
        request: &[u8],
        progress: &mut dyn FnMut(Progress),
    ) -> emop::Result<Bytes> {
        self.meter.lock().respond(request, progress)
    }

    fn endpoint(&self) -> String {
        "mock".into()
    }
}

fn fast_settings() -> RunnerSettings {
    RunnerSettings {
        min_request_interval: Duration::ZERO,
        ..RunnerSettings::default()
    }
}

fn mock_client(meter: SimMeter) -> (MeterClient<MockTransport>, MockTransport) {
    let transport = MockTransport::new(meter);
    let runner = TransactionRunner::new(transport.clone(), fast_settings());
    (MeterClient::new(runner), transport)
}

// =============================================================================
// Loopback TCP meter
// =============================================================================

/// Serve `connections` exchanges on 127.0.0.1, one per connection
fn spawn_tcp_meter(meter: SimMeter, connections: usize) -> (u16, JoinHandle<SimMeter>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = std::thread::spawn(move || {
        let mut meter = meter;
        for _ in 0..connections {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 256];
            let n = conn.read(&mut buf).unwrap();
            if let Ok(reply) = meter.respond(&buf[..n], &mut |_| {}) {
                conn.write_all(&reply).unwrap();
            }
        }
        meter
    });
    (port, handle)
}

fn tcp_client(port: u16) -> MeterClient {
    let tcp = TcpSettings {
        connect_timeout: Duration::from_secs(2),
        io_timeout: Duration::from_secs(2),
        ..TcpSettings::default()
    };
    MeterClient::new(TransactionRunner::tcp("127.0.0.1", port, tcp, fast_settings()))
}

// =============================================================================
// Tests: typed reads
// =============================================================================

#[test]
fn test_serial_read_sends_canonical_request() {
    let (mut client, transport) = mock_client(SimMeter::new().with("serial", b"EML2137580761   "));

    assert_eq!(client.serial().unwrap(), "EML2137580761");

    let sim = transport.meter();
    let request = sim.requests()[0].encode().unwrap();
    assert_eq!(hex::encode(request), "7e11000000000021ae42050160010000c02f");
}

#[test]
fn test_identity_and_clock_over_tcp() {
    let sim = SimMeter::new()
        .with("serial", b"EML2137580761   ")
        .with("hardware_version", b"6Ab\0")
        .with("firmware_version", b"0142")
        .with("time", &[24, 4, 24, 0, 17, 4, 2])
        .with("prepay_balance", &hex::decode("e0930400").unwrap())
        .with("csq_net_op", &[0x30]);
    let (port, server) = spawn_tcp_meter(sim, 6);

    let mut client = tcp_client(port);
    assert_eq!(client.serial().unwrap(), "EML2137580761");
    assert_eq!(client.hardware().unwrap(), Hardware::SinglePhase("6Ab".into()));
    assert_eq!(client.firmware_version().unwrap(), "01.42");
    assert_eq!(
        client.clock_time().unwrap(),
        Utc.with_ymd_and_hms(2024, 4, 24, 0, 17, 4).unwrap()
    );
    assert_eq!(client.prepay_balance().unwrap(), Amount::from_raw(300_000));
    let quality = client.csq().unwrap();
    assert_eq!(quality.csq, 16);
    assert_eq!(quality.network_operator, 1);
    assert_eq!(
        client.runner().transitions(),
        [
            TransactionState::Connecting,
            TransactionState::Connected,
            TransactionState::Sending,
            TransactionState::AwaitingResponse,
            TransactionState::Done,
        ]
    );

    let sim = server.join().unwrap();
    assert_eq!(sim.requests().len(), 6);
}

#[test]
fn test_clock_read_survives_odd_day_byte() {
    let (mut client, _) = mock_client(SimMeter::new().with("time", &[24, 4, 24, 0, 17, 4, 0x0f]));
    assert_eq!(
        client.clock_time().unwrap(),
        Utc.with_ymd_and_hms(2024, 4, 24, 0, 17, 4).unwrap()
    );
}

#[test]
fn test_blank_hardware_means_three_phase() {
    let (mut client, _) = mock_client(SimMeter::new().with("hardware_version", b"\0\0\0"));
    assert_eq!(client.hardware().unwrap(), Hardware::ThreePhase);
}

#[test]
fn test_three_phase_voltage_tolerates_short_phases() {
    let sim = SimMeter::new()
        .with("three_phase_instantaneous_voltage_l1", &2401u16.to_le_bytes())
        .with("three_phase_instantaneous_voltage_l2", &2399u16.to_le_bytes())
        .with("three_phase_instantaneous_voltage_l3", &2405u16.to_le_bytes())
        .short_reply("three_phase_instantaneous_voltage_l2");
    let (mut client, transport) = mock_client(sim);

    let voltages = client.three_phase_voltage().unwrap();
    assert!((voltages.l1 - 240.1).abs() < 1e-9);
    assert_eq!(voltages.l2, None);
    assert!((voltages.l3.unwrap() - 240.5).abs() < 1e-9);

    // A short payload is not a transport problem: one request per phase
    assert_eq!(transport.meter().requests().len(), 3);
}

#[test]
fn test_short_l1_is_an_error() {
    let sim = SimMeter::new()
        .with("three_phase_instantaneous_voltage_l1", &2401u16.to_le_bytes())
        .short_reply("three_phase_instantaneous_voltage_l1");
    let (mut client, _) = mock_client(sim);

    let err = client.three_phase_voltage().unwrap_err();
    assert!(err.is_truncation());
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[test]
fn test_profile_log_round_trip() {
    let (mut client, transport) = mock_client(SimMeter::new());
    let at = Utc.with_ymd_and_hms(2024, 4, 24, 0, 17, 4).unwrap();

    let record = client.profile_log(ProfileLogFormat::First, at).unwrap();
    assert_eq!(record.timestamp, emop::timestamp::to_meter_seconds(&at).unwrap());
    assert_eq!(record.payload.as_deref().map(|p| p[0]), Some(0xab));

    let sim = transport.meter();
    assert!(matches!(
        sim.requests()[0].data,
        DataField::ProfileLog { log: ProfileLogFormat::First, .. }
    ));
}

// =============================================================================
// Tests: writes
// =============================================================================

#[test]
fn test_tariffs_future_write_sequence() {
    let (mut client, transport) = mock_client(SimMeter::new());
    let tariffs = FutureTariffs {
        activation: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        standing_charge: "0.6".parse().unwrap(),
        unit_rate: "0.2345".parse().unwrap(),
        emergency_credit: Amount::ZERO,
        ecredit_availability: Amount::ZERO,
        debt_recovery_rate: Amount::ZERO,
    };

    client.tariffs_future_write(&tariffs).unwrap();

    let sim = transport.meter();
    let names: Vec<&str> = sim.writes().iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        [
            "tariff_future_threshold_mask",
            "tariff_future_threshold_values",
            "tariff_future_tou_flag",
            "tariff_future_block_8_rate_1",
            "tariff_future_element_b_tou_rate_1",
            "tariff_future_prepayment_emergency_credit",
            "tariff_future_prepayment_ecredit_availability",
            "tariff_future_prepayment_debt_recovery_rate",
            "tariff_future_gas",
            "tariff_future_standing_charge",
            "tariff_future_activation_datetime",
        ]
    );

    let payload = |name: &str| {
        sim.writes()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| hex::encode(p))
            .unwrap()
    };
    assert_eq!(payload("tariff_future_threshold_values"), "00".repeat(14));
    assert_eq!(payload("tariff_future_block_8_rate_1"), "9a5b0000");
    assert_eq!(payload("tariff_future_element_b_tou_rate_1"), "9a5b0000");
    assert_eq!(payload("tariff_future_standing_charge"), "60ea0000");
    assert_eq!(payload("tariff_future_activation_datetime"), "8042c42d");
}

#[test]
fn test_tariffs_future_write_rejects_rate_before_writing() {
    let (mut client, transport) = mock_client(SimMeter::new());
    let tariffs = FutureTariffs {
        activation: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        standing_charge: "0.6".parse().unwrap(),
        unit_rate: "1.5".parse().unwrap(),
        emergency_credit: Amount::ZERO,
        ecredit_availability: Amount::ZERO,
        debt_recovery_rate: Amount::ZERO,
    };

    let err = client.tariffs_future_write(&tariffs).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(transport.meter().requests().is_empty());
}

#[test]
fn test_prepay_enable_needs_balance() {
    let low = 9 * 100_000i32;
    let (mut client, transport) =
        mock_client(SimMeter::new().with("prepay_balance", &low.to_le_bytes()));

    let err = client.prepay_enabled_write(true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(transport.meter().writes().is_empty());

    // Disabling never checks the balance
    client.prepay_enabled_write(false).unwrap();
    assert_eq!(
        transport.meter().writes(),
        &[("prepay_enabled_flag".to_string(), vec![0x00])]
    );
}

#[test]
fn test_prepay_enable_with_enough_balance() {
    let balance = 10 * 100_000i32;
    let (mut client, transport) = mock_client(
        SimMeter::new()
            .with("prepay_balance", &balance.to_le_bytes())
            .with("prepay_enabled_flag", &[0x00]),
    );

    client.prepay_enabled_write(true).unwrap();
    assert!(client.prepay_enabled().unwrap());
    assert_eq!(transport.meter().requests().len(), 3);
}

#[test]
fn test_prepay_token_is_sent_as_ascii() {
    let (mut client, transport) = mock_client(SimMeter::new());

    client.prepay_send_token("12345678901234567890").unwrap();
    assert_eq!(
        transport.meter().writes()[0],
        ("prepay_token_send".to_string(), b"12345678901234567890".to_vec())
    );

    assert!(client.prepay_send_token("1234").is_err());
    assert_eq!(transport.meter().writes().len(), 1);
}

#[test]
fn test_time_switches_clear_and_read_back() {
    let (mut client, transport) = mock_client(
        SimMeter::new().with("tariff_time_switch_element_b", &[0x11; 80]),
    );

    assert_eq!(client.tariffs_time_switches(TimeSwitchElement::B).unwrap(), vec![0x11; 80]);
    client.tariffs_time_switches_clear(TimeSwitchElement::B).unwrap();
    assert_eq!(client.tariffs_time_switches(TimeSwitchElement::B).unwrap(), vec![0u8; 80]);

    let sim = transport.meter();
    assert_eq!(sim.writes()[0].0, "tariff_time_switch_element_b");
}

#[test]
fn test_clock_write_round_trips_through_meter() {
    let (mut client, _) = mock_client(SimMeter::new());
    let at = Utc.with_ymd_and_hms(2024, 4, 24, 0, 17, 4).unwrap();

    client.clock_time_write(at).unwrap();
    assert_eq!(client.clock_time().unwrap(), at);
}

// =============================================================================
// Tests: transaction behaviour
// =============================================================================

#[test]
fn test_retry_recovers_from_refused_connection() {
    let sim = SimMeter::new()
        .with("serial", b"EML2137580761   ")
        .fault(Fault::Refuse)
        .fault(Fault::Refuse);
    let (mut client, transport) = mock_client(sim);

    assert_eq!(client.serial().unwrap(), "EML2137580761");
    assert_eq!(transport.meter().requests().len(), 1);
    assert_eq!(
        client.runner().transitions(),
        [
            TransactionState::Connecting,
            TransactionState::Connecting,
            TransactionState::Connecting,
            TransactionState::Connected,
            TransactionState::Sending,
            TransactionState::AwaitingResponse,
            TransactionState::Done,
        ]
    );
}

#[test]
fn test_corrupt_crc_is_retried() {
    let sim = SimMeter::new()
        .with("serial", b"EML2137580761   ")
        .fault(Fault::CorruptCrc);
    let (mut client, transport) = mock_client(sim);

    assert_eq!(client.serial().unwrap(), "EML2137580761");
    assert_eq!(transport.meter().requests().len(), 2);
}

#[test]
fn test_truncated_frame_is_not_retried() {
    let sim = SimMeter::new()
        .with("serial", b"EML2137580761   ")
        .fault(Fault::Truncate(10));
    let (mut client, transport) = mock_client(sim);

    let err = client.serial().unwrap_err();
    assert!(matches!(err, EmopError::Codec(CodecError::TruncatedPayload { .. })));
    assert_eq!(transport.meter().requests().len(), 1);
}

#[test]
fn test_alternating_sequence_bit() {
    let transport = MockTransport::new(SimMeter::new().with("prepay_enabled_flag", &[1]));
    let settings = RunnerSettings {
        sequence: SequenceMode::Alternating,
        ..fast_settings()
    };
    let mut client = MeterClient::new(TransactionRunner::new(transport.clone(), settings));

    for _ in 0..3 {
        client.prepay_enabled().unwrap();
    }
    let controls: Vec<u8> = transport.meter().requests().iter().map(|f| f.control).collect();
    assert_eq!(controls, [0x05, 0x04, 0x05]);
}

#[test]
fn test_unknown_object_reads_as_raw_bytes() {
    let unknown = ObjectId::from_u24(0xabcdef);
    let mut sim = SimMeter::new();
    sim.objects.insert(unknown, vec![1, 2, 3]);
    let (mut client, _) = mock_client(sim);

    assert_eq!(client.read_object(unknown).unwrap(), Record::Block(vec![1, 2, 3]));
}

#[test]
fn test_send_raw_data_field() {
    let (mut client, transport) = mock_client(SimMeter::new().with("serial", b"EML2137580761   "));

    let payload = client.send_raw(&hex::decode("0160010000").unwrap()).unwrap();
    assert_eq!(&payload[..], b"EML2137580761   ");
    assert_eq!(transport.meter().requests().len(), 1);
}

#[test]
fn test_refused_tcp_port_is_connection_failure() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut client = tcp_client(port);

    match client.serial() {
        Err(EmopError::ConnectionFailure { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected connection failure, got {:?}", other),
    }
}

#[test]
fn test_tcp_pacing_spaces_requests() {
    let sim = SimMeter::new().with("prepay_enabled_flag", &[1]);
    let (port, server) = spawn_tcp_meter(sim, 2);
    let settings = RunnerSettings {
        min_request_interval: Duration::from_millis(100),
        ..RunnerSettings::default()
    };
    let mut client = MeterClient::new(TransactionRunner::tcp(
        "127.0.0.1",
        port,
        TcpSettings::default(),
        settings,
    ));

    let started = std::time::Instant::now();
    client.prepay_enabled().unwrap();
    client.prepay_enabled().unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));
    server.join().unwrap();
}

// =============================================================================
// Tests: shared access
// =============================================================================

#[test]
fn test_shared_meter_serializes_threads() {
    let (client, transport) = mock_client(SimMeter::new().with("serial", b"EML2137580761   "));
    let shared = SharedMeter::new(client);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let shared = shared.clone();
            std::thread::spawn(move || shared.with(|c| c.serial()).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), "EML2137580761");
    }
    assert_eq!(transport.meter().requests().len(), 4);
}

#[test]
fn test_shared_meter_reports_busy() {
    let (client, _) = mock_client(SimMeter::new());
    let shared = SharedMeter::with_lock_timeout(client, Duration::from_millis(20));
    let other = shared.clone();

    let err = shared
        .with(|_| Ok(other.with(|_| Ok(())).unwrap_err()))
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Busy);
}

// =============================================================================
// Tests: offline decoding
// =============================================================================

#[test]
fn test_decode_captured_firmware_frame() {
    let bytes = hex::decode("7E15C06F0093000018B0010100020100333032309DBD").unwrap();
    let frame = Frame::decode_verified(&bytes).unwrap();

    assert_eq!(frame.destination.address, [0x6f, 0x00, 0x93]);
    match &frame.data {
        DataField::Default(rec) => {
            assert_eq!(rec.object_id, id("firmware_version"));
            assert_eq!(&rec.payload[..], b"3020");
        }
        other => panic!("unexpected data field {:?}", other),
    }
    assert_eq!(frame.encode().unwrap().to_vec(), bytes);
}

#[test]
fn test_decode_data_field_vector() {
    let data = DataField::decode(&hex::decode("010002010033303230").unwrap()).unwrap();
    assert_eq!(
        data,
        DataField::Default(DefaultRecord {
            object_id: id("firmware_version"),
            read_write: ReadWrite::Read,
            payload: Bytes::from_static(b"3020"),
        })
    );
    let record = emop::codec::decode_payload(id("firmware_version"), &data.payload()).unwrap();
    assert_eq!(record, Record::Block(b"3020".to_vec()));
}
