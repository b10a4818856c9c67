//! Protocol and client constants
//!
//! Centralized constants to avoid duplication and ensure consistency.

// =============================================================================
// Frame Layout
// =============================================================================

/// First byte of every EMOP frame
pub const FRAME_DELIMITER: u8 = 0x7E;

/// Bytes counted by `frame_length` that are not data field:
/// length (1) + destination (4) + source (4) + control (1) + crc (2)
pub const FRAME_OVERHEAD: usize = 12;

/// Bytes before the data field, delimiter included
pub const FRAME_HEADER_LEN: usize = 11;

/// Trailing checksum size
pub const FRAME_CRC_LEN: usize = 2;

/// Default data field header: format (1) + object id (3) + read/write flag (1)
pub const DEFAULT_RECORD_HEADER_LEN: usize = 5;

/// Profile log data field header: format (1) + timestamp (4)
pub const PROFILE_LOG_HEADER_LEN: usize = 5;

/// Size of the profile log response block
pub const PROFILE_LOG_PAYLOAD_LEN: usize = 80;

// =============================================================================
// Addressing
// =============================================================================

/// Device type used for both ends of a request
pub const DEFAULT_DEVICE_TYPE: u8 = 0x00;

/// Destination address used for requests (meters accept any)
pub const DEFAULT_DESTINATION_ADDRESS: u32 = 0x000000;

/// Source address stamped on requests
pub const DEFAULT_SOURCE_ADDRESS: u32 = 2_207_298;

/// Control byte sent with every request in static sequence mode
pub const DEFAULT_CONTROL: u8 = 5;

// =============================================================================
// Network
// =============================================================================

/// Default TCP port of an Emlite meter modem
pub const DEFAULT_METER_PORT: u16 = 8080;

/// Connect timeout (seconds)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Read/write timeout (seconds)
pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 10;

/// Size of the single receive buffer per exchange
pub const DEFAULT_READ_BUFFER_SIZE: usize = 128;

/// Environment override for both socket timeouts (seconds)
pub const ENV_TIMEOUT_SECONDS: &str = "EMLITE_TIMEOUT_SECONDS";

/// Environment override for the meter host
pub const ENV_HOST: &str = "EMLITE_HOST";

/// Environment override for the meter port
pub const ENV_PORT: &str = "EMLITE_PORT";

/// Environment override for the config file location
pub const ENV_CONFIG: &str = "EMOP_CONFIG";

// =============================================================================
// Configuration / Logging
// =============================================================================

/// Config file looked up next to the executable, then in the working directory
pub const CONFIG_FILE_NAME: &str = "emop.toml";

/// Log level when neither the config nor `RUST_LOG` sets one
pub const DEFAULT_LOG_LEVEL: &str = "info";

// =============================================================================
// Retry / Pacing
// =============================================================================

/// Attempts per exchange (first try included)
pub const MAX_EXCHANGE_ATTEMPTS: u32 = 3;

/// Minimum gap between two requests to the same meter (milliseconds)
pub const MIN_REQUEST_INTERVAL_MS: u64 = 2000;

/// How long to wait for another caller to release a meter (seconds)
pub const METER_LOCK_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// Values
// =============================================================================

/// Wire integer units per currency unit (five decimal places)
pub const AMOUNT_SCALE: i64 = 100_000;

/// Decimal places carried by an amount
pub const AMOUNT_DECIMALS: u32 = 5;

/// Meter epoch (2000-01-01T00:00:00Z) as Unix seconds
pub const METER_EPOCH_UNIX_SECS: i64 = 946_684_800;

/// Prepay mode can only be switched on above this balance
pub const PREPAY_ENABLE_MIN_BALANCE_RAW: i64 = 10 * AMOUNT_SCALE;

/// Length of a prepay top-up token
pub const PREPAY_TOKEN_LEN: usize = 20;
