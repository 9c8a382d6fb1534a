/// Key under which the local identity record is persisted
pub const LOCAL_USER_KEY: &str = "localUser";

/// Prefix of the generated placeholder display name
pub const DEFAULT_NAME_PREFIX: &str = "User-";

/// Default relay WebSocket URL
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:3001";

/// Default HTTP base URL for file upload/download
pub const DEFAULT_HTTP_URL: &str = "http://127.0.0.1:3001";

/// Default UDP port of the LAN beacon channel
pub const DEFAULT_BEACON_PORT: u16 = 47474;

/// Maximum number of automatic reconnect attempts
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Base reconnect delay in milliseconds
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;

/// Upper bound of the reconnect delay in milliseconds
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 10_000;

/// Beacon heartbeat interval in milliseconds
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 3_000;

/// Relay device list refresh interval in milliseconds
pub const DEFAULT_DEVICE_REFRESH_INTERVAL_MS: u64 = 5_000;

/// A peer silent for longer than this is presumed offline (milliseconds)
pub const DEFAULT_STALENESS_THRESHOLD_MS: i64 = 10_000;

/// Maximum file size accepted for upload (10 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum characters per text message
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 1_000;

/// Upper bound on a single inbound frame in bytes (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
