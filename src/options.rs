use std::{fmt, str::FromStr, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::error::LockError;

const LEASE_TTL_MIN: Duration = Duration::from_millis(100);
const RETRY_COUNT_MIN: usize = 1;
const RETRY_INTERVAL_MIN: Duration = Duration::from_millis(1);

const LEASE_TTL_DEFAULT: Duration = Duration::from_secs(1);
const RETRY_COUNT_DEFAULT: usize = 200;
const RETRY_INTERVAL_DEFAULT: Duration = Duration::from_millis(10);

/// Token shared by every reader unless a sub-group overrides it.
pub const DEFAULT_READER_TOKEN: &str = "read_c2d-75a1-4b5b-a6fb-b0754224c666";

/// Whether a pending writer blocks new readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// New readers are refused while a writer has announced intent.
    #[default]
    PreferWriter,
    /// Writer intent is ignored; readers keep joining. Writers may starve.
    PreferReader,
}

impl Mode {
    pub(crate) fn prefers_writer(self) -> bool {
        self == Mode::PreferWriter
    }
}

impl FromStr for Mode {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "prefer-writer" | "writer" => Ok(Mode::PreferWriter),
            "prefer-reader" | "reader" => Ok(Mode::PreferReader),
            _ => Err(LockError::UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::PreferWriter => f.write_str("prefer-writer"),
            Mode::PreferReader => f.write_str("prefer-reader"),
        }
    }
}

/// Options used to configure a [`Locker`](crate::Locker).
///
/// Out-of-range values are clamped, never rejected.
#[derive(Debug, Clone)]
pub struct Options {
    /// Lease duration of the lock record. Bounds how long a crashed holder
    /// blocks everyone else. The first attempt is made without waiting, so
    /// acquisition gives up after `(retry_count - 1) * retry_interval`; keep
    /// the TTL below that or legitimate holds will surface as timeouts.
    ///
    /// Minimum 100ms, default 1s.
    pub lease_ttl: Duration,

    /// Maximum acquisition attempts. Minimum 1, default 200.
    pub retry_count: usize,

    /// Pause between acquisition attempts. Minimum 1ms, default 10ms.
    pub retry_interval: Duration,

    /// Interrupts waits between attempts and stops lease renewal.
    pub cancellation: CancellationToken,

    /// Prefix for writer tokens, for debugging.
    pub app_id: String,

    /// Token shared by a reader group. Override to split readers into sub-groups.
    pub reader_token: String,

    /// Whether pending writer intent blocks new readers. Default prefer-writer.
    pub mode: Mode,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            lease_ttl: LEASE_TTL_DEFAULT,
            retry_count: RETRY_COUNT_DEFAULT,
            retry_interval: RETRY_INTERVAL_DEFAULT,
            cancellation: CancellationToken::new(),
            app_id: String::new(),
            reader_token: DEFAULT_READER_TOKEN.to_string(),
            mode: Mode::default(),
        }
    }
}

impl Options {
    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    pub fn with_retry_count(mut self, retry_count: usize) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn with_reader_token(mut self, reader_token: impl Into<String>) -> Self {
        self.reader_token = reader_token.into();
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Applies the floors and fills an empty reader token.
    pub fn normalized(mut self) -> Self {
        self.lease_ttl = self.lease_ttl.max(LEASE_TTL_MIN);
        self.retry_count = self.retry_count.max(RETRY_COUNT_MIN);
        self.retry_interval = self.retry_interval.max(RETRY_INTERVAL_MIN);
        if self.reader_token.is_empty() {
            self.reader_token = DEFAULT_READER_TOKEN.to_string();
        }
        self
    }

    /// Period between lease refreshes while the lock is held.
    pub(crate) fn renewal_interval(&self) -> Duration {
        self.lease_ttl / 2
    }
}
