use chrono::{DateTime, Utc};

/// Trait for providing the current UTC time.
///
/// Verifiers take a single `now` per call, read once from this source, so
/// all time based checks of one token agree with each other.
pub trait Now: Send + Sync + 'static {
    /// Returns the current UTC time.
    fn now() -> DateTime<Utc>;
}

/// Implementation that returns the actual current system time.
#[derive(Debug, Clone, Default)]
pub struct SystemNow;

impl Now for SystemNow {
    fn now() -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;

    /// Unix timestamp of 2020-01-01 00:00:00 UTC.
    pub const MOCK_NOW: i64 = 1_577_836_800;

    /// Mock time provider for testing, pinned to [`MOCK_NOW`].
    #[derive(Debug, Clone, Default)]
    pub struct MockNow;

    impl Now for MockNow {
        fn now() -> DateTime<Utc> {
            DateTime::from_timestamp(MOCK_NOW, 0).unwrap_or_default()
        }
    }
}
