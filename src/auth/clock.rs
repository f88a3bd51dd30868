use chrono::{DateTime, Utc};

/// 2023-01-01T00:00:00Z. A clock reading earlier than this has not been set
/// by time synchronization yet.
pub const SYNC_THRESHOLD_UNIX: i64 = 1_672_531_200;

/// Source of wall-clock time for token signing and event timestamps.
pub trait WallClock {
    fn now(&self) -> DateTime<Utc>;

    /// Whether the clock has been synchronized and can be used for signing.
    fn is_trustworthy(&self) -> bool {
        self.now().timestamp() >= SYNC_THRESHOLD_UNIX
    }
}

/// The host system clock, kept in sync by the OS time service.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
