//! Domain types - rate limit keys and window state.

mod key;
mod window;

pub use key::{RateLimitKey, SubjectId, escape_pattern};
pub use window::{
    CheckOutcome, WindowReading, WindowSnapshot, average_interval, retry_after_secs,
    window_millis,
};
