//! # Fleetgate Shared
//!
//! Wire types shared between the gateway and its clients.

pub mod dto;
pub mod response;

pub use dto::{RateLimitDenial, SlidingWindowDetails};
pub use response::{ApiResponse, ErrorResponse};
