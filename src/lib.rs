//! Ratewindow - Fixed and Sliding Window Rate Limiting
//!
//! This crate decides, per request, whether a client may proceed under a
//! fixed-window or a sliding-window limit. All counter state lives in an
//! injected [`store::CounterStore`] with atomic increments and per-key
//! expiry, so window rollover needs no background work.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
