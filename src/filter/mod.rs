// src/filter/mod.rs
//! Rule-based event admission
//!
//! - **EventFilter**: named include/exclude rules evaluated per event
//! - **predicates**: reusable predicate constructors, including a
//!   sliding-window rate limiter
//!
//! # Semantics
//!
//! ```text
//! passes(e) = (no include rules  OR  any include rule matches)
//!             AND NOT any exclude rule matches
//! ```

pub mod event_filter;
pub mod predicates;

pub use event_filter::{ComposeMode, EventFilter, FilterMode, FilterRule, Predicate};
pub use predicates::RateLimiter;
