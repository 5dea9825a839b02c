//! Core types, scoring components and the storage trait for the Assay
//! multi-rater scoring engine.
//!
//! Every computation in this crate is a pure function of its inputs plus an
//! explicit `as_of` instant where time matters. Persistence lives behind
//! [`store::AssessmentStore`]; this crate has no database or runtime
//! dependencies.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod audit;
pub mod band;
pub mod catalog;
pub mod confidence;
pub mod config;
pub mod digest;
pub mod drift;
pub mod error;
pub mod evidence;
pub mod gap;
pub mod rating;
pub mod record;
pub mod score;
pub mod store;

pub use error::{Degradation, Error, Result};
