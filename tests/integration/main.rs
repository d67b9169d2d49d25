//! End-to-end scenarios: pool contention, tiny-chunk streams, async moves.
//!
//! Run with: `cargo test --test integration`

mod support;

mod pool_contention;
mod stream_scenarios;
