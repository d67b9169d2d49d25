//! Property-based soundness tests.
//!
//! Run with: `cargo test --test property`

mod support;

mod pool;
