//! Integration test crate for the tether stack.
//!
//! This crate has no library code — it only contains integration tests
//! that exercise end-to-end flows across multiple workspace crates:
//! pairing over a scripted GATT peripheral, encrypted sessions, and
//! calendar synchronization between two in-process peers.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p tether-integration-tests
//! ```
