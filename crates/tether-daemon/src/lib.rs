//! Stack host library backing the `tether-daemon` binary.
//!
//! Platform embedders link this crate, construct a
//! [`Stack`](stack::Stack), and register their Bluetooth peripherals and
//! calendar provider against it; the bundled binary is the headless
//! reference host.

pub mod config;
pub mod events;
pub mod stack;
