//! End-to-end session tests on the simulated bench.

mod common;
mod end_to_end_test;
mod handshake_test;
mod log_sink_test;
