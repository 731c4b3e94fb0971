//! Measurement engine of the latency bench.
//!
//! Layered leaves first: [`spin`] waits, [`capture`] and [`channel`] talk to
//! the hardware traits, [`runner`] runs one device, [`session`] drives the
//! pass loop and writes to a [`sink`].

pub mod capture;
pub mod channel;
pub mod indicator;
pub mod runner;
pub mod session;
pub mod sink;
pub mod spin;

pub use capture::*;
pub use channel::*;
pub use indicator::*;
pub use runner::*;
pub use session::*;
pub use sink::*;
pub use spin::*;
