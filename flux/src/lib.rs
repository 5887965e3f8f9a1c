//! Shared ambient-stack helpers used by `relay`: logging setup lives here.
//! No networking code lives in this crate.

pub mod logging;

pub use slog;
