//! BLP Monitor: a Bell–LaPadula mandatory access control reference monitor.
//!
//! Subjects and objects carry security labels. The kernel decides every
//! read and write against the simple-security and star properties, under
//! one of three label-mutation modes. A thin TCP server exposes the
//! dispatcher as line-delimited JSON and persists labels through a
//! pluggable store.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod kernel;
pub mod logging;
pub mod server;
pub mod store;
