//! Platform abstraction: capability flags and the machine identity signal.

pub mod pal;
