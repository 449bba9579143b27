//! Session stability tracking.

pub mod clean_exit_beacon;
