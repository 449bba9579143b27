//! Local state: the persistent key-value store identity and entropy state live in.

pub mod local_state;
pub mod names;
