//! Field trials, their parameters, and the entropy providers that
//! randomize them.

pub mod entropy_provider;
pub mod field_trial;
pub mod params;
pub mod switches;
