//! Structured JSONL event log and the in-process histogram recorder.

pub mod histograms;
pub mod jsonl;
