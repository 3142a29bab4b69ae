//! Markdown rendering for chat replies.

pub mod generator;

pub use generator::*;
