//! Deterministic analysis tools.
//!
//! These run without an LLM: the investment heuristic, side-by-side
//! comparison and cross-sell suggestions.

pub mod comparison;
pub mod investment;
pub mod similar;

pub use comparison::{compare, Comparison};
pub use investment::{analyze, InvestmentAnalysis};
pub use similar::{find_similar, format_alternatives, SimilarCriteria};
