pub mod query;
pub mod reconcile;
pub mod tagger;

pub use query::QueryEngine;
pub use tagger::{TagOutcome, Tagger};
