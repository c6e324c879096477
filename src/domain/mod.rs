mod claude;
mod codex;
mod merge;
mod parse;
mod query;
mod types;

pub use claude::*;
pub use codex::*;
pub use merge::*;
pub use parse::*;
pub use query::*;
pub use types::*;

#[cfg(test)]
pub(crate) use merge::tests::summary as test_summary;
