mod cache;
mod config;
mod source_index;
mod summarize;
mod transcript;
mod unified;
mod watch;
mod worker;

pub use cache::*;
pub use config::*;
pub use source_index::*;
pub use summarize::*;
pub use transcript::*;
pub use unified::*;
pub use watch::*;
pub use worker::*;
