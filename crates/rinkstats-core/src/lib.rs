// Library root: loader, metric deriver, and the pipeline that composes them.
// The rendering layer consumes the enriched `Table` this crate produces.

pub mod config;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod pipeline;
pub mod selection;
pub mod store;
pub mod table;

pub use error::StatsError;
pub use table::{Table, Value};
