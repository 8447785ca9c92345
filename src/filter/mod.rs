pub mod aggregate;
pub mod error;
pub mod filter;
pub mod filter_order;
pub mod filter_where;
pub mod params;
pub mod types;

pub use aggregate::{Accumulator, Aggregation, GroupKey};
pub use error::FilterError;
pub use filter::Filter;
pub use params::QueryParams;
pub use types::*;
