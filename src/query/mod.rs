pub mod builder;
pub mod criteria;
pub mod streaming;

pub use builder::{Query, QueryBuilder};
pub use criteria::{Comparison, Criteria, Direction, Expr, OrderBy};
pub use streaming::{StreamRow, StreamingResult};
