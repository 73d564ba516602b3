pub mod async_result;
pub mod column;
pub mod row;
pub mod table;
pub mod value;

pub use async_result::{completion, AsyncResult, AsyncResultHandler};
pub use column::{Column, IndexColumn, NullOrdering, SortType, DEFAULT_SELECTIVITY};
pub use row::{Row, RowKey, SearchRow};
pub use table::Table;
pub use value::{compare_values, Value};
