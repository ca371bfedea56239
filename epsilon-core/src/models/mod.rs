pub mod exchange;
pub mod rows;
pub mod schema;
pub mod tool_call;

pub use exchange::Exchange;
pub use rows::{Cell, QueryRows};
pub use schema::{ColumnInfo, SchemaReport, TableSchema};
pub use tool_call::{ToolCall, ToolName};
