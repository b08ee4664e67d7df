//! Columnar result frames.
//!
//! Query results are materialized fully in memory: one typed buffer per column,
//! filled row by row. There is no paging, so very large result sets are bounded
//! only by available memory.

pub mod buffer;
pub mod builder;

pub use buffer::{Cell, ColumnBuffer};
pub use builder::{Field, Frame, FrameBuilder, FrameMeta, RESPONSE_FRAME_NAME};
