//! Serialization back to PDF bytes: incremental updates (C4) and full
//! single-generation rewrites (C5).

pub mod full;
pub mod incremental;

pub use full::write_full;
pub use incremental::write_incremental;
