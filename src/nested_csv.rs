//! The tabular side: tables built from flattened items, CSV rendering and CSV parsing.

pub mod options;
pub mod read;
pub mod table;
pub mod write;
