//! # Plantwatch Core Types
//!
//! The plain data structures shared by every other crate in the workspace: the
//! plant and soil-reading records stored in PostgreSQL and the small enums that
//! describe them. Nothing in here performs I/O.

pub mod enums;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{IsolationLevel, PlantHealthStatus};
pub use structs::{NewPlant, NewSoilReading, Page, Plant, PlantFilter, SoilData};
