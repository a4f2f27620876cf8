//! Utility modules: JSON/BSON conversion, numeric conversions, logging and query tracing.
pub mod json;
pub mod logger;
pub mod num;
pub mod qtrace;
