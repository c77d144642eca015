//! Validation of request and sample metadata before it reaches label generation and persistence.
//!
//! Records are handled as raw JSON objects: producers disagree on key names and nesting, so
//! every field is resolved through [`fields`] instead of a fixed struct.
pub mod checker;
pub mod fields;
pub mod report;
pub mod vocabulary;

pub use checker::{Classification, RequestChecker, SampleTally, Verdict};
pub use fields::Record;
pub use report::{ErrorDesc, ValidationReport};
