//! Record data carried through bulk operations

pub mod instance;
pub mod value;

pub use instance::{Instance, RecordKey, RecordSet};
pub use value::{RecordRef, Value};
