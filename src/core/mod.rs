pub mod convert;
pub mod etl;
pub mod extract;
pub mod load;
pub mod schema;
pub mod transform;
pub mod validator;

pub use crate::domain::model::{Batch, Partition, RawRecord, TypedRecord, TypedValue};
pub use crate::domain::ports::TableWriter;
pub use crate::utils::error::Result;
