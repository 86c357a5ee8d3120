pub mod error;
pub mod types;
pub mod value;

pub use error::{OrmError, Result, StoreError, StoreResult};
pub use types::{EntityId, Row, row_delta};
pub use value::Value;
