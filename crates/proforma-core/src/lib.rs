pub mod error;
pub mod proforma;
pub mod time_value;
pub mod types;

#[cfg(feature = "sample-data")]
pub mod sample_data;

pub use error::{ProFormaError, Stage};
pub use types::*;

pub type ProFormaResult<T> = Result<T, ProFormaError>;
