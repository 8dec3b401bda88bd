pub mod amortization;
pub mod engine;
pub mod operations;
pub mod returns;
pub mod sale;

pub use engine::{model_pro_forma, run, validate, ProFormaInput, ProFormaOutput};
