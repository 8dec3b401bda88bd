pub mod pro_forma;
pub mod sample;
