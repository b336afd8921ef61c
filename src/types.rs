use crate::error::MicroError;

pub type MicroResult = Result<(), MicroError>;
