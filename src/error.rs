use std::{error::Error, fmt};

#[derive(Debug)]
pub struct MicroError {
    details: String,
}

impl MicroError {
    pub fn new(msg: &str) -> MicroError {
        MicroError {
            details: msg.to_string(),
        }
    }
}

impl fmt::Display for MicroError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.details)
    }
}

impl Error for MicroError {
    fn description(&self) -> &str {
        &self.details
    }
}

impl From<std::io::Error> for MicroError {
    fn from(e: std::io::Error) -> Self {
        MicroError::new(&e.to_string())
    }
}
