use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid client identifier: {0}")]
    InvalidClientId(String),
}

pub type Result<T> = std::result::Result<T, Error>;
