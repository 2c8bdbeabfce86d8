use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("user does not exist")]
    UserNotFound,
    #[error("user exists")]
    UserExists,
    #[error("authentication failure")]
    AuthenticationFailed,
    #[error("no load transaction")]
    NoActiveTransaction,
    #[error("hashing error: {0}")]
    Hashing(String),
    #[error("invalid username")]
    InvalidUsername,
    #[error("invalid password hash")]
    InvalidHash,
    #[error("backend i/o error")]
    Io(#[from] std::io::Error),
    #[error("credential store is closed")]
    Closed,
}

impl From<bcrypt::BcryptError> for Error {
    fn from(err: bcrypt::BcryptError) -> Self {
        Self::Hashing(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
