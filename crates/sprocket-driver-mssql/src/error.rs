//! SQL Server failures and their retry classification

use sprocket_core::{DriverError, FailureClass, SprocketError};

/// SQL Server error numbers that denote conditions expected to clear up:
/// deadlock victims, unavailable or throttled databases and broken transport.
pub const TRANSIENT_ERROR_NUMBERS: &[u32] = &[
    // deadlock victim
    1205,
    // cannot open database requested by the login
    4060,
    // Azure SQL service busy, unavailable or reconfiguring
    40197, 40501, 40613, 49918, 49919, 49920, 10928, 10929,
    // transport-level errors
    64, 233, 10053, 10054, 10060, 11001,
];

/// MS SQL Server connection errors
#[derive(Debug, thiserror::Error)]
pub enum MssqlConnectionError {
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Parameter discovery failed: {0}")]
    Discovery(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Tiberius error: {0}")]
    Tiberius(#[from] tiberius::error::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MssqlConnectionError {
    /// Server error number, when the server reported one.
    pub fn code(&self) -> Option<u32> {
        match self {
            MssqlConnectionError::Tiberius(tiberius::error::Error::Server(token)) => {
                Some(token.code())
            }
            _ => None,
        }
    }

    pub fn failure_class(&self) -> FailureClass {
        match self {
            MssqlConnectionError::Io(_)
            | MssqlConnectionError::ConnectionFailed(_)
            | MssqlConnectionError::ConnectionClosed => FailureClass::Transient,
            MssqlConnectionError::Tiberius(err) => classify(err),
            MssqlConnectionError::InvalidConnectionString(_)
            | MssqlConnectionError::Discovery(_)
            | MssqlConnectionError::TypeConversion(_) => FailureClass::Fatal,
        }
    }
}

/// Classify a tiberius failure.
pub fn classify(err: &tiberius::error::Error) -> FailureClass {
    match err {
        tiberius::error::Error::Server(token) => classify_code(token.code()),
        tiberius::error::Error::Io { .. } | tiberius::error::Error::Routing { .. } => {
            FailureClass::Transient
        }
        _ => FailureClass::Fatal,
    }
}

pub fn classify_code(code: u32) -> FailureClass {
    if TRANSIENT_ERROR_NUMBERS.contains(&code) {
        FailureClass::Transient
    } else {
        FailureClass::Fatal
    }
}

impl From<MssqlConnectionError> for SprocketError {
    fn from(err: MssqlConnectionError) -> Self {
        match err {
            MssqlConnectionError::InvalidConnectionString(message) => {
                SprocketError::Configuration(message)
            }
            MssqlConnectionError::ConnectionClosed => {
                SprocketError::Connection("Connection is closed".into())
            }
            other => {
                let class = other.failure_class();
                let message = match &other {
                    MssqlConnectionError::Tiberius(tiberius::error::Error::Server(token)) => {
                        token.message().to_string()
                    }
                    _ => other.to_string(),
                };
                let mut driver = DriverError {
                    code: None,
                    message,
                    class,
                };
                if let Some(code) = other.code() {
                    driver = driver.with_code(code as i32);
                }
                SprocketError::Driver(driver)
            }
        }
    }
}

/// Convert a tiberius failure, keeping the server error number.
pub(crate) fn driver_failure(err: tiberius::error::Error) -> SprocketError {
    MssqlConnectionError::from(err).into()
}
