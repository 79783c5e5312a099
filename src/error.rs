use std::fmt::Formatter;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    CheckChainErr,
    BadAddress(String),
    BadSecret,
    NoCode(String),
    MemberKey(String),
    LowGasReserve(String),
    AmountMismatch { required: String, provided: String },
    InsufficientBalance { required: String, available: String },
    NotContributed { member: String, cycle: String },
    BidOutOfRange(u32),
    AlreadyActive,
    EventMissing(&'static str),
    Revert { step: &'static str, reason: String },
    ReceiptTimeout(String),
    TxInternalErr(InternalError),
    SendErr,
    Contract(String),
    Web3(web3::Error),
    Db(redis::RedisError),
    Json(serde_json::Error),
    Io(std::io::Error),
    ParseAmount(String),
    Unknown(String),
}

#[derive(Debug)]
pub enum InternalError {
    InvalidNonce(String),
    Other(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::CheckChainErr => write!(f, "chain id check failed"),
            Error::BadAddress(a) => write!(f, "invalid address format: {}", a),
            Error::BadSecret => write!(f, "invalid secret key"),
            Error::NoCode(a) => write!(f, "address has no contract code: {}", a),
            Error::MemberKey(m) => write!(f, "no private key found for member {}", m),
            Error::LowGasReserve(b) => {
                write!(f, "native balance below configured minGasReserve: {}", b)
            }
            Error::AmountMismatch { required, provided } => {
                write!(f, "amount mismatch, required: {}, provided: {}", required, provided)
            }
            Error::InsufficientBalance { required, available } => write!(
                f,
                "insufficient token balance, required: {}, available: {}",
                required, available
            ),
            Error::NotContributed { member, cycle } => write!(
                f,
                "member {} has not contributed to cycle {}, must contribute before bidding",
                member, cycle
            ),
            Error::BidOutOfRange(p) => {
                write!(f, "bid percentage must be between 60% and 95%, got {}%", p)
            }
            Error::AlreadyActive => write!(f, "pool is already active"),
            Error::EventMissing(name) => {
                write!(f, "transaction confirmed but {} event not found in logs", name)
            }
            Error::Revert { step, reason } => write!(f, "{} failed: {}", step, reason),
            Error::ReceiptTimeout(h) => write!(f, "timed out waiting for receipt of {}", h),
            Error::TxInternalErr(e) => write!(f, "internal error: {:?}", e),
            Error::SendErr => write!(f, "error sending request"),
            Error::Contract(e) => write!(f, "contract error: {}", e),
            Error::Web3(e) => write!(f, "web3 error: {}", e),
            Error::Db(e) => write!(f, "database error: {}", e),
            Error::Json(e) => write!(f, "json error: {}", e),
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::ParseAmount(a) => write!(f, "invalid token amount: {}", a),
            Error::Unknown(e) => write!(f, "an unknown error happened: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Web3(e) => Some(e),
            Error::Db(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl Error {
    /// HTTP code the API layer reports for this failure. Caller mistakes and
    /// on-chain reverts map to 400, everything the node or backend broke to 500.
    pub fn status_code(&self) -> i32 {
        match self {
            Error::EventMissing(_)
            | Error::ReceiptTimeout(_)
            | Error::TxInternalErr(_)
            | Error::SendErr
            | Error::Web3(_)
            | Error::Db(_)
            | Error::Json(_)
            | Error::Io(_)
            | Error::Unknown(_) => 500,
            _ => 400,
        }
    }
}

impl From<web3::Error> for Error {
    fn from(e: web3::Error) -> Self {
        Error::Web3(e)
    }
}

impl From<web3::contract::Error> for Error {
    fn from(e: web3::contract::Error) -> Self {
        Error::Contract(crate::utils::handle_error(&e))
    }
}

impl From<web3::ethabi::Error> for Error {
    fn from(e: web3::ethabi::Error) -> Self {
        Error::Contract(format!("Abi error: {}", e))
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Db(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_display_names_the_step() {
        let err = Error::Revert {
            step: "closeBids",
            reason: "too early".to_string(),
        };
        assert_eq!(err.to_string(), "closeBids failed: too early");
    }

    #[test]
    fn caller_mistakes_are_bad_requests() {
        assert_eq!(Error::BidOutOfRange(42).status_code(), 400);
        assert_eq!(Error::AlreadyActive.status_code(), 400);
        assert_eq!(
            Error::Revert {
                step: "settle",
                reason: "cycle not ended".to_string()
            }
            .status_code(),
            400
        );
        assert_eq!(Error::ReceiptTimeout("0xabc".to_string()).status_code(), 500);
    }
}
