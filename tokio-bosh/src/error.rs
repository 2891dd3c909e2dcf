use sasl::client::MechanismError;
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// `connect()` was called before any `ConnectionSettings` were set
    NoSettings,
    /// Error parsing a Jabber-Id
    JidParse(jid::Error),
    /// Authentication error
    Auth(AuthError),
    /// Connection closed before the operation finished
    Disconnected(String),
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoSettings => write!(fmt, "connection settings must be set before connect"),
            Error::JidParse(e) => write!(fmt, "jid parse error: {}", e),
            Error::Auth(e) => write!(fmt, "authentication error: {}", e),
            Error::Disconnected(reason) => write!(fmt, "disconnected: {}", reason),
        }
    }
}

impl StdError for Error {}

impl From<jid::Error> for Error {
    fn from(e: jid::Error) -> Self {
        Error::JidParse(e)
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Error::Auth(e)
    }
}

/// XML parse error wrapper type
#[derive(Debug)]
pub struct ParseError(pub Cow<'static, str>);

impl StdError for ParseError {}

impl fmt::Display for ParseError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

/// Authentication error
#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    /// No matching SASL mechanism available
    NoMechanism,
    /// Local SASL implementation error
    Mechanism(MechanismError),
    /// The server could not prove it knows our password
    MutualAuthentication,
    /// Failure from the server, with its condition when one was given
    Failure(Option<String>),
    /// An encoded password could not be decoded
    Password,
    /// The connection went away during authentication
    Disconnected,
}

impl fmt::Display for AuthError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::NoMechanism => write!(fmt, "no matching SASL mechanism available"),
            AuthError::Mechanism(e) => write!(fmt, "local SASL implementation error: {}", e),
            AuthError::MutualAuthentication => {
                write!(fmt, "server failed to authenticate itself to the client")
            }
            AuthError::Failure(Some(condition)) => write!(fmt, "failure from server: {}", condition),
            AuthError::Failure(None) => write!(fmt, "failure from server"),
            AuthError::Password => write!(fmt, "password could not be decoded"),
            AuthError::Disconnected => write!(fmt, "disconnected during authentication"),
        }
    }
}

impl StdError for AuthError {}

impl From<MechanismError> for AuthError {
    fn from(e: MechanismError) -> Self {
        if e.is_mutual_auth_failure() {
            AuthError::MutualAuthentication
        } else {
            AuthError::Mechanism(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_errors_are_mutual_auth_failures() {
        assert_eq!(
            AuthError::from(MechanismError::InvalidSignatureInSuccessResponse),
            AuthError::MutualAuthentication
        );
        assert_eq!(
            AuthError::from(MechanismError::NoServerSalt),
            AuthError::Mechanism(MechanismError::NoServerSalt)
        );
    }

    #[test]
    fn invalid_jid_converts() {
        let err = Error::from("@".parse::<jid::Jid>().unwrap_err());
        assert!(matches!(err, Error::JidParse(_)));
        assert!(err.to_string().starts_with("jid parse error: "));
    }

    #[test]
    fn display_failure_condition() {
        let err = Error::from(AuthError::Failure(Some("not-authorized".to_owned())));
        assert_eq!(
            err.to_string(),
            "authentication error: failure from server: not-authorized"
        );
    }
}
