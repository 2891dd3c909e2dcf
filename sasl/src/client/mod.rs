#[cfg(feature = "scram")]
use hmac::digest::InvalidLength;
use std::fmt;

use crate::common::Credentials;

/// Everything that can go wrong while running a client mechanism.
#[derive(Debug, Clone, PartialEq)]
pub enum MechanismError {
    /// ANONYMOUS was given a secret.
    AnonymousRequiresNoCredentials,

    /// PLAIN was given no username.
    PlainRequiresUsername,
    /// PLAIN was given no plaintext password.
    PlainRequiresPlaintextPassword,

    /// The nonce source failed.
    CannotGenerateNonce,
    /// SCRAM was given no username.
    ScramRequiresUsername,
    /// SCRAM was given no password.
    ScramRequiresPassword,

    /// The server sent a challenge the mechanism cannot accept in its current state.
    UnexpectedChallenge(&'static str),
    /// A challenge did not follow the mechanism's syntax.
    MalformedChallenge(&'static str),
    /// A challenge was not valid UTF-8.
    CannotDecodeChallenge,
    /// The server-first message carried no nonce.
    NoServerNonce,
    /// The server nonce did not extend the client nonce.
    InvalidServerNonce,
    /// The server-first message carried no salt.
    NoServerSalt,
    /// The server-first message carried no iteration count.
    NoServerIterations,
    /// Key derivation was handed a key it cannot use.
    #[cfg(feature = "scram")]
    InvalidKeyLength(InvalidLength),

    /// The server-final message could not be decoded.
    CannotDecodeSuccessResponse,
    /// The server signature did not match ours; the server could not prove it knows the password.
    InvalidSignatureInSuccessResponse,
    /// The server-final message carried no signature.
    NoSignatureInSuccessResponse,
    /// The server-final message carried an `e=` error.
    ServerError(String),
}

#[cfg(feature = "scram")]
impl From<InvalidLength> for MechanismError {
    fn from(err: InvalidLength) -> MechanismError {
        MechanismError::InvalidKeyLength(err)
    }
}

impl fmt::Display for MechanismError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "{}",
            match self {
                MechanismError::AnonymousRequiresNoCredentials =>
                    "ANONYMOUS mechanism requires no credentials",

                MechanismError::PlainRequiresUsername => "PLAIN requires a username",
                MechanismError::PlainRequiresPlaintextPassword =>
                    "PLAIN requires a plaintext password",

                MechanismError::CannotGenerateNonce => "can't generate nonce",
                MechanismError::ScramRequiresUsername => "SCRAM requires a username",
                MechanismError::ScramRequiresPassword => "SCRAM requires a password",

                MechanismError::UnexpectedChallenge(why) =>
                    return write!(fmt, "unexpected challenge: {}", why),
                MechanismError::MalformedChallenge(why) =>
                    return write!(fmt, "malformed challenge: {}", why),
                MechanismError::CannotDecodeChallenge => "can't decode challenge",
                MechanismError::NoServerNonce => "no server nonce",
                MechanismError::InvalidServerNonce => "server nonce doesn't extend client nonce",
                MechanismError::NoServerSalt => "no server salt",
                MechanismError::NoServerIterations => "no server iterations",
                #[cfg(feature = "scram")]
                MechanismError::InvalidKeyLength(err) =>
                    return write!(fmt, "invalid key length: {}", err),

                MechanismError::CannotDecodeSuccessResponse => "can't decode success response",
                MechanismError::InvalidSignatureInSuccessResponse =>
                    "invalid signature in success response",
                MechanismError::NoSignatureInSuccessResponse => "no signature in success response",
                MechanismError::ServerError(err) =>
                    return write!(fmt, "server error in success response: {}", err),
            }
        )
    }
}

impl std::error::Error for MechanismError {}

impl MechanismError {
    /// Whether this error means the server failed to authenticate itself to us.
    pub fn is_mutual_auth_failure(&self) -> bool {
        matches!(
            self,
            MechanismError::InvalidSignatureInSuccessResponse
                | MechanismError::NoSignatureInSuccessResponse
        )
    }
}

/// A trait which defines SASL mechanisms.
///
/// Payloads are `Option`s so that a challenge which is present but empty can be told apart from
/// no challenge at all.
pub trait Mechanism {
    /// The name of the mechanism.
    fn name(&self) -> &str;

    /// Creates this mechanism from `Credentials`.
    fn from_credentials(credentials: Credentials) -> Result<Self, MechanismError>
    where
        Self: Sized;

    /// Provides initial payload of the SASL mechanism.
    fn initial(&mut self) -> Vec<u8> {
        Vec::new()
    }

    /// Creates a response to the SASL challenge, `None` when nothing more needs to be sent.
    fn response(&mut self, _challenge: Option<&[u8]>) -> Result<Option<Vec<u8>>, MechanismError> {
        Err(MechanismError::UnexpectedChallenge(
            "this mechanism takes no challenges",
        ))
    }

    /// Verifies the server success response, if there is one.
    fn success(&mut self, data: Option<&[u8]>) -> Result<(), MechanismError> {
        match data {
            None => Ok(()),
            Some(_) => Err(MechanismError::UnexpectedChallenge(
                "additional data with success",
            )),
        }
    }
}

pub mod mechanisms;
