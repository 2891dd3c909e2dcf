//! Provides the SASL "SCRAM-SHA-1" mechanism.

use base64::{engine::general_purpose::STANDARD as Base64, Engine};

use crate::client::{Mechanism, MechanismError};
use crate::common::scram::{hmac_sha1, pbkdf2_sha1, sha1, NonceSource, RandomNonce};
use crate::common::{parse_frame, xor, Credentials, Identity, Password, Secret};

/// The gs2 header, no channel binding and no authzid.
const GS2_HEADER: &str = "n,,";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScramState {
    InitialRequest,
    Start,
    Auth,
    Done,
    Failed,
}

/// A struct for the SASL SCRAM-SHA-1 mechanism.
pub struct Scram {
    username: String,
    password: String,
    client_nonce: String,
    client_first_bare: String,
    server_signature: Vec<u8>,
    state: ScramState,
}

/// Escapes a username for use in a `n=` attribute.
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

impl Scram {
    /// Constructs a new struct for authenticating using the SASL SCRAM-SHA-1 mechanism, with a
    /// random client nonce.
    ///
    /// It is recommended that instead you use a `Credentials` struct and turn it into the
    /// requested mechanism using `from_credentials`.
    pub fn new<N: Into<String>, P: Into<String>>(
        username: N,
        password: P,
    ) -> Result<Scram, MechanismError> {
        Scram::with_nonce_source(username, password, &RandomNonce)
    }

    /// Constructs a new struct taking its client nonce from `source`.
    pub fn with_nonce_source<N: Into<String>, P: Into<String>>(
        username: N,
        password: P,
        source: &dyn NonceSource,
    ) -> Result<Scram, MechanismError> {
        Ok(Scram {
            username: username.into(),
            password: password.into(),
            client_nonce: source.nonce()?,
            client_first_bare: String::new(),
            server_signature: Vec::new(),
            state: ScramState::InitialRequest,
        })
    }

    /// Whether the server proved knowledge of the password.
    pub fn is_done(&self) -> bool {
        self.state == ScramState::Done
    }

    fn client_final(&mut self, server_first: &[u8]) -> Result<Vec<u8>, MechanismError> {
        let server_first_str =
            std::str::from_utf8(server_first).map_err(|_| MechanismError::CannotDecodeChallenge)?;
        let mut server_nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for (key, value) in parse_frame(server_first)? {
            match key {
                'r' => server_nonce = Some(value),
                's' => {
                    salt = Some(
                        Base64
                            .decode(value)
                            .map_err(|_| MechanismError::MalformedChallenge("invalid salt"))?,
                    )
                }
                'i' => {
                    let count = value
                        .parse::<u32>()
                        .map_err(|_| MechanismError::MalformedChallenge("invalid iteration count"))?;
                    if count == 0 {
                        return Err(MechanismError::MalformedChallenge(
                            "iteration count must be positive",
                        ));
                    }
                    iterations = Some(count);
                }
                'e' => return Err(MechanismError::ServerError(value)),
                'm' => {
                    return Err(MechanismError::MalformedChallenge(
                        "unsupported mandatory extension",
                    ))
                }
                _ => (),
            }
        }
        let server_nonce = server_nonce.ok_or(MechanismError::NoServerNonce)?;
        let salt = salt.ok_or(MechanismError::NoServerSalt)?;
        let iterations = iterations.ok_or(MechanismError::NoServerIterations)?;
        if server_nonce.len() <= self.client_nonce.len()
            || !server_nonce.starts_with(&self.client_nonce)
        {
            return Err(MechanismError::InvalidServerNonce);
        }

        let salted_password = pbkdf2_sha1(self.password.as_bytes(), &salt, iterations)?;
        let client_key = hmac_sha1(&salted_password, b"Client Key")?;
        let server_key = hmac_sha1(&salted_password, b"Server Key")?;
        let stored_key = sha1(&client_key);

        let without_proof = format!("c={},r={}", Base64.encode(GS2_HEADER), server_nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first_str, without_proof
        );
        let client_signature = hmac_sha1(&stored_key, auth_message.as_bytes())?;
        let client_proof = xor(&client_key, &client_signature);
        self.server_signature = hmac_sha1(&server_key, auth_message.as_bytes())?;

        Ok(format!("{},p={}", without_proof, Base64.encode(client_proof)).into_bytes())
    }

    fn verify_server_final(&mut self, data: &[u8]) -> Result<(), MechanismError> {
        let frame = parse_frame(data).map_err(|_| MechanismError::CannotDecodeSuccessResponse)?;
        let mut signature = None;
        for (key, value) in frame {
            match key {
                'v' => signature = Some(value),
                'e' => {
                    self.state = ScramState::Failed;
                    return Err(MechanismError::ServerError(value));
                }
                _ => (),
            }
        }
        let signature = match signature {
            Some(signature) => signature,
            None => {
                self.state = ScramState::Failed;
                return Err(MechanismError::NoSignatureInSuccessResponse);
            }
        };
        let decoded = Base64.decode(signature).map_err(|_| {
            self.state = ScramState::Failed;
            MechanismError::CannotDecodeSuccessResponse
        })?;
        if decoded != self.server_signature {
            self.state = ScramState::Failed;
            return Err(MechanismError::InvalidSignatureInSuccessResponse);
        }
        self.state = ScramState::Done;
        Ok(())
    }
}

impl Mechanism for Scram {
    fn name(&self) -> &str {
        "SCRAM-SHA-1"
    }

    fn from_credentials(credentials: Credentials) -> Result<Scram, MechanismError> {
        if let Secret::Password(Password::Plain(password)) = credentials.secret {
            if let Identity::Username(username) = credentials.identity {
                Scram::new(username, password)
            } else {
                Err(MechanismError::ScramRequiresUsername)
            }
        } else {
            Err(MechanismError::ScramRequiresPassword)
        }
    }

    fn initial(&mut self) -> Vec<u8> {
        self.client_first_bare = format!(
            "n={},r={}",
            escape_username(&self.username),
            self.client_nonce
        );
        self.state = ScramState::Start;
        format!("{}{}", GS2_HEADER, self.client_first_bare).into_bytes()
    }

    fn response(&mut self, challenge: Option<&[u8]>) -> Result<Option<Vec<u8>>, MechanismError> {
        match (self.state, challenge) {
            (ScramState::Start, Some(server_first)) => match self.client_final(server_first) {
                Ok(response) => {
                    self.state = ScramState::Auth;
                    Ok(Some(response))
                }
                Err(err) => {
                    self.state = ScramState::Failed;
                    Err(err)
                }
            },
            // Some servers send the server-final message as a last challenge.
            (ScramState::Auth, Some(server_final)) => {
                self.verify_server_final(server_final)?;
                Ok(Some(Vec::new()))
            }
            (ScramState::InitialRequest, None) => Ok(Some(self.initial())),
            (ScramState::InitialRequest, Some(_)) => Err(MechanismError::UnexpectedChallenge(
                "challenge before the initial response",
            )),
            (ScramState::Done, _) | (ScramState::Failed, _) => Err(
                MechanismError::UnexpectedChallenge("challenge after the exchange ended"),
            ),
            (_, None) => Err(MechanismError::UnexpectedChallenge("empty challenge")),
        }
    }

    fn success(&mut self, data: Option<&[u8]>) -> Result<(), MechanismError> {
        match (self.state, data) {
            (ScramState::Done, None) => Ok(()),
            (ScramState::Auth, Some(server_final)) => self.verify_server_final(server_final),
            (ScramState::Auth, None) => {
                self.state = ScramState::Failed;
                Err(MechanismError::NoSignatureInSuccessResponse)
            }
            (ScramState::Done, Some(_)) => Err(MechanismError::UnexpectedChallenge(
                "additional data after the server was verified",
            )),
            _ => Err(MechanismError::UnexpectedChallenge(
                "success before the exchange completed",
            )),
        }
    }
}
