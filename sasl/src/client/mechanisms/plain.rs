//! Provides the SASL "PLAIN" mechanism.

use crate::client::{Mechanism, MechanismError};
use crate::common::{Credentials, Identity, Password, Secret};

/// A struct for the SASL PLAIN mechanism.
pub struct Plain {
    authzid: Option<String>,
    username: String,
    password: String,
}

impl Plain {
    /// Constructs a new struct for authenticating using the SASL PLAIN mechanism.
    ///
    /// It is recommended that instead you use a `Credentials` struct and turn it into the
    /// requested mechanism using `from_credentials`.
    pub fn new<N: Into<String>, P: Into<String>>(username: N, password: P) -> Plain {
        Plain {
            authzid: None,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Sets the identity to authorize as, sent before the username.
    pub fn with_authzid<A: Into<String>>(mut self, authzid: A) -> Plain {
        self.authzid = Some(authzid.into());
        self
    }
}

impl Mechanism for Plain {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn from_credentials(credentials: Credentials) -> Result<Plain, MechanismError> {
        if let Secret::Password(Password::Plain(password)) = credentials.secret {
            if let Identity::Username(username) = credentials.identity {
                let plain = Plain::new(username, password);
                Ok(match credentials.authzid {
                    Some(authzid) => plain.with_authzid(authzid),
                    None => plain,
                })
            } else {
                Err(MechanismError::PlainRequiresUsername)
            }
        } else {
            Err(MechanismError::PlainRequiresPlaintextPassword)
        }
    }

    fn initial(&mut self) -> Vec<u8> {
        let mut auth = Vec::new();
        if let Some(ref authzid) = self.authzid {
            auth.extend(authzid.bytes());
        }
        auth.push(0);
        auth.extend(self.username.bytes());
        auth.push(0);
        auth.extend(self.password.bytes());
        auth
    }

    fn response(&mut self, challenge: Option<&[u8]>) -> Result<Option<Vec<u8>>, MechanismError> {
        match challenge {
            None => Ok(Some(self.initial())),
            Some(_) => Err(MechanismError::UnexpectedChallenge(
                "server gave a challenge to PLAIN",
            )),
        }
    }

    fn success(&mut self, data: Option<&[u8]>) -> Result<(), MechanismError> {
        match data {
            None => Ok(()),
            Some(_) => Err(MechanismError::UnexpectedChallenge(
                "server gave additional data with success to PLAIN",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_without_authzid() {
        let mut plain = Plain::new("user", "pencil");
        assert_eq!(plain.initial(), b"\0user\0pencil");
    }

    #[test]
    fn plain_with_authzid() {
        let creds = Credentials::default()
            .with_username("node")
            .with_authzid("node@domain")
            .with_password("password");
        let mut plain = Plain::from_credentials(creds).unwrap();
        assert_eq!(plain.name(), "PLAIN");
        assert_eq!(plain.initial(), b"node@domain\0node\0password");
    }

    #[test]
    fn plain_requires_password() {
        let creds = Credentials::default().with_username("node");
        assert_eq!(
            Plain::from_credentials(creds).err(),
            Some(MechanismError::PlainRequiresPlaintextPassword)
        );
    }

    #[test]
    fn absent_challenge_repeats_initial_response() {
        let mut plain = Plain::new("user", "pencil");
        assert_eq!(
            plain.response(None).unwrap(),
            Some(b"\0user\0pencil".to_vec())
        );
    }

    #[test]
    fn present_challenge_is_unexpected() {
        let mut plain = Plain::new("user", "pencil");
        assert!(matches!(
            plain.response(Some(b"")),
            Err(MechanismError::UnexpectedChallenge(_))
        ));
    }

    #[test]
    fn success_with_data_is_unexpected() {
        let mut plain = Plain::new("user", "pencil");
        assert!(plain.success(None).is_ok());
        assert!(matches!(
            plain.success(Some(b"1234")),
            Err(MechanismError::UnexpectedChallenge(_))
        ));
    }
}
