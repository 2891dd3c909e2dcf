use std::convert::From;

use crate::client::MechanismError;

#[cfg(feature = "scram")]
pub mod scram;

/// The identity to authenticate as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    /// No identity, for mechanisms such as ANONYMOUS.
    None,
    /// A username, the authentication identity.
    Username(String),
}

impl From<String> for Identity {
    fn from(s: String) -> Identity {
        Identity::Username(s)
    }
}

impl<'a> From<&'a str> for Identity {
    fn from(s: &'a str) -> Identity {
        Identity::Username(s.to_owned())
    }
}

/// A struct containing SASL credentials.
#[derive(Clone, Debug)]
pub struct Credentials {
    /// The requested identity.
    pub identity: Identity,
    /// The identity to act as, if different from the authentication identity.
    pub authzid: Option<String>,
    /// The secret used to authenticate.
    pub secret: Secret,
}

impl Default for Credentials {
    fn default() -> Credentials {
        Credentials {
            identity: Identity::None,
            authzid: None,
            secret: Secret::None,
        }
    }
}

impl Credentials {
    /// Creates a new Credentials with the specified username.
    pub fn with_username<N: Into<String>>(mut self, username: N) -> Credentials {
        self.identity = Identity::Username(username.into());
        self
    }

    /// Creates a new Credentials with the specified authorization identity.
    pub fn with_authzid<A: Into<String>>(mut self, authzid: A) -> Credentials {
        self.authzid = Some(authzid.into());
        self
    }

    /// Creates a new Credentials with the specified plaintext password.
    pub fn with_password<P: Into<String>>(mut self, password: P) -> Credentials {
        self.secret = Secret::password_plain(password);
        self
    }
}

/// Represents a SASL secret, like a password.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Secret {
    /// No extra data needed.
    None,
    /// Password required.
    Password(Password),
}

impl Secret {
    /// A plaintext password secret.
    pub fn password_plain<S: Into<String>>(password: S) -> Secret {
        Secret::Password(Password::Plain(password.into()))
    }
}

/// Represents a password.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Password {
    /// A plaintext password.
    Plain(String),
}

impl From<String> for Password {
    fn from(s: String) -> Password {
        Password::Plain(s)
    }
}

impl<'a> From<&'a str> for Password {
    fn from(s: &'a str) -> Password {
        Password::Plain(s.to_owned())
    }
}

#[cfg(test)]
#[test]
fn xor_works() {
    assert_eq!(
        xor(
            &[135, 94, 53, 134, 73, 233, 140, 221, 150, 12, 96, 111, 54, 66, 11, 76],
            &[163, 9, 122, 180, 107, 44, 22, 252, 248, 134, 112, 82, 84, 122, 56, 209]
        ),
        &[36, 87, 79, 50, 34, 197, 154, 33, 110, 138, 16, 61, 98, 56, 51, 157]
    );
}

#[cfg(test)]
#[test]
fn xor_flips_nibbles() {
    assert_eq!(
        xor(&[0xff, 0xff, 0xff, 0xff], &[0x00, 0x0f, 0xf0, 0xff]),
        &[0xff, 0xf0, 0x0f, 0x00]
    );
}

/// XORs two byte slices of equal length.
///
/// # Panics
///
/// Panics if the slices differ in length.
pub fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(a, b)| a ^ b).collect()
}

/// Splits a SCRAM message into its `key=value` attributes, in order.
///
/// Every item must be a single attribute character followed by `=`.
pub fn parse_frame(frame: &[u8]) -> Result<Vec<(char, String)>, MechanismError> {
    let inner = std::str::from_utf8(frame).map_err(|_| MechanismError::CannotDecodeChallenge)?;
    let mut ret = Vec::new();
    for item in inner.split(',') {
        let mut chars = item.chars();
        match (chars.next(), chars.next()) {
            (Some(key), Some('=')) => ret.push((key, chars.as_str().to_owned())),
            _ => return Err(MechanismError::MalformedChallenge("expected equals sign")),
        }
    }
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_frame_keeps_order_and_values() {
        let frame = parse_frame(b"r=abc,s=QSXCR+Q6sek8bf92,i=4096").unwrap();
        assert_eq!(
            frame,
            vec![
                ('r', "abc".to_owned()),
                ('s', "QSXCR+Q6sek8bf92".to_owned()),
                ('i', "4096".to_owned()),
            ]
        );
    }

    #[test]
    fn parse_frame_keeps_equals_in_values() {
        let frame = parse_frame(b"v=rmF9pqV8S7suAoZWja4dJRkFsKQ=").unwrap();
        assert_eq!(frame, vec![('v', "rmF9pqV8S7suAoZWja4dJRkFsKQ=".to_owned())]);
    }

    #[test]
    fn parse_frame_rejects_missing_equals() {
        assert_eq!(
            parse_frame(b"r=abc,salt"),
            Err(MechanismError::MalformedChallenge("expected equals sign"))
        );
        assert_eq!(
            parse_frame(b""),
            Err(MechanismError::MalformedChallenge("expected equals sign"))
        );
    }

    #[test]
    fn credentials_builder() {
        let creds = Credentials::default()
            .with_username("node")
            .with_authzid("node@domain")
            .with_password("secret");
        assert_eq!(creds.identity, Identity::Username("node".to_owned()));
        assert_eq!(creds.authzid.as_deref(), Some("node@domain"));
        assert_eq!(creds.secret, Secret::password_plain("secret"));
    }
}
