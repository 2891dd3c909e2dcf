use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use jid::Jid;

use crate::error::AuthError;

/// How the password in `Credentials` is stored
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PasswordEncoding {
    /// Plaintext
    #[default]
    None,
    /// Base64 of the UTF-8 password
    Base64,
}

/// Account credentials for one login attempt
#[derive(Clone, Debug, PartialEq)]
pub struct Credentials {
    /// jid of the account
    pub jid: Jid,
    /// password of the account, absent for anonymous login
    pub password: Option<String>,
    /// encoding of `password`
    pub encoding: PasswordEncoding,
}

impl Credentials {
    /// Credentials with a plaintext password.
    pub fn new<P: Into<String>>(jid: Jid, password: P) -> Self {
        Credentials {
            jid,
            password: Some(password.into()),
            encoding: PasswordEncoding::None,
        }
    }

    /// Credentials for anonymous login on the domain of `jid`.
    pub fn anonymous(jid: Jid) -> Self {
        Credentials {
            jid,
            password: None,
            encoding: PasswordEncoding::None,
        }
    }

    /// Sets how the password is encoded.
    pub fn with_encoding(mut self, encoding: PasswordEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Whether this is an anonymous login.
    pub fn is_anonymous(&self) -> bool {
        self.password.is_none()
    }

    /// The plaintext password.
    pub fn decoded_password(&self) -> Result<String, AuthError> {
        let password = self.password.as_deref().unwrap_or_default();
        match self.encoding {
            PasswordEncoding::None => Ok(password.to_owned()),
            PasswordEncoding::Base64 => {
                let bytes = Base64.decode(password).map_err(|_| AuthError::Password)?;
                String::from_utf8(bytes).map_err(|_| AuthError::Password)
            }
        }
    }
}
