//! Provides the SASL "ANONYMOUS" mechanism.

use crate::client::{Mechanism, MechanismError};
use crate::common::{Credentials, Secret};

/// A struct for the SASL ANONYMOUS mechanism.
pub struct Anonymous;

impl Anonymous {
    /// Constructs a new struct for authenticating using the SASL ANONYMOUS mechanism.
    ///
    /// It is recommended that instead you use a `Credentials` struct and turn it into the
    /// requested mechanism using `from_credentials`.
    pub fn new() -> Anonymous {
        Anonymous
    }
}

impl Default for Anonymous {
    fn default() -> Anonymous {
        Anonymous::new()
    }
}

impl Mechanism for Anonymous {
    fn name(&self) -> &str {
        "ANONYMOUS"
    }

    fn from_credentials(credentials: Credentials) -> Result<Anonymous, MechanismError> {
        if let Secret::None = credentials.secret {
            Ok(Anonymous)
        } else {
            Err(MechanismError::AnonymousRequiresNoCredentials)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_rejects_password() {
        let creds = Credentials::default().with_password("secret");
        assert_eq!(
            Anonymous::from_credentials(creds).err(),
            Some(MechanismError::AnonymousRequiresNoCredentials)
        );
    }

    #[test]
    fn anonymous_exchange() {
        let mut anonymous = Anonymous::from_credentials(Credentials::default()).unwrap();
        assert!(anonymous.initial().is_empty());
        assert!(anonymous.response(Some(b"x")).is_err());
        assert!(anonymous.success(None).is_ok());
    }
}
