//! Client-side negotiation on top of an established stream.

mod credentials;
mod login;
mod sasl;

pub use self::credentials::{Credentials, PasswordEncoding};
pub use self::login::login;
pub use self::sasl::{AuthorizationResult, SaslManager};
