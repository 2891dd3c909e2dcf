//! Provides a few SASL mechanisms.

#[cfg(feature = "anonymous")]
mod anonymous;
mod plain;

#[cfg(feature = "scram")]
mod scram;

#[cfg(feature = "anonymous")]
pub use self::anonymous::Anonymous;
pub use self::plain::Plain;

#[cfg(feature = "scram")]
pub use self::scram::Scram;
