#![deny(missing_docs)]

//! This crate provides a framework for client-side SASL authentication and a few authentication
//! mechanisms: PLAIN, ANONYMOUS and SCRAM-SHA-1.
//!
//! # Examples
//!
//! ```rust
//! use sasl::client::Mechanism;
//! use sasl::client::mechanisms::Plain;
//!
//! let mut mechanism = Plain::new("user", "pencil");
//!
//! let initial_data = mechanism.initial();
//!
//! assert_eq!(initial_data, b"\0user\0pencil");
//! ```
//!
//! A full SCRAM exchange, with a fixed client nonce so the messages are reproducible:
//!
//! ```rust
//! use sasl::client::Mechanism;
//! use sasl::client::mechanisms::Scram;
//! use sasl::common::scram::FixedNonce;
//!
//! let mut mechanism = Scram::with_nonce_source(
//!     "user",
//!     "pencil",
//!     &FixedNonce::new("fyko+d2lbbFgONRv9qkxdawL"),
//! ).unwrap();
//! assert_eq!(mechanism.initial(), b"n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL");
//! ```
//!
//! # Usage
//!
//! You can use this in your crate by adding this under `dependencies` in your `Cargo.toml`:
//!
//! ```toml,ignore
//! sasl = "*"
//! ```

/// Credentials and helpers shared by all mechanisms.
pub mod common;

/// The client side of the mechanisms.
pub mod client;
