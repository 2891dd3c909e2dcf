//! XMPP over BOSH (XEP-0124, XEP-0206) with asynchronous I/O using Tokio.
//!
//! A [`BoshTransport`] keeps one logical XMPP stream alive across a sequence of HTTP
//! request/response pairs, and a [`SaslManager`] authenticates over any [`XmppConnection`].
//!
//! ```no_run
//! use tokio_bosh::{login, BoshTransport, ConnectionSettings, Credentials, ReqwestConnector};
//!
//! # async fn run() -> Result<(), tokio_bosh::Error> {
//! let transport = BoshTransport::new(ReqwestConnector::new());
//! transport.set_settings(ConnectionSettings::new("https://example.org/http-bind", "example.org"));
//! let credentials = Credentials::new("user@example.org".parse()?, "password");
//! let jid = login(&transport, &credentials).await?;
//! println!("logged in as {}", jid);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code, missing_docs, bare_trait_objects)]

mod bosh;
mod client;
mod connection;
mod error;
mod event;
pub mod ns;

pub use crate::bosh::{
    BoshTransport, ConnectionSettings, ConnectorError, HttpConnector, HttpResponse,
    ReqwestConnector, StreamSettings, Timings,
};
pub use crate::client::{
    login, AuthorizationResult, Credentials, PasswordEncoding, SaslManager,
};
pub use crate::connection::XmppConnection;
pub use crate::error::{AuthError, Error, ParseError};
pub use crate::event::{ConnectionState, HandlerError, ListenerClosed};

// Re-exports
pub use jid::{Error as JidParseError, Jid};
pub use minidom::Element;
