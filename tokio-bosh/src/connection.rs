//! The narrow interface stanza-level code talks to, whatever carries the stream.

use minidom::Element;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::event::{ConnectionState, HandlerError};

/// An XMPP stream which stanzas can be sent to and received from.
///
/// Implemented by [`BoshTransport`](crate::BoshTransport); negotiators such as
/// [`SaslManager`](crate::SaslManager) only ever see this trait.
pub trait XmppConnection: Clone + Send + Sync + 'static {
    /// Queues a stanza for sending.
    fn send(&self, stanza: Element);

    /// Registers a handler called with every received stanza, in registration order.
    fn on_stanza_received<F>(&self, handler: F)
    where
        F: Fn(&Element) -> Result<(), HandlerError> + Send + Sync + 'static;

    /// Registers a handler called on every connection state change.
    fn on_connection_state<F>(&self, handler: F)
    where
        F: Fn(&ConnectionState) -> Result<(), HandlerError> + Send + Sync + 'static;

    /// Received stanzas, as a stream.
    fn stanzas(&self) -> UnboundedReceiverStream<Element>;

    /// Connection state changes, as a stream.
    fn states(&self) -> UnboundedReceiverStream<ConnectionState>;
}
