//! XML namespaces used on the wire.

/// BOSH body wrapper, XEP-0124.
pub const HTTPBIND: &str = "http://jabber.org/protocol/httpbind";

/// XMPP over BOSH attributes, XEP-0206.
pub const XBOSH: &str = "urn:xmpp:xbosh";

/// RFC 6120 SASL negotiation.
pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";

/// RFC 6120 stream namespace, for `<stream:features/>`.
pub const STREAM: &str = "http://etherx.jabber.org/streams";

/// RFC 6120 client stanzas.
pub const JABBER_CLIENT: &str = "jabber:client";
