use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use jid::Jid;
use log::{debug, info, warn};
use minidom::Element;
use sasl::client::mechanisms::{Anonymous, Plain, Scram};
use sasl::client::{Mechanism, MechanismError};
use sasl::common::scram::{NonceSource, RandomNonce};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::credentials::Credentials;
use crate::connection::XmppConnection;
use crate::error::AuthError;
use crate::event::{HandlerError, ListenerClosed, Listeners};
use crate::ns;

/// Outcome of an authentication attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizationResult {
    /// The server accepted us as this jid
    Succeeded(Jid),
    /// The server refused, with its condition when one was given
    Failed(Option<String>),
    /// The exchange broke down locally
    Error(AuthError),
}

struct Attempt {
    mechanism: Box<dyn Mechanism + Send>,
    jid: Jid,
}

struct Inner<C> {
    connection: C,
    attempt: Mutex<Option<Attempt>>,
    results: Listeners<AuthorizationResult>,
    nonce_source: Mutex<Arc<dyn NonceSource + Send + Sync>>,
}

/// Runs SASL negotiation over an `XmppConnection`
///
/// Prefers SCRAM-SHA-1, then PLAIN. Anonymous credentials always use ANONYMOUS.
pub struct SaslManager<C: XmppConnection> {
    inner: Arc<Inner<C>>,
}

impl<C: XmppConnection> Clone for SaslManager<C> {
    fn clone(&self) -> Self {
        SaslManager {
            inner: self.inner.clone(),
        }
    }
}

/// Empty text means no data, `=` means present but empty.
fn decode(text: &str) -> Result<Option<Vec<u8>>, MechanismError> {
    match text.trim() {
        "" => Ok(None),
        "=" => Ok(Some(Vec::new())),
        data => Base64
            .decode(data)
            .map(Some)
            .map_err(|_| MechanismError::CannotDecodeChallenge),
    }
}

fn encode(data: Option<&[u8]>) -> Option<String> {
    match data {
        None => None,
        Some([]) => Some("=".to_owned()),
        Some(data) => Some(Base64.encode(data)),
    }
}

fn sasl_element(name: &str, mechanism: Option<&str>, data: Option<&[u8]>) -> Element {
    let mut builder = Element::builder(name, ns::SASL);
    if let Some(mechanism) = mechanism {
        builder = builder.attr("mechanism", mechanism);
    }
    if let Some(text) = encode(data) {
        builder = builder.append(text);
    }
    builder.build()
}

impl<C: XmppConnection> SaslManager<C> {
    /// Creates a manager listening to stanzas received on `connection`.
    pub fn new(connection: C) -> Self {
        let inner = Arc::new(Inner {
            connection,
            attempt: Mutex::new(None),
            results: Listeners::default(),
            nonce_source: Mutex::new(Arc::new(RandomNonce)),
        });
        let weak = Arc::downgrade(&inner);
        inner
            .connection
            .on_stanza_received(move |stanza| match weak.upgrade() {
                Some(inner) => SaslManager { inner }
                    .handle_stanza(stanza)
                    .map_err(HandlerError::from),
                None => Err(ListenerClosed.into()),
            });
        SaslManager { inner }
    }

    /// Uses `source` for SCRAM client nonces.
    pub fn with_nonce_source<N: NonceSource + Send + Sync + 'static>(self, source: N) -> Self {
        *lock(&self.inner.nonce_source) = Arc::new(source);
        self
    }

    /// Picks a mechanism from the offered `<mechanisms/>` and sends `<auth/>`.
    pub fn send_authorization_request(
        &self,
        credentials: &Credentials,
        mechanisms: &Element,
    ) -> Result<(), AuthError> {
        let mut mechanism = self.select_mechanism(credentials, mechanisms)?;
        info!("Authenticating {} with {}", credentials.jid, mechanism.name());
        let initial = mechanism.initial();
        let auth = sasl_element("auth", Some(mechanism.name()), Some(initial.as_slice()));
        *lock(&self.inner.attempt) = Some(Attempt {
            mechanism,
            jid: credentials.jid.clone(),
        });
        self.inner.connection.send(auth);
        Ok(())
    }

    fn select_mechanism(
        &self,
        credentials: &Credentials,
        mechanisms: &Element,
    ) -> Result<Box<dyn Mechanism + Send>, AuthError> {
        if credentials.is_anonymous() {
            return Ok(Box::new(Anonymous::new()));
        }
        let offered: Vec<String> = mechanisms
            .children()
            .filter(|child| child.name() == "mechanism")
            .map(|child| child.text().trim().to_uppercase())
            .collect();
        debug!("Offered mechanisms: {:?}", offered);

        let password = credentials.decoded_password()?;
        let jid = &credentials.jid;
        let username = jid.node_str().unwrap_or_default();
        if offered.iter().any(|name| name == "SCRAM-SHA-1") {
            let source = lock(&self.inner.nonce_source).clone();
            Ok(Box::new(Scram::with_nonce_source(
                username,
                password,
                &*source,
            )?))
        } else if offered.iter().any(|name| name == "PLAIN") {
            let authzid = match jid.node_str() {
                Some(node) => format!("{}@{}", node, jid.domain_str()),
                None => jid.domain_str().to_owned(),
            };
            Ok(Box::new(Plain::new(username, password).with_authzid(authzid)))
        } else {
            Err(AuthError::NoMechanism)
        }
    }

    /// Handles a received stanza; anything outside the SASL namespace is ignored.
    pub fn handle_stanza(&self, stanza: &Element) -> Result<(), AuthError> {
        if stanza.ns() != ns::SASL {
            return Ok(());
        }
        match stanza.name() {
            "challenge" => self.on_challenge(stanza),
            "success" => self.on_success(stanza),
            "failure" => {
                let condition = stanza.children().next().map(|child| child.name().to_owned());
                warn!("Authentication failed: {:?}", condition);
                lock(&self.inner.attempt).take();
                self.inner
                    .results
                    .emit(&AuthorizationResult::Failed(condition));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn on_challenge(&self, stanza: &Element) -> Result<(), AuthError> {
        let response = {
            let mut attempt = lock(&self.inner.attempt);
            let current = match attempt.as_mut() {
                Some(current) => current,
                None => {
                    debug!("Ignoring challenge outside of an authentication attempt");
                    return Ok(());
                }
            };
            let result = decode(&stanza.text())
                .and_then(|data| current.mechanism.response(data.as_deref()));
            match result {
                Ok(response) => response,
                Err(e) => {
                    attempt.take();
                    drop(attempt);
                    return Err(self.fail(e.into()));
                }
            }
        };
        self.inner
            .connection
            .send(sasl_element("response", None, response.as_deref()));
        Ok(())
    }

    fn on_success(&self, stanza: &Element) -> Result<(), AuthError> {
        let mut current = match lock(&self.inner.attempt).take() {
            Some(current) => current,
            None => {
                debug!("Ignoring success outside of an authentication attempt");
                return Ok(());
            }
        };
        let verified = decode(&stanza.text())
            .and_then(|data| current.mechanism.success(data.as_deref()));
        match verified {
            Ok(()) => {
                info!("Authenticated as {}", current.jid);
                self.inner
                    .results
                    .emit(&AuthorizationResult::Succeeded(current.jid));
                Ok(())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    fn fail(&self, error: AuthError) -> AuthError {
        warn!("Authentication error: {}", error);
        self.inner
            .results
            .emit(&AuthorizationResult::Error(error.clone()));
        error
    }

    /// Registers a handler called with every authorization result.
    pub fn on_result<F>(&self, handler: F)
    where
        F: Fn(&AuthorizationResult) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.results.add_handler(handler);
    }

    /// Authorization results, as a channel.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<AuthorizationResult> {
        self.inner.results.subscribe()
    }

    /// Sends the authorization request and waits for its outcome.
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
        mechanisms: &Element,
    ) -> Result<Jid, AuthError> {
        let mut results = self.subscribe();
        self.send_authorization_request(credentials, mechanisms)?;
        match results.recv().await {
            Some(AuthorizationResult::Succeeded(jid)) => Ok(jid),
            Some(AuthorizationResult::Failed(condition)) => Err(AuthError::Failure(condition)),
            Some(AuthorizationResult::Error(e)) => Err(e),
            None => Err(AuthError::Disconnected),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ConnectionState;
    use sasl::common::scram::FixedNonce;
    use std::str::FromStr;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    #[derive(Clone, Default)]
    struct MockConnection {
        sent: Arc<Mutex<Vec<Element>>>,
        received: Arc<Listeners<Element>>,
        states: Arc<Listeners<ConnectionState>>,
    }

    impl MockConnection {
        fn receives(&self, xml: &str) {
            let stanza: Element = xml.parse().unwrap();
            self.received.emit(&stanza);
        }

        fn sent(&self) -> Vec<Element> {
            self.sent.lock().unwrap().clone()
        }

        fn last_sent(&self) -> Element {
            self.sent().pop().unwrap()
        }
    }

    impl XmppConnection for MockConnection {
        fn send(&self, stanza: Element) {
            self.sent.lock().unwrap().push(stanza);
        }

        fn on_stanza_received<F>(&self, handler: F)
        where
            F: Fn(&Element) -> Result<(), HandlerError> + Send + Sync + 'static,
        {
            self.received.add_handler(handler);
        }

        fn on_connection_state<F>(&self, handler: F)
        where
            F: Fn(&ConnectionState) -> Result<(), HandlerError> + Send + Sync + 'static,
        {
            self.states.add_handler(handler);
        }

        fn stanzas(&self) -> UnboundedReceiverStream<Element> {
            UnboundedReceiverStream::new(self.received.subscribe())
        }

        fn states(&self) -> UnboundedReceiverStream<ConnectionState> {
            UnboundedReceiverStream::new(self.states.subscribe())
        }
    }

    fn mechanisms(names: &[&str]) -> Element {
        let mut builder = Element::builder("mechanisms", ns::SASL);
        for name in names {
            builder = builder.append(
                Element::builder("mechanism", ns::SASL)
                    .append(*name)
                    .build(),
            );
        }
        builder.build()
    }

    fn credentials(jid: &str, password: &str) -> Credentials {
        Credentials::new(Jid::from_str(jid).unwrap(), password)
    }

    type Results = Arc<Mutex<Vec<AuthorizationResult>>>;

    fn manager() -> (SaslManager<MockConnection>, MockConnection, Results) {
        let connection = MockConnection::default();
        let manager = SaslManager::new(connection.clone());
        let results = Arc::new(Mutex::new(Vec::new()));
        let recorded = results.clone();
        manager.on_result(move |result| {
            recorded.lock().unwrap().push(result.clone());
            Ok(())
        });
        (manager, connection, results)
    }

    #[test]
    fn success_after_plain() {
        let (manager, connection, results) = manager();
        manager
            .send_authorization_request(
                &credentials("me@domain", "password"),
                &mechanisms(&["UNKNOWN", "PLAIN"]),
            )
            .unwrap();
        connection.receives("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>");
        assert_eq!(
            *results.lock().unwrap(),
            vec![AuthorizationResult::Succeeded(
                Jid::from_str("me@domain").unwrap()
            )]
        );
    }

    #[test]
    fn success_with_data_after_plain_is_rejected() {
        let (manager, _connection, results) = manager();
        manager
            .send_authorization_request(
                &credentials("me@domain", "password"),
                &mechanisms(&["PLAIN"]),
            )
            .unwrap();
        let stanza: Element = "<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>1234</success>"
            .parse()
            .unwrap();
        assert!(matches!(
            manager.handle_stanza(&stanza),
            Err(AuthError::Mechanism(MechanismError::UnexpectedChallenge(_)))
        ));
        let results = results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], AuthorizationResult::Error(_)));
    }

    #[test]
    fn failure() {
        let (manager, connection, results) = manager();
        manager
            .send_authorization_request(
                &credentials("node@domain", "password"),
                &mechanisms(&["PLAIN"]),
            )
            .unwrap();
        connection.receives(
            "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/></failure>",
        );
        assert_eq!(
            *results.lock().unwrap(),
            vec![AuthorizationResult::Failed(Some("not-authorized".to_owned()))]
        );
    }

    #[test]
    fn anonymous() {
        let (manager, connection, _) = manager();
        let credentials = Credentials::anonymous(Jid::from_str("domain").unwrap());
        manager
            .send_authorization_request(&credentials, &mechanisms(&["ANONYMOUS", "PLAIN"]))
            .unwrap();
        let auth = connection.last_sent();
        assert!(auth.is("auth", ns::SASL));
        assert_eq!(auth.attr("mechanism"), Some("ANONYMOUS"));
        assert_eq!(auth.text(), "=");
    }

    #[test]
    fn plain_when_only_plain() {
        let (manager, connection, _) = manager();
        manager
            .send_authorization_request(
                &credentials("node@domain/resource", "password"),
                &mechanisms(&["UNKNOWN", "PLAIN"]),
            )
            .unwrap();
        let auth = connection.last_sent();
        assert!(auth.is("auth", ns::SASL));
        assert_eq!(auth.attr("mechanism"), Some("PLAIN"));
        assert_eq!(
            Base64.decode(auth.text()).unwrap(),
            b"node@domain\0node\0password"
        );
    }

    #[test]
    fn mechanism_names_are_case_insensitive() {
        let (manager, connection, _) = manager();
        manager
            .send_authorization_request(
                &credentials("node@domain", "password"),
                &mechanisms(&["plain"]),
            )
            .unwrap();
        assert_eq!(connection.last_sent().attr("mechanism"), Some("PLAIN"));
    }

    #[test]
    fn plain_without_node() {
        let (manager, connection, _) = manager();
        manager
            .send_authorization_request(
                &credentials("domain/resource", ""),
                &mechanisms(&["PLAIN"]),
            )
            .unwrap();
        let auth = connection.last_sent();
        assert_eq!(auth.attr("mechanism"), Some("PLAIN"));
        assert_eq!(Base64.decode(auth.text()).unwrap(), b"domain\0\0");
    }

    #[test]
    fn scram_preferred() {
        let (manager, connection, _) = manager();
        manager
            .send_authorization_request(
                &credentials("node@domain/resource", "password"),
                &mechanisms(&["UNKNOWN", "PLAIN", "SCRAM-SHA-1"]),
            )
            .unwrap();
        assert_eq!(connection.last_sent().attr("mechanism"), Some("SCRAM-SHA-1"));
    }

    #[test]
    fn challenge_gets_response() {
        let (manager, connection, _) = manager();
        manager
            .send_authorization_request(
                &credentials("node@domain/resource", "password"),
                &mechanisms(&["PLAIN"]),
            )
            .unwrap();
        connection.receives("<challenge xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>");
        let sent = connection.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].is("response", ns::SASL));
        assert_eq!(sent[1].text(), sent[0].text());
    }

    #[test]
    fn no_matching_mechanism() {
        let (manager, connection, _) = manager();
        assert_eq!(
            manager.send_authorization_request(
                &credentials("node@domain/resource", "password"),
                &mechanisms(&["UNKNOWN", "FOOBAR"]),
            ),
            Err(AuthError::NoMechanism)
        );
        assert_eq!(
            manager.send_authorization_request(
                &credentials("node@domain/resource", "password"),
                &mechanisms(&[]),
            ),
            Err(AuthError::NoMechanism)
        );
        assert!(connection.sent().is_empty());
    }

    #[test]
    fn scram_exchange() {
        let (manager, connection, results) = manager();
        let manager = manager.with_nonce_source(FixedNonce::new("fyko+d2lbbFgONRv9qkxdawL"));
        manager
            .send_authorization_request(
                &credentials("user@domain", "pencil"),
                &mechanisms(&["SCRAM-SHA-1"]),
            )
            .unwrap();
        assert_eq!(
            Base64.decode(connection.last_sent().text()).unwrap(),
            b"n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL"
        );

        connection.receives(&format!(
            "<challenge xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>{}</challenge>",
            Base64.encode("r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096")
        ));
        let response = connection.last_sent();
        assert!(response.is("response", ns::SASL));
        assert_eq!(
            Base64.decode(response.text()).unwrap(),
            b"c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p=v0X8v3Bz2T0CJGbJQyF0X+HI4Ts="
        );

        connection.receives(&format!(
            "<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>{}</success>",
            Base64.encode("v=rmF9pqV8S7suAoZWja4dJRkFsKQ=")
        ));
        assert_eq!(
            *results.lock().unwrap(),
            vec![AuthorizationResult::Succeeded(
                Jid::from_str("user@domain").unwrap()
            )]
        );
    }

    #[test]
    fn scram_bad_server_signature() {
        let (manager, connection, results) = manager();
        let manager = manager.with_nonce_source(FixedNonce::new("fyko+d2lbbFgONRv9qkxdawL"));
        manager
            .send_authorization_request(
                &credentials("user@domain", "pencil"),
                &mechanisms(&["SCRAM-SHA-1"]),
            )
            .unwrap();
        connection.receives(&format!(
            "<challenge xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>{}</challenge>",
            Base64.encode("r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096")
        ));
        let success: Element = format!(
            "<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>{}</success>",
            Base64.encode("v=AAAAAAAAAAAAAAAAAAAAAAAAAAA=")
        )
        .parse()
        .unwrap();
        assert_eq!(
            manager.handle_stanza(&success),
            Err(AuthError::MutualAuthentication)
        );
        assert_eq!(
            *results.lock().unwrap(),
            vec![AuthorizationResult::Error(AuthError::MutualAuthentication)]
        );
    }

    #[test]
    fn dropped_manager_unregisters() {
        let (manager, connection, _) = manager();
        assert_eq!(connection.received.len(), 1);
        drop(manager);
        connection.receives("<message xmlns='jabber:client'/>");
        assert_eq!(connection.received.len(), 0);
    }

    #[test]
    fn other_namespaces_are_ignored() {
        let (manager, connection, results) = manager();
        connection.receives("<message xmlns='jabber:client'/>");
        let stanza: Element = "<success xmlns='jabber:client'/>".parse().unwrap();
        assert_eq!(manager.handle_stanza(&stanza), Ok(()));
        assert!(results.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn authenticate_resolves_with_result() {
        let (manager, connection, _) = manager();
        let credentials = credentials("node@domain", "password");
        let mechanisms = mechanisms(&["PLAIN"]);
        let outcome = {
            let attempt = manager.authenticate(&credentials, &mechanisms);
            tokio::pin!(attempt);
            assert!(futures::poll!(attempt.as_mut()).is_pending());
            connection.receives(
                "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/></failure>",
            );
            attempt.await
        };
        assert_eq!(
            outcome,
            Err(AuthError::Failure(Some("not-authorized".to_owned())))
        );
    }
}
