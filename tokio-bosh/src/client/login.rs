use futures::StreamExt;
use jid::Jid;
use log::{debug, info};
use minidom::Element;

use super::credentials::Credentials;
use super::sasl::SaslManager;
use crate::bosh::{BoshTransport, HttpConnector};
use crate::connection::XmppConnection;
use crate::error::Error;
use crate::event::ConnectionState;
use crate::ns;

/// Opens a session on `transport` and authenticates with `credentials`.
///
/// Waits for the server to offer SASL mechanisms, runs the exchange and then requests a
/// stream restart. The transport must have its settings set. On an authentication error the
/// session is terminated.
pub async fn login<C: HttpConnector>(
    transport: &BoshTransport<C>,
    credentials: &Credentials,
) -> Result<Jid, Error> {
    let mut stanzas = transport.stanzas();
    let mut states = transport.states();
    let manager = SaslManager::new(transport.clone());
    transport.connect()?;

    let mechanisms = loop {
        tokio::select! {
            stanza = stanzas.next() => match stanza {
                Some(stanza) => {
                    if let Some(mechanisms) = sasl_mechanisms(&stanza) {
                        break mechanisms;
                    }
                    debug!("Skipping {} while waiting for stream features", stanza.name());
                }
                None => return Err(closed()),
            },
            state = states.next() => check_state(state)?,
        }
    };

    let result = {
        let authentication = manager.authenticate(credentials, &mechanisms);
        tokio::pin!(authentication);
        loop {
            tokio::select! {
                result = &mut authentication => break result,
                state = states.next() => check_state(state)?,
            }
        }
    };

    match result {
        Ok(jid) => {
            info!("Logged in as {}, restarting stream", jid);
            transport.restart_stream();
            transport.flush();
            Ok(jid)
        }
        Err(e) => {
            transport.disconnect();
            Err(e.into())
        }
    }
}

/// The `<mechanisms/>` offered by a `<stream:features/>` stanza.
fn sasl_mechanisms(stanza: &Element) -> Option<Element> {
    if !stanza.is("features", ns::STREAM) {
        return None;
    }
    stanza.get_child("mechanisms", ns::SASL).cloned()
}

fn check_state(state: Option<ConnectionState>) -> Result<(), Error> {
    match state {
        Some(ConnectionState::Disconnected(reason)) | Some(ConnectionState::Error(reason)) => {
            Err(Error::Disconnected(reason))
        }
        Some(_) => Ok(()),
        None => Err(closed()),
    }
}

fn closed() -> Error {
    Error::Disconnected("connection closed".to_owned())
}
