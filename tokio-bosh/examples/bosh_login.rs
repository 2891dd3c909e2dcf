use futures::StreamExt;
use std::env::args;
use std::str::FromStr;
use tokio_bosh::{
    login, BoshTransport, ConnectionSettings, ConnectionState, Credentials, Jid,
    ReqwestConnector, XmppConnection,
};

#[tokio::main]
async fn main() -> Result<(), Option<()>> {
    env_logger::init();

    let args: Vec<String> = args().collect();
    if args.len() != 3 && args.len() != 4 {
        println!("Usage: {} <http-bind url> <jid> [password]", args[0]);
        return Err(None);
    }

    let jid = Jid::from_str(&args[2]).map_err(|e| {
        println!("Invalid JID {}: {}", args[2], e);
        None
    })?;
    let domain = jid.domain_str().to_owned();
    let credentials = match args.get(3) {
        Some(password) => Credentials::new(jid, password.as_str()),
        None => Credentials::anonymous(jid),
    };

    let transport = BoshTransport::new(ReqwestConnector::new());
    transport.set_settings(ConnectionSettings::new(args[1].as_str(), domain));
    let mut states = transport.states();

    match login(&transport, &credentials).await {
        Ok(jid) => println!("Logged in as {}.", jid),
        Err(e) => {
            println!("Login failed: {}", e);
            return Err(None);
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => transport.disconnect(),
        state = async {
            while let Some(state) = states.next().await {
                if let ConnectionState::Disconnected(_) | ConnectionState::Error(_) = state {
                    return Some(state);
                }
            }
            None
        } => println!("Connection closed: {:?}", state),
    }
    Ok(())
}
