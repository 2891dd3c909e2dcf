use log::warn;
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Error a listener may hand back; it is logged and the remaining listeners still run.
pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// Returned by a handler to unregister itself; it is not called again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerClosed;

impl fmt::Display for ListenerClosed {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "listener closed")
    }
}

impl StdError for ListenerClosed {}

/// Connection lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// The server assigned a session
    Connected,
    /// The session ended, with the reason
    Disconnected(String),
    /// A fatal error ended the session
    Error(String),
    /// A request failed and will be resent after `delay`
    WaitingForRetry {
        /// Consecutive error count, starting at 1
        attempt: u32,
        /// Time until the resend
        delay: Duration,
    },
}

type Callback<T> = Arc<dyn Fn(&T) -> Result<(), HandlerError> + Send + Sync>;

enum Listener<T> {
    Callback(Callback<T>),
    Channel(UnboundedSender<T>),
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        match self {
            Listener::Callback(f) => Listener::Callback(f.clone()),
            Listener::Channel(tx) => Listener::Channel(tx.clone()),
        }
    }
}

/// Listeners for one kind of event, notified in registration order.
///
/// The list is snapshotted before delivery so handlers may register more listeners or
/// trigger further events.
pub(crate) struct Listeners<T> {
    inner: Mutex<Vec<Listener<T>>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Listeners {
            inner: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> Listeners<T> {
    fn lock(&self) -> MutexGuard<'_, Vec<Listener<T>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add_handler<F>(&self, handler: F)
    where
        F: Fn(&T) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.lock().push(Listener::Callback(Arc::new(handler)));
    }

    pub(crate) fn subscribe(&self) -> UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(Listener::Channel(tx));
        rx
    }

    pub(crate) fn emit(&self, event: &T) {
        let listeners = {
            let mut listeners = self.lock();
            listeners.retain(|listener| match listener {
                Listener::Channel(tx) => !tx.is_closed(),
                Listener::Callback(_) => true,
            });
            listeners.clone()
        };
        let mut closed = Vec::new();
        for listener in listeners {
            match listener {
                Listener::Callback(handler) => match handler(event) {
                    Ok(()) => (),
                    Err(e) if e.is::<ListenerClosed>() => closed.push(handler),
                    Err(e) => warn!("Listener failed: {}", e),
                },
                Listener::Channel(tx) => {
                    // A receiver dropped since the snapshot; pruned on the next emit.
                    let _ = tx.send(event.clone());
                }
            }
        }
        if !closed.is_empty() {
            self.lock().retain(|listener| match listener {
                Listener::Callback(handler) => !closed.iter().any(|c| Arc::ptr_eq(c, handler)),
                Listener::Channel(_) => true,
            });
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}
