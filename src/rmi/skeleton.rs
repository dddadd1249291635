//! Server side of the RMI runtime.
//!
//! A [`Skeleton`] owns a listening socket and serves one remote interface
//! through a [`Dispatch`] adapter. Each accepted connection is handled by its
//! own worker task: read one request, dispatch, write one response, close.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::codec;
use super::message::{Request, Response};
use super::RmiError;

/// Per-interface request dispatcher bound into a skeleton.
///
/// Implementations decode the argument tuple, invoke the served object and
/// encode the outcome. A returned error means the request could not be
/// dispatched at all (unknown method, signature mismatch, decode failure) and
/// is reported to the caller as [`Response::RmiException`].
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    /// Interface name, for diagnostics and stub display.
    fn interface(&self) -> &'static str;

    async fn dispatch(&self, request: Request) -> Result<Response, RmiError>;
}

/// Observation hooks for skeleton lifecycle and failures.
pub trait SkeletonHooks: Send + Sync + 'static {
    /// Called when the accept loop fails; return `true` to resume listening.
    fn listen_error(&self, _error: &RmiError) -> bool {
        false
    }

    /// Advisory notification of a failed dispatch on one connection.
    fn service_error(&self, _error: &RmiError) {}

    /// Called exactly once when the listener exits, with the fatal accept
    /// error if one stopped it.
    fn stopped(&self, _cause: Option<&RmiError>) {}
}

/// Hooks implementation that ignores every notification.
pub struct NoHooks;

impl SkeletonHooks for NoHooks {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    Started,
    Running,
    Interrupted,
    Stopping,
    Stopped,
}

struct Inner {
    state: State,
    local: Option<SocketAddr>,
    shutdown: Option<watch::Sender<bool>>,
}

/// Multithreaded server endpoint for one remote interface.
pub struct Skeleton {
    dispatch: Arc<dyn Dispatch>,
    hooks: Arc<dyn SkeletonHooks>,
    requested: Option<SocketAddr>,
    inner: Arc<Mutex<Inner>>,
}

impl Skeleton {
    /// Binds `dispatch` at `address`; `None` asks for a system-chosen
    /// loopback port at start time.
    pub fn new(dispatch: Arc<dyn Dispatch>, address: Option<SocketAddr>) -> Self {
        Self::with_hooks(dispatch, address, Arc::new(NoHooks))
    }

    pub fn with_hooks(
        dispatch: Arc<dyn Dispatch>,
        address: Option<SocketAddr>,
        hooks: Arc<dyn SkeletonHooks>,
    ) -> Self {
        Skeleton {
            dispatch,
            hooks,
            requested: address,
            inner: Arc::new(Mutex::new(Inner { state: State::New, local: None, shutdown: None })),
        }
    }

    /// The bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.inner).local
    }

    pub fn interface(&self) -> &'static str {
        self.dispatch.interface()
    }

    /// Binds the listening socket and launches the listener task.
    ///
    /// Legal from the initial state and after a stop has completed; a
    /// restarted skeleton with no fixed address may bind a different port.
    /// Must be called within a tokio runtime.
    pub fn start(&self) -> Result<(), RmiError> {
        let mut inner = lock(&self.inner);
        match inner.state {
            State::New | State::Stopped => {}
            _ => return Err(RmiError::AlreadyStarted),
        }
        let requested =
            self.requested.unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 0)));
        let listener =
            std::net::TcpListener::bind(requested).map_err(|err| RmiError::Io(err.to_string()))?;
        listener.set_nonblocking(true).map_err(|err| RmiError::Io(err.to_string()))?;
        let listener =
            TcpListener::from_std(listener).map_err(|err| RmiError::Io(err.to_string()))?;
        let local = listener.local_addr().map_err(|err| RmiError::Io(err.to_string()))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        inner.state = State::Started;
        inner.local = Some(local);
        inner.shutdown = Some(shutdown_tx);
        debug!(interface = self.dispatch.interface(), %local, "skeleton started");

        tokio::spawn(listen(
            listener,
            shutdown_rx,
            self.dispatch.clone(),
            self.hooks.clone(),
            self.inner.clone(),
        ));
        Ok(())
    }

    /// Asks the listener to exit. In-flight workers finish naturally; the
    /// `stopped` hook fires once the listener is gone. A no-op unless the
    /// skeleton is currently accepting.
    pub fn stop(&self) {
        let mut inner = lock(&self.inner);
        if matches!(inner.state, State::Started | State::Running) {
            inner.state = State::Interrupted;
            if let Some(shutdown) = &inner.shutdown {
                let _ = shutdown.send(true);
            }
        }
    }
}

fn lock(inner: &Arc<Mutex<Inner>>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn listen(
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    dispatch: Arc<dyn Dispatch>,
    hooks: Arc<dyn SkeletonHooks>,
    inner: Arc<Mutex<Inner>>,
) {
    {
        let mut inner = lock(&inner);
        if inner.state == State::Started {
            inner.state = State::Running;
        }
    }
    let cause = loop {
        tokio::select! {
            _ = shutdown.changed() => break None,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!(interface = dispatch.interface(), %peer, "accepted connection");
                    tokio::spawn(serve(socket, dispatch.clone(), hooks.clone()));
                }
                Err(error) => {
                    let error = RmiError::Io(error.to_string());
                    if !hooks.listen_error(&error) {
                        break Some(error);
                    }
                }
            }
        }
    };
    drop(listener);
    {
        let mut inner = lock(&inner);
        inner.state = State::Stopping;
        inner.shutdown = None;
        inner.state = State::Stopped;
    }
    hooks.stopped(cause.as_ref());
}

async fn serve(mut socket: TcpStream, dispatch: Arc<dyn Dispatch>, hooks: Arc<dyn SkeletonHooks>) {
    let request: Request = match codec::read_frame(&mut socket).await {
        Ok(request) => request,
        Err(error) => {
            hooks.service_error(&error);
            let _ = codec::write_frame(&mut socket, &Response::RmiException(error)).await;
            return;
        }
    };
    let method = request.sig.name.clone();
    let response = match dispatch.dispatch(request).await {
        Ok(response) => response,
        Err(error) => {
            hooks.service_error(&error);
            Response::RmiException(error)
        }
    };
    if let Err(error) = codec::write_frame(&mut socket, &response).await {
        warn!(interface = dispatch.interface(), %method, %error, "failed to write response");
    }
    let _ = socket.shutdown().await;
}
