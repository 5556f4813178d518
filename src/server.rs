//! Transport for control sessions.
//!
//! Accepts TCP connections (or runs one session over stdin/stdout), feeds
//! received bytes to the session loop and delivers the replies it queues.
//! The session loop itself never touches a socket: it only fills the
//! client's outbound buffer and raises flags that this module acts on.

use crate::client::Client;
use crate::commands::Builtins;
use crate::config::Config;
use crate::interpreter::CommandInterpreter;
use crate::session::{control_callback, Activation, SessionSettings};
use crate::store::ServerState;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

/// Transport errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),
    #[error("client limit of {0} reached")]
    TooManyClients(usize),
    #[error("connection limiter closed")]
    LimiterClosed(#[from] tokio::sync::AcquireError),
}

/// Control server instance
pub struct Server {
    config: Config,
    state: Arc<ServerState>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let state = ServerState::new(config.max_connections);
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));

        Server {
            config,
            state,
            connection_limit,
        }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    fn settings(&self) -> SessionSettings {
        SessionSettings {
            max_line_length: self.config.max_line_length,
        }
    }

    /// Bind the configured listen address.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr: SocketAddr = self
            .config
            .listen
            .parse()
            .map_err(|_| ServerError::InvalidAddress(self.config.listen.clone()))?;
        let listener = create_listener(addr, self.config.backlog)?;
        Ok(TcpListener::from_std(listener)?)
    }

    /// Bind and accept connections until an unrecoverable error.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        info!(address = %listener.local_addr()?, "Server listening");
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            // Wait for a connection slot
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match listener.accept().await {
                Ok((stream, addr)) => {
                    let Some(id) = self.state.register(&addr.to_string()) else {
                        warn!(peer = %addr, "Client limit reached, rejecting connection");
                        continue;
                    };
                    debug!(client = %id, peer = %addr, "New connection");

                    let state = Arc::clone(&self.state);
                    let settings = self.settings();
                    let buffer_size = self.config.buffer_size;

                    tokio::spawn(async move {
                        let (reader, writer) = stream.into_split();
                        let mut client = Client::with_capacity(id, buffer_size);
                        let mut builtins = Builtins::new(Arc::clone(&state));

                        match serve_connection(
                            reader,
                            writer,
                            &mut client,
                            &mut builtins,
                            &settings,
                            &state,
                        )
                        .await
                        {
                            Ok(totals) => debug!(client = %id, ?totals, "Session ended"),
                            Err(e) => debug!(client = %id, error = %e, "Connection error"),
                        }

                        state.unregister(id);
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Run a single control session over stdin/stdout.
    pub async fn run_stdio(&self) -> Result<Activation, ServerError> {
        let id = self
            .state
            .register("stdio")
            .ok_or(ServerError::TooManyClients(self.config.max_connections))?;
        info!(client = %id, "Control session on stdio");

        let mut client = Client::with_capacity(id, self.config.buffer_size);
        let mut builtins = Builtins::new(Arc::clone(&self.state));
        let result = serve_connection(
            tokio::io::stdin(),
            tokio::io::stdout(),
            &mut client,
            &mut builtins,
            &self.settings(),
            &self.state,
        )
        .await;

        self.state.unregister(id);
        result
    }
}

/// Drive one control session until the peer ends it.
///
/// Each read is followed by one activation of the session loop; queued
/// replies are written out whenever the loop asked for a flush. Returns
/// the totals of every activation.
pub async fn serve_connection<R, W, I>(
    mut reader: R,
    mut writer: W,
    client: &mut Client,
    interpreter: &mut I,
    settings: &SessionSettings,
    state: &ServerState,
) -> Result<Activation, ServerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    I: CommandInterpreter,
{
    let mut totals = Activation::default();

    loop {
        let n = reader.read_buf(client.inbound_mut().read_target()).await?;
        let closed = n == 0;
        trace!(client = %client.id(), bytes = n, closed, "Read");

        let activation = control_callback(client, closed, interpreter, settings);
        state
            .counters
            .parse_errors
            .fetch_add(activation.parse_errors as u64, Ordering::Relaxed);
        state
            .counters
            .discarded_lines
            .fetch_add(activation.discarded as u64, Ordering::Relaxed);
        totals += activation;

        if client.take_flush_request() {
            let data = client.outbound_mut().take();
            writer.write_all(&data).await?;
            writer.flush().await?;
        }

        if client.exit_requested() {
            break;
        }
    }

    writer.shutdown().await?;
    Ok(totals)
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr, backlog: i32) -> std::io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
