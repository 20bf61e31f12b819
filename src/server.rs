//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Postern.
//
// Postern is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3  of the License, or (at your option)
// any later version.
//
// Postern is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Postern. If not, see <http://www.gnu.org/licenses/>.

use std::mem;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::handler::{
    AuthenticationHandlerFactory, Hooks, MessageHandlerFactory,
    SessionIdFactory, TimeBasedSessionIdFactory, TlsSocketWrapper,
};
use crate::options::ServerOptions;
use crate::smtp::connection::Connection;
use crate::smtp::reply::Reply;
use crate::smtp::session::Session;
use crate::support::async_io::SessionIo;
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;

/// Bound on how long `stop` waits for the accept task and the in-flight
/// sessions it interrupts.
const SHUTDOWN_WINDOW: Duration = Duration::from_secs(5);

/// The embeddable SMTP server.
///
/// Construct it with a `MessageHandlerFactory`, attach the optional
/// collaborators, then `start` it on a running tokio runtime. A server is
/// single-shot: once stopped it cannot be started again.
pub struct SmtpServer {
    options: Arc<ServerOptions>,
    hooks: Hooks,
    state: State,
    active: Arc<AtomicUsize>,
    allocated_port: u16,
}

enum State {
    Idle,
    Running {
        local_addr: SocketAddr,
        shutdown: watch::Sender<bool>,
        acceptor: JoinHandle<()>,
    },
    Stopped,
}

impl SmtpServer {
    pub fn new(
        options: ServerOptions,
        message_handler_factory: Arc<dyn MessageHandlerFactory>,
    ) -> Self {
        let allocated_port = options.port;
        SmtpServer {
            options: Arc::new(options),
            hooks: Hooks {
                message: message_handler_factory,
                auth: None,
                tls: None,
                ids: Arc::new(TimeBasedSessionIdFactory::new()),
            },
            state: State::Idle,
            active: Arc::new(AtomicUsize::new(0)),
            allocated_port,
        }
    }

    /// Makes AUTH available. Without a factory the AUTH verb is refused
    /// and EHLO advertises no mechanisms.
    pub fn with_authentication_handler_factory(
        mut self,
        factory: Arc<dyn AuthenticationHandlerFactory>,
    ) -> Self {
        self.hooks.auth = Some(factory);
        self
    }

    /// Supplies the STARTTLS upgrade. Required when `enable_tls` is set.
    pub fn with_tls_wrapper(
        mut self,
        wrapper: Arc<dyn TlsSocketWrapper>,
    ) -> Self {
        self.hooks.tls = Some(wrapper);
        self
    }

    pub fn with_session_id_factory(
        mut self,
        factory: Arc<dyn SessionIdFactory>,
    ) -> Self {
        self.hooks.ids = factory;
        self
    }

    /// Binds the listening socket and spawns the accept loop.
    ///
    /// Fails with `AlreadyStarted` when running, and with `CannotRestart`
    /// once the server has been stopped.
    pub async fn start(&mut self) -> Result<(), Error> {
        match self.state {
            State::Idle => (),
            State::Running { .. } => return Err(Error::AlreadyStarted),
            State::Stopped => return Err(Error::CannotRestart),
        }

        if self.options.require_auth && self.hooks.auth.is_none() {
            return Err(Error::Config(
                "require_auth is set but no authentication handler \
                 factory was provided",
            ));
        }
        if self.options.enable_tls && self.hooks.tls.is_none() {
            return Err(Error::Config(
                "enable_tls is set but no TLS socket wrapper was provided",
            ));
        }

        let bind_ip = self
            .options
            .bind_address
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let addr = SocketAddr::new(bind_ip, self.options.port);

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(self.options.backlog)?;

        let local_addr = listener.local_addr()?;
        self.allocated_port = local_addr.port();
        info!("SMTP server listening on {}", local_addr);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let acceptor = tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            Arc::clone(&self.options),
            Arc::new(self.hooks.clone()),
            Arc::clone(&self.active),
        ));

        self.state = State::Running {
            local_addr,
            shutdown,
            acceptor,
        };
        Ok(())
    }

    /// Stops accepting, closes the listening socket, and interrupts
    /// in-flight sessions after their current command. Idempotent.
    pub async fn stop(&mut self) {
        let state = mem::replace(&mut self.state, State::Stopped);
        if let State::Running {
            local_addr,
            shutdown,
            mut acceptor,
        } = state
        {
            info!("SMTP server {} stopping", local_addr);
            let _ = shutdown.send(true);
            if tokio::time::timeout(SHUTDOWN_WINDOW, &mut acceptor)
                .await
                .is_err()
            {
                warn!(
                    "SMTP server {} sessions did not wind down in time",
                    local_addr,
                );
                acceptor.abort();
            }
            info!("SMTP server {} stopped", local_addr);
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    /// The port actually bound, which differs from the configured port
    /// when port 0 was requested. Meaningful once `start` has succeeded.
    pub fn allocated_port(&self) -> u16 {
        self.allocated_port
    }
}

async fn accept_loop(
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    options: Arc<ServerOptions>,
    hooks: Arc<Hooks>,
    active: Arc<AtomicUsize>,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => accept_one(
                    socket,
                    peer,
                    &options,
                    &hooks,
                    &active,
                    &mut sessions,
                ),
                Err(e) => warn!("Failed to accept connection: {}", e),
            },

            // Reap finished sessions so the set does not grow unbounded.
            Some(_) = sessions.join_next(), if !sessions.is_empty() => (),
        }
    }

    drop(listener);
    sessions.shutdown().await;
}

fn accept_one(
    socket: TcpStream,
    peer: SocketAddr,
    options: &Arc<ServerOptions>,
    hooks: &Arc<Hooks>,
    active: &Arc<AtomicUsize>,
    sessions: &mut JoinSet<()>,
) {
    let _ = socket.set_nodelay(true);

    if active.load(Ordering::Acquire) >= options.max_connections {
        warn!(
            "Rejecting connection from {}: connection limit reached",
            peer,
        );
        let reply = Reply::too_many_connections(&options.host_name);
        sessions.spawn(async move {
            let mut socket = socket;
            let _ = socket.write_all(reply.wire_format().as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        return;
    }

    active.fetch_add(1, Ordering::AcqRel);
    let guard = ActiveGuard(Arc::clone(active));

    let session_id = hooks.ids.next();
    let log_prefix = LogPrefix::new(peer.to_string(), session_id.clone());
    info!("{} Connection established", log_prefix);

    let connection = Connection::new(
        SessionIo::new(Box::new(socket), options.connection_timeout),
        Arc::clone(options),
        Arc::clone(hooks),
        Session::new(session_id, peer),
        log_prefix,
    );

    sessions.spawn(async move {
        let _guard = guard;
        connection.run().await;
    });
}

/// Decrements the admission counter when a session task ends, however it
/// ends.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
