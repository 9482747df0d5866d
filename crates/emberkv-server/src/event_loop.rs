//! The event loop: a single accept/readable/writable dispatch loop plus
//! a cron tick that drives progressive rehashing.
//!
//! There is exactly one task here — this `run` future itself. No
//! connection is ever handed to `tokio::spawn`; every fd's readiness is
//! awaited directly via `futures::future::select_all` over this task's
//! own stack, so the keyspace is only ever touched from one place at a
//! time without any locking.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::{Duration, Instant};

use emberkv_core::Keyspace;
use emberkv_proto::{ParseOutcome, Reply};
use futures::future::{select_all, FutureExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::connection::Connection;
use crate::dispatch::Dispatcher;

/// How often the cron tick fires.
const CRON_INTERVAL: Duration = Duration::from_millis(100);
/// Wall-clock budget handed to each rehashing Dict per cron tick.
const REHASH_BUDGET: Duration = Duration::from_millis(1);

enum Event {
    Cron,
    Shutdown,
    Accept(std::io::Result<(TcpStream, SocketAddr)>),
    Readable(u64),
    Writable(u64),
}

pub struct EventLoop {
    listener: TcpListener,
    connections: HashMap<u64, Connection>,
    next_id: u64,
    keyspace: Keyspace,
    dispatcher: Dispatcher,
}

impl EventLoop {
    pub fn new(listener: TcpListener, keyspace: Keyspace, dispatcher: Dispatcher) -> Self {
        Self {
            listener,
            connections: HashMap::new(),
            next_id: 0,
            keyspace,
            dispatcher,
        }
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// Runs until `shutdown` fires.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let mut futures: Vec<Pin<Box<dyn Future<Output = Event> + '_>>> = Vec::new();

            futures.push(Box::pin(
                tokio::time::sleep(CRON_INTERVAL).map(|_| Event::Cron),
            ));
            futures.push(Box::pin(async {
                let _ = shutdown.recv().await;
                Event::Shutdown
            }));
            futures.push(Box::pin(self.listener.accept().map(Event::Accept)));
            for (&id, conn) in self.connections.iter() {
                if conn.has_pending_write() {
                    futures.push(Box::pin(
                        conn.stream.writable().map(move |_| Event::Writable(id)),
                    ));
                } else {
                    futures.push(Box::pin(
                        conn.stream.readable().map(move |_| Event::Readable(id)),
                    ));
                }
            }

            let (event, _index, rest) = select_all(futures).await;
            drop(rest);

            match event {
                Event::Shutdown => {
                    tracing::info!("shutdown signal received, leaving event loop");
                    return;
                }
                Event::Cron => self.drive_cron(),
                Event::Accept(result) => self.handle_accept(result),
                Event::Readable(id) => self.service_readable(id),
                Event::Writable(id) => self.service_writable(id),
            }
        }
    }

    fn drive_cron(&mut self) {
        self.keyspace.drive(Instant::now() + REHASH_BUDGET);
    }

    fn handle_accept(&mut self, result: std::io::Result<(TcpStream, SocketAddr)>) {
        match result {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "failed to set TCP_NODELAY");
                }
                let id = self.next_id;
                self.next_id += 1;
                tracing::info!(id, %addr, "client connected");
                self.connections.insert(id, Connection::new(stream));
            }
            Err(e) => tracing::warn!(error = %e, "accept failed"),
        }
    }

    fn service_readable(&mut self, id: u64) {
        {
            let Some(conn) = self.connections.get_mut(&id) else {
                return;
            };
            conn.read_ready();
            if conn.is_closed() {
                self.connections.remove(&id);
                return;
            }
        }

        loop {
            let outcome = match self.connections.get(&id) {
                Some(conn) => emberkv_proto::parse(conn.read_buffer()),
                None => return,
            };
            match outcome {
                ParseOutcome::Complete { args, consumed } => {
                    self.connections.get_mut(&id).unwrap().consume(consumed);
                    let reply = self.dispatcher.dispatch(&mut self.keyspace, &args);
                    self.connections
                        .get_mut(&id)
                        .unwrap()
                        .enqueue(&reply.encode());
                }
                ParseOutcome::Incomplete => break,
                ParseOutcome::Malformed(e) => {
                    tracing::debug!(id, error = %e, "protocol error");
                    let conn = self.connections.get_mut(&id).unwrap();
                    let discarded = conn.read_buffer().len();
                    conn.enqueue(&Reply::Error("ERR protocol error".to_string()).encode());
                    conn.consume(discarded);
                    break;
                }
            }
        }

        if let Some(conn) = self.connections.get_mut(&id) {
            conn.write_ready();
            if conn.is_closed() {
                self.connections.remove(&id);
            }
        }
    }

    fn service_writable(&mut self, id: u64) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.write_ready();
            if conn.is_closed() {
                self.connections.remove(&id);
            }
        }
    }
}
