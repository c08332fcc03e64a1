/// Blocking HTTP server: one thread per connection, one request per connection.
use super::request::read_request;
use super::response::Response;
use super::router::Router;
use crate::config::loader::ServerConfig;
use crate::config::types::{Result, ServiceError};
use log::{debug, info, warn};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How often the accept loop re-checks whether to keep running
const ACCEPT_POLL: Duration = Duration::from_millis(50);

pub struct HttpServer {
    listener: TcpListener,
    router: Arc<Router>,
    config: ServerConfig,
}

impl HttpServer {
    pub fn bind(config: &ServerConfig, router: Router) -> Result<Self> {
        let listener = TcpListener::bind(config.bind.as_str()).map_err(|e| {
            ServiceError::Http(format!("Failed to bind {}: {}", config.bind, e))
        })?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            router: Arc::new(router),
            config: config.clone(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `keep_running` returns false.
    ///
    /// Connections already accepted finish on their own threads.
    pub fn serve_until<F>(&self, keep_running: F) -> Result<()>
    where
        F: Fn() -> bool,
    {
        info!("learnbox listening on http://{}", self.local_addr()?);
        while keep_running() {
            match self.listener.accept() {
                Ok((stream, peer)) => self.spawn_connection(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        info!("learnbox stopped accepting connections");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let router = Arc::clone(&self.router);
        let config = self.config.clone();
        let spawned = thread::Builder::new()
            .name("learnbox-conn".to_string())
            .spawn(move || {
                if let Err(e) = handle_connection(stream, &router, &config) {
                    debug!("connection from {} ended: {}", peer, e);
                }
            });
        if let Err(e) = spawned {
            warn!("could not spawn a connection thread for {}: {}", peer, e);
        }
    }
}

fn handle_connection(mut stream: TcpStream, router: &Router, config: &ServerConfig) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(config.read_timeout()))?;

    let response = match read_request(&mut stream, config.max_request_bytes) {
        Ok(request) => router.handle(&request),
        Err(e) => match e.status() {
            Some(status) => {
                debug!("rejecting request: {}", e);
                router.metrics().record_http_status(status);
                Response::error(status, &e.to_string())
            }
            None => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, e.to_string())),
        },
    };
    response.write_to(&mut stream)
}
