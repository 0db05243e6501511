use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{lock, Error, Result};
use crate::handlers;
use crate::http::{read_request_head, Request, NOT_FOUND};
use crate::log_mailbox::LogMailbox;
use crate::router::Router;
use crate::session::Session;
use crate::worker_pool::WorkerPool;

/// Handle on the embedded server. Clones share the same server.
///
/// `start` always leaves exactly one accept loop running, stopping the
/// previous one first. `stop` cuts every connection and never waits on a
/// slow peer.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: ServerConfig,
    router: Router<Server>,
    workers: Arc<WorkerPool>,
    log: Arc<LogMailbox>,
    started_at: Mutex<Instant>,
    running: Mutex<Option<Running>>,
    stopped: Condvar,
    session: Mutex<Option<Arc<Session>>>,
    progress_in_use: AtomicBool,
}

struct Running {
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl Server {
    pub fn new(config: ServerConfig) -> Server {
        let log = Arc::new(LogMailbox::new());
        let workers = {
            let log = Arc::clone(&log);
            WorkerPool::with_reporter(move |line| log.log(line))
        };

        Server {
            inner: Arc::new(ServerInner {
                config,
                router: Router::new(),
                workers: Arc::new(workers),
                log,
                started_at: Mutex::new(Instant::now()),
                running: Mutex::new(None),
                stopped: Condvar::new(),
                session: Mutex::new(None),
                progress_in_use: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Binds the listener and starts accepting. Returns the bound address.
    pub fn start(&self) -> Result<SocketAddr> {
        // Held until the new instance is installed, so concurrent starts queue up.
        let mut running = lock(&self.inner.running);
        if let Some(previous) = running.take() {
            self.shut_down(previous);
        }

        info!("starting server");
        *lock(&self.inner.started_at) = Instant::now();
        self.inner.log.close();
        self.inner.router.clear();
        handlers::register_defaults(self);

        let listener = TcpListener::bind(self.inner.config.bind_addr())?;
        let local_addr = listener.local_addr()?;
        // Polled so the loop can notice `stop`.
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_thread = {
            let server = self.clone();
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("suchat-accept".to_owned())
                .spawn(move || server.accept_loop(listener, shutdown))?
        };

        *running = Some(Running {
            shutdown,
            accept_thread: Some(accept_thread),
            local_addr,
        });

        info!(address = %local_addr, "server listening");
        Ok(local_addr)
    }

    /// Stops accepting, cuts all live connections and detaches the console.
    pub fn stop(&self) {
        let running = lock(&self.inner.running).take();
        if let Some(running) = running {
            self.shut_down(running);
        }
    }

    fn shut_down(&self, mut running: Running) {
        info!("stopping server");
        running.shutdown.store(true, Ordering::SeqCst);

        if let Some(accept_thread) = running.accept_thread.take() {
            // Stop may be scheduled from a worker, never from the accept loop itself.
            if accept_thread.thread().id() != thread::current().id() && accept_thread.join().is_err() {
                error!("accept loop panicked");
            }
        }

        self.inner.workers.terminate_all();
        self.inner.log.close();
        self.inner.router.clear();
        self.inner.stopped.notify_all();
        info!("server stopped");
    }

    /// Stops the server after `delay` on a separate thread, so the caller's
    /// response can still be flushed.
    pub fn schedule_stop(&self, delay: Duration) {
        let server = self.clone();
        let spawned = thread::Builder::new()
            .name("suchat-stop".to_owned())
            .spawn(move || {
                thread::sleep(delay);
                server.stop();
            });

        if let Err(err) = spawned {
            warn!(error = %err, "could not schedule stop, stopping now");
            self.stop();
        }
    }

    /// Blocks until the server is stopped.
    pub fn wait(&self) {
        let running = lock(&self.inner.running);
        let _stopped = self
            .inner
            .stopped
            .wait_while(running, |running| running.is_some())
            .unwrap_or_else(|e| e.into_inner());
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.running).is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.inner.running).as_ref().map(|running| running.local_addr)
    }

    pub fn url_for(&self, path: &str) -> Option<String> {
        self.local_addr()
            .map(|addr| format!("{}{}", ServerConfig::base_url(addr), path))
    }

    pub fn uptime(&self) -> Duration {
        lock(&self.inner.started_at).elapsed()
    }

    pub fn register_handler<F>(&self, path: &str, handler: F)
    where
        F: Fn(&Server, TcpStream, &Request) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.router.register(path, handler);
    }

    pub fn registered_paths(&self) -> Vec<String> {
        self.inner.router.paths()
    }

    pub fn worker_count(&self) -> usize {
        self.inner.workers.len()
    }

    /// Starts a new session, replacing the current one.
    ///
    /// The id is the number of microseconds since the server started. Unique
    /// enough for one local browser, not a secret.
    pub fn new_session(&self) -> Arc<Session> {
        let id = self.uptime().as_micros() as u64;
        let session = Arc::new(Session::new(id));
        *lock(&self.inner.session) = Some(Arc::clone(&session));
        debug!(session_id = id, "new session");
        session
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        lock(&self.inner.session).clone()
    }

    pub fn log_mailbox(&self) -> &LogMailbox {
        &self.inner.log
    }

    /// Logs a line and copies it to the console viewer, if one is attached.
    pub fn log(&self, message: &str) {
        info!(target: "suchat_server::console", "{}", message);
        self.inner.log.log(message);
    }

    pub(crate) fn claim_progress(&self) -> bool {
        self.inner
            .progress_in_use
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn release_progress(&self) {
        self.inner.progress_in_use.store(false, Ordering::SeqCst);
    }

    fn accept_loop(&self, listener: TcpListener, shutdown: Arc<AtomicBool>) {
        let poll = self.inner.config.accept_poll();

        while !shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = self.handle_connection(stream, peer) {
                        error!(peer = %peer, error = %err, "could not hand off connection");
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(poll),
                Err(err) => {
                    error!(error = %err, "accept failed");
                    self.inner.log.log(&format!("Exception in Accept Thread: {}", err));
                    thread::sleep(poll);
                }
            }
        }

        debug!("accept loop finished");
    }

    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        stream.set_nonblocking(false)?;
        debug!(peer = %peer, "accepted connection");

        let server = self.clone();
        let max_request_bytes = self.inner.config.max_request_bytes;
        self.inner.workers.execute(stream, move |mut stream| {
            let raw_request = match read_request_head(&mut stream, max_request_bytes) {
                Ok(raw_request) => raw_request,
                Err(Error::MalformedRequest(reason)) => {
                    warn!(peer = %peer, reason = %reason, "rejecting request head");
                    server.log(&format!("Rejected request: {}", reason));
                    return reject_request(stream);
                }
                Err(err) => return Err(err),
            };
            if let Some(request_line) = raw_request.lines().next() {
                server.log(&format!("Request: {}", request_line));
            }
            server.inner.router.dispatch(&server, stream, raw_request)
        })?;

        Ok(())
    }
}

/// Answers a request whose head could not be read with the empty 404.
///
/// The rest of the request is read and discarded, since closing a socket with
/// unread input resets the connection and the peer may never see the 404.
fn reject_request(mut stream: TcpStream) -> Result<()> {
    stream.write_all(NOT_FOUND.as_bytes())?;
    stream.flush()?;
    stream.shutdown(Shutdown::Write)?;

    stream.set_read_timeout(Some(DRAIN_TIMEOUT))?;
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    let mut discarded = [0u8; 1024];
    while Instant::now() < deadline {
        match stream.read(&mut discarded) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }

    Ok(())
}

const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[cfg(test)]
mod test {
    use super::*;

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            accept_poll_ms: 5,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn it_registers_the_default_handlers_on_start() {
        let server = Server::new(test_config());
        server.start().unwrap();

        assert_eq!(
            server.registered_paths(),
            vec![
                "/SUCHAT/WSopen",
                "/console.htm",
                "/controlpanel.htm",
                "/controlpanel_command.htm",
                "/favicon.ico",
                "/index.htm",
            ]
        );

        server.stop();
        assert!(!server.is_running());
        assert!(server.registered_paths().is_empty());
    }

    #[test]
    fn starting_twice_leaves_one_instance() {
        let server = Server::new(test_config());
        server.start().unwrap();
        let second = server.start().unwrap();

        assert!(server.is_running());
        assert_eq!(server.local_addr(), Some(second));
        assert!(TcpStream::connect(second).is_ok());

        server.stop();
        server.stop();
    }

    #[test]
    fn concurrent_starts_leave_one_listener() {
        let server = Server::new(test_config());

        let starters: Vec<_> = (0..8)
            .map(|_| {
                let server = server.clone();
                thread::spawn(move || server.start().unwrap())
            })
            .collect();
        let addrs: Vec<SocketAddr> = starters.into_iter().map(|starter| starter.join().unwrap()).collect();

        let current = server.local_addr().unwrap();
        assert!(addrs.contains(&current));
        assert!(TcpStream::connect(current).is_ok());
        for addr in addrs.iter().filter(|addr| **addr != current) {
            assert!(TcpStream::connect(addr).is_err(), "{} still listening", addr);
        }

        server.stop();
    }

    #[test]
    fn session_ids_grow_with_uptime() {
        let server = Server::new(test_config());
        let first = server.new_session();
        thread::sleep(Duration::from_millis(2));
        let second = server.new_session();

        assert!(second.id() > first.id());
        assert_eq!(server.session().unwrap().id(), second.id());
    }

    #[test]
    fn only_one_progress_claim_at_a_time() {
        let server = Server::new(test_config());

        assert!(server.claim_progress());
        assert!(!server.claim_progress());
        server.release_progress();
        assert!(server.claim_progress());
    }

    #[test]
    fn wait_returns_after_a_scheduled_stop() {
        let server = Server::new(test_config());
        server.start().unwrap();

        server.schedule_stop(Duration::from_millis(20));
        server.wait();

        assert!(!server.is_running());
    }
}
