use std::collections::HashMap;
use std::net::{Shutdown, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, error, warn};

use crate::error::{lock, Result};

/// Tracks one thread per accepted connection.
///
/// Workers remove themselves when their job returns. `terminate_all` cuts
/// every tracked connection so blocked reads and writes fail and the workers
/// unwind on their own; it never waits for them.
pub struct WorkerPool {
    next_id: AtomicUsize,
    workers: Mutex<HashMap<usize, Worker>>,
    reporter: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

struct Worker {
    // Second handle on the worker's socket, used to cut it loose on shutdown.
    stream: Option<TcpStream>,
}

impl WorkerPool {
    pub fn new() -> WorkerPool {
        WorkerPool {
            next_id: AtomicUsize::new(0),
            workers: Mutex::new(HashMap::new()),
            reporter: None,
        }
    }

    /// A pool that also hands a line describing each failed job to `reporter`.
    pub fn with_reporter<F>(reporter: F) -> WorkerPool
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        WorkerPool {
            reporter: Some(Box::new(reporter)),
            ..WorkerPool::new()
        }
    }

    /// Runs `job` on its own thread with the given connection.
    ///
    /// Errors and panics inside the job are logged here and go no further.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::net::TcpListener;
    /// use std::sync::Arc;
    /// use suchat_server::WorkerPool;
    ///
    /// let pool = Arc::new(WorkerPool::new());
    /// let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    /// let (stream, _) = listener.accept().unwrap();
    /// pool.execute(stream, |_stream| Ok(())).unwrap();
    /// ```
    pub fn execute<F>(self: &Arc<Self>, stream: TcpStream, job: F) -> Result<usize>
    where
        F: FnOnce(TcpStream) -> Result<()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = match stream.try_clone() {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(worker = id, error = %err, "worker socket cannot be force-closed");
                None
            }
        };

        // Held across the spawn so the worker cannot remove itself before it is registered.
        let mut workers = lock(&self.workers);
        let pool = Arc::clone(self);
        thread::Builder::new()
            .name(format!("suchat-worker-{}", id))
            .spawn(move || {
                match panic::catch_unwind(AssertUnwindSafe(|| job(stream))) {
                    Ok(Ok(())) => debug!(worker = id, "worker finished"),
                    Ok(Err(err)) => {
                        error!(worker = id, error = %err, "worker failed");
                        pool.report(&format!("Exception in worker {}: {}", id, err));
                    }
                    Err(_) => {
                        error!(worker = id, "worker panicked");
                        pool.report(&format!("Worker {} panicked", id));
                    }
                }
                pool.remove(id);
            })?;

        workers.insert(id, Worker { stream: handle });

        Ok(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.workers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets a worker. Workers call this on themselves when their job ends.
    pub fn remove(&self, id: usize) {
        lock(&self.workers).remove(&id);
    }

    /// Cuts every tracked connection without waiting for the threads.
    ///
    /// Worker threads are never joined. Each one exits once its socket calls fail.
    pub fn terminate_all(&self) {
        let workers: Vec<(usize, Worker)> = lock(&self.workers).drain().collect();

        for (id, worker) in workers {
            debug!(worker = id, "terminating worker");

            if let Some(stream) = worker.stream {
                if let Err(err) = stream.shutdown(Shutdown::Both) {
                    debug!(worker = id, error = %err, "worker socket already closed");
                }
            }
        }
    }

    fn report(&self, line: &str) {
        if let Some(reporter) = &self.reporter {
            reporter(line);
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        WorkerPool::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use std::io::Read;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn workers_remove_themselves() {
        let pool = Arc::new(WorkerPool::new());
        let (_client, server) = connected_pair();

        pool.execute(server, |_stream| Ok(())).unwrap();

        wait_until(|| pool.is_empty());
    }

    #[test]
    fn a_failing_worker_is_contained() {
        let pool = Arc::new(WorkerPool::new());
        let (_client_a, server_a) = connected_pair();
        let (_client_b, server_b) = connected_pair();

        pool.execute(server_a, |_stream| Err(Error::MalformedRequest("bad".to_owned())))
            .unwrap();
        pool.execute(server_b, |_stream| panic!("boom")).unwrap();

        wait_until(|| pool.is_empty());
    }

    #[test]
    fn failed_jobs_are_reported() {
        let (report_sender, report_receiver) = mpsc::channel();
        let report_sender = Mutex::new(report_sender);
        let pool = Arc::new(WorkerPool::with_reporter(move |line| {
            lock(&report_sender).send(line.to_owned()).unwrap();
        }));
        let (_client, server) = connected_pair();

        let id = pool
            .execute(server, |_stream| Err(Error::MalformedRequest("bad".to_owned())))
            .unwrap();

        let line = report_receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(line, format!("Exception in worker {}: malformed request: bad", id));
        wait_until(|| pool.is_empty());
    }

    #[test]
    fn terminate_all_unblocks_a_stuck_reader() {
        let pool = Arc::new(WorkerPool::new());
        let (_client, server) = connected_pair();
        let (done_sender, done_receiver) = mpsc::channel();

        pool.execute(server, move |mut stream| {
            let mut buffer = [0u8; 16];
            let read = stream.read(&mut buffer);
            done_sender.send(read.is_err() || read.ok() == Some(0)).unwrap();
            Ok(())
        })
        .unwrap();
        assert_eq!(pool.len(), 1);

        pool.terminate_all();

        assert!(pool.is_empty());
        assert!(done_receiver.recv_timeout(Duration::from_secs(5)).unwrap());
    }
}
