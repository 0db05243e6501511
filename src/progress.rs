//! A progress indicator rendered in a browser page.
//!
//! The page is served at [`PROGRESS_PATH`] with the session id substituted
//! for its `Connection_ID` placeholder. The page script opens
//! `/SUCHAT/WSopen`, identifies itself with `SUCHAT_Connect:Connection_ID <id>`,
//! renders every JSON status it receives, and may answer with
//! `UserCancelClicked` or any other text.
//!
//! ```no_run
//! use serde_json::json;
//! use suchat_server::{Error, PageSource, ProgressBar, Server, ServerConfig};
//!
//! let server = Server::new(ServerConfig::default());
//! server.start()?;
//!
//! let page = PageSource::File("html/progress.html".into());
//! let outcome = ProgressBar::run(&server, page, |bar| {
//!     for i in 0..1000 {
//!         // ... one unit of work ...
//!         if bar.update() {
//!             bar.refresh(&json!({ "value": i / 10, "label": format!("Remaining: {}", 1000 - i) }))?;
//!         }
//!     }
//!     Ok(())
//! });
//!
//! match outcome {
//!     Err(Error::Abort(reason)) => println!("stopped: {}", reason),
//!     other => other?,
//! }
//! # Ok::<(), Error>(())
//! ```

use std::io::{self, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::http::html_response;
use crate::protocol::{CLOSE_TAG, USER_CANCEL};
use crate::server::Server;
use crate::session::Session;

pub static PROGRESS_PATH: &str = "/SUPBWS/progressbar.htm";

static CONNECTION_ID_PLACEHOLDER: &str = "Connection_ID";

#[derive(Debug, Clone)]
pub enum PageSource {
    File(PathBuf),
    Inline(String),
}

impl PageSource {
    fn load(&self) -> Result<String> {
        match self {
            PageSource::File(path) => Ok(std::fs::read_to_string(path)?),
            PageSource::Inline(html) => Ok(html.clone()),
        }
    }

    /// The page with the first placeholder followed by `session_id`.
    pub fn render(&self, session_id: u64) -> Result<String> {
        let page = self.load()?;
        Ok(page.replacen(
            CONNECTION_ID_PLACEHOLDER,
            &format!("{} {}", CONNECTION_ID_PLACEHOLDER, session_id),
            1,
        ))
    }
}

pub struct ProgressBar {
    server: Server,
    page: Arc<PageSource>,
    session: Option<Arc<Session>>,
    update_flag: Arc<AtomicBool>,
    activated: Arc<AtomicBool>,
    ticker: Option<JoinHandle<()>>,
}

impl ProgressBar {
    pub fn new(server: &Server, page: PageSource) -> ProgressBar {
        ProgressBar {
            server: server.clone(),
            page: Arc::new(page),
            session: None,
            update_flag: Arc::new(AtomicBool::new(false)),
            activated: Arc::new(AtomicBool::new(false)),
            ticker: None,
        }
    }

    /// Shows a progress bar for the duration of `f`. It is hidden again
    /// however `f` returns.
    pub fn run<T, F>(server: &Server, page: PageSource, f: F) -> Result<T>
    where
        F: FnOnce(&ProgressBar) -> Result<T>,
    {
        let mut progress_bar = ProgressBar::new(server, page);
        progress_bar.show()?;
        let result = f(&progress_bar);
        progress_bar.hide();
        result
    }

    /// Starts a session, serves the page and starts the update ticker.
    ///
    /// Only one progress bar per server can be showing.
    pub fn show(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        if !self.server.claim_progress() {
            return Err(Error::ProgressBarInUse);
        }

        self.activated.store(true, Ordering::SeqCst);
        self.update_flag.store(false, Ordering::SeqCst);
        let ticker = match self.start_ticker() {
            Ok(ticker) => ticker,
            Err(err) => return Err(self.abandon_show(err)),
        };

        let session = self.server.new_session();
        let page = Arc::clone(&self.page);
        let session_id = session.id();
        self.server
            .register_handler(PROGRESS_PATH, move |_server, stream, _request| {
                serve_page(stream, &page, session_id)
            });

        self.ticker = Some(ticker);
        self.session = Some(session);

        info!(session_id, url = ?self.url(), "progress bar ready");
        Ok(())
    }

    // Undoes a `show` that got as far as claiming the server.
    fn abandon_show(&self, err: io::Error) -> Error {
        warn!(error = %err, "progress ticker did not start");
        self.activated.store(false, Ordering::SeqCst);
        self.server.release_progress();
        Error::Io(err)
    }

    /// Stops the ticker and closes the browser page. Safe to call twice.
    pub fn hide(&mut self) {
        let session = match self.session.take() {
            Some(session) => session,
            None => return,
        };

        self.activated.store(false, Ordering::SeqCst);
        if let Some(ticker) = self.ticker.take() {
            ticker.thread().unpark();
            if ticker.join().is_err() {
                warn!("progress ticker panicked");
            }
        }

        session.close_signal();
        self.server.release_progress();
        debug!(session_id = session.id(), "progress bar hidden");
    }

    /// True at most once per update interval.
    pub fn update(&self) -> bool {
        self.update_flag.swap(false, Ordering::SeqCst)
    }

    /// Sends `status` to the page and returns the page's oldest unread reply.
    ///
    /// Fails with [`Error::Abort`] once the user cancels or the page goes away.
    pub fn refresh<S: Serialize + ?Sized>(&self, status: &S) -> Result<Option<String>> {
        let session = match &self.session {
            Some(session) => session,
            None => return Ok(None),
        };

        session.send(serde_json::to_string(status)?);

        let response = session.try_receive();
        match response.as_deref() {
            Some(message) if message == USER_CANCEL => Err(Error::Abort("User Cancel Clicked".to_owned())),
            Some(message) if message.starts_with(CLOSE_TAG) => Err(Error::Abort("User Close Dialog".to_owned())),
            _ => Ok(response),
        }
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// Where the host should point a browser window.
    pub fn url(&self) -> Option<String> {
        self.server.url_for(PROGRESS_PATH)
    }

    fn start_ticker(&self) -> io::Result<JoinHandle<()>> {
        let activated = Arc::clone(&self.activated);
        let update_flag = Arc::clone(&self.update_flag);
        let interval = self.server.config().update_interval();

        thread::Builder::new()
            .name("suchat-ticker".to_owned())
            .spawn(move || update_loop(&activated, &update_flag, interval))
    }
}

impl Drop for ProgressBar {
    fn drop(&mut self) {
        self.hide();
    }
}

fn update_loop(activated: &AtomicBool, update_flag: &AtomicBool, interval: Duration) {
    while activated.load(Ordering::SeqCst) {
        thread::park_timeout(interval);
        if activated.load(Ordering::SeqCst) {
            update_flag.store(true, Ordering::SeqCst);
        }
    }
}

fn serve_page(mut stream: TcpStream, page: &PageSource, session_id: u64) -> Result<()> {
    let body = page.render(session_id)?;
    stream.write_all(html_response(&body).as_bytes())?;
    stream.flush()?;
    Ok(())
}
