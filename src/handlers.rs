//! Pages every server serves out of the box.

use std::io::Write;
use std::net::TcpStream;

use tracing::debug;

use crate::error::Result;
use crate::http::{html_response, Request};
use crate::router::not_found;
use crate::server::Server;
use crate::websocket::WebSocket;

pub static INDEX_PATH: &str = "/index.htm";
pub static FAVICON_PATH: &str = "/favicon.ico";
pub static CONTROL_PANEL_PATH: &str = "/controlpanel.htm";
pub static CONTROL_PANEL_COMMAND_PATH: &str = "/controlpanel_command.htm";
pub static CONSOLE_PATH: &str = "/console.htm";
pub static SUCHAT_PATH: &str = "/SUCHAT/WSopen";

static INDEX_PAGE: &str = "<!DOCTYPE html>
<html><body>
  Welcome to the SUCHAT Server
</body></html>
";

static CONTROL_PANEL_PAGE: &str = "<!DOCTYPE html>
<html><body>
<form action=\"controlpanel_command.htm\">
<input type=\"submit\" name=\"shut_down\" value=\"Shut Down Server\"><br><br>
</form>
</body></html>
";

static STOPPED_PAGE: &str = "Server Shutting Down";

static CONSOLE_PAGE: &str = "Console Server Started<script>function start_scroll_down(){scroll = setInterval(function(){ window.scrollBy(0, 1000); }, 1500);}start_scroll_down();</script> ";

pub fn register_defaults(server: &Server) {
    server.register_handler(INDEX_PATH, index_handler);
    server.register_handler(FAVICON_PATH, favicon_handler);
    server.register_handler(CONTROL_PANEL_PATH, controlpanel_handler);
    server.register_handler(CONTROL_PANEL_COMMAND_PATH, controlpanel_command_handler);
    server.register_handler(CONSOLE_PATH, console_handler);
    server.register_handler(SUCHAT_PATH, suchat_handler);
}

fn write_and_close(mut stream: TcpStream, response: &str) -> Result<()> {
    stream.write_all(response.as_bytes())?;
    stream.flush()?;
    Ok(())
}

fn index_handler(_server: &Server, stream: TcpStream, _request: &Request) -> Result<()> {
    write_and_close(stream, &html_response(INDEX_PAGE))
}

fn favicon_handler(_server: &Server, stream: TcpStream, _request: &Request) -> Result<()> {
    not_found(stream)
}

fn controlpanel_handler(_server: &Server, stream: TcpStream, _request: &Request) -> Result<()> {
    write_and_close(stream, &html_response(CONTROL_PANEL_PAGE))
}

fn controlpanel_command_handler(server: &Server, stream: TcpStream, request: &Request) -> Result<()> {
    debug!(params = ?request.query_params(), "control panel command");
    write_and_close(stream, &html_response(STOPPED_PAGE))?;
    server.schedule_stop(server.config().shutdown_delay());
    Ok(())
}

/// Streams log lines to the browser until another console replaces this one
/// or the server stops.
fn console_handler(server: &Server, mut stream: TcpStream, _request: &Request) -> Result<()> {
    let lines = server.log_mailbox().attach();

    let header = format!(
        "{} Uptime = {}s<br>Threads = {}<br>",
        html_response(CONSOLE_PAGE),
        server.uptime().as_secs(),
        server.worker_count()
    );
    stream.write_all(header.as_bytes())?;
    stream.flush()?;

    for line in lines.iter() {
        if stream.write_all(line.as_bytes()).and_then(|_| stream.flush()).is_err() {
            break;
        }
    }

    debug!("console viewer detached");
    Ok(())
}

fn suchat_handler(server: &Server, stream: TcpStream, request: &Request) -> Result<()> {
    let (client_key, session) = match (request.sec_websocket_key(), server.session()) {
        (Some(client_key), Some(session)) => (client_key, session),
        _ => return not_found(stream),
    };

    server.log(&format!("Opening websocket for session {}", session.id()));
    let console = server.clone();
    let result = WebSocket::new(stream, session)
        .with_console(move |line| console.log(line))
        .open(client_key);
    server.log("Closing tcpsocket");
    result
}
