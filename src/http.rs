use std::collections::HashMap;
use std::io::Read;

use percent_encoding::percent_decode_str;

use crate::error::{Error, Result};

pub static HTML_OK: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n";

pub static NOT_FOUND: &str =
    "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

pub fn html_response(body: &str) -> String {
    let mut response = String::with_capacity(HTML_OK.len() + body.len());
    response.push_str(HTML_OK);
    response.push_str(body);
    response
}

#[derive(PartialEq, Debug, Clone)]
pub struct Request {
    pub path: String,
    pub query: Option<String>,

    // The full request head, request line and headers.
    pub raw: String,
}

impl Request {
    pub fn parse(raw: String) -> Result<Request> {
        let (path, query) = parse_request(&raw)?;
        Ok(Request { path, query, raw })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.raw.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key.trim().eq_ignore_ascii_case(name) {
                Some(value.trim())
            } else {
                None
            }
        })
    }

    pub fn sec_websocket_key(&self) -> Option<&str> {
        self.header("Sec-WebSocket-Key").filter(|key| !key.is_empty())
    }

    pub fn query_params(&self) -> HashMap<String, Vec<String>> {
        let mut params: HashMap<String, Vec<String>> = HashMap::new();
        let query = match &self.query {
            Some(query) => query,
            None => return params,
        };

        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            params
                .entry(decode_component(key))
                .or_default()
                .push(decode_component(value));
        }

        params
    }
}

fn decode_component(component: &str) -> String {
    percent_decode_str(&component.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

/// Splits the request target into path and query string.
///
/// The path has its first `html` rewritten to `htm`, wherever it appears, so
/// `/index.html` and `/index.htm` reach the same handler.
pub fn parse_request(raw_header_text: &str) -> Result<(String, Option<String>)> {
    let target = raw_header_text
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| Error::MalformedRequest("missing request target".to_owned()))?;

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query.to_owned())),
        None => (target, None),
    };

    Ok((path.replacen("html", "htm", 1), query))
}

/// Reads the request line and headers up to and including the blank line.
///
/// Reads byte by byte so nothing past the head is taken off the stream; the
/// WebSocket endpoint hands the same stream to the frame parser.
pub fn read_request_head<R: Read>(stream: &mut R, max_bytes: usize) -> Result<String> {
    let mut last_was_r = false;
    let mut saw_crlf = false;
    let mut bytes = Vec::with_capacity(512);
    let mut byte = [0u8; 1];

    loop {
        if stream.read(&mut byte)? == 0 {
            return Err(Error::MalformedRequest(
                "connection closed before end of headers".to_owned(),
            ));
        }

        let b = byte[0];
        bytes.push(b);

        if bytes.len() > max_bytes {
            return Err(Error::MalformedRequest("request head too large".to_owned()));
        }

        if last_was_r && b == b'\n' {
            if saw_crlf {
                break;
            }

            saw_crlf = true;
            last_was_r = false;
            continue;
        }

        last_was_r = b == b'\r';

        if !last_was_r {
            saw_crlf = false;
        }
    }

    let head = &bytes[..bytes.len() - "\r\n".len()];
    Ok(String::from_utf8_lossy(head).into_owned())
}
