use sha1::{Digest, Sha1};

static HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derives the `Sec-WebSocket-Accept` value for a client's `Sec-WebSocket-Key`.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut owned_key = client_key.to_owned();
    owned_key.push_str(HANDSHAKE_GUID);

    let mut hasher = Sha1::new();
    hasher.update(owned_key.as_bytes());
    let sha1_hash = hasher.finalize();

    base64::encode(sha1_hash)
}

pub fn build_upgrade_response(accept_key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        accept_key
    )
    .into_bytes()
}

#[test]
fn it_responds_to_upgrade_request() {
    assert_eq!(
        compute_accept_key("q4xkcO32u266gldTuKaSOw=="),
        "fA9dggdnMPU79lJgAE3W4TRnyDM="
    );
}

#[test]
fn it_matches_the_canonical_handshake_vector() {
    assert_eq!(
        compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
        "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
    );
}

#[test]
fn it_builds_the_switching_protocols_response() {
    let response = String::from_utf8(build_upgrade_response("abc=")).unwrap();

    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(response.contains("Upgrade: websocket\r\n"));
    assert!(response.contains("Connection: Upgrade\r\n"));
    assert!(response.ends_with("Sec-WebSocket-Accept: abc=\r\n\r\n"));
}
