//! Test helpers shared by unit and integration tests

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const FAILURE_REPLY: &[u8] = b"-ERR backend down\r\n";

/// Start a TCP server that speaks enough RESP to accept connections but
/// answers every command with an error. Returns a `redis://` URL for it.
///
/// The server lives until the test runtime shuts down.
pub async fn spawn_failing_redis() -> std::io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr: SocketAddr = listener.local_addr()?;

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(answer_with_errors(socket));
        }
    });

    Ok(format!("redis://{addr}"))
}

async fn answer_with_errors(mut socket: TcpStream) {
    let mut pending = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let read = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        pending.extend_from_slice(&chunk[..read]);

        // Pipelined commands get one reply each
        while let Some(len) = command_len(&pending) {
            pending.drain(..len);
            if socket.write_all(FAILURE_REPLY).await.is_err() {
                return;
            }
        }
    }
}

/// Byte length of the first complete RESP array command in `buf`.
fn command_len(buf: &[u8]) -> Option<usize> {
    let (args, mut pos) = header(buf, 0, b'*')?;
    for _ in 0..args {
        let (len, data_start) = header(buf, pos, b'$')?;
        let end = data_start + len + 2;
        if buf.len() < end {
            return None;
        }
        pos = end;
    }
    Some(pos)
}

/// Parse `<marker><number>\r\n` at `start`, returning the number and the
/// offset just past the line.
fn header(buf: &[u8], start: usize, marker: u8) -> Option<(usize, usize)> {
    if *buf.get(start)? != marker {
        return None;
    }
    let line_len = buf[start..].windows(2).position(|w| w == b"\r\n")?;
    let number = std::str::from_utf8(&buf[start + 1..start + line_len]).ok()?;
    Some((number.parse().ok()?, start + line_len + 2))
}
