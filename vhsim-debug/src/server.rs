//! The TCP transport: one accept loop, one task per connection, each
//! reading newline-terminated JSON requests and writing one JSON
//! response per request. Every connection shares the same
//! [`DebugSession`], so breakpoints, watchpoints, and a `halt` set by
//! one debugger are visible to a `run` in progress on another.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use vhsim_core::Result;

use crate::protocol::{dispatch, err_response, ok_response, Request};
use crate::session::DebugSession;

/// Binds `addr` and serves debug connections against `session` until
/// the returned future is dropped or cancelled by the caller.
pub async fn serve(addr: SocketAddr, session: Arc<DebugSession>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| vhsim_core::Error::Runtime(format!("failed to bind {addr}: {e}")))?;
    tracing::info!(%addr, board = %session.board_name(), "debug server listening");

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| vhsim_core::Error::Runtime(format!("accept failed: {e}")))?;
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            tracing::info!(%peer, "debugger connected");
            if let Err(e) = handle_connection(stream, &session).await {
                tracing::warn!(%peer, error = %e, "debug connection ended with an error");
            } else {
                tracing::info!(%peer, "debugger disconnected");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, session: &DebugSession) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(session, &line);
        let mut encoded = serde_json::to_vec(&response).unwrap_or_else(|_| b"{}".to_vec());
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Parses and dispatches one request line, never panicking or
/// propagating a protocol-level failure: malformed JSON and dispatch
/// errors both become an `{ok:false,...}` envelope.
fn handle_line(session: &DebugSession, line: &str) -> Value {
    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => return err_response(&Value::Null, format!("Invalid JSON: {e}")),
    };

    match dispatch(session, &request.cmd, &request.args) {
        Ok(result) => ok_response(&request.id, result),
        Err(e) => err_response(&request.id, e),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use vhsim_core::default_registry;

    fn sample_session() -> Arc<DebugSession> {
        let registry = default_registry().unwrap();
        let mut board = registry.create("stm32f4", None).unwrap();
        let mut image = vec![0u8; 0x100];
        image[0..4].copy_from_slice(&0x2000_1000u32.to_le_bytes());
        image[4..8].copy_from_slice(&0x0800_0101u32.to_le_bytes());
        board.load_firmware(&image).unwrap();
        Arc::new(DebugSession::new(board))
    }

    #[test]
    fn malformed_json_yields_null_id_error() {
        let session = sample_session();
        let resp = handle_line(&session, "{not json");
        assert_eq!(resp["ok"], false);
        assert_eq!(resp["id"], Value::Null);
        assert!(resp["error"].as_str().unwrap().starts_with("Invalid JSON"));
    }

    #[test]
    fn well_formed_request_echoes_id() {
        let session = sample_session();
        let resp = handle_line(&session, r#"{"id":7,"cmd":"hello"}"#);
        assert_eq!(resp["id"], 7);
        assert_eq!(resp["ok"], true);
        assert_eq!(resp["result"]["board"], "stm32f4");
    }

    #[tokio::test]
    async fn serve_accepts_and_answers_hello() {
        let session = sample_session();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let server_session = Arc::clone(&session);
        let handle = tokio::spawn(async move {
            let _ = super::serve(addr, server_session).await;
        });

        // Give the accept loop a moment to bind and start listening.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer.write_all(b"{\"id\":1,\"cmd\":\"hello\"}\n").await.unwrap();
        writer.flush().await.unwrap();

        let mut lines = BufReader::new(reader).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(value["result"]["board"], "stm32f4");

        handle.abort();
    }
}
