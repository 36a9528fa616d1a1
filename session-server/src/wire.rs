//! Framing for the request/response wire.
//!
//! A request is one UTF-8 JSON document followed by the four byte
//! end-of-transmission sentinel. The reader accumulates chunks until the
//! sentinel shows up as the buffer suffix, then strips it and parses. The
//! response goes out as bare JSON; closing the connection marks the end of
//! the reply on the client side.

use bytes::BytesMut;
use protocol::{END_OF_TRANSMISSION, ErrorSource, Response};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Ways reading or writing a frame can fail. Only some of them owe the
/// client an error response, see [`WireError::response`].
#[derive(Debug, Error)]
pub enum WireError {
    /// The client closed the connection without sending a single byte.
    #[error("client disconnected without sending a request")]
    ClientDisconnect,
    /// The accumulated request outgrew the configured cap before the
    /// sentinel arrived.
    #[error("maximum request size exceeded")]
    RequestSizeExceeded,
    /// The request body is not a valid UTF-8 JSON document.
    #[error("request is not a valid JSON document")]
    Decode(#[source] serde_json::Error),
    /// The response could not be serialized.
    #[error("response could not be encoded")]
    Encode(#[source] serde_json::Error),
    /// The connection broke mid-request or mid-response.
    #[error("connection lost")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// The error response owed to the client, if any. Disconnects and broken
    /// connections stay silent, there is nobody left to answer.
    pub fn response(&self) -> Option<Response> {
        match self {
            WireError::ClientDisconnect | WireError::Io(_) | WireError::Encode(_) => None,
            other => Some(Response::error_text(ErrorSource::Server, other.to_string())),
        }
    }
}

/// Reads one framed request. `buffer_size` is the per-read chunk,
/// `request_size_max` caps the JSON body (the sentinel does not count
/// towards the cap).
pub async fn read_request<R>(
    reader: &mut R,
    buffer_size: usize,
    request_size_max: usize,
) -> Result<Value, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut accumulated = BytesMut::with_capacity(buffer_size);
    let mut chunk = vec![0u8; buffer_size];

    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            if accumulated.is_empty() {
                return Err(WireError::ClientDisconnect);
            }
            // bytes arrived but the sentinel never did
            return Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-request",
            )));
        }
        accumulated.extend_from_slice(&chunk[..read]);

        if accumulated.ends_with(&END_OF_TRANSMISSION) {
            let body = &accumulated[..accumulated.len() - END_OF_TRANSMISSION.len()];
            if body.len() > request_size_max {
                return Err(WireError::RequestSizeExceeded);
            }
            return serde_json::from_slice(body).map_err(WireError::Decode);
        }

        if accumulated.len() > request_size_max + END_OF_TRANSMISSION.len() {
            return Err(WireError::RequestSizeExceeded);
        }
    }
}

/// Writes the response body. The caller closes the connection afterwards,
/// which is what terminates the reply for the client.
pub async fn write_response<W>(writer: &mut W, response: &Response) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(response).map_err(WireError::Encode)?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::frame_request;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reads_a_single_framed_request() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client
            .write_all(&frame_request(br#"{"type":"state","observer":false}"#))
            .await
            .unwrap();
        let request = read_request(&mut server, 64, 1024).await.unwrap();
        assert_eq!(request, json!({"type": "state", "observer": false}));
    }

    #[tokio::test]
    async fn handles_a_sentinel_split_across_chunks() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let framed = frame_request(br#"{"type":"join"}"#);
        let (head, tail) = framed.split_at(framed.len() - 2);
        let head = head.to_vec();
        let tail = tail.to_vec();
        let writer = tokio::spawn(async move {
            client.write_all(&head).await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(&tail).await.unwrap();
        });
        let request = read_request(&mut server, 8, 1024).await.unwrap();
        writer.await.unwrap();
        assert_eq!(request, json!({"type": "join"}));
    }

    #[tokio::test]
    async fn empty_connection_is_a_silent_disconnect() {
        let (client, mut server) = tokio::io::duplex(256);
        drop(client);
        let err = read_request(&mut server, 64, 1024).await.unwrap_err();
        assert!(matches!(err, WireError::ClientDisconnect));
        assert!(err.response().is_none());
    }

    #[tokio::test]
    async fn oversized_requests_are_rejected_before_the_sentinel() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let body = vec![b'x'; 256];
        client.write_all(&body).await.unwrap();
        let err = read_request(&mut server, 64, 100).await.unwrap_err();
        assert!(matches!(err, WireError::RequestSizeExceeded));
        let response = err.response().unwrap();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"status": "error", "message": "server: maximum request size exceeded"})
        );
    }

    #[tokio::test]
    async fn broken_json_is_a_decode_error() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client
            .write_all(&frame_request(b"{not json"))
            .await
            .unwrap();
        let err = read_request(&mut server, 64, 1024).await.unwrap_err();
        assert!(matches!(err, WireError::Decode(_)));
        assert!(err.response().is_some());
    }

    #[tokio::test]
    async fn responses_are_bare_json() {
        let (mut client, server) = tokio::io::duplex(256);
        let response = Response::ok(json!({"player_id": 1}));
        write_response(&mut client, &response).await.unwrap();
        drop(client);
        let mut server = server;
        let mut received = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut received)
            .await
            .unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&received).unwrap(),
            json!({"status": "ok", "data": {"player_id": 1}})
        );
    }
}
