//! Connection handler for the native routing layer.

use bytes::{Buf, BytesMut};
use http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::parser::{self, Framing, ParseError, ParseResult, RequestHead};
use crate::routers::routes::{self, Route};
use crate::service::{EchoService, Reply};
use crate::shutdown::Shutdown;

/// Read buffer size
const BUFFER_SIZE: usize = 8 * 1024;

/// Handle a client connection until it closes, asks to close, sends
/// something unparseable, or shutdown fires while it is idle.
pub async fn handle_connection(
    mut stream: TcpStream,
    service: EchoService,
    max_body_size: usize,
    mut shutdown: Shutdown,
) -> std::io::Result<()> {
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
    let mut output = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        let head = match parser::parse(&buffer) {
            ParseResult::Complete(head) => head,
            ParseResult::Incomplete => {
                // Only an idle connection may be cut off by shutdown.
                let idle = buffer.is_empty();
                let n = tokio::select! {
                    n = stream.read_buf(&mut buffer) => n?,
                    _ = shutdown.wait(), if idle => {
                        trace!("Closing idle connection for shutdown");
                        return Ok(());
                    }
                };
                if n == 0 {
                    trace!("Connection closed by client");
                    return Ok(());
                }
                continue;
            }
            ParseResult::Error(e) => {
                debug!(error = %e, "Parse error");
                let status = match e {
                    ParseError::HeadTooLarge => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
                    _ => StatusCode::BAD_REQUEST,
                };
                return reject(&mut stream, &mut output, status).await;
            }
        };

        trace!(
            method = %head.method,
            target = %head.target,
            version = head.version.as_str(),
            "Processing request"
        );

        if head.chunked {
            return reject(&mut stream, &mut output, StatusCode::NOT_IMPLEMENTED).await;
        }
        if head.content_length > max_body_size {
            return reject(&mut stream, &mut output, StatusCode::PAYLOAD_TOO_LARGE).await;
        }

        // Read the body
        let total = head.head_len + head.content_length;
        while buffer.len() < total {
            let n = stream.read_buf(&mut buffer).await?;
            if n == 0 {
                trace!("Connection closed mid-body");
                return Ok(());
            }
        }

        let body = &buffer[head.head_len..total];
        let (reply, allow) = dispatch(&service, &head, body);

        let framing = Framing {
            allow,
            keep_alive: head.keep_alive,
            send_body: head.method != "HEAD",
        };
        output.clear();
        parser::encode_response(&mut output, &reply, framing);
        stream.write_all(&output).await?;

        buffer.advance(total);

        if !head.keep_alive {
            stream.shutdown().await?;
            return Ok(());
        }
    }
}

/// Route a complete request. Returns the reply plus an `Allow` value for 405s.
fn dispatch(
    service: &EchoService,
    head: &RequestHead,
    body: &[u8],
) -> (Reply, Option<&'static str>) {
    match routes::resolve(&head.method, &head.target) {
        Route::Get(ai) => (service.get(ai), None),
        Route::Post => (service.post(body), None),
        Route::MethodNotAllowed(allow) => {
            (Reply::empty(StatusCode::METHOD_NOT_ALLOWED), Some(allow))
        }
        Route::BadPath => (Reply::empty(StatusCode::BAD_REQUEST), None),
        Route::NotFound => (Reply::empty(StatusCode::NOT_FOUND), None),
    }
}

/// Answer with an empty error reply and close the connection.
async fn reject(
    stream: &mut TcpStream,
    output: &mut BytesMut,
    status: StatusCode,
) -> std::io::Result<()> {
    let framing = Framing {
        allow: None,
        keep_alive: false,
        send_body: true,
    };
    output.clear();
    parser::encode_response(output, &Reply::empty(status), framing);
    stream.write_all(output).await?;
    stream.shutdown().await?;
    Ok(())
}
