//! WebSocket link tasks.
//!
//! One task performs the handshake, another pumps frames from the read half
//! into the driver's event channel. The write half stays with the driver.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::LinkEvent;
use crate::connection::ABNORMAL_CLOSURE;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;

/// Close code used when the peer sent a close frame without a status.
const NO_STATUS: u16 = 1005;

/// Start a handshake with `url`, reporting the outcome as `Opened` or `Failed`.
pub(crate) fn spawn_connect(
    url: String,
    generation: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let event = match connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                tracing::debug!(url = %url, generation, "websocket handshake complete");
                LinkEvent::Opened { generation, stream }
            }
            Err(e) => {
                tracing::debug!(url = %url, generation, error = %e, "websocket connect failed");
                LinkEvent::Failed {
                    generation,
                    error: format!("WebSocket connect error: {e}"),
                }
            }
        };
        let _ = events.send(event);
    })
}

/// Forward text frames from `read` until the socket ends, then report
/// `Closed` with the close code and reason.
pub(crate) fn spawn_reader(
    mut read: SplitStream<WsStream>,
    generation: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (code, reason) = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    if events.send(LinkEvent::Frame { generation, text }).is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => {
                        if events.send(LinkEvent::Frame { generation, text }).is_err() {
                            return;
                        }
                    }
                    Err(_) => tracing::warn!(generation, "dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(generation, "WebSocket close frame received");
                    break frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((NO_STATUS, String::new()));
                }
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::debug!(generation, error = %e, "WebSocket read error");
                    break (ABNORMAL_CLOSURE, e.to_string());
                }
                None => break (ABNORMAL_CLOSURE, "connection reset".to_string()),
            }
        };
        let _ = events.send(LinkEvent::Closed {
            generation,
            code,
            reason,
        });
    })
}

/// Send a close frame and drop the sink without blocking the caller.
pub(crate) fn close_in_background(mut sink: WsSink) {
    tokio::spawn(async move {
        let _ = sink.close().await;
    });
}

/// Close a stream that was opened but is no longer wanted.
pub(crate) fn discard(mut stream: WsStream) {
    tokio::spawn(async move {
        let _ = stream.close(None).await;
    });
}

/// Write one text frame.
pub(crate) async fn send_text(sink: &mut WsSink, text: String) -> Result<(), String> {
    sink.send(Message::Text(text))
        .await
        .map_err(|e| format!("WS write error: {e}"))
}
