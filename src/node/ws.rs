use super::transport::*;
use async_trait::async_trait;
use async_tungstenite::{
    tokio::{connect_async, ConnectStream},
    tungstenite::{
        client::IntoClientRequest,
        http::HeaderValue,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    WebSocketStream,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, instrument, trace};

/// Default [`Connector`], opening websocket connections with `async-tungstenite`.
///
/// A node reports a resumed session through its `Session-Resumed` response header.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    #[instrument(skip(self, request), fields(address = %request.address))]
    async fn connect(&self, request: ConnectRequest) -> Result<Connected, TransportError> {
        let url = request.url()?;
        let mut ws_request = url.as_str().into_client_request()?;

        for (name, value) in &request.headers {
            let value =
                HeaderValue::from_str(value).map_err(|_| TransportError::InvalidHeader(*name))?;
            ws_request.headers_mut().insert(*name, value);
        }

        let (stream, response) = connect_async(ws_request).await?;

        let resumed = response
            .headers()
            .get("Session-Resumed")
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v.eq_ignore_ascii_case("true"));

        debug!("Connected to {} (resumed: {}).", url, resumed);

        Ok(Connected {
            transport: Box::new(WsTransport {
                stream,
                failed: false,
            }),
            resumed,
        })
    }
}

struct WsTransport {
    stream: WebSocketStream<ConnectStream>,
    failed: bool,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String, _prioritized: bool) -> Result<(), TransportError> {
        if self.failed {
            return Err(TransportError::Closed);
        }

        self.stream.send(Message::Text(text)).await.map_err(Into::into)
    }

    async fn recv(&mut self) -> TransportEvent {
        // A stream which has errored once is treated as dead.
        if self.failed {
            return TransportEvent::Closed {
                code: None,
                reason: "stream failed".into(),
                clean: false,
            };
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Message(text),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or((None, String::new()), |f| {
                        (Some(u16::from(f.code)), f.reason.into_owned())
                    });

                    return TransportEvent::Closed {
                        code,
                        reason,
                        clean: true,
                    };
                },
                Some(Ok(other)) => {
                    // Ping/Pong message behaviour is internally handled by tungstenite.
                    trace!("Ignoring non-text frame: {:?}", other);
                },
                Some(Err(e)) => {
                    self.failed = true;
                    return TransportEvent::Error(e.into());
                },
                None =>
                    return TransportEvent::Closed {
                        code: None,
                        reason: "stream ended".into(),
                        clean: false,
                    },
            }
        }
    }

    async fn close(&mut self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };

        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!("Error while closing websocket: {:?}", e);
        }
    }
}
