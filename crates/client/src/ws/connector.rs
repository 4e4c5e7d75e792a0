//! Socket construction.
//!
//! The transport never talks to tungstenite directly; it asks a [`Connector`]
//! for a [`Socket`], which is a sink/stream pair of [`Frame`]s.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{future, Sink, SinkExt, StreamExt};
use thiserror::Error;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("socket error: {0}")]
    Socket(String),
    #[error("socket is not open")]
    NotOpen,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::Socket(e.to_string())
    }
}

/// The frames the transport cares about. Binary and control frames other
/// than close are filtered out by the connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = BoxStream<'static, Result<Frame, TransportError>>;

pub struct Socket {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Socket, TransportError>;
}

/// Production connector backed by tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Socket, TransportError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(TransportError::from)
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(into_message(frame))));

        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(Message::Close(close)) => Some(Ok(match close {
                    Some(cf) => Frame::Close {
                        code: u16::from(cf.code),
                        reason: cf.reason.as_str().to_owned(),
                    },
                    None => Frame::Close {
                        code: u16::from(CloseCode::Status),
                        reason: String::new(),
                    },
                })),
                Ok(Message::Ping(data)) => {
                    // Pong is handled automatically by tungstenite
                    tracing::debug!("Received ping: {:?}", data);
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

        Ok(Socket {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        })
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::text(text),
        Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })),
    }
}
