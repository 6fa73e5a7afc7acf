use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
pub type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Dial the relay's WebSocket endpoint and split the stream into an
/// independent sink/source pair for the read and write pumps.
pub async fn connect(url: &str) -> Result<(WsSink, WsSource)> {
    let (stream, _response) = connect_async(url)
        .await
        .with_context(|| format!("connecting to {url}"))?;
    Ok(stream.split())
}
