// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::Error;

/// A duplex byte stream to the peer.
///
/// The transport handshake (TCP connect, TLS accept, WebSocket upgrade) is
/// performed by whoever constructs the variant; the engine above only reads
/// and writes bytes. The `Duplex` variant is an in-memory pipe used by unit
/// tests and in-process transports.
#[derive(Debug)]
pub enum Stream {
    Mqtt(TcpStream),
    Mqtts(Box<TlsStream<TcpStream>>),
    Ws(Box<WebSocketStream<TcpStream>>),
    Wss(Box<WebSocketStream<TlsStream<TcpStream>>>),
    Duplex(DuplexStream),
}

impl Stream {
    /// Open a plain TCP connection, client side.
    ///
    /// # Errors
    ///
    /// Returns error if the connection fails.
    pub async fn connect(address: &str) -> Result<Self, Error> {
        let tcp_stream = TcpStream::connect(address).await?;
        tcp_stream.set_nodelay(true)?;
        Ok(Self::Mqtt(tcp_stream))
    }

    /// Read available bytes into `buf`, returning the number appended.
    ///
    /// A return of zero means the peer closed the stream.
    ///
    /// # Errors
    ///
    /// Returns error if the socket fails.
    pub async fn read_buf(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        match self {
            Self::Mqtt(tcp_stream) => Ok(tcp_stream.read_buf(buf).await?),
            Self::Mqtts(tls_stream) => Ok(tls_stream.read_buf(buf).await?),
            Self::Ws(ws_stream) => {
                if let Some(msg) = ws_stream.next().await {
                    let msg = msg?;
                    let data = msg.into_data();
                    let data_len = data.len();
                    buf.extend(data);
                    Ok(data_len)
                } else {
                    Ok(0)
                }
            }
            Self::Wss(wss_stream) => {
                if let Some(msg) = wss_stream.next().await {
                    let msg = msg?;
                    let data = msg.into_data();
                    let data_len = data.len();
                    buf.extend(data);
                    Ok(data_len)
                } else {
                    Ok(0)
                }
            }
            Self::Duplex(pipe) => Ok(pipe.read_buf(buf).await?),
        }
    }

    /// Write the whole of `buf` to the stream.
    ///
    /// # Errors
    ///
    /// Returns error if the socket fails.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        match self {
            Self::Mqtt(tcp_stream) => Ok(tcp_stream.write_all(buf).await?),
            Self::Mqtts(tls_stream) => Ok(tls_stream.write_all(buf).await?),
            Self::Ws(ws_stream) => {
                let msg = Message::binary(buf.to_vec());
                ws_stream.send(msg).await?;
                Ok(())
            }
            Self::Wss(wss_stream) => {
                let msg = Message::binary(buf.to_vec());
                wss_stream.send(msg).await?;
                Ok(())
            }
            Self::Duplex(pipe) => Ok(pipe.write_all(buf).await?),
        }
    }

    /// Close the stream; best effort, errors are ignored by callers on the
    /// shutdown path.
    ///
    /// # Errors
    ///
    /// Returns error if the socket refuses to shut down.
    pub async fn close(&mut self) -> Result<(), Error> {
        match self {
            Self::Mqtt(tcp_stream) => Ok(tcp_stream.shutdown().await?),
            Self::Mqtts(tls_stream) => Ok(tls_stream.shutdown().await?),
            Self::Ws(ws_stream) => Ok(ws_stream.close(None).await?),
            Self::Wss(wss_stream) => Ok(wss_stream.close(None).await?),
            Self::Duplex(pipe) => Ok(pipe.shutdown().await?),
        }
    }
}
