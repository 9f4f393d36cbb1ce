// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Listener actors: bind one address each, run the transport handshake
//! (TLS accept, WebSocket upgrade) and spawn a session actor per
//! connection.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::pki_types::PrivateKeyDer;
use tokio_rustls::{rustls, TlsAcceptor};
use tokio_tungstenite::accept_async;

use crate::auth::Authenticator;
use crate::config;
use crate::error::{Error, ErrorKind};
use crate::session::{Session, SessionConfig};
use crate::stream::Stream;
use crate::types::{ListenerId, SessionGid, SessionId};
use tokio::sync::mpsc::Sender;

use crate::commands::SessionToDispatcherCmd;

/// One bound listener socket.
pub struct Listener {
    id: ListenerId,
    config: config::Listener,
    session_config: SessionConfig,
    tcp_listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    dispatcher_sender: Sender<SessionToDispatcherCmd>,
    auth: Arc<dyn Authenticator>,
    next_session_id: SessionId,
}

impl Listener {
    /// Bind the listener address and prepare the TLS acceptor if the
    /// protocol needs one.
    ///
    /// # Errors
    ///
    /// Returns error if binding fails or cert files are unusable.
    pub async fn bind(
        id: ListenerId,
        listener_config: config::Listener,
        general: &config::General,
        dispatcher_sender: Sender<SessionToDispatcherCmd>,
        auth: Arc<dyn Authenticator>,
    ) -> Result<Self, Error> {
        let tcp_listener = TcpListener::bind(listener_config.address())
            .await
            .map_err(|err| {
                Error::from_string(
                    ErrorKind::SocketError,
                    format!(
                        "listener: failed to bind {}: {err}",
                        listener_config.address()
                    ),
                )
            })?;
        log::info!(
            "listener {id}: {:?} on {}",
            listener_config.protocol(),
            listener_config.address()
        );

        let tls_acceptor = match listener_config.protocol() {
            config::Protocol::Mqtts | config::Protocol::Wss => {
                let (Some(cert_file), Some(key_file)) =
                    (listener_config.cert_file(), listener_config.key_file())
                else {
                    return Err(Error::new(
                        ErrorKind::ConfigError,
                        "listener: TLS protocol requires cert_file and key_file",
                    ));
                };
                Some(load_tls_acceptor(cert_file, key_file)?)
            }
            config::Protocol::Mqtt | config::Protocol::Ws => None,
        };

        let session_config = SessionConfig::new(
            Duration::from_secs(general.connect_timeout()),
            general.allow_empty_client_id(),
            general.max_packet_size(),
            general.topic_alias_maximum(),
            general.max_offline_messages(),
        );

        Ok(Self {
            id,
            config: listener_config,
            session_config,
            tcp_listener,
            tls_acceptor,
            dispatcher_sender,
            auth,
            next_session_id: 0,
        })
    }

    /// The locally bound address, useful with port zero.
    ///
    /// # Errors
    ///
    /// Returns error if the socket refuses to report it.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, Error> {
        Ok(self.tcp_listener.local_addr()?)
    }

    /// Accept connections forever.
    pub async fn run_loop(mut self) {
        loop {
            match self.tcp_listener.accept().await {
                Ok((tcp_stream, peer_addr)) => {
                    log::debug!("listener {}: connection from {peer_addr}", self.id);
                    self.next_session_id += 1;
                    let gid = SessionGid::new(self.id, self.next_session_id);
                    let protocol = self.config.protocol();
                    let tls_acceptor = self.tls_acceptor.clone();
                    let session_config = self.session_config.clone();
                    let dispatcher_sender = self.dispatcher_sender.clone();
                    let auth = Arc::clone(&self.auth);

                    // The transport handshake runs in the session task so
                    // a slow peer cannot stall the accept loop.
                    tokio::spawn(async move {
                        let stream =
                            match transport_handshake(protocol, tls_acceptor, tcp_stream).await {
                                Ok(stream) => stream,
                                Err(err) => {
                                    log::warn!("listener: handshake with {peer_addr} failed: {err}");
                                    return;
                                }
                            };
                        let session = Session::new(
                            gid,
                            session_config,
                            stream,
                            dispatcher_sender,
                            auth,
                        );
                        session.run_loop().await;
                    });
                }
                Err(err) => {
                    log::error!("listener {}: accept failed: {err}", self.id);
                }
            }
        }
    }
}

async fn transport_handshake(
    protocol: config::Protocol,
    tls_acceptor: Option<TlsAcceptor>,
    tcp_stream: TcpStream,
) -> Result<Stream, Error> {
    tcp_stream.set_nodelay(true)?;
    match protocol {
        config::Protocol::Mqtt => Ok(Stream::Mqtt(tcp_stream)),
        config::Protocol::Mqtts => {
            let acceptor = require_acceptor(tls_acceptor)?;
            let tls_stream = acceptor.accept(tcp_stream).await?;
            Ok(Stream::Mqtts(Box::new(tls_stream)))
        }
        config::Protocol::Ws => {
            let ws_stream = accept_async(tcp_stream).await?;
            Ok(Stream::Ws(Box::new(ws_stream)))
        }
        config::Protocol::Wss => {
            let acceptor = require_acceptor(tls_acceptor)?;
            let tls_stream = acceptor.accept(tcp_stream).await?;
            let wss_stream = accept_async(tls_stream).await?;
            Ok(Stream::Wss(Box::new(wss_stream)))
        }
    }
}

fn require_acceptor(tls_acceptor: Option<TlsAcceptor>) -> Result<TlsAcceptor, Error> {
    tls_acceptor.ok_or_else(|| {
        Error::new(
            ErrorKind::ConfigError,
            "listener: TLS acceptor missing for TLS protocol",
        )
    })
}

fn load_tls_acceptor(cert_file: &Path, key_file: &Path) -> Result<TlsAcceptor, Error> {
    let mut cert_reader = BufReader::new(File::open(cert_file).map_err(|err| {
        Error::from_string(
            ErrorKind::CertError,
            format!("listener: failed to open {cert_file:?}: {err}"),
        )
    })?);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            Error::from_string(
                ErrorKind::CertError,
                format!("listener: failed to parse certs in {cert_file:?}: {err}"),
            )
        })?;

    let mut key_reader = BufReader::new(File::open(key_file).map_err(|err| {
        Error::from_string(
            ErrorKind::CertError,
            format!("listener: failed to open {key_file:?}: {err}"),
        )
    })?);
    let key: PrivateKeyDer = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|err| {
            Error::from_string(
                ErrorKind::CertError,
                format!("listener: failed to parse key in {key_file:?}: {err}"),
            )
        })?
        .ok_or_else(|| {
            Error::from_string(
                ErrorKind::CertError,
                format!("listener: no private key in {key_file:?}"),
            )
        })?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| {
            Error::from_string(ErrorKind::CertError, format!("listener: bad cert/key: {err}"))
        })?;
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
