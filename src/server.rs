// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Broker bootstrap: wires the dispatcher and the listeners together and
//! spawns their actor loops.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc::channel;

use crate::auth::{AllowAll, Authenticator, FileAuth};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::listener::Listener;
use crate::types::ListenerId;

const DISPATCHER_CHANNEL_CAPACITY: usize = 1024;

/// A running broker instance.
pub struct ServerContext {
    config: Config,
    listener_addrs: Vec<SocketAddr>,
}

impl ServerContext {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self {
            config,
            listener_addrs: Vec::new(),
        }
    }

    /// Bound listener addresses, available after [`Self::start`]; useful
    /// with port zero.
    #[must_use]
    pub fn listener_addrs(&self) -> &[SocketAddr] {
        &self.listener_addrs
    }

    /// Bind every listener and spawn the actor loops, returning once the
    /// broker is accepting connections.
    ///
    /// # Errors
    ///
    /// Returns error if a listener address or certificate is unusable.
    pub async fn start(&mut self) -> Result<(), Error> {
        let auth: Arc<dyn Authenticator> = match self.config.security().password_file() {
            Some(path) => Arc::new(FileAuth::load(path)?),
            None => Arc::new(AllowAll::new(self.config.security().allow_anonymous())),
        };

        let (dispatcher_sender, dispatcher_receiver) = channel(DISPATCHER_CHANNEL_CAPACITY);
        let dispatcher = Dispatcher::new(
            dispatcher_receiver,
            self.config.general().max_offline_messages(),
        );
        tokio::spawn(dispatcher.run_loop());

        for (index, listener_config) in self.config.listeners().into_iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let id = index as ListenerId;
            let listener = Listener::bind(
                id,
                listener_config,
                self.config.general(),
                dispatcher_sender.clone(),
                Arc::clone(&auth),
            )
            .await?;
            self.listener_addrs.push(listener.local_addr()?);
            tokio::spawn(listener.run_loop());
        }
        Ok(())
    }

    /// Start the broker and run until interrupted.
    ///
    /// # Errors
    ///
    /// Returns error if startup fails.
    pub async fn run(mut self) -> Result<(), Error> {
        self.start().await?;
        tokio::signal::ctrl_c().await?;
        log::info!("server: interrupted, shutting down");
        Ok(())
    }
}
