//! Listener setup and the accept loop.

use std::io;
use std::sync::Arc;

use sifter_core::ProxyEngine;
use sifter_observe::{Event, EventSink, EventType, FlowContext};
use tokio::net::TcpListener;

use crate::session::run_session;

pub struct ProxyServer<S: EventSink + 'static> {
    engine: Arc<ProxyEngine<S>>,
}

impl<S: EventSink + 'static> ProxyServer<S> {
    pub fn new(engine: ProxyEngine<S>) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn engine(&self) -> &Arc<ProxyEngine<S>> {
        &self.engine
    }

    /// Binds the listener at the configured address.
    pub async fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::bind(self.engine.config.listen_target()).await
    }

    pub async fn run(self) -> io::Result<()> {
        let listener = self.bind().await?;
        self.run_with_listener(listener).await
    }

    /// Accepts connections forever, one detached session task per client.
    /// Session failures never stop the loop; only listener errors do.
    pub async fn run_with_listener(self, listener: TcpListener) -> io::Result<()> {
        let port = listener.local_addr()?.port();
        self.engine.emit(
            Event::new(EventType::ListenerStarted, FlowContext::process())
                .with_attribute("port", port.to_string()),
        );

        loop {
            let (stream, client_addr) = listener.accept().await?;
            tokio::spawn(run_session(Arc::clone(&self.engine), stream, client_addr));
        }
    }
}
