//! # Endpoint
//!
//! One side of a channel. Owns the pending registry and wires the dispatcher
//! (outbound) and the router (inbound) to it. Registries are never shared
//! between endpoints.
//!
//! The pump (`serve`) reads packets from the transport, dispatches them in
//! arrival order, and spawns each completion as its own task.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::api::LocalApi;
use crate::callback::Callback;
use crate::codec;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::packet::ArgsTransform;
use crate::packet::CallId;
use crate::packet::Packet;
use crate::registry::Registry;
use crate::router::Router;
use crate::transport::Transport;
use crate::value::Value;

/// State owned by one endpoint, shared by its dispatcher and router.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) registry: Registry,
    pub(crate) local: LocalApi,
    pub(crate) transport: Arc<dyn Transport>,
}

/// Arguments ready for the wire, with the callbacks exposed for them.
pub(crate) struct Marshalled {
    pub(crate) args: Vec<Value>,
    pub(crate) args_transform: ArgsTransform,
    pub(crate) exposed: Vec<CallId>,
}

impl Shared {
    /// Swaps function arguments for call-IDs using the endpoint's codec mode.
    ///
    /// On failure every callback exposed so far is released again.
    pub(crate) fn marshal(&self, args: Vec<Value>) -> Result<Marshalled> {
        let mut exposed = Vec::new();
        let mut alloc = |cb: Callback| -> Result<CallId> {
            let id = self.registry.expose(cb)?;
            exposed.push(id);
            Ok(id)
        };

        let result = if self.config.allow_nested_functions {
            codec::extract_nested(args, self.config.max_depth, &mut alloc)
        } else {
            codec::extract_flat(args, &mut alloc)
        };

        match result {
            Ok((args, args_transform)) => Ok(Marshalled { args, args_transform, exposed }),
            Err(e) => {
                self.release(&exposed);
                Err(e)
            }
        }
    }

    /// Drops registry entries for a call that never reached the peer.
    pub(crate) fn release(&self, ids: &[CallId]) {
        for id in ids {
            self.registry.remove(*id);
        }
        if !ids.is_empty() {
            tracing::debug!(released = ids.len(), "released callbacks of an unsent call");
        }
    }
}

/// One side of an RPC channel.
pub struct Endpoint {
    shared: Arc<Shared>,
}

impl Endpoint {
    /// Creates an endpoint. Inbound packets are processed once `serve` runs
    /// or when the host feeds them to `route`.
    pub fn new(transport: impl Transport, local: LocalApi, config: Config) -> Self {
        Self::with_transport(Arc::new(transport), local, config)
    }

    pub fn with_transport(transport: Arc<dyn Transport>, local: LocalApi, config: Config) -> Self {
        let registry = Registry::new(config.max_pending_responses, config.call_id_space);
        Self {
            shared: Arc::new(Shared {
                config,
                registry,
                local,
                transport,
            }),
        }
    }

    /// The calling surface for the peer's functions.
    pub fn remote(&self) -> Dispatcher {
        Dispatcher::new(self.shared.clone())
    }

    pub fn router(&self) -> Router {
        Router::new(self.shared.clone())
    }

    /// Feeds one inbound packet and waits for its response to be sent.
    pub async fn route(&self, packet: Packet) -> Result<()> {
        self.router().route(packet).await
    }

    /// Current size of the pending registry, for back-pressure monitoring.
    pub fn pending(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// Functions exported to the peer. Handlers may be added at any time.
    pub fn local(&self) -> &LocalApi {
        &self.shared.local
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Spawns the pump that routes every packet the transport receives.
    ///
    /// The pump ends when the transport closes, fails, or the endpoint has
    /// been dropped by the time the next packet arrives.
    pub fn serve(&self) -> JoinHandle<Result<()>> {
        let transport = self.shared.transport.clone();
        let shared = Arc::downgrade(&self.shared);

        tokio::spawn(async move {
            loop {
                let packet = match transport.recv().await {
                    Ok(Some(packet)) => packet,
                    Ok(None) => return Ok(()),
                    Err(e) => {
                        tracing::error!(error = %e, "transport error in pump");
                        return Err(e.into());
                    }
                };

                let Some(shared) = shared.upgrade() else {
                    return Ok(());
                };

                match Router::new(shared).dispatch(packet) {
                    Ok(Some(completion)) => {
                        tokio::spawn(async move {
                            if let Err(e) = completion.await {
                                tracing::error!(error = %e, "inbound call failed");
                            }
                        });
                    }
                    Ok(None) => {}
                    Err(e) => tracing::error!(error = %e, "dropped inbound packet"),
                }
            }
        })
    }
}
