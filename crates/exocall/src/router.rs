//! # Inbound Router
//!
//! Single entry point for every packet arriving on the channel. Dispatches
//! purely on `api_func`:
//!
//! 1. `ThrowError`: reject and remove the addressed pending call.
//! 2. `Unbind`: remove the addressed entry without settling it.
//! 3. `Named`: run the local API function.
//! 4. `Callback`: settle an awaited return value, or run an exposed callback.
//! 5. Nothing found: answer with "not registered" or "callback unavailable".
//!
//! Routing is split in two. `dispatch` does all registry work synchronously,
//! in arrival order, and returns the completion (awaiting the handler and
//! sending its response). `route` runs both; the endpoint pump spawns the
//! completion instead, so a handler that calls back into the peer never
//! blocks inbound traffic.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::callback::Callback;
use crate::callback::Context;
use crate::callback::HandlerFuture;
use crate::codec;
use crate::dispatch::Dispatcher;
use crate::endpoint::Shared;
use crate::error::Error;
use crate::error::RemoteError;
use crate::error::Result;
use crate::json;
use crate::packet::ApiFunc;
use crate::packet::CallId;
use crate::packet::Packet;
use crate::registry::Claim;
use crate::registry::Resolver;
use crate::value::Value;

/// The deferred half of routing a call.
pub type Completion = BoxFuture<'static, Result<()>>;

/// Resolved target of an inbound call.
enum Target {
    Settle(crate::registry::Settle),
    Invoke(Callback),
}

/// Routes inbound packets for one endpoint.
#[derive(Clone)]
pub struct Router {
    shared: Arc<Shared>,
}

impl Router {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Routes a packet and waits until its response has been sent.
    ///
    /// With error exposure disabled, a failing handler surfaces here as
    /// `Error::Handler` and nothing is sent back.
    pub async fn route(&self, packet: Packet) -> Result<()> {
        match self.dispatch(packet)? {
            Some(completion) => completion.await,
            None => Ok(()),
        }
    }

    /// Applies a packet to the registry and starts its handler.
    ///
    /// Returns the completion still to be awaited, if any.
    pub fn dispatch(&self, packet: Packet) -> Result<Option<Completion>> {
        let Packet { api_func, cb_id, mut args, args_transform } = packet;

        let target = match &api_func {
            ApiFunc::ThrowError => {
                self.reject(args)?;
                return Ok(None);
            }
            ApiFunc::Unbind => {
                self.release(&args)?;
                return Ok(None);
            }
            ApiFunc::Named(name) => self.shared.local.get(name).map(Target::Invoke),
            ApiFunc::Callback(id) => self.shared.registry.claim(*id).map(|claim| match claim {
                Claim::Settle(tx) => Target::Settle(tx),
                Claim::Invoke(cb) => Target::Invoke(cb),
            }),
        };

        let Some(target) = target else {
            return Ok(self.unavailable(&api_func, cb_id));
        };

        let weak = Arc::downgrade(&self.shared);
        if let Err(e) = codec::rehydrate(
            &mut args,
            &args_transform,
            self.shared.config.max_depth,
            &|id| Callback::remote(id, weak.clone()),
        ) {
            return self.malformed(&api_func, cb_id, target, e);
        }

        let pending: HandlerFuture = match target {
            Target::Settle(tx) => {
                let value = args.into_iter().next().unwrap_or(Value::Null);
                if tx.send(Ok(value)).is_err() {
                    tracing::debug!(%api_func, "caller stopped waiting before the response arrived");
                }
                if cb_id.is_none() {
                    return Ok(None);
                }
                async { Ok::<_, anyhow::Error>(Value::Null) }.boxed()
            }
            Target::Invoke(cb) => {
                let ctx = self
                    .shared
                    .config
                    .inject_context
                    .then(|| Context::new(Dispatcher::new(self.shared.clone())));
                cb.invoke(ctx, args)
            }
        };

        let router = self.clone();
        Ok(Some(async move { router.complete(api_func, cb_id, pending).await }.boxed()))
    }

    async fn complete(&self, api_func: ApiFunc, cb_id: Option<CallId>, pending: HandlerFuture) -> Result<()> {
        let dispatcher = Dispatcher::new(self.shared.clone());

        match pending.await {
            Ok(value) => {
                let Some(cb_id) = cb_id else {
                    return Ok(());
                };
                // A function result is exposed by the codec like any
                // callback argument.
                dispatcher.no_wait().callback(cb_id, vec![value]).await
            }
            Err(e) if self.shared.config.expose_errors => {
                let Some(cb_id) = cb_id else {
                    tracing::warn!(%api_func, error = %e, "handler failed on a fire-and-forget call");
                    return Ok(());
                };
                let stack = format!("{:?}", e);
                dispatcher.throw_error(cb_id, &e.to_string(), Some(&stack)).await
            }
            Err(e) => Err(Error::Handler(e)),
        }
    }

    /// Answers a call whose arguments could not be rehydrated.
    ///
    /// An awaited return value is rejected locally. A caller waiting on
    /// `cb_id` gets a throw-error; otherwise the failure is returned.
    fn malformed(
        &self,
        api_func: &ApiFunc,
        cb_id: Option<CallId>,
        target: Target,
        e: Error,
    ) -> Result<Option<Completion>> {
        tracing::debug!(%api_func, error = %e, "inbound arguments could not be rehydrated");

        if let Target::Settle(tx) = target {
            if tx.send(Err(RemoteError::new(e.to_string(), None))).is_err() {
                tracing::debug!(%api_func, "caller stopped waiting before the response arrived");
            }
        }

        let Some(cb_id) = cb_id else {
            return Err(e);
        };
        let message = e.to_string();
        let dispatcher = Dispatcher::new(self.shared.clone());
        Ok(Some(async move { dispatcher.throw_error(cb_id, &message, None).await }.boxed()))
    }

    fn reject(&self, args: Vec<Value>) -> Result<()> {
        let mut args = args.into_iter();
        let cb_id = args
            .next()
            .and_then(|v| v.as_call_id())
            .ok_or_else(|| Error::Protocol("throw-error without a call-ID".into()))?;
        let message = match args.next() {
            Some(Value::String(s)) => s,
            Some(other) => json::value_to_json(&other)
                .map(|json| json.to_string())
                .unwrap_or_else(|_| other.kind().to_string()),
            None => String::new(),
        };
        let stack = match args.next() {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };

        match self.shared.registry.remove(cb_id).map(|entry| entry.into_resolver()) {
            Some(Resolver::Settle(tx)) => {
                if tx.send(Err(RemoteError::new(message, stack))).is_err() {
                    tracing::debug!(%cb_id, "caller stopped waiting before the rejection arrived");
                }
            }
            Some(Resolver::Expose(_)) => {
                tracing::debug!(%cb_id, "throw-error addressed an exposed callback; released it");
            }
            None => {
                tracing::debug!(%cb_id, %message, "throw-error for an unknown call");
            }
        }
        Ok(())
    }

    fn release(&self, args: &[Value]) -> Result<()> {
        let call_id = args
            .first()
            .and_then(Value::as_call_id)
            .ok_or_else(|| Error::Protocol("unbind without a call-ID".into()))?;

        if self.shared.registry.remove(call_id).is_none() {
            tracing::debug!(%call_id, "unbind for an unknown call");
        }
        Ok(())
    }

    fn unavailable(&self, api_func: &ApiFunc, cb_id: Option<CallId>) -> Option<Completion> {
        let message = match api_func {
            ApiFunc::Callback(id) => {
                if self.shared.config.ignore_callback_unavailable {
                    tracing::debug!(%id, "ignoring invocation of an unavailable callback");
                    return None;
                }
                format!(
                    "Callback '{}' is unavailable. It may have been evicted from the pending registry \
                     (maxPendingResponses overflow) or released via unbind().",
                    id
                )
            }
            other => format!(
                "Function '{}' is not registered in the local API. Check that it is defined and exposed.",
                other
            ),
        };

        let Some(cb_id) = cb_id else {
            tracing::debug!(%api_func, "{}", message);
            return None;
        };

        let dispatcher = Dispatcher::new(self.shared.clone());
        Some(async move { dispatcher.throw_error(cb_id, &message, None).await }.boxed())
    }
}
