//! # Call Dispatcher
//!
//! The outbound calling surface. Every call marshals its arguments through
//! the codec, registers a return entry (unless fire-and-forget), and hands
//! the packet to the transport.
//!
//! Names are resolved lazily by the peer at call time; `func` only binds a
//! name to this dispatcher.

use std::sync::Arc;
use std::sync::Weak;

use crate::endpoint::Marshalled;
use crate::endpoint::Shared;
use crate::error::Error;
use crate::error::Result;
use crate::packet::ApiFunc;
use crate::packet::CallId;
use crate::packet::Packet;
use crate::value::Value;

/// Handle for calling the peer's functions.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn upgrade(shared: &Weak<Shared>) -> Result<Self> {
        shared.upgrade().map(Self::new).ok_or(Error::Closed)
    }

    /// Binds a remote function name.
    pub fn func(&self, name: impl Into<String>) -> RemoteFn {
        RemoteFn {
            dispatcher: self.clone(),
            name: name.into(),
        }
    }

    /// Calls the peer's function `name` and awaits its return value.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.invoke(named(name)?, args).await
    }

    /// The fire-and-forget surface: calls made through it expect no response.
    pub fn no_wait(&self) -> NoWait {
        NoWait { dispatcher: self.clone() }
    }

    /// Rejects the peer's pending call `cb_id`.
    pub async fn throw_error(&self, cb_id: CallId, message: &str, stack: Option<&str>) -> Result<()> {
        self.send(Packet::throw_error(cb_id, message, stack)).await
    }

    /// Tells the peer to release the callback it exposed as `call_id`.
    pub async fn unbind(&self, call_id: CallId) -> Result<()> {
        tracing::debug!(%call_id, "unbinding remote callback");
        self.send(Packet::unbind(call_id)).await
    }

    /// Current size of the pending registry.
    pub fn pending(&self) -> usize {
        self.shared.registry.len()
    }

    /// Sends a call and awaits the response addressed to its `cb_id`.
    pub(crate) async fn invoke(&self, api_func: ApiFunc, args: Vec<Value>) -> Result<Value> {
        let Marshalled { args, args_transform, mut exposed } = self.shared.marshal(args)?;
        let (cb_id, rx) = match self.shared.registry.await_return() {
            Ok(pending) => pending,
            Err(e) => {
                self.shared.release(&exposed);
                return Err(e);
            }
        };

        let packet = Packet {
            api_func,
            cb_id: Some(cb_id),
            args,
            args_transform,
        };

        if let Err(e) = self.shared.transport.send(packet).await {
            exposed.push(cb_id);
            self.shared.release(&exposed);
            return Err(e.into());
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(remote)) => Err(Error::Remote(remote)),
            Err(_) => Err(Error::Abandoned(cb_id)),
        }
    }

    /// Sends a call without registering a return entry.
    pub(crate) async fn notify(&self, api_func: ApiFunc, args: Vec<Value>) -> Result<()> {
        let Marshalled { args, args_transform, exposed } = self.shared.marshal(args)?;
        let packet = Packet {
            api_func,
            cb_id: None,
            args,
            args_transform,
        };

        if let Err(e) = self.shared.transport.send(packet).await {
            self.shared.release(&exposed);
            return Err(e.into());
        }
        Ok(())
    }

    async fn send(&self, packet: Packet) -> Result<()> {
        self.shared.transport.send(packet).await?;
        Ok(())
    }
}

fn named(name: &str) -> Result<ApiFunc> {
    if ApiFunc::is_reserved(name) {
        return Err(Error::ReservedName(name.to_string()));
    }
    Ok(ApiFunc::Named(name.to_string()))
}

/// A remote function bound by name.
#[derive(Clone)]
pub struct RemoteFn {
    dispatcher: Dispatcher,
    name: String,
}

impl RemoteFn {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Calls the function and awaits its return value.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        self.dispatcher.call(&self.name, args).await
    }

    /// Calls the function without waiting for a response.
    pub async fn notify(&self, args: Vec<Value>) -> Result<()> {
        self.dispatcher.no_wait().call(&self.name, args).await
    }
}

/// Fire-and-forget calling surface.
///
/// Calls allocate no return entry and complete once the packet is handed to
/// the transport. Callback arguments are still exposed.
#[derive(Clone)]
pub struct NoWait {
    dispatcher: Dispatcher,
}

impl NoWait {
    /// Calls the peer's function `name`.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<()> {
        self.dispatcher.notify(named(name)?, args).await
    }

    /// Invokes the peer's callback `id`.
    pub async fn callback(&self, id: CallId, args: Vec<Value>) -> Result<()> {
        self.dispatcher.notify(ApiFunc::Callback(id), args).await
    }
}
