//! # Function Values
//!
//! A `Callback` is either a local handler (a Rust closure this side can run)
//! or a stand-in for a function that lives on the peer. Both can be passed as
//! arguments, returned from handlers, and invoked.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::Weak;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::dispatch::Dispatcher;
use crate::endpoint::Shared;
use crate::error::Error;
use crate::error::Result;
use crate::packet::ApiFunc;
use crate::packet::CallId;
use crate::value::Value;

/// The future a handler returns.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// A local function callable from the peer.
pub type Handler = Arc<dyn Fn(Option<Context>, Vec<Value>) -> HandlerFuture + Send + Sync>;

/// Execution context handed to handlers when context injection is enabled.
#[derive(Clone)]
pub struct Context {
    dispatcher: Dispatcher,
}

impl Context {
    pub(crate) fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// The calling surface back to the peer that issued this call.
    pub fn remote(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Current size of the pending registry.
    pub fn pending(&self) -> usize {
        self.dispatcher.pending()
    }
}

enum Inner {
    Local(Handler),
    Remote { id: CallId, shared: Weak<Shared> },
}

/// A function value.
#[derive(Clone)]
pub struct Callback {
    inner: Arc<Inner>,
}

impl Callback {
    /// Wraps an async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Option<Context>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |ctx, args| f(ctx, args).boxed());
        Self { inner: Arc::new(Inner::Local(handler)) }
    }

    /// Wraps a synchronous closure that ignores the context.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(move |_ctx, args| {
            let result = f(args);
            async move { result }.boxed()
        });
        Self { inner: Arc::new(Inner::Local(handler)) }
    }

    /// A stand-in for the peer's callback `id`.
    pub(crate) fn remote(id: CallId, shared: Weak<Shared>) -> Self {
        Self { inner: Arc::new(Inner::Remote { id, shared }) }
    }

    /// The peer-side call-ID, if this is a stand-in.
    pub fn remote_id(&self) -> Option<CallId> {
        match &*self.inner {
            Inner::Remote { id, .. } => Some(*id),
            Inner::Local(_) => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.remote_id().is_some()
    }

    /// Runs the function as the router does.
    ///
    /// A stand-in forwards the call to the peer and yields its result.
    pub(crate) fn invoke(&self, ctx: Option<Context>, args: Vec<Value>) -> HandlerFuture {
        match &*self.inner {
            Inner::Local(handler) => handler(ctx, args),
            Inner::Remote { id, shared } => {
                let id = *id;
                let shared = shared.clone();
                async move {
                    let dispatcher = Dispatcher::upgrade(&shared)?;
                    let value = dispatcher.invoke(ApiFunc::Callback(id), args).await?;
                    Ok(value)
                }
                .boxed()
            }
        }
    }

    /// Calls the function and awaits its result.
    ///
    /// Local handlers run without a context and their failures come back as
    /// `Error::Handler`.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        match &*self.inner {
            Inner::Local(handler) => handler(None, args).await.map_err(Error::Handler),
            Inner::Remote { id, shared } => {
                let dispatcher = Dispatcher::upgrade(shared)?;
                dispatcher.invoke(ApiFunc::Callback(*id), args).await
            }
        }
    }

    /// Invokes a stand-in without waiting for a response.
    pub async fn notify(&self, args: Vec<Value>) -> Result<()> {
        match &*self.inner {
            Inner::Local(handler) => handler(None, args).await.map(|_| ()).map_err(Error::Handler),
            Inner::Remote { id, shared } => {
                let dispatcher = Dispatcher::upgrade(shared)?;
                dispatcher.notify(ApiFunc::Callback(*id), args).await
            }
        }
    }

    /// Tells the peer to release this callback.
    ///
    /// Later invocations of the stand-in are answered with "callback
    /// unavailable". A no-op for local handlers.
    pub async fn unbind(&self) -> Result<()> {
        match &*self.inner {
            Inner::Local(_) => Ok(()),
            Inner::Remote { id, shared } => {
                let dispatcher = Dispatcher::upgrade(shared)?;
                dispatcher.unbind(*id).await
            }
        }
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner {
            Inner::Local(_) => write!(f, "Callback(local)"),
            Inner::Remote { id, .. } => write!(f, "Callback(remote {})", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_callback_call() {
        let double = Callback::from_fn(|args| {
            let n = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(Value::Int(n * 2))
        });

        assert_eq!(double.call(vec![Value::Int(21)]).await.unwrap(), Value::Int(42));
        assert!(!double.is_remote());
        assert!(double.unbind().await.is_ok());
    }

    #[tokio::test]
    async fn test_local_callback_failure_is_handler_error() {
        let failing = Callback::new(|_ctx, _args| async { anyhow::bail!("nope") });

        let err = failing.call(vec![]).await.unwrap_err();
        assert!(matches!(err, Error::Handler(ref e) if e.to_string() == "nope"));
    }

    #[tokio::test]
    async fn test_orphaned_stand_in_is_closed() {
        let stand_in = Callback::remote(CallId(5), Weak::new());

        assert_eq!(stand_in.remote_id(), Some(CallId(5)));
        assert!(matches!(stand_in.call(vec![]).await, Err(Error::Closed)));
        assert!(matches!(stand_in.unbind().await, Err(Error::Closed)));
    }

    #[test]
    fn test_equality_is_identity() {
        let a = Callback::from_fn(|_| Ok(Value::Null));
        let b = Callback::from_fn(|_| Ok(Value::Null));

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
