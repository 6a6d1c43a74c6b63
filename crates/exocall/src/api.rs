//! # Local API Table
//!
//! The functions this side exports to the peer, by name. The table is
//! concurrent so hosts can register handlers after the endpoint is running.

use std::future::Future;

use dashmap::DashMap;

use crate::callback::Callback;
use crate::callback::Context;
use crate::error::Error;
use crate::error::Result;
use crate::packet::ApiFunc;
use crate::value::Value;

#[derive(Default)]
pub struct LocalApi {
    funcs: DashMap<String, Callback>,
}

impl LocalApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` under `name`, replacing any previous one.
    ///
    /// Reserved control names cannot be registered.
    pub fn register(&self, name: impl Into<String>, callback: Callback) -> Result<()> {
        let name = name.into();
        if ApiFunc::is_reserved(&name) {
            return Err(Error::ReservedName(name));
        }
        self.funcs.insert(name, callback);
        Ok(())
    }

    /// Builder form of `register` for async handlers.
    pub fn with<F, Fut>(self, name: impl Into<String>, f: F) -> Result<Self>
    where
        F: Fn(Option<Context>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(name, Callback::new(f))?;
        Ok(self)
    }

    /// Builder form of `register` for synchronous handlers.
    pub fn with_fn<F>(self, name: impl Into<String>, f: F) -> Result<Self>
    where
        F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(name, Callback::from_fn(f))?;
        Ok(self)
    }

    pub fn unregister(&self, name: &str) -> Option<Callback> {
        self.funcs.remove(name).map(|(_, cb)| cb)
    }

    pub fn get(&self, name: &str) -> Option<Callback> {
        self.funcs.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.funcs.iter().map(|entry| entry.key().clone()).collect()
    }
}
