//! Endpoint configuration.

use crate::packet::CallId;

/// Options fixed at endpoint construction.
#[derive(Clone, Debug)]
pub struct Config {
    /// Registry size above which least recently used entries are evicted.
    pub max_pending_responses: usize,
    /// Extract functions at any depth instead of only top-level arguments.
    /// This selects the wire contract of the endpoint.
    pub allow_nested_functions: bool,
    /// Forward handler failures to the caller. When false, `route` returns
    /// the failure and the caller never settles.
    pub expose_errors: bool,
    /// Hand handlers a `Context` with the dispatcher and pending count.
    pub inject_context: bool,
    /// Drop invocations of evicted or unbound callbacks instead of
    /// reporting them.
    pub ignore_callback_unavailable: bool,
    /// Deepest argument nesting the codec walks.
    pub max_depth: usize,
    /// Call-IDs are drawn from `1..=call_id_space`.
    pub call_id_space: u64,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pending_responses(mut self, max: usize) -> Self {
        self.max_pending_responses = max;
        self
    }

    pub fn with_nested_functions(mut self, allow: bool) -> Self {
        self.allow_nested_functions = allow;
        self
    }

    pub fn with_expose_errors(mut self, expose: bool) -> Self {
        self.expose_errors = expose;
        self
    }

    pub fn with_inject_context(mut self, inject: bool) -> Self {
        self.inject_context = inject;
        self
    }

    pub fn with_ignore_callback_unavailable(mut self, ignore: bool) -> Self {
        self.ignore_callback_unavailable = ignore;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_call_id_space(mut self, space: u64) -> Self {
        self.call_id_space = space;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_pending_responses: 10_000,
            allow_nested_functions: false,
            expose_errors: true,
            inject_context: true,
            ignore_callback_unavailable: false,
            max_depth: 64,
            call_id_space: CallId::MAX.0,
        }
    }
}
