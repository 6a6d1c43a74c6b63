//! # Packets
//!
//! The unit of wire communication. Every interaction (a call, a response, a
//! callback invocation, an error, an unbind) is one `Packet`.
//!
//! ## Invariants
//!
//! - A response is a call addressed to the caller's `cb_id` with the result
//!   as its only argument and no `cb_id` of its own.
//! - `args_transform` lists exactly the positions in `args` that hold
//!   substituted call-IDs.

use std::fmt;

use crate::value::Value;

/// Reserved wire tag for the throw-error control message.
pub const THROW_ERROR: &str = "throwError";

/// Reserved wire tag for the unbind control message.
pub const UNBIND: &str = "unbind";

/// Correlation token for an awaited return value or an exposed callback.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct CallId(pub u64);

impl CallId {
    /// Largest ID that survives a round trip through a double.
    pub const MAX: CallId = CallId((1 << 53) - 1);
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a packet addresses.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ApiFunc {
    /// A function exported through the peer's local API.
    Named(String),
    /// A callback or awaited return value registered on the peer.
    Callback(CallId),
    /// Reject a pending call: `args = [cb_id, message, stack]`.
    ThrowError,
    /// Release an exposed callback: `args = [call_id]`.
    Unbind,
}

impl ApiFunc {
    /// Maps a wire name to its variant, recognizing the reserved tags.
    pub fn from_name(name: &str) -> Self {
        match name {
            THROW_ERROR => ApiFunc::ThrowError,
            UNBIND => ApiFunc::Unbind,
            other => ApiFunc::Named(other.to_string()),
        }
    }

    pub fn is_reserved(name: &str) -> bool {
        name == THROW_ERROR || name == UNBIND
    }

    pub fn is_control(&self) -> bool {
        matches!(self, ApiFunc::ThrowError | ApiFunc::Unbind)
    }
}

impl fmt::Display for ApiFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{}", name),
            Self::Callback(id) => write!(f, "{}", id),
            Self::ThrowError => write!(f, "{}", THROW_ERROR),
            Self::Unbind => write!(f, "{}", UNBIND),
        }
    }
}

/// Mirror of the argument tree recording where call-IDs were substituted.
///
/// Branch keys are map keys, or decimal indices when the mirrored value is a
/// list. The mirror only contains paths that lead to a slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mirror {
    Slot,
    Branch(Vec<(String, Mirror)>),
}

/// Where in `args` call-IDs were substituted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgsTransform {
    /// Top-level argument indices.
    Flat(Vec<usize>),
    /// Per top-level argument, the mirror of its substituted paths.
    Nested(Vec<(usize, Mirror)>),
}

impl ArgsTransform {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Flat(positions) => positions.is_empty(),
            Self::Nested(roots) => roots.is_empty(),
        }
    }

    /// Number of substituted slots.
    pub fn slot_count(&self) -> usize {
        fn count(mirror: &Mirror) -> usize {
            match mirror {
                Mirror::Slot => 1,
                Mirror::Branch(children) => children.iter().map(|(_, m)| count(m)).sum(),
            }
        }

        match self {
            Self::Flat(positions) => positions.len(),
            Self::Nested(roots) => roots.iter().map(|(_, m)| count(m)).sum(),
        }
    }
}

impl Default for ArgsTransform {
    fn default() -> Self {
        Self::Flat(Vec::new())
    }
}

/// One message exchanged over the channel.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub api_func: ApiFunc,
    /// `None` means fire-and-forget: no response is expected.
    pub cb_id: Option<CallId>,
    pub args: Vec<Value>,
    pub args_transform: ArgsTransform,
}

impl Packet {
    /// A packet with no substituted arguments.
    pub fn new(api_func: ApiFunc, cb_id: Option<CallId>, args: Vec<Value>) -> Self {
        Self {
            api_func,
            cb_id,
            args,
            args_transform: ArgsTransform::default(),
        }
    }

    /// The throw-error control packet rejecting `cb_id`.
    pub fn throw_error(cb_id: CallId, message: &str, stack: Option<&str>) -> Self {
        let stack = stack.map(Value::from).unwrap_or(Value::Null);
        Self::new(
            ApiFunc::ThrowError,
            None,
            vec![Value::from(cb_id), Value::from(message), stack],
        )
    }

    /// The unbind control packet releasing `call_id`.
    pub fn unbind(call_id: CallId) -> Self {
        Self::new(ApiFunc::Unbind, None, vec![Value::from(call_id)])
    }

    pub fn expects_response(&self) -> bool {
        self.cb_id.is_some()
    }
}
