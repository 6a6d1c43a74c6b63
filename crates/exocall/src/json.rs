//! # JSON Wire Codec
//!
//! Maps packets to the JSON wire shape for transports that carry text:
//!
//! ```text
//! { "apiFunc": string | number, "cbId": number | false,
//!   "args": [...], "argsTransform": [...] | {...} }
//! ```
//!
//! Flat transforms are arrays of indices. Nested transforms are objects keyed
//! by argument index whose leaves are `1`. Function values only exist in
//! memory; one found outside a substitution slot is an encode error.

use serde_json::Map as JsonMap;
use serde_json::Number;
use serde_json::Value as Json;

use crate::error::Error;
use crate::error::Result;
use crate::packet::ApiFunc;
use crate::packet::ArgsTransform;
use crate::packet::CallId;
use crate::packet::Mirror;
use crate::packet::Packet;
use crate::value::Map;
use crate::value::Value;

const API_FUNC: &str = "apiFunc";
const CB_ID: &str = "cbId";
const ARGS: &str = "args";
const ARGS_TRANSFORM: &str = "argsTransform";

impl Packet {
    /// Encodes the packet into its JSON wire shape.
    pub fn to_json(&self) -> Result<Json> {
        let api_func = match &self.api_func {
            ApiFunc::Named(name) => Json::String(name.clone()),
            ApiFunc::Callback(id) => Json::Number(Number::from(id.0)),
            control => Json::String(control.to_string()),
        };
        let cb_id = match self.cb_id {
            Some(id) => Json::Number(Number::from(id.0)),
            None => Json::Bool(false),
        };
        let args = self.args.iter().map(value_to_json).collect::<Result<Vec<_>>>()?;

        let mut obj = JsonMap::new();
        obj.insert(API_FUNC.into(), api_func);
        obj.insert(CB_ID.into(), cb_id);
        obj.insert(ARGS.into(), Json::Array(args));
        obj.insert(ARGS_TRANSFORM.into(), transform_to_json(&self.args_transform));
        Ok(Json::Object(obj))
    }

    /// Decodes a packet from its JSON wire shape.
    pub fn from_json(json: Json) -> Result<Self> {
        let Json::Object(mut obj) = json else {
            return Err(Error::Json("packet is not an object".into()));
        };

        let api_func = match obj.remove(API_FUNC) {
            Some(Json::String(name)) => ApiFunc::from_name(&name),
            Some(Json::Number(n)) => ApiFunc::Callback(call_id(&n)?),
            _ => return Err(Error::Json("apiFunc must be a string or a number".into())),
        };
        let cb_id = match obj.remove(CB_ID) {
            None | Some(Json::Null) | Some(Json::Bool(false)) => None,
            Some(Json::Number(n)) => Some(call_id(&n)?),
            Some(other) => return Err(Error::Json(format!("invalid cbId: {}", other))),
        };
        let args = match obj.remove(ARGS) {
            None => Vec::new(),
            Some(Json::Array(items)) => items.into_iter().map(Value::from).collect(),
            Some(_) => return Err(Error::Json("args must be an array".into())),
        };
        let args_transform = match obj.remove(ARGS_TRANSFORM) {
            None => ArgsTransform::default(),
            Some(json) => transform_from_json(json)?,
        };

        Ok(Self { api_func, cb_id, args, args_transform })
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(self.to_json()?.to_string())
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let json = serde_json::from_str(text).map_err(|e| Error::Json(e.to_string()))?;
        Self::from_json(json)
    }
}

/// Encodes a value; functions and non-finite floats have no JSON form.
pub fn value_to_json(value: &Value) -> Result<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::Number(Number::from(*n)),
        Value::Float(f) => Json::Number(
            Number::from_f64(*f).ok_or_else(|| Error::Json(format!("{} has no JSON form", f)))?,
        ),
        Value::String(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect::<Result<_>>()?),
        Value::Map(map) => {
            let mut obj = JsonMap::new();
            for (k, v) in map.iter() {
                obj.insert(k.to_string(), value_to_json(v)?);
            }
            Json::Object(obj)
        }
        Value::Function(_) => {
            return Err(Error::Json("function value outside a substitution slot".into()));
        }
    })
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(obj) => Value::Map(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect::<Map>()),
        }
    }
}

fn call_id(n: &Number) -> Result<CallId> {
    let id = match n.as_u64() {
        Some(id) => id,
        None => match n.as_f64() {
            Some(f) if f >= 0.0 && f.fract() == 0.0 => f as u64,
            _ => return Err(Error::Json(format!("{} is not a call-ID", n))),
        },
    };
    if id > CallId::MAX.0 {
        return Err(Error::Json(format!("{} is outside the call-ID range", id)));
    }
    Ok(CallId(id))
}

fn transform_to_json(transform: &ArgsTransform) -> Json {
    match transform {
        ArgsTransform::Flat(positions) => {
            Json::Array(positions.iter().map(|i| Json::Number(Number::from(*i))).collect())
        }
        ArgsTransform::Nested(roots) => {
            let mut obj = JsonMap::new();
            for (i, mirror) in roots {
                obj.insert(i.to_string(), mirror_to_json(mirror));
            }
            Json::Object(obj)
        }
    }
}

fn mirror_to_json(mirror: &Mirror) -> Json {
    match mirror {
        Mirror::Slot => Json::Number(Number::from(1)),
        Mirror::Branch(children) => {
            let mut obj = JsonMap::new();
            for (key, child) in children {
                obj.insert(key.clone(), mirror_to_json(child));
            }
            Json::Object(obj)
        }
    }
}

fn transform_from_json(json: Json) -> Result<ArgsTransform> {
    match json {
        Json::Array(items) => {
            let positions = items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .map(|i| i as usize)
                        .ok_or_else(|| Error::Json(format!("invalid transform index: {}", item)))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(ArgsTransform::Flat(positions))
        }
        Json::Object(obj) => {
            let mut roots = Vec::new();
            for (key, child) in obj {
                let i = key
                    .parse::<usize>()
                    .map_err(|_| Error::Json(format!("invalid transform argument index: {}", key)))?;
                roots.push((i, mirror_from_json(child)?));
            }
            Ok(ArgsTransform::Nested(roots))
        }
        other => Err(Error::Json(format!("invalid argsTransform: {}", other))),
    }
}

fn mirror_from_json(json: Json) -> Result<Mirror> {
    match json {
        Json::Number(_) | Json::Bool(true) => Ok(Mirror::Slot),
        Json::Object(obj) => {
            let children = obj
                .into_iter()
                .map(|(k, v)| Ok((k, mirror_from_json(v)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Mirror::Branch(children))
        }
        other => Err(Error::Json(format!("invalid transform node: {}", other))),
    }
}
