//! # Argument Codec
//!
//! Swaps function values for call-IDs on the way out, and call-IDs for
//! stand-ins on the way in.
//!
//! Two modes, fixed per endpoint:
//!
//! - **Flat**: only top-level arguments are inspected.
//! - **Nested**: `scan` walks the whole tree and builds a `Mirror` of the
//!   paths to every function, then `patch` consumes the arguments and splices
//!   a call-ID into each mirrored slot. Branches without functions are moved
//!   through as they are.
//!
//! ## Invariants
//!
//! - `FORBIDDEN_KEYS` are never followed, copied or rehydrated.
//! - Traversal order is list order, then map insertion order.
//! - `scan` allocates nothing, so a depth failure leaves the registry
//!   untouched.

use crate::callback::Callback;
use crate::error::Error;
use crate::error::Result;
use crate::packet::ArgsTransform;
use crate::packet::CallId;
use crate::packet::Mirror;
use crate::value::Value;
use crate::value::is_forbidden_key;

/// Replaces top-level function arguments with allocated call-IDs.
pub fn extract_flat<A>(mut args: Vec<Value>, alloc: &mut A) -> Result<(Vec<Value>, ArgsTransform)>
where
    A: FnMut(Callback) -> Result<CallId>,
{
    let mut positions = Vec::new();
    for (i, arg) in args.iter_mut().enumerate() {
        if let Value::Function(cb) = arg {
            let id = alloc(cb.clone())?;
            *arg = Value::from(id);
            positions.push(i);
        }
    }
    Ok((args, ArgsTransform::Flat(positions)))
}

/// Replaces every function in the argument tree with an allocated call-ID.
pub fn extract_nested<A>(
    args: Vec<Value>,
    max_depth: usize,
    alloc: &mut A,
) -> Result<(Vec<Value>, ArgsTransform)>
where
    A: FnMut(Callback) -> Result<CallId>,
{
    let roots = scan(&args, max_depth)?;
    let args = patch(args, &roots, alloc)?;
    Ok((args, ArgsTransform::Nested(roots)))
}

/// Builds the mirror of paths leading to function values.
pub fn scan(args: &[Value], max_depth: usize) -> Result<Vec<(usize, Mirror)>> {
    let mut roots = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        if let Some(mirror) = scan_value(arg, 1, max_depth)? {
            roots.push((i, mirror));
        }
    }
    Ok(roots)
}

fn scan_value(value: &Value, depth: usize, max_depth: usize) -> Result<Option<Mirror>> {
    if depth > max_depth {
        return Err(Error::DepthLimitExceeded);
    }

    let children = match value {
        Value::Function(_) => return Ok(Some(Mirror::Slot)),
        Value::List(items) => {
            let mut children = Vec::new();
            for (i, item) in items.iter().enumerate() {
                if let Some(m) = scan_value(item, depth + 1, max_depth)? {
                    children.push((i.to_string(), m));
                }
            }
            children
        }
        Value::Map(map) => {
            let mut children = Vec::new();
            for (key, item) in map.iter() {
                if is_forbidden_key(key) {
                    continue;
                }
                if let Some(m) = scan_value(item, depth + 1, max_depth)? {
                    children.push((key.to_string(), m));
                }
            }
            children
        }
        _ => return Ok(None),
    };

    Ok((!children.is_empty()).then_some(Mirror::Branch(children)))
}

/// Consumes the arguments and splices call-IDs into every mirrored slot.
pub fn patch<A>(mut args: Vec<Value>, roots: &[(usize, Mirror)], alloc: &mut A) -> Result<Vec<Value>>
where
    A: FnMut(Callback) -> Result<CallId>,
{
    for (i, mirror) in roots {
        let slot = args
            .get_mut(*i)
            .ok_or_else(|| Error::Protocol(format!("mirror points past argument {}", i)))?;
        let value = std::mem::take(slot);
        *slot = patch_value(value, mirror, alloc)?;
    }
    Ok(args)
}

fn patch_value<A>(value: Value, mirror: &Mirror, alloc: &mut A) -> Result<Value>
where
    A: FnMut(Callback) -> Result<CallId>,
{
    match (value, mirror) {
        (Value::Function(cb), Mirror::Slot) => Ok(Value::from(alloc(cb)?)),
        (Value::List(mut items), Mirror::Branch(children)) => {
            for (key, child) in children {
                let slot = key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get_mut(i))
                    .ok_or_else(|| Error::Protocol(format!("mirror key '{}' is not a list index", key)))?;
                let item = std::mem::take(slot);
                *slot = patch_value(item, child, alloc)?;
            }
            Ok(Value::List(items))
        }
        (Value::Map(mut map), Mirror::Branch(children)) => {
            map.retain_keys(|key| !is_forbidden_key(key));
            for (key, child) in children {
                let slot = map
                    .get_mut(key)
                    .ok_or_else(|| Error::Protocol(format!("mirror key '{}' is missing", key)))?;
                let item = std::mem::take(slot);
                *slot = patch_value(item, child, alloc)?;
            }
            Ok(Value::Map(map))
        }
        (value, _) => Err(Error::Protocol(format!(
            "mirror does not match a {} value",
            value.kind()
        ))),
    }
}

/// Replaces every recorded call-ID with a stand-in built by `make`.
pub fn rehydrate<M>(args: &mut [Value], transform: &ArgsTransform, max_depth: usize, make: &M) -> Result<()>
where
    M: Fn(CallId) -> Callback,
{
    match transform {
        ArgsTransform::Flat(positions) => {
            for i in positions {
                let slot = args
                    .get_mut(*i)
                    .ok_or_else(|| Error::Protocol(format!("transform points past argument {}", i)))?;
                *slot = stand_in(slot, make)?;
            }
        }
        ArgsTransform::Nested(roots) => {
            for (i, mirror) in roots {
                let slot = args
                    .get_mut(*i)
                    .ok_or_else(|| Error::Protocol(format!("transform points past argument {}", i)))?;
                rehydrate_value(slot, mirror, 1, max_depth, make)?;
            }
        }
    }
    Ok(())
}

fn rehydrate_value<M>(value: &mut Value, mirror: &Mirror, depth: usize, max_depth: usize, make: &M) -> Result<()>
where
    M: Fn(CallId) -> Callback,
{
    if depth > max_depth {
        return Err(Error::DepthLimitExceeded);
    }

    match (value, mirror) {
        (slot, Mirror::Slot) => {
            *slot = stand_in(slot, make)?;
        }
        (Value::List(items), Mirror::Branch(children)) => {
            for (key, child) in children {
                let item = key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get_mut(i))
                    .ok_or_else(|| Error::Protocol(format!("transform key '{}' is not a list index", key)))?;
                rehydrate_value(item, child, depth + 1, max_depth, make)?;
            }
        }
        (Value::Map(map), Mirror::Branch(children)) => {
            for (key, child) in children {
                if is_forbidden_key(key) {
                    continue;
                }
                let item = map
                    .get_mut(key)
                    .ok_or_else(|| Error::Protocol(format!("transform key '{}' is missing", key)))?;
                rehydrate_value(item, child, depth + 1, max_depth, make)?;
            }
        }
        (value, _) => {
            return Err(Error::Protocol(format!(
                "transform branch does not match a {} value",
                value.kind()
            )));
        }
    }
    Ok(())
}

fn stand_in<M>(slot: &Value, make: &M) -> Result<Value>
where
    M: Fn(CallId) -> Callback,
{
    let id = slot
        .as_call_id()
        .ok_or_else(|| Error::Protocol(format!("expected a call-ID, found a {} value", slot.kind())))?;
    Ok(Value::Function(make(id)))
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use super::*;
    use crate::value::Map;

    fn func() -> Value {
        Value::Function(Callback::from_fn(|_| Ok(Value::Null)))
    }

    /// Allocates sequential IDs starting at 100 and remembers what it saw.
    fn counter(seen: &mut Vec<Callback>) -> impl FnMut(Callback) -> Result<CallId> + '_ {
        move |cb| {
            seen.push(cb);
            Ok(CallId(99 + seen.len() as u64))
        }
    }

    fn make_remote(id: CallId) -> Callback {
        Callback::remote(id, Weak::new())
    }

    #[test]
    fn test_flat_extracts_top_level_only() {
        let nested = Value::List(vec![func()]);
        let args = vec![Value::Int(1), func(), nested.clone(), func()];

        let mut seen = Vec::new();
        let (out, transform) = extract_flat(args, &mut counter(&mut seen)).unwrap();

        assert_eq!(transform, ArgsTransform::Flat(vec![1, 3]));
        assert_eq!(out[0], Value::Int(1));
        assert_eq!(out[1], Value::Int(100));
        assert_eq!(out[2], nested);
        assert_eq!(out[3], Value::Int(101));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_nested_builds_mirror_in_key_order() {
        let args = vec![
            Value::from("plain"),
            Value::Map(Map::new()
                .with("z", func())
                .with("data", 5)
                .with("list", vec![Value::Int(0), func()])),
        ];

        let mut seen = Vec::new();
        let (out, transform) = extract_nested(args, 64, &mut counter(&mut seen)).unwrap();

        assert_eq!(transform, ArgsTransform::Nested(vec![(
            1,
            Mirror::Branch(vec![
                ("z".into(), Mirror::Slot),
                ("list".into(), Mirror::Branch(vec![("1".into(), Mirror::Slot)])),
            ]),
        )]));

        let map = out[1].as_map().unwrap();
        assert_eq!(map.get("z"), Some(&Value::Int(100)));
        assert_eq!(map.get("data"), Some(&Value::Int(5)));
        assert_eq!(map.get("list"), Some(&Value::List(vec![Value::Int(0), Value::Int(101)])));
        assert_eq!(out[0], Value::from("plain"));
    }

    #[test]
    fn test_nested_skips_forbidden_keys() {
        let poisoned = Map::new()
            .with("__proto__", Map::new().with("f", func()))
            .with("constructor", func())
            .with("prototype", vec![func()])
            .with("ok", func());

        let mut seen = Vec::new();
        let (out, transform) =
            extract_nested(vec![Value::Map(poisoned)], 64, &mut counter(&mut seen)).unwrap();

        assert_eq!(seen.len(), 1);
        assert_eq!(transform, ArgsTransform::Nested(vec![(
            0,
            Mirror::Branch(vec![("ok".into(), Mirror::Slot)]),
        )]));

        let map = out[0].as_map().unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["ok"]);
    }

    #[test]
    fn test_untouched_branches_pass_through() {
        let data = Value::Map(Map::new().with("a", vec![Value::Int(1), Value::Int(2)]));
        let args = vec![data.clone(), Value::Bool(true)];

        let mut seen = Vec::new();
        let (out, transform) = extract_nested(args, 64, &mut counter(&mut seen)).unwrap();

        assert!(transform.is_empty());
        assert_eq!(out, vec![data, Value::Bool(true)]);
        assert!(seen.is_empty());
    }

    #[test]
    fn test_depth_limit_allocates_nothing() {
        let mut deep = func();
        for _ in 0..10 {
            deep = Value::List(vec![deep]);
        }

        let mut seen = Vec::new();
        let err = extract_nested(vec![deep], 5, &mut counter(&mut seen)).unwrap_err();

        assert!(matches!(err, Error::DepthLimitExceeded));
        assert!(seen.is_empty());
    }

    #[test]
    fn test_rehydrate_nested_restores_functions() {
        let mut args = vec![Value::Map(Map::new()
            .with("cb", 7)
            .with("items", vec![Value::from("x"), Value::Int(8)]))];
        let transform = ArgsTransform::Nested(vec![(
            0,
            Mirror::Branch(vec![
                ("cb".into(), Mirror::Slot),
                ("items".into(), Mirror::Branch(vec![("1".into(), Mirror::Slot)])),
            ]),
        )]);

        rehydrate(&mut args, &transform, 64, &make_remote).unwrap();

        let map = args[0].as_map().unwrap();
        assert_eq!(map.get("cb").and_then(Value::as_function).and_then(Callback::remote_id), Some(CallId(7)));
        let items = map.get("items").and_then(Value::as_list).unwrap();
        assert_eq!(items[0], Value::from("x"));
        assert_eq!(items[1].as_function().and_then(Callback::remote_id), Some(CallId(8)));
    }

    #[test]
    fn test_rehydrate_never_follows_forbidden_keys() {
        let mut args = vec![Value::Map(Map::new().with("__proto__", 3))];
        let transform = ArgsTransform::Nested(vec![(
            0,
            Mirror::Branch(vec![("__proto__".into(), Mirror::Slot)]),
        )]);

        rehydrate(&mut args, &transform, 64, &make_remote).unwrap();

        assert_eq!(args[0].as_map().unwrap().get("__proto__"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_rehydrate_rejects_non_id_slots() {
        let mut args = vec![Value::from("not an id")];
        let err = rehydrate(&mut args, &ArgsTransform::Flat(vec![0]), 64, &make_remote).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        let err = rehydrate(&mut args, &ArgsTransform::Flat(vec![4]), 64, &make_remote).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
