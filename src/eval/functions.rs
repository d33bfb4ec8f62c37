//! Built-in expression functions.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::config::{Function, Value};

/// Calls a built-in function on evaluated arguments.
///
/// Any unknown argument makes the result unknown.
///
/// # Errors
///
/// Returns a description of the problem on bad arity or argument types.
pub fn call(function: Function, args: Vec<Value>) -> Result<Value, String> {
    if args.iter().any(Value::contains_unknown) {
        return Ok(Value::Unknown);
    }

    match function {
        Function::Length => length(&args),
        Function::Concat => concat(args),
        Function::Join => join(&args),
        Function::Element => element(&args),
        Function::Lookup => lookup(args),
        Function::Merge => merge(args),
        Function::Cidrsubnet => cidrsubnet(&args),
        Function::Format => format(&args),
    }
}

fn expect_arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), String> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{min} to {max}")
        };
        return Err(format!("{name}() takes {expected} arguments, got {}", args.len()));
    }
    Ok(())
}

fn expect_index(name: &str, value: &Value) -> Result<usize, String> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| format!("{name}() expects a non-negative integer, got {value}"))
}

fn length(args: &[Value]) -> Result<Value, String> {
    expect_arity("length", args, 1, 1)?;
    match &args[0] {
        Value::List(items) => Ok(Value::from(items.len())),
        Value::Map(entries) => Ok(Value::from(entries.len())),
        Value::String(s) => Ok(Value::from(s.chars().count())),
        other => Err(format!("length() expects a list, map or string, got {}", other.type_name())),
    }
}

fn concat(args: Vec<Value>) -> Result<Value, String> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Value::List(items) => out.extend(items),
            other => return Err(format!("concat() expects lists, got {}", other.type_name())),
        }
    }
    Ok(Value::List(out))
}

fn join(args: &[Value]) -> Result<Value, String> {
    expect_arity("join", args, 2, 2)?;
    let separator = args[0]
        .as_str()
        .ok_or("join() expects a string separator")?;
    let items = args[1].as_list().ok_or("join() expects a list")?;
    let parts = items
        .iter()
        .map(|item| match item {
            Value::List(_) | Value::Map(_) => Err(String::from("join() expects a list of scalars")),
            scalar => Ok(scalar.to_string()),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::from(parts.join(separator)))
}

fn element(args: &[Value]) -> Result<Value, String> {
    expect_arity("element", args, 2, 2)?;
    let items = args[0].as_list().ok_or("element() expects a list")?;
    if items.is_empty() {
        return Err(String::from("element() cannot index an empty list"));
    }
    let index = expect_index("element", &args[1])?;
    Ok(items[index % items.len()].clone())
}

fn lookup(args: Vec<Value>) -> Result<Value, String> {
    expect_arity("lookup", &args, 2, 3)?;
    let mut args = args.into_iter();
    let map = args.next().unwrap_or_default();
    let key = args.next().unwrap_or_default();
    let default = args.next();

    let entries = map.as_map().ok_or("lookup() expects a map")?;
    let key = key.as_str().ok_or("lookup() expects a string key")?;
    match (entries.get(key), default) {
        (Some(value), _) => Ok(value.clone()),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(format!("lookup() key '{key}' not found and no default given")),
    }
}

fn merge(args: Vec<Value>) -> Result<Value, String> {
    let mut out = BTreeMap::new();
    for arg in args {
        match arg {
            Value::Map(entries) => out.extend(entries),
            Value::Null => {}
            other => return Err(format!("merge() expects maps, got {}", other.type_name())),
        }
    }
    Ok(Value::Map(out))
}

/// Parses an IPv4 CIDR block into its address and prefix length.
#[must_use]
pub fn parse_cidr(raw: &str) -> Option<(u32, u32)> {
    let (address, prefix) = raw.split_once('/')?;
    let address: Ipv4Addr = address.parse().ok()?;
    let prefix: u32 = prefix.parse().ok()?;
    (prefix <= 32).then_some((u32::from(address), prefix))
}

fn cidrsubnet(args: &[Value]) -> Result<Value, String> {
    expect_arity("cidrsubnet", args, 3, 3)?;
    let prefix = args[0]
        .as_str()
        .ok_or("cidrsubnet() expects a CIDR string")?;
    let (address, length) =
        parse_cidr(prefix).ok_or_else(|| format!("cidrsubnet() invalid CIDR '{prefix}'"))?;
    let newbits = u32::try_from(expect_index("cidrsubnet", &args[1])?)
        .map_err(|_| String::from("cidrsubnet() newbits out of range"))?;
    let netnum = u64::try_from(expect_index("cidrsubnet", &args[2])?)
        .map_err(|_| String::from("cidrsubnet() netnum out of range"))?;

    let new_length = length
        .checked_add(newbits)
        .filter(|n| *n <= 32)
        .ok_or_else(|| format!("cidrsubnet() cannot extend /{length} by {newbits} bits"))?;
    if netnum >= 1_u64 << newbits {
        return Err(format!(
            "cidrsubnet() netnum {netnum} does not fit in {newbits} bits"
        ));
    }

    let mask = if length == 0 { 0 } else { u32::MAX << (32 - length) };
    let base = u64::from(address & mask);
    let subnet = base | (netnum << (32 - new_length));
    let subnet = u32::try_from(subnet).map_err(|_| String::from("cidrsubnet() overflow"))?;
    Ok(Value::from(format!("{}/{new_length}", Ipv4Addr::from(subnet))))
}

fn format(args: &[Value]) -> Result<Value, String> {
    let (template, rest) = args
        .split_first()
        .ok_or("format() takes a template argument")?;
    let template = template.as_str().ok_or("format() expects a string template")?;

    let placeholders = template.matches("{}").count();
    if placeholders != rest.len() {
        return Err(format!(
            "format() template has {placeholders} placeholders but {} arguments were given",
            rest.len()
        ));
    }

    let mut out = String::with_capacity(template.len());
    let mut pieces = template.split("{}");
    if let Some(first) = pieces.next() {
        out.push_str(first);
    }
    for (piece, arg) in pieces.zip(rest) {
        out.push_str(&arg.to_string());
        out.push_str(piece);
    }
    Ok(Value::from(out))
}
