//! JSON patch (RFC 6902) documents
//!
//! Used by changeset updates. A patch applies atomically: when one operation
//! fails the target is left untouched.

use crate::core::error::{EntityError, RequestError, StaError, StaResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One patch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}

/// An ordered list of patch operations
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonPatch(pub Vec<PatchOperation>);

fn fail(message: impl Into<String>) -> StaError {
    EntityError::illegal(message).into()
}

fn parse_pointer(pointer: &str) -> StaResult<Vec<String>> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Err(fail(format!("JSON pointer '{pointer}' must start with '/'")));
    };
    Ok(rest
        .split('/')
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn array_index(token: &str, len: usize, allow_end: bool) -> StaResult<usize> {
    if allow_end && token == "-" {
        return Ok(len);
    }
    let index: usize = token
        .parse()
        .map_err(|_| fail(format!("'{token}' is not an array index")))?;
    let limit = if allow_end { len } else { len.saturating_sub(1) };
    if index > limit || (!allow_end && len == 0) {
        return Err(fail(format!("array index {index} out of bounds")));
    }
    Ok(index)
}

fn resolve<'a>(doc: &'a Value, tokens: &[String]) -> Option<&'a Value> {
    tokens.iter().try_fold(doc, |current, token| match current {
        Value::Object(map) => map.get(token),
        Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn resolve_mut<'a>(doc: &'a mut Value, tokens: &[String]) -> StaResult<&'a mut Value> {
    let mut current = doc;
    for token in tokens {
        current = match current {
            Value::Object(map) => map
                .get_mut(token)
                .ok_or_else(|| fail(format!("no member '{token}'")))?,
            Value::Array(items) => {
                let index = array_index(token, items.len(), false)?;
                &mut items[index]
            }
            _ => return Err(fail(format!("cannot descend into '{token}'"))),
        };
    }
    Ok(current)
}

fn add(doc: &mut Value, tokens: &[String], value: Value) -> StaResult<()> {
    let Some((last, parents)) = tokens.split_last() else {
        *doc = value;
        return Ok(());
    };
    match resolve_mut(doc, parents)? {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = array_index(last, items.len(), true)?;
            items.insert(index, value);
            Ok(())
        }
        _ => Err(fail(format!("cannot add '{last}' to a scalar"))),
    }
}

fn remove(doc: &mut Value, tokens: &[String]) -> StaResult<Value> {
    let Some((last, parents)) = tokens.split_last() else {
        return Err(fail("cannot remove the whole document"));
    };
    match resolve_mut(doc, parents)? {
        Value::Object(map) => map
            .remove(last)
            .ok_or_else(|| fail(format!("no member '{last}' to remove"))),
        Value::Array(items) => {
            let index = array_index(last, items.len(), false)?;
            Ok(items.remove(index))
        }
        _ => Err(fail(format!("cannot remove '{last}' from a scalar"))),
    }
}

impl JsonPatch {
    /// Read a patch document from a request body
    pub fn from_json(value: &Value) -> StaResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| RequestError::body(format!("not a JSON patch document: {e}")).into())
    }

    pub fn operations(&self) -> &[PatchOperation] {
        &self.0
    }

    /// Apply every operation in order to `target`
    pub fn apply(&self, target: &mut Value) -> StaResult<()> {
        let mut doc = target.clone();
        for op in &self.0 {
            match op {
                PatchOperation::Add { path, value } => {
                    add(&mut doc, &parse_pointer(path)?, value.clone())?
                }
                PatchOperation::Remove { path } => {
                    remove(&mut doc, &parse_pointer(path)?)?;
                }
                PatchOperation::Replace { path, value } => {
                    let tokens = parse_pointer(path)?;
                    *resolve_mut(&mut doc, &tokens)? = value.clone();
                }
                PatchOperation::Move { from, path } => {
                    if path.starts_with(&format!("{from}/")) {
                        return Err(fail(format!("cannot move '{from}' into itself")));
                    }
                    let value = remove(&mut doc, &parse_pointer(from)?)?;
                    add(&mut doc, &parse_pointer(path)?, value)?;
                }
                PatchOperation::Copy { from, path } => {
                    let value = resolve(&doc, &parse_pointer(from)?)
                        .cloned()
                        .ok_or_else(|| fail(format!("nothing at '{from}' to copy")))?;
                    add(&mut doc, &parse_pointer(path)?, value)?;
                }
                PatchOperation::Test { path, value } => {
                    if resolve(&doc, &parse_pointer(path)?) != Some(value) {
                        return Err(fail(format!("test failed at '{path}'")));
                    }
                }
            }
        }
        *target = doc;
        Ok(())
    }
}
