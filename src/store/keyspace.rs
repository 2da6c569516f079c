use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{QtrixError, Result};
use crate::store::Txn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum Value {
    Scalar(String),
    List(Vec<String>),
}

/// The full contents of a store: scalars and lists by key.
///
/// Both store backends run transactions against a `Keyspace` and decide
/// afterwards whether to keep the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyspace {
    entries: BTreeMap<String, Value>,
    #[serde(skip)]
    dirty: bool,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any write happened since creation or the last [`Self::mark_clean`].
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    fn list(&self, key: &str) -> Result<Option<&Vec<String>>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Value::List(items)) => Ok(Some(items)),
            Some(Value::Scalar(_)) => Err(wrong_type(key, "list")),
        }
    }

    fn list_mut(&mut self, key: &str) -> Result<Option<&mut Vec<String>>> {
        match self.entries.get_mut(key) {
            None => Ok(None),
            Some(Value::List(items)) => Ok(Some(items)),
            Some(Value::Scalar(_)) => Err(wrong_type(key, "list")),
        }
    }

    fn drop_if_empty(&mut self, key: &str) {
        if matches!(self.entries.get(key), Some(Value::List(items)) if items.is_empty()) {
            self.entries.remove(key);
        }
    }
}

fn wrong_type(key: &str, expected: &str) -> QtrixError {
    QtrixError::unavailable(format!(
        "WRONGTYPE operation against key {key} holding the wrong kind of value (expected {expected})"
    ))
}

impl Txn for Keyspace {
    fn get_scalar(&mut self, key: &str) -> Result<Option<String>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Value::Scalar(v)) => Ok(Some(v.clone())),
            Some(Value::List(_)) => Err(wrong_type(key, "scalar")),
        }
    }

    fn set_scalar(&mut self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), Value::Scalar(value));
        self.dirty = true;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool> {
        let existed = self.entries.remove(key).is_some();
        self.dirty |= existed;
        Ok(existed)
    }

    fn exists(&mut self, key: &str) -> Result<bool> {
        Ok(self.entries.contains_key(key))
    }

    fn list_append(&mut self, key: &str, value: String) -> Result<usize> {
        // Type check before creating the key
        self.list(key)?;
        let items = match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Value::List(Vec::new()))
        {
            Value::List(items) => items,
            Value::Scalar(_) => return Err(wrong_type(key, "list")),
        };
        items.push(value);
        self.dirty = true;
        Ok(items.len())
    }

    fn list_length(&mut self, key: &str) -> Result<usize> {
        Ok(self.list(key)?.map(Vec::len).unwrap_or(0))
    }

    fn list_enumerate(&mut self, key: &str) -> Result<Vec<String>> {
        Ok(self.list(key)?.cloned().unwrap_or_default())
    }

    fn list_remove_n(&mut self, key: &str, value: &str, n: usize) -> Result<usize> {
        let Some(items) = self.list_mut(key)? else {
            return Ok(0);
        };
        let mut removed = 0;
        items.retain(|item| {
            if removed < n && item == value {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            self.dirty = true;
            self.drop_if_empty(key);
        }
        Ok(removed)
    }

    fn list_trim(&mut self, key: &str, start: usize, stop: usize) -> Result<()> {
        let Some(items) = self.list_mut(key)? else {
            return Ok(());
        };
        let before = items.len();
        if start >= before || start > stop {
            items.clear();
        } else {
            items.truncate(stop.saturating_add(1).min(before));
            items.drain(..start);
        }
        if items.len() != before {
            self.dirty = true;
            self.drop_if_empty(key);
        }
        Ok(())
    }
}
