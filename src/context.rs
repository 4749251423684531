use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::AttributeValue;

/// The attribute consulted by rollout conditions to identify the caller.
pub const UUID_ATTRIBUTE: &str = "uuid";

/// Context is the bag of request attributes that toggle conditions are evaluated against.
///
/// A context may be built once per request or kept and reused across evaluations. It is only
/// changed through [Context::set]; attributes never expire.
///
/// ```
/// # use switchover_sdk::Context;
/// let mut context = Context::new();
/// context.set("uuid", "5d6e6c").set("email", "jane@acme.com");
///
/// assert_eq!(context.get("email").and_then(|v| v.as_str()), Some("jane@acme.com"));
/// assert!(context.get("plan").is_none());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Context {
    attributes: HashMap<String, AttributeValue>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of the attribute `key`, or None if it was never set.
    ///
    /// An attribute set to null, `false`, `0` or `""` is still present and is returned.
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Sets the attribute `key` to `value`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> &mut Self {
        let _ = self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns true if the attribute `key` has been set.
    pub fn contains_key(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// The number of attributes in this context.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl<S, T> From<HashMap<S, T>> for Context
where
    String: From<S>,
    AttributeValue: From<T>,
{
    fn from(hashmap: HashMap<S, T>) -> Context {
        hashmap.into_iter().collect()
    }
}

impl<S, T> FromIterator<(S, T)> for Context
where
    String: From<S>,
    AttributeValue: From<T>,
{
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        Context {
            attributes: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
