#![cfg(test)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::context::Context;
use crate::eval::EvaluationError;
use crate::fetch::{ApiResponse, FetchError, Fetcher};
use crate::operator::{AssertionResult, ConditionAssertion};
use crate::toggle::{Condition, Toggle};

pub const TEST_TOGGLES: &str = r#"[
    {
        "name": "toggle-unconditional",
        "status": 1,
        "value": true
    },
    {
        "name": "toggle-inactive",
        "status": 0,
        "value": true,
        "strategy": 1,
        "conditions": [
            {"key": "key01", "operator": {"name": "equal", "value": "aValue002"}}
        ]
    },
    {
        "name": "toggle-all",
        "status": 1,
        "value": "on",
        "strategy": 1,
        "conditions": [
            {"key": "key01", "operator": {"name": "equal", "value": "aValue002"}},
            {"key": "key02", "operator": {"name": "equal", "value": "some_OtherValue"}}
        ]
    },
    {
        "name": "toggle-at-least-one",
        "status": 1,
        "value": "on",
        "strategy": 2,
        "conditions": [
            {"key": "key01", "operator": {"name": "equal", "value": "aValue002"}},
            {"key": "key02", "operator": {"name": "equal", "value": "some_OtherValue"}}
        ]
    },
    {
        "name": "toggle-majority",
        "status": 1,
        "value": "on",
        "strategy": 3,
        "conditions": [
            {"key": "key01", "operator": {"name": "equal", "value": "aValue002"}},
            {"key": "key02", "operator": {"name": "equal", "value": "some_OtherValue"}},
            {"key": "key03", "operator": {"name": "in-set", "value": ["green", "blue"]}}
        ]
    },
    {
        "name": "toggle-no-strategy",
        "status": 1,
        "value": "on",
        "conditions": [
            {"key": "key01", "operator": {"name": "equal", "value": "aValue002"}}
        ]
    },
    {
        "name": "feature",
        "status": 1,
        "value": "control",
        "strategy": 1,
        "conditions": [
            {
                "key": "ab-split",
                "name": "rollout-condition",
                "allocations": [
                    {"name": "bucketA", "ratio": 0.5, "value": "variant-a"},
                    {"name": "bucketB", "ratio": 0.5, "value": "variant-b"}
                ]
            }
        ]
    },
    {
        "name": "beta-rollout",
        "status": 1,
        "value": true,
        "strategy": 1,
        "conditions": [
            {"key": "email", "operator": {"name": "matches-regex", "value": "@acme\\.com$"}},
            {
                "key": "beta",
                "name": "rollout-condition",
                "allocations": [{"name": "beta", "ratio": 0.5}]
            }
        ]
    }
]"#;

pub const TEST_LAST_MODIFIED: &str = "Wed, 21 Oct 2026 07:28:00 GMT";

pub fn test_toggles() -> Vec<Toggle> {
    serde_json::from_str(TEST_TOGGLES).unwrap()
}

/// Answers conditions from a fixed table of verdicts keyed by condition key, and records the
/// order in which conditions were asked about. Unlisted keys fail.
pub struct ScriptedAssertion {
    verdicts: HashMap<String, bool>,
    asserted: RefCell<Vec<String>>,
}

impl ScriptedAssertion {
    pub fn new(verdicts: HashMap<&str, bool>) -> Self {
        Self {
            verdicts: verdicts
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            asserted: RefCell::new(Vec::new()),
        }
    }

    pub fn asserted(&self) -> Vec<String> {
        self.asserted.borrow().clone()
    }
}

impl ConditionAssertion for ScriptedAssertion {
    fn satisfies<'a>(
        &self,
        condition: &'a Condition,
        _context: &Context,
        _toggle_name: &str,
    ) -> Result<AssertionResult<'a>, EvaluationError> {
        let key = condition.key().unwrap_or_default().to_string();
        let is_valid = self.verdicts.get(&key).copied().unwrap_or(false);
        self.asserted.borrow_mut().push(key);

        let rollout_value = match condition {
            Condition::Rollout(rollout) if is_valid => rollout
                .allocations
                .first()
                .and_then(|allocation| allocation.value.as_ref()),
            _ => None,
        };
        Ok(AssertionResult {
            is_valid,
            rollout_value,
        })
    }
}

/// A [Fetcher] that replays a canned payload, or fails with [FetchError::Unavailable] when it has
/// none, and counts how often it was called.
pub struct StubFetcher {
    response: Mutex<Option<ApiResponse>>,
    calls: AtomicUsize,
    last_modified_seen: Mutex<Vec<Option<String>>>,
}

impl StubFetcher {
    pub fn new(response: Option<ApiResponse>) -> Self {
        Self {
            response: Mutex::new(response),
            calls: AtomicUsize::new(0),
            last_modified_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_toggles() -> Self {
        Self::new(Some(ApiResponse::new(
            Some(TEST_LAST_MODIFIED.to_string()),
            test_toggles(),
        )))
    }

    pub fn set_response(&self, response: Option<ApiResponse>) {
        *self.response.lock().unwrap() = response;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_modified_seen(&self) -> Vec<Option<String>> {
        self.last_modified_seen.lock().unwrap().clone()
    }
}

impl Fetcher for StubFetcher {
    fn fetch_all(
        &self,
        _sdk_key: &str,
        last_modified: Option<&str>,
    ) -> Result<ApiResponse, FetchError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_modified_seen
            .lock()
            .unwrap()
            .push(last_modified.map(str::to_string));
        self.response
            .lock()
            .unwrap()
            .clone()
            .ok_or(FetchError::Unavailable)
    }
}
