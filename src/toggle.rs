use std::convert::TryFrom;

use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::{serde_as, DefaultOnError, DefaultOnNull};

use crate::attribute_value::AttributeValue;
use crate::flag_value::FlagValue;
use crate::rollout::Allocation;
use crate::util::f64_as_exact_i64;

/// Value of the `name` field that marks a condition as a rollout condition.
pub const ROLLOUT_CONDITION: &str = "rollout-condition";

/// A named feature toggle as delivered in the toggle payload.
///
/// Payload quirks are absorbed while decoding: an unknown `status` decodes as
/// [Status::Inactive], and an unknown or missing `strategy` decodes as None, which makes evaluating
/// a conditional toggle fail with [crate::EvaluationError::MissingStrategy].
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Toggle {
    pub name: String,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub value: FlagValue,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Toggle {
    /// Create an unconditional toggle.
    pub fn new(name: impl Into<String>, status: Status, value: impl Into<FlagValue>) -> Self {
        Toggle {
            name: name.into(),
            status,
            value: value.into(),
            strategy: None,
            conditions: Vec::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(try_from = "serde_json::Value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    Inactive,
    Active,
}

impl TryFrom<i64> for Status {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Status::Inactive),
            1 => Ok(Status::Active),
            other => Err(format!("unknown toggle status {}", other)),
        }
    }
}

impl TryFrom<serde_json::Value> for Status {
    type Error = String;

    fn try_from(code: serde_json::Value) -> Result<Self, Self::Error> {
        Status::try_from(payload_code(&code)?)
    }
}

/// How the results of a toggle's conditions combine into one outcome.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(try_from = "serde_json::Value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Every condition must hold.
    All,
    /// Any single condition is enough.
    AtLeastOne,
    /// More conditions must hold than fail.
    Majority,
}

impl TryFrom<i64> for Strategy {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Strategy::All),
            2 => Ok(Strategy::AtLeastOne),
            3 => Ok(Strategy::Majority),
            other => Err(format!("unknown toggle strategy {}", other)),
        }
    }
}

impl TryFrom<serde_json::Value> for Strategy {
    type Error = String;

    fn try_from(code: serde_json::Value) -> Result<Self, Self::Error> {
        Strategy::try_from(payload_code(&code)?)
    }
}

// Status and strategy codes are integers, but whole floats (`1.0`) and numeric strings (`"1"`)
// are accepted as well.
fn payload_code(code: &serde_json::Value) -> Result<i64, String> {
    let parsed = match code {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(f64_as_exact_i64)),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| format!("{} is not a numeric code", code))
}

/// A gating condition of a toggle.
///
/// The payload distinguishes the two kinds by shape; that is resolved once here. A condition that
/// is neither shape is kept as [Condition::Malformed] and never holds, so that one bad entry does
/// not reject the whole payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Comparison(ComparisonCondition),
    Rollout(RolloutCondition),
    Malformed(serde_json::Value),
}

/// Compares the context attribute `key` against a value using a named operator.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ComparisonCondition {
    pub key: String,
    pub operator: OperatorSpec,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct OperatorSpec {
    pub name: String,
    #[serde(default = "null_attribute")]
    pub value: AttributeValue,
}

fn null_attribute() -> AttributeValue {
    AttributeValue::Null
}

/// Splits contexts into percentage allocations by their `uuid` attribute.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RolloutCondition {
    pub key: String,
    pub allocations: Vec<Allocation>,
}

impl Condition {
    pub fn comparison(
        key: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        Condition::Comparison(ComparisonCondition {
            key: key.into(),
            operator: OperatorSpec {
                name: operator.into(),
                value: value.into(),
            },
        })
    }

    pub fn rollout(key: impl Into<String>, allocations: Vec<Allocation>) -> Self {
        Condition::Rollout(RolloutCondition {
            key: key.into(),
            allocations,
        })
    }

    /// The context attribute (or, for rollouts, the label) this condition is keyed on.
    pub fn key(&self) -> Option<&str> {
        match self {
            Condition::Comparison(c) => Some(&c.key),
            Condition::Rollout(r) => Some(&r.key),
            Condition::Malformed(raw) => raw.get("key").and_then(|k| k.as_str()),
        }
    }

    fn from_json(raw: serde_json::Value) -> Self {
        let is_rollout = raw.get("allocations").is_some()
            && raw.get("name").and_then(|n| n.as_str()) == Some(ROLLOUT_CONDITION);

        let decoded = if is_rollout {
            serde_json::from_value(raw.clone()).map(Condition::Rollout)
        } else if raw.get("operator").is_some() {
            serde_json::from_value(raw.clone()).map(Condition::Comparison)
        } else {
            return Condition::Malformed(raw);
        };

        decoded.unwrap_or_else(|e| {
            warn!("malformed toggle condition {}: {}", raw, e);
            Condition::Malformed(raw)
        })
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(Condition::from_json(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test]
    fn decodes_full_toggle() {
        let toggle: Toggle = serde_json::from_str(
            r#"{
                "name": "toggle-001",
                "status": 1,
                "value": true,
                "strategy": 1,
                "conditions": [
                    {"key": "key01", "operator": {"name": "equal", "value": "aValue002"}},
                    {
                        "key": "ab-split",
                        "name": "rollout-condition",
                        "allocations": [
                            {"name": "bucketA", "ratio": 0.5, "value": 1},
                            {"name": "bucketB", "ratio": 0.5, "value": null}
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_that!(toggle.name.as_str()).is_equal_to("toggle-001");
        assert_that!(toggle.status).is_equal_to(Status::Active);
        assert_that!(toggle.value).is_equal_to(FlagValue::Bool(true));
        assert_that!(toggle.strategy).contains_value(Strategy::All);
        assert_that!(toggle.conditions).is_equal_to(vec![
            Condition::comparison("key01", "equal", "aValue002"),
            Condition::rollout(
                "ab-split",
                vec![
                    Allocation::new("bucketA", 0.5, Some(FlagValue::Int(1))),
                    Allocation::new("bucketB", 0.5, None),
                ],
            ),
        ]);
    }

    #[test]
    fn conditions_are_optional() {
        let toggle: Toggle =
            serde_json::from_str(r#"{"name": "t1", "status": 0, "value": 0.2}"#).unwrap();
        assert!(!toggle.has_conditions());
        assert!(!toggle.is_active());
        assert_that!(toggle.strategy).is_none();

        let toggle: Toggle =
            serde_json::from_str(r#"{"name": "t1", "status": 1, "conditions": null}"#).unwrap();
        assert!(!toggle.has_conditions());
        assert_that!(toggle.value).is_equal_to(FlagValue::default());
    }

    #[test_case(r#"1"#, Some(Strategy::All); "strategy_int_1")]
    #[test_case(r#"2"#, Some(Strategy::AtLeastOne); "strategy_int_2")]
    #[test_case(r#"3"#, Some(Strategy::Majority); "strategy_int_3")]
    #[test_case(r#"0"#, None; "strategy_int_0")]
    #[test_case(r#"9"#, None; "strategy_int_9")]
    #[test_case(r#""2""#, Some(Strategy::AtLeastOne); "strategy_str_2")]
    #[test_case(r#"3.0"#, Some(Strategy::Majority); "strategy_float_3")]
    #[test_case(r#"1.5"#, None; "strategy_float_1_5")]
    #[test_case(r#""ALL""#, None; "strategy_str_all")]
    #[test_case(r#"null"#, None; "strategy_null")]
    fn decodes_strategy_codes(code: &str, expected: Option<Strategy>) {
        let json = format!(r#"{{"name": "t", "status": 1, "strategy": {}}}"#, code);
        let toggle: Toggle = serde_json::from_str(&json).unwrap();
        assert_that!(toggle.strategy).is_equal_to(expected);
    }

    #[test_case(r#"1"#, Status::Active; "status_int_1")]
    #[test_case(r#"0"#, Status::Inactive; "status_int_0")]
    #[test_case(r#"7"#, Status::Inactive; "status_int_7")]
    #[test_case(r#""1""#, Status::Active; "status_str_1")]
    #[test_case(r#"" 1 ""#, Status::Active; "status_str_padded_1")]
    #[test_case(r#"1.0"#, Status::Active; "status_float_1")]
    #[test_case(r#"0.5"#, Status::Inactive; "status_float_0_5")]
    #[test_case(r#"true"#, Status::Inactive; "status_bool_true")]
    #[test_case(r#""on""#, Status::Inactive; "status_str_on")]
    fn decodes_status_codes(code: &str, expected: Status) {
        let json = format!(r#"{{"name": "t", "status": {}}}"#, code);
        let toggle: Toggle = serde_json::from_str(&json).unwrap();
        assert_that!(toggle.status).is_equal_to(expected);
    }

    #[test]
    fn unrecognised_condition_shapes_are_malformed() {
        let conditions: Vec<Condition> = serde_json::from_value(json!([
            {"key": "no-operator"},
            {"key": "wrong-name", "name": "something-else", "allocations": []},
            {"key": "bad-allocations", "name": "rollout-condition", "allocations": {"ratio": 0.5}},
            {"key": "bad-operator", "operator": "equal"}
        ]))
        .unwrap();

        assert_that!(conditions).has_length(4);
        for condition in &conditions {
            assert!(
                matches!(condition, Condition::Malformed(_)),
                "{:?} should be malformed",
                condition.key()
            );
        }
        assert_that!(conditions[0].key()).contains_value("no-operator");
    }

    #[test]
    fn operator_value_defaults_to_null() {
        let condition: Condition =
            serde_json::from_str(r#"{"key": "k", "operator": {"name": "equal"}}"#).unwrap();
        assert_that!(condition).is_equal_to(Condition::comparison("k", "equal", AttributeValue::Null));
    }
}
