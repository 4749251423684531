use std::collections::HashMap;

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;

use crate::attribute_value::AttributeValue;
use crate::context::{Context, UUID_ATTRIBUTE};
use crate::eval::EvaluationError;
use crate::flag_value::FlagValue;
use crate::rollout::RolloutBucketer;
use crate::toggle::{ComparisonCondition, Condition};

lazy_static! {
    static ref DEFAULT_OPERATOR_SET: OperatorSet = OperatorSet::new();
}

/// The outcome of asserting one condition against a context.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AssertionResult<'a> {
    pub is_valid: bool,
    /// Set only by rollout conditions, when the matched allocation carries a value.
    pub rollout_value: Option<&'a FlagValue>,
}

impl<'a> AssertionResult<'a> {
    pub fn valid() -> Self {
        AssertionResult {
            is_valid: true,
            rollout_value: None,
        }
    }

    pub fn invalid() -> Self {
        AssertionResult::default()
    }
}

impl From<bool> for AssertionResult<'_> {
    fn from(is_valid: bool) -> Self {
        AssertionResult {
            is_valid,
            rollout_value: None,
        }
    }
}

/// A named comparison between the value configured on a condition and the value found in the
/// context.
pub trait Operator: Send + Sync {
    fn validate(&self, condition_value: &AttributeValue, actual: &AttributeValue) -> bool;
}

/// Checks a single toggle condition against a context.
///
/// [crate::Evaluator] delegates all per-condition work through this trait; [OperatorSet] is the
/// implementation used outside of tests.
pub trait ConditionAssertion {
    fn satisfies<'a>(
        &self,
        condition: &'a Condition,
        context: &Context,
        toggle_name: &str,
    ) -> Result<AssertionResult<'a>, EvaluationError>;
}

impl<A: ConditionAssertion + ?Sized> ConditionAssertion for &A {
    fn satisfies<'a>(
        &self,
        condition: &'a Condition,
        context: &Context,
        toggle_name: &str,
    ) -> Result<AssertionResult<'a>, EvaluationError> {
        (**self).satisfies(condition, context, toggle_name)
    }
}

/// The fixed registry of comparison operators plus the rollout bucketer.
///
/// The registry never changes after construction; [OperatorSet::global] is built once and shared.
pub struct OperatorSet {
    operators: HashMap<&'static str, Box<dyn Operator>>,
    rollout: RolloutBucketer,
}

impl OperatorSet {
    pub fn new() -> Self {
        let mut operators: HashMap<&'static str, Box<dyn Operator>> = HashMap::new();
        operators.insert("equal", Box::new(EqualTo));
        operators.insert("greater-than", Box::new(Numeric(|l, r| l > r)));
        operators.insert("greater-than-equal", Box::new(Numeric(|l, r| l >= r)));
        operators.insert("less-than", Box::new(Numeric(|l, r| l < r)));
        operators.insert("less-than-equal", Box::new(Numeric(|l, r| l <= r)));
        operators.insert("in-set", Box::new(InSet));
        operators.insert("not-in-set", Box::new(NotInSet));
        operators.insert("matches-regex", Box::new(MatchesRegex));

        OperatorSet {
            operators,
            rollout: RolloutBucketer,
        }
    }

    /// The shared, lazily built operator set.
    pub fn global() -> &'static OperatorSet {
        &DEFAULT_OPERATOR_SET
    }

    /// Look up an operator by its payload name.
    pub fn operator(&self, name: &str) -> Option<&dyn Operator> {
        self.operators.get(name).map(|op| op.as_ref())
    }

    fn compare(&self, condition: &ComparisonCondition, context: &Context) -> bool {
        let actual = match context.get(&condition.key) {
            Some(v) => v,
            None => return false,
        };

        match self.operator(&condition.operator.name) {
            Some(op) => op.validate(&condition.operator.value, actual),
            None => {
                warn!(
                    "unknown operator '{}' on condition {}",
                    condition.operator.name, condition.key
                );
                false
            }
        }
    }
}

impl Default for OperatorSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionAssertion for OperatorSet {
    fn satisfies<'a>(
        &self,
        condition: &'a Condition,
        context: &Context,
        toggle_name: &str,
    ) -> Result<AssertionResult<'a>, EvaluationError> {
        match condition {
            Condition::Rollout(rollout) => {
                let uuid = context
                    .get(UUID_ATTRIBUTE)
                    .and_then(AttributeValue::as_identifier)
                    .ok_or_else(|| EvaluationError::MissingUuid {
                        toggle: toggle_name.to_string(),
                    })?;
                Ok(self
                    .rollout
                    .validate(&rollout.allocations, &uuid, toggle_name))
            }
            Condition::Comparison(comparison) => Ok(self.compare(comparison, context).into()),
            Condition::Malformed(raw) => {
                warn!("skipping malformed condition {} on {}", raw, toggle_name);
                Ok(AssertionResult::invalid())
            }
        }
    }
}

struct EqualTo;

impl Operator for EqualTo {
    fn validate(&self, condition_value: &AttributeValue, actual: &AttributeValue) -> bool {
        condition_value == actual
    }
}

struct Numeric(fn(f64, f64) -> bool);

impl Operator for Numeric {
    fn validate(&self, condition_value: &AttributeValue, actual: &AttributeValue) -> bool {
        match (actual.to_f64(), condition_value.to_f64()) {
            (Some(l), Some(r)) => (self.0)(l, r),
            _ => false,
        }
    }
}

struct InSet;

impl Operator for InSet {
    fn validate(&self, condition_value: &AttributeValue, actual: &AttributeValue) -> bool {
        match condition_value.as_array() {
            Some(set) => set.contains(actual),
            None => {
                warn!("'in-set' expects a list but got {:?}", condition_value);
                false
            }
        }
    }
}

struct NotInSet;

impl Operator for NotInSet {
    fn validate(&self, condition_value: &AttributeValue, actual: &AttributeValue) -> bool {
        !InSet.validate(condition_value, actual)
    }
}

struct MatchesRegex;

impl Operator for MatchesRegex {
    fn validate(&self, condition_value: &AttributeValue, actual: &AttributeValue) -> bool {
        match (actual.as_str(), condition_value.as_str()) {
            (Some(l), Some(r)) => match Regex::new(r) {
                Ok(re) => re.is_match(l),
                Err(e) => {
                    warn!("Invalid regex for 'matches-regex' operator ({}): {}", e, r);
                    false
                }
            },
            _ => false,
        }
    }
}
