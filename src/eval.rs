use log::{debug, error};
use serde::Serialize;
use thiserror::Error;

use crate::context::Context;
use crate::flag_value::FlagValue;
use crate::operator::{ConditionAssertion, OperatorSet};
use crate::toggle::{Status, Strategy, Toggle};

/// Errors that stop an evaluation. They are returned to the caller instead of being resolved to
/// the default value; [crate::Client] logs them and falls back to the default.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EvaluationError {
    /// The caller asked for a toggle with an empty name.
    #[error("toggle key is empty")]
    EmptyKey,
    /// An active toggle has conditions but no recognised strategy to combine them.
    #[error("toggle '{toggle}' has conditions but no strategy")]
    MissingStrategy { toggle: String },
    /// A rollout condition was evaluated against a context without a `uuid` attribute.
    #[error("toggle '{toggle}' has a rollout condition but no uuid was given")]
    MissingUuid { toggle: String },
}

/// A Detail instance is returned from [Evaluator::evaluate_detail], combining the decided value
/// with an explanation of how it was reached.
#[derive(Clone, Debug, PartialEq)]
pub struct Detail<T> {
    /// The decided value: the toggle's value or a rollout allocation's value. None when the
    /// caller's default should be used.
    pub value: Option<T>,

    /// The main factor that influenced the result.
    pub reason: Reason,
}

impl<T> Detail<T> {
    /// Returns a detail without a value, meaning the caller's default applies.
    pub fn empty(reason: Reason) -> Detail<T> {
        Detail {
            value: None,
            reason,
        }
    }

    /// Returns a new instance of this detail with the provided function `f` applied to
    /// [Detail::value].
    pub fn map<U, F>(self, f: F) -> Detail<U>
    where
        F: FnOnce(T) -> U,
    {
        Detail {
            value: self.value.map(f),
            reason: self.reason,
        }
    }

    /// Set the [Detail::value] to `default` if it does not exist. The reason is kept.
    pub fn or(mut self, default: T) -> Detail<T> {
        if self.value.is_none() {
            self.value = Some(default);
        }
        self
    }
}

/// Reason describes why an evaluation produced a particular value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind")]
pub enum Reason {
    /// No toggle with the requested name exists in the toggle list.
    ToggleNotFound,
    /// The toggle is inactive, so the default applies.
    Inactive,
    /// The toggle is active and has no conditions.
    Unconditional,
    /// The toggle has conditions but no context was given to check them against.
    MissingContext,
    /// The conditions held under the toggle's strategy.
    #[serde(rename_all = "camelCase")]
    ConditionsMatched {
        strategy: Strategy,
        /// True if the value came from a rollout allocation rather than the toggle itself.
        from_rollout: bool,
    },
    /// The conditions did not hold under the toggle's strategy.
    #[serde(rename_all = "camelCase")]
    ConditionsFailed { strategy: Strategy },
}

enum Outcome<'a> {
    Pass { rollout_value: Option<&'a FlagValue> },
    Fail,
}

/// Decides toggle values from a toggle list and a context.
///
/// The evaluator keeps no toggle data between calls, so one instance can be shared freely. All
/// per-condition checks go through its [ConditionAssertion], which is the shared [OperatorSet] by
/// default.
pub struct Evaluator<A = &'static OperatorSet> {
    assertion: A,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator::new(OperatorSet::global())
    }
}

impl<A: ConditionAssertion> Evaluator<A> {
    pub fn new(assertion: A) -> Self {
        Evaluator { assertion }
    }

    /// Evaluate the toggle named `toggle_key`, returning `default` wherever the toggle does not
    /// decide a value.
    pub fn evaluate(
        &self,
        toggles: &[Toggle],
        toggle_key: &str,
        context: Option<&Context>,
        default: FlagValue,
    ) -> Result<FlagValue, EvaluationError> {
        let detail = self.evaluate_detail(toggles, toggle_key, context)?;
        Ok(detail.value.cloned().unwrap_or(default))
    }

    /// Evaluate the toggle named `toggle_key` and explain the outcome.
    ///
    /// The first toggle with a matching name wins. Errors are returned for an empty key, an
    /// active conditional toggle without a strategy, and a rollout condition checked against a
    /// context without a uuid; every other anomaly yields a [Detail] without a value.
    pub fn evaluate_detail<'a>(
        &self,
        toggles: &'a [Toggle],
        toggle_key: &str,
        context: Option<&Context>,
    ) -> Result<Detail<&'a FlagValue>, EvaluationError> {
        debug!("Evaluate config for toggle {}", toggle_key);

        if toggles.is_empty() {
            error!("Toggle config is empty! Did you wait for init? All toggles will return default value");
        }

        if toggle_key.is_empty() {
            return Err(EvaluationError::EmptyKey);
        }

        let toggle = match toggles.iter().find(|t| t.name == toggle_key) {
            Some(toggle) => toggle,
            None => {
                error!("Toggle with name {} not found! Return default value", toggle_key);
                return Ok(Detail::empty(Reason::ToggleNotFound));
            }
        };

        debug!("Evaluate toggle {} with status {:?}", toggle.name, toggle.status);
        match toggle.status {
            Status::Inactive => Ok(Detail::empty(Reason::Inactive)),
            Status::Active => self.evaluate_active(toggle, context),
        }
    }

    fn evaluate_active<'a>(
        &self,
        toggle: &'a Toggle,
        context: Option<&Context>,
    ) -> Result<Detail<&'a FlagValue>, EvaluationError> {
        if !toggle.has_conditions() {
            return Ok(Detail {
                value: Some(&toggle.value),
                reason: Reason::Unconditional,
            });
        }

        let context = match context {
            Some(context) => context,
            None => {
                debug!("No context given for conditions of {}", toggle.name);
                return Ok(Detail::empty(Reason::MissingContext));
            }
        };

        let strategy = toggle
            .strategy
            .ok_or_else(|| EvaluationError::MissingStrategy {
                toggle: toggle.name.clone(),
            })?;

        debug!("Evaluate toggle {} with strategy {:?}", toggle.name, strategy);
        let outcome = match strategy {
            Strategy::All => self.evaluate_all(toggle, context)?,
            Strategy::AtLeastOne => self.evaluate_at_least_one(toggle, context)?,
            Strategy::Majority => self.evaluate_majority(toggle, context)?,
        };

        Ok(match outcome {
            Outcome::Pass { rollout_value } => Detail {
                value: Some(rollout_value.unwrap_or(&toggle.value)),
                reason: Reason::ConditionsMatched {
                    strategy,
                    from_rollout: rollout_value.is_some(),
                },
            },
            Outcome::Fail => Detail::empty(Reason::ConditionsFailed { strategy }),
        })
    }

    fn evaluate_all<'a>(
        &self,
        toggle: &'a Toggle,
        context: &Context,
    ) -> Result<Outcome<'a>, EvaluationError> {
        let mut rollout_value = None;
        for condition in &toggle.conditions {
            let result = self.assertion.satisfies(condition, context, &toggle.name)?;
            if !result.is_valid {
                debug!("Condition {:?} was not satisfied", condition.key());
                return Ok(Outcome::Fail);
            }
            rollout_value = result.rollout_value.or(rollout_value);
        }
        debug!("All conditions satisfied");
        Ok(Outcome::Pass { rollout_value })
    }

    fn evaluate_at_least_one<'a>(
        &self,
        toggle: &'a Toggle,
        context: &Context,
    ) -> Result<Outcome<'a>, EvaluationError> {
        for condition in &toggle.conditions {
            let result = self.assertion.satisfies(condition, context, &toggle.name)?;
            if result.is_valid {
                debug!("Condition {:?} was satisfied", condition.key());
                return Ok(Outcome::Pass {
                    rollout_value: result.rollout_value,
                });
            }
        }
        debug!("No condition satisfied");
        Ok(Outcome::Fail)
    }

    fn evaluate_majority<'a>(
        &self,
        toggle: &'a Toggle,
        context: &Context,
    ) -> Result<Outcome<'a>, EvaluationError> {
        let mut hits = 0;
        let mut misses = 0;
        let mut rollout_value = None;
        for condition in &toggle.conditions {
            let result = self.assertion.satisfies(condition, context, &toggle.name)?;
            if result.is_valid {
                hits += 1;
                rollout_value = result.rollout_value.or(rollout_value);
            } else {
                misses += 1;
            }
        }
        debug!("Majority of {}: {} hits, {} misses", toggle.name, hits, misses);

        if hits > misses {
            Ok(Outcome::Pass { rollout_value })
        } else {
            Ok(Outcome::Fail)
        }
    }
}

/// Evaluate the toggle named `toggle_key` with the shared [OperatorSet].
///
/// This is a shorthand for `Evaluator::default().evaluate(..)`.
pub fn evaluate(
    toggles: &[Toggle],
    toggle_key: &str,
    context: Option<&Context>,
    default: FlagValue,
) -> Result<FlagValue, EvaluationError> {
    Evaluator::default().evaluate(toggles, toggle_key, context, default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_common::{test_toggles, ScriptedAssertion};
    use crate::toggle::Condition;
    use crate::rollout::Allocation;
    use assert_json_diff::assert_json_eq;
    use maplit::hashmap;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    fn context() -> Context {
        let mut context = Context::new();
        context
            .set("key01", "aValue002")
            .set("key02", "some_OtherValue");
        context
    }

    fn on() -> FlagValue {
        FlagValue::from("on")
    }

    fn off() -> FlagValue {
        FlagValue::from("off")
    }

    #[test]
    fn empty_toggle_key_is_an_error() {
        let toggles = test_toggles();
        let result = evaluate(&toggles, "", None, FlagValue::Bool(false));
        assert_that!(result).is_err_containing(EvaluationError::EmptyKey);

        let result = evaluate(&[], "", Some(&context()), FlagValue::Bool(false));
        assert_that!(result).is_err_containing(EvaluationError::EmptyKey);
    }

    #[test]
    fn empty_config_returns_default() {
        let detail = Evaluator::default()
            .evaluate_detail(&[], "my-toggle-001", None)
            .unwrap();
        assert_that!(detail).is_equal_to(Detail::empty(Reason::ToggleNotFound));

        assert_that!(evaluate(&[], "my-toggle-001", None, FlagValue::Bool(false)))
            .is_ok_containing(FlagValue::Bool(false));
    }

    #[test]
    fn unknown_toggle_returns_default() {
        let toggles = test_toggles();
        assert_that!(evaluate(&toggles, "does-not-exist", Some(&context()), off()))
            .is_ok_containing(off());
    }

    #[test]
    fn first_toggle_with_name_wins() {
        let toggles = vec![
            Toggle::new("dup", Status::Active, 1),
            Toggle::new("dup", Status::Active, 2),
        ];
        assert_that!(evaluate(&toggles, "dup", None, FlagValue::Int(0)))
            .is_ok_containing(FlagValue::Int(1));

        let toggles = vec![
            Toggle::new("dup", Status::Inactive, 1),
            Toggle::new("dup", Status::Active, 2),
        ];
        assert_that!(evaluate(&toggles, "dup", None, FlagValue::Int(0)))
            .is_ok_containing(FlagValue::Int(0));
    }

    #[test]
    fn unconditional_toggle_returns_value_without_context() {
        let toggles = vec![Toggle::new("t1", Status::Active, 0.2).with_strategy(Strategy::All)];
        assert_that!(evaluate(&toggles, "t1", None, FlagValue::Float(0.5)))
            .is_ok_containing(FlagValue::Float(0.2));

        let toggles = test_toggles();
        let detail = Evaluator::default()
            .evaluate_detail(&toggles, "toggle-unconditional", None)
            .unwrap();
        assert_that!(detail.value).contains_value(&FlagValue::Bool(true));
        assert_that!(detail.reason).is_equal_to(Reason::Unconditional);
    }

    #[test_case(None)]
    #[test_case(Some(Strategy::All))]
    #[test_case(Some(Strategy::AtLeastOne))]
    #[test_case(Some(Strategy::Majority))]
    fn inactive_toggle_always_returns_default(strategy: Option<Strategy>) {
        let mut toggle = Toggle::new("t", Status::Inactive, true)
            .with_conditions(vec![Condition::comparison("key01", "equal", "aValue002")]);
        toggle.strategy = strategy;
        let assertion = ScriptedAssertion::new(hashmap! { "key01" => true });
        let evaluator = Evaluator::new(&assertion);

        let detail = evaluator
            .evaluate_detail(std::slice::from_ref(&toggle), "t", Some(&context()))
            .unwrap();
        assert_that!(detail).is_equal_to(Detail::empty(Reason::Inactive));
        assert_that!(assertion.asserted()).is_empty();
    }

    #[test]
    fn conditional_toggle_without_context_returns_default() {
        let toggles = test_toggles();
        let detail = Evaluator::default()
            .evaluate_detail(&toggles, "toggle-all", None)
            .unwrap();
        assert_that!(detail).is_equal_to(Detail::empty(Reason::MissingContext));
    }

    #[test]
    fn conditional_toggle_without_strategy_is_an_error() {
        let toggles = test_toggles();
        let result = evaluate(&toggles, "toggle-no-strategy", Some(&context()), off());
        assert_that!(result).is_err_containing(EvaluationError::MissingStrategy {
            toggle: "toggle-no-strategy".to_string(),
        });

        // without a context the strategy is never looked at
        assert_that!(evaluate(&toggles, "toggle-no-strategy", None, off()))
            .is_ok_containing(off());
    }

    #[test]
    fn strategy_all() {
        let toggles = test_toggles();

        let assertion = ScriptedAssertion::new(hashmap! { "key01" => true, "key02" => true });
        assert_that!(Evaluator::new(&assertion).evaluate(&toggles, "toggle-all", Some(&context()), off()))
            .is_ok_containing(on());

        let assertion = ScriptedAssertion::new(hashmap! { "key01" => false, "key02" => true });
        let detail = Evaluator::new(&assertion)
            .evaluate_detail(&toggles, "toggle-all", Some(&context()))
            .unwrap();
        assert_that!(detail).is_equal_to(Detail::empty(Reason::ConditionsFailed {
            strategy: Strategy::All,
        }));
        asserting!("ALL stops at the first failed condition")
            .that(&assertion.asserted())
            .is_equal_to(vec!["key01".to_string()]);
    }

    #[test]
    fn strategy_all_prefers_last_rollout_value() {
        let toggle = Toggle::new("t", Status::Active, "toggle")
            .with_strategy(Strategy::All)
            .with_conditions(vec![
                Condition::rollout("first", vec![Allocation::new("a", 1.0, Some("first".into()))]),
                Condition::comparison("key01", "equal", "aValue002"),
                Condition::rollout("second", vec![Allocation::new("b", 1.0, Some("second".into()))]),
                Condition::rollout("empty", vec![Allocation::new("c", 1.0, None)]),
            ]);
        let assertion = ScriptedAssertion::new(
            hashmap! { "first" => true, "key01" => true, "second" => true, "empty" => true },
        );

        let detail = Evaluator::new(&assertion)
            .evaluate_detail(std::slice::from_ref(&toggle), "t", Some(&context()))
            .unwrap();
        assert_that!(detail.value).contains_value(&FlagValue::from("second"));
        assert_that!(detail.reason).is_equal_to(Reason::ConditionsMatched {
            strategy: Strategy::All,
            from_rollout: true,
        });
    }

    #[test]
    fn strategy_at_least_one() {
        let toggles = test_toggles();

        let assertion = ScriptedAssertion::new(hashmap! { "key01" => false, "key02" => true });
        assert_that!(Evaluator::new(&assertion).evaluate(
            &toggles,
            "toggle-at-least-one",
            Some(&context()),
            off()
        ))
        .is_ok_containing(on());

        let assertion = ScriptedAssertion::new(hashmap! { "key01" => true, "key02" => true });
        let _ = Evaluator::new(&assertion)
            .evaluate(&toggles, "toggle-at-least-one", Some(&context()), off())
            .unwrap();
        asserting!("AT_LEAST_ONE stops at the first satisfied condition")
            .that(&assertion.asserted())
            .is_equal_to(vec!["key01".to_string()]);

        let assertion = ScriptedAssertion::new(hashmap! {});
        let detail = Evaluator::new(&assertion)
            .evaluate_detail(&toggles, "toggle-at-least-one", Some(&context()))
            .unwrap();
        assert_that!(detail).is_equal_to(Detail::empty(Reason::ConditionsFailed {
            strategy: Strategy::AtLeastOne,
        }));
    }

    #[test]
    fn strategy_at_least_one_uses_rollout_value_of_first_match() {
        let toggle = Toggle::new("t", Status::Active, "toggle")
            .with_strategy(Strategy::AtLeastOne)
            .with_conditions(vec![
                Condition::rollout("first", vec![Allocation::new("a", 1.0, Some("first".into()))]),
                Condition::rollout("second", vec![Allocation::new("b", 1.0, Some("second".into()))]),
            ]);
        let assertion = ScriptedAssertion::new(hashmap! { "first" => false, "second" => true });

        assert_that!(Evaluator::new(&assertion).evaluate(
            std::slice::from_ref(&toggle),
            "t",
            Some(&context()),
            off()
        ))
        .is_ok_containing(FlagValue::from("second"));
    }

    #[test_case(hashmap! { "key01" => true, "key02" => true, "key03" => false }, Some(on()))]
    #[test_case(hashmap! { "key01" => true, "key02" => false, "key03" => true }, Some(on()))]
    #[test_case(hashmap! { "key01" => true, "key02" => false, "key03" => false }, None)]
    #[test_case(hashmap! {}, None)]
    fn strategy_majority(verdicts: std::collections::HashMap<&str, bool>, expected: Option<FlagValue>) {
        let toggles = test_toggles();
        let assertion = ScriptedAssertion::new(verdicts);

        let detail = Evaluator::new(&assertion)
            .evaluate_detail(&toggles, "toggle-majority", Some(&context()))
            .unwrap();
        assert_that!(detail.value.cloned()).is_equal_to(expected);
        asserting!("MAJORITY checks every condition")
            .that(&assertion.asserted())
            .has_length(3);
    }

    #[test]
    fn strategy_majority_needs_strictly_more_hits() {
        let toggle = Toggle::new("t", Status::Active, "toggle")
            .with_strategy(Strategy::Majority)
            .with_conditions(vec![
                Condition::comparison("key01", "equal", "aValue002"),
                Condition::comparison("key02", "equal", "nope"),
            ]);
        let toggles = vec![toggle];

        assert_that!(evaluate(&toggles, "t", Some(&context()), off())).is_ok_containing(off());
    }

    #[test]
    fn strategy_majority_tracks_rollout_value_of_hits() {
        let toggle = Toggle::new("t", Status::Active, "toggle")
            .with_strategy(Strategy::Majority)
            .with_conditions(vec![
                Condition::rollout("first", vec![Allocation::new("a", 1.0, Some("first".into()))]),
                Condition::rollout("missed", vec![Allocation::new("b", 1.0, Some("missed".into()))]),
                Condition::comparison("key01", "equal", "aValue002"),
            ]);
        let assertion =
            ScriptedAssertion::new(hashmap! { "first" => true, "missed" => false, "key01" => true });

        assert_that!(Evaluator::new(&assertion).evaluate(
            std::slice::from_ref(&toggle),
            "t",
            Some(&context()),
            off()
        ))
        .is_ok_containing(FlagValue::from("first"));
    }

    #[test]
    fn evaluates_with_operator_set() {
        let toggles = test_toggles();

        assert_that!(evaluate(&toggles, "toggle-all", Some(&context()), off()))
            .is_ok_containing(on());

        let mut partial = context();
        partial.set("key02", "different");
        assert_that!(evaluate(&toggles, "toggle-all", Some(&partial), off()))
            .is_ok_containing(off());
        assert_that!(evaluate(&toggles, "toggle-at-least-one", Some(&partial), off()))
            .is_ok_containing(on());

        partial.set("key03", "green");
        assert_that!(evaluate(&toggles, "toggle-majority", Some(&partial), off()))
            .is_ok_containing(on());
    }

    #[test]
    fn ab_split_rollout_is_stable() {
        let toggles = test_toggles();
        let mut context = Context::new();

        context.set("uuid", "1");
        let first = evaluate(&toggles, "feature", Some(&context), off()).unwrap();
        assert_that!(first).is_equal_to(FlagValue::from("variant-b"));
        for _ in 0..3 {
            assert_that!(evaluate(&toggles, "feature", Some(&context), off()))
                .is_ok_containing(first.clone());
        }

        context.set("uuid", 2);
        assert_that!(evaluate(&toggles, "feature", Some(&context), off()))
            .is_ok_containing(FlagValue::from("variant-a"));
    }

    #[test]
    fn rollout_combined_with_comparison() {
        let toggles = test_toggles();
        let mut context = Context::new();
        context.set("email", "jane@acme.com").set("uuid", 1);

        let detail = Evaluator::default()
            .evaluate_detail(&toggles, "beta-rollout", Some(&context))
            .unwrap();
        asserting!("uuid 1 (bucket 1891) is inside the 50% rollout without an allocation value")
            .that(&detail.value)
            .contains_value(&FlagValue::Bool(true));
        assert_that!(detail.reason).is_equal_to(Reason::ConditionsMatched {
            strategy: Strategy::All,
            from_rollout: false,
        });

        context.set("uuid", 2);
        asserting!("uuid 2 (bucket 8448) is outside the rollout")
            .that(&evaluate(&toggles, "beta-rollout", Some(&context), FlagValue::Bool(false)))
            .is_ok_containing(FlagValue::Bool(false));

        context.set("uuid", 1).set("email", "jane@other.com");
        assert_that!(evaluate(&toggles, "beta-rollout", Some(&context), FlagValue::Bool(false)))
            .is_ok_containing(FlagValue::Bool(false));
    }

    #[test]
    fn rollout_without_uuid_is_an_error() {
        let toggles = test_toggles();
        let mut context = Context::new();
        context.set("email", "jane@acme.com");

        assert_that!(evaluate(&toggles, "beta-rollout", Some(&context), FlagValue::Bool(false)))
            .is_err_containing(EvaluationError::MissingUuid {
                toggle: "beta-rollout".to_string(),
            });

        // ALL short-circuits before reaching the rollout condition
        context.set("email", "jane@other.com");
        assert_that!(evaluate(&toggles, "beta-rollout", Some(&context), FlagValue::Bool(false)))
            .is_ok_containing(FlagValue::Bool(false));
    }

    #[test]
    fn detail_helpers() {
        let detail: Detail<i64> = Detail::empty(Reason::Inactive);
        assert_that!(detail.clone().or(7).value).contains_value(7);
        assert_that!(detail.map(|v| v * 2).value).is_none();

        let detail = Detail {
            value: Some(2),
            reason: Reason::Unconditional,
        };
        assert_that!(detail.clone().or(7).value).contains_value(2);
        assert_that!(detail.map(|v| v * 2).value).contains_value(4);
    }

    #[test]
    fn reason_serialization() {
        assert_json_eq!(json!(Reason::ToggleNotFound), json!({"kind": "TOGGLE_NOT_FOUND"}));
        assert_json_eq!(json!(Reason::MissingContext), json!({"kind": "MISSING_CONTEXT"}));
        assert_json_eq!(
            json!(Reason::ConditionsMatched {
                strategy: Strategy::AtLeastOne,
                from_rollout: true
            }),
            json!({"kind": "CONDITIONS_MATCHED", "strategy": "AT_LEAST_ONE", "fromRollout": true})
        );
        assert_json_eq!(
            json!(Reason::ConditionsFailed {
                strategy: Strategy::Majority
            }),
            json!({"kind": "CONDITIONS_FAILED", "strategy": "MAJORITY"})
        );
    }

    #[test]
    fn error_messages() {
        assert_that!(EvaluationError::EmptyKey.to_string())
            .is_equal_to("toggle key is empty".to_string());
        assert_that!(EvaluationError::MissingUuid {
            toggle: "feature".into()
        }
        .to_string())
        .is_equal_to("toggle 'feature' has a rollout condition but no uuid was given".to_string());
    }
}
