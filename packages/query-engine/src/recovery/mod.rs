//! Output recovery: turn raw model text into a structured value.
//!
//! Stages run cheapest first until one yields a value:
//!
//! 1. [`RecoveryStage::Direct`] - the whole text is JSON
//! 2. [`RecoveryStage::CodeFence`] - a ```` ``` ```` / ```` ```json ```` block
//! 3. [`RecoveryStage::BracketSearch`] - an array/object embedded in prose
//! 4. [`RecoveryStage::Cleanup`] - doubled braces, stray escapes, newlines
//! 5. [`RecoveryStage::Repair`] - trailing commas, unquoted keys, truncation
//! 6. [`RecoveryStage::CallExpression`] - `name(key=value, ...)` syntax
//!
//! A stage that matches but fails to parse narrows the text the next stage
//! sees. When a stage fails on the narrowed text it is retried on the raw
//! text, so any input a single stage can parse on its own is recovered.
//!
//! Recovered values are never cached; they are recomputed from the stored
//! response text on every read.

mod call_expr;
pub mod heuristics;
mod repair;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::QueryError;

pub use heuristics::{entity_texts, normalize, AmbiguousText, ResultShape};

/// The stage that produced a [`Recovered`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStage {
    Direct,
    CodeFence,
    BracketSearch,
    Cleanup,
    Repair,
    CallExpression,
}

impl RecoveryStage {
    /// Every stage, in the order `recover` tries them.
    pub const ALL: [RecoveryStage; 6] = [
        RecoveryStage::Direct,
        RecoveryStage::CodeFence,
        RecoveryStage::BracketSearch,
        RecoveryStage::Cleanup,
        RecoveryStage::Repair,
        RecoveryStage::CallExpression,
    ];

    /// Run this stage alone on `text`.
    pub fn apply(self, text: &str) -> Attempt {
        match self {
            Self::Direct => Attempt::parsed(text),
            Self::CodeFence => code_fence(text),
            Self::BracketSearch => bracket_search(text),
            Self::Cleanup => cleanup(text),
            Self::Repair => Attempt {
                value: repair::repair(text),
                narrowed: None,
            },
            Self::CallExpression => Attempt {
                value: call_expr::parse_call(text),
                narrowed: None,
            },
        }
    }
}

/// Outcome of one stage on one input.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub value: Option<Value>,
    /// Text the stage matched, handed to later stages.
    pub narrowed: Option<String>,
}

impl Attempt {
    fn parsed(text: &str) -> Self {
        Self {
            value: serde_json::from_str(text).ok(),
            narrowed: None,
        }
    }

    fn narrowed(text: String) -> Self {
        Self {
            value: serde_json::from_str(&text).ok(),
            narrowed: Some(text),
        }
    }

    fn none() -> Self {
        Self {
            value: None,
            narrowed: None,
        }
    }
}

/// A successfully recovered value.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    pub value: Value,
    pub stage: RecoveryStage,
}

/// Every stage failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryFailure {
    /// Last text a stage worked on.
    pub cleaned: String,
}

/// Recover a structured value from raw model output.
pub fn recover(raw: &str) -> Result<Recovered, RecoveryFailure> {
    let mut candidate = raw.to_string();

    for stage in RecoveryStage::ALL {
        let attempt = stage.apply(&candidate);
        if let Some(value) = attempt.value {
            return Ok(Recovered { value, stage });
        }
        if candidate != raw {
            if let Some(value) = stage.apply(raw).value {
                return Ok(Recovered { value, stage });
            }
        }
        if let Some(narrowed) = attempt.narrowed {
            candidate = narrowed;
        }
    }

    Err(RecoveryFailure { cleaned: candidate })
}

/// [`recover`], reporting failure as [`QueryError::UnparseableResponse`].
pub fn recover_value(raw: &str) -> crate::error::Result<Value> {
    match recover(raw) {
        Ok(recovered) => {
            tracing::trace!(stage = ?recovered.stage, "Recovered model output");
            Ok(recovered.value)
        }
        Err(failure) => Err(QueryError::UnparseableResponse {
            raw: raw.to_string(),
            cleaned: failure.cleaned,
        }),
    }
}

static RE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\n(.*)\n```").unwrap());

static RE_BRACKETS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?s)(\[.*\{.*\}.*\])",
        r"(?s)(\{.*\[.*\].*\})",
        r"(?s)^(\{.*\})",
        r"(?s)^(\[.*\])",
        r"(?s)(\{.*\})$",
        r"(?s)(\[.*\])$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static RE_INNER_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(.*)\}").unwrap());

fn code_fence(text: &str) -> Attempt {
    match RE_FENCE.captures(text) {
        Some(caps) => Attempt::narrowed(caps[1].to_string()),
        None => Attempt::none(),
    }
}

fn bracket_search(text: &str) -> Attempt {
    let mut candidate = text.trim().to_string();
    let mut narrowed = None;
    for pattern in RE_BRACKETS.iter() {
        let Some(found) = pattern.captures(&candidate).map(|c| c[1].to_string()) else {
            continue;
        };
        if let Ok(value) = serde_json::from_str(&found) {
            return Attempt {
                value: Some(value),
                narrowed: Some(found),
            };
        }
        candidate = found.clone();
        narrowed = Some(found);
    }

    Attempt {
        value: None,
        narrowed,
    }
}

fn cleanup(text: &str) -> Attempt {
    let cleaned = text
        .replace("{{", "{")
        .replace("}}", "}")
        .replace("\"[{", "[{")
        .replace("}]\"", "}]")
        .replace('\\', " ")
        .replace('\n', " ")
        .replace('\r', "")
        .trim()
        .to_string();

    if let Ok(value) = serde_json::from_str(&cleaned) {
        return Attempt {
            value: Some(value),
            narrowed: Some(cleaned),
        };
    }

    // Inner object is tried, not narrowed to.
    let inner = RE_INNER_OBJECT
        .captures(&cleaned)
        .and_then(|caps| serde_json::from_str(&format!("{{{}}}", &caps[1])).ok());

    Attempt {
        value: inner,
        narrowed: Some(cleaned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn value(raw: &str) -> Value {
        recover(raw).unwrap().value
    }

    #[test]
    fn test_direct() {
        let recovered = recover(r#"["email", "phone number"]"#).unwrap();
        assert_eq!(recovered.value, json!(["email", "phone number"]));
        assert_eq!(recovered.stage, RecoveryStage::Direct);
    }

    #[test]
    fn test_code_fence() {
        let recovered = recover("```json\n[\"email\"]\n```").unwrap();
        assert_eq!(recovered.value, json!(["email"]));
        assert_eq!(recovered.stage, RecoveryStage::CodeFence);

        assert_eq!(value("Here you go:\n```\n{\"a\": 1}\n```\nDone."), json!({"a": 1}));
    }

    #[test]
    fn test_bracket_search_in_prose() {
        let recovered =
            recover("The entities are: [{\"text\": \"email\"}] as requested.").unwrap();
        assert_eq!(recovered.value, json!([{"text": "email"}]));
        assert_eq!(recovered.stage, RecoveryStage::BracketSearch);

        assert_eq!(value("Sure. {\"a\": [1, 2]}"), json!({"a": [1, 2]}));
        assert_eq!(value("Answer:\n[\"x\", \"y\"]"), json!(["x", "y"]));
    }

    #[test]
    fn test_doubled_braces_cleanup() {
        let recovered = recover(r#"{{"a": 1}}"#).unwrap();
        assert_eq!(recovered.value, json!({"a": 1}));
        assert_eq!(recovered.stage, RecoveryStage::Cleanup);
    }

    #[test]
    fn test_cleanup_quoted_array() {
        assert_eq!(value(r#""[{"a": 1}]""#), json!([{"a": 1}]));
    }

    #[test]
    fn test_repair_trailing_comma_and_truncation() {
        let recovered = recover(r#"[{"text": "email",}, {"text": "ph"#).unwrap();
        assert_eq!(recovered.value, json!([{"text": "email"}, {"text": "ph"}]));
        assert_eq!(recovered.stage, RecoveryStage::Repair);

        assert_eq!(value("{data: 'email', purpose: null,}"), json!({"data": "email", "purpose": null}));
    }

    #[test]
    fn test_call_expression() {
        let recovered =
            recover("extract(entities=['email', 'phone'], count=2, verified=True)").unwrap();
        assert_eq!(
            recovered.value,
            json!({"entities": ["email", "phone"], "count": 2, "verified": true})
        );
        assert_eq!(recovered.stage, RecoveryStage::CallExpression);
    }

    #[test]
    fn test_failure_carries_cleaned_text() {
        let failure = recover("I could not find any entities.").unwrap_err();
        assert_eq!(failure.cleaned, "I could not find any entities.");

        let failure = recover("```json\nnot json at all\n```").unwrap_err();
        assert_eq!(failure.cleaned, "not json at all");
    }

    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[a-z ]{0,8}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,5}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn noisy_text() -> impl Strategy<Value = String> {
        let wrapped = (json_value(), "[A-Za-z :]{0,12}", 0usize..4).prop_map(
            |(value, prose, wrap)| {
                let body = value.to_string();
                match wrap {
                    0 => body,
                    1 => format!("```json\n{}\n```", body),
                    2 => format!("{} {}", prose, body),
                    _ => format!("{{{}}}", body),
                }
            },
        );
        prop_oneof![wrapped, r#"[\[\]{}"',:a-z0-9 \n=()]{0,24}"#]
    }

    proptest! {
        #[test]
        fn prop_any_single_stage_success_recovers(text in noisy_text()) {
            let parsable_by_some_stage = RecoveryStage::ALL
                .iter()
                .any(|stage| stage.apply(&text).value.is_some());
            if parsable_by_some_stage {
                prop_assert!(recover(&text).is_ok());
            }
        }

        #[test]
        fn prop_serialized_values_recover_exactly(value in json_value()) {
            prop_assert_eq!(recover(&value.to_string()).unwrap().value, value);
        }
    }
}
