//! Label selectors
//!
//! A [`Selector`] is a conjunction of [`Requirement`]s. It renders to the
//! Kubernetes `labelSelector` query syntax so the forwarding layer can inject
//! it verbatim, and can evaluate itself against an object's labels.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::names::{validate_label_key, validate_label_value};

/// Label key of the requirement that never excludes an object
pub const MATCH_ALL_KEY: &str = "dontexistsignoreme";

/// Label map of an object
pub type Labels = BTreeMap<String, String>;

/// Errors building a selector
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    /// Empty label key
    #[error("label key must not be empty")]
    EmptyKey,

    /// Label key outside the qualified-name syntax
    #[error("{0}")]
    InvalidKey(String),

    /// Label value outside the label-value syntax
    #[error("{0}")]
    InvalidValue(String),

    /// `In`/`NotIn` without values
    #[error("operator {operator} on key '{key}' requires at least one value")]
    MissingValues {
        /// Label key
        key: String,
        /// Operator
        operator: Operator,
    },

    /// `Exists`/`DoesNotExist` with values
    #[error("operator {operator} on key '{key}' takes no values")]
    UnexpectedValues {
        /// Label key
        key: String,
        /// Operator
        operator: Operator,
    },

    /// Operator string not understood
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),
}

/// Requirement operator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Label value is one of the values
    In,
    /// Label is absent or its value is none of the values
    NotIn,
    /// Label is present
    Exists,
    /// Label is absent
    DoesNotExist,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::In => "In",
            Operator::NotIn => "NotIn",
            Operator::Exists => "Exists",
            Operator::DoesNotExist => "DoesNotExist",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Operator {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "In" => Ok(Operator::In),
            "NotIn" => Ok(Operator::NotIn),
            "Exists" => Ok(Operator::Exists),
            "DoesNotExist" => Ok(Operator::DoesNotExist),
            other => Err(SelectorError::UnknownOperator(other.to_string())),
        }
    }
}

/// A single label constraint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

impl Requirement {
    /// Build a validated requirement
    ///
    /// Keys and values must follow the Kubernetes label syntax so the
    /// rendered selector keeps the meaning of the requirement.
    pub fn new(
        key: impl Into<String>,
        operator: Operator,
        values: impl IntoIterator<Item = String>,
    ) -> Result<Self, SelectorError> {
        let key = key.into();
        let values: BTreeSet<String> = values.into_iter().collect();

        if key.is_empty() {
            return Err(SelectorError::EmptyKey);
        }
        validate_label_key(&key).map_err(SelectorError::InvalidKey)?;
        for value in &values {
            validate_label_value(value).map_err(SelectorError::InvalidValue)?;
        }
        match operator {
            Operator::In | Operator::NotIn if values.is_empty() => {
                return Err(SelectorError::MissingValues { key, operator })
            }
            Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                return Err(SelectorError::UnexpectedValues { key, operator })
            }
            _ => {}
        }

        Ok(Self {
            key,
            operator,
            values,
        })
    }

    /// Requirement that is satisfied by every object
    ///
    /// Used where only selector-shaped filters are accepted but nothing should
    /// be filtered.
    pub fn match_all() -> Self {
        Self {
            key: MATCH_ALL_KEY.to_string(),
            operator: Operator::Exists,
            values: BTreeSet::new(),
        }
    }

    /// Whether this is the [`Requirement::match_all`] sentinel
    pub fn is_match_all(&self) -> bool {
        self.key == MATCH_ALL_KEY && self.operator == Operator::Exists
    }

    /// Label key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Operator
    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// Values, sorted
    pub fn values(&self) -> &BTreeSet<String> {
        &self.values
    }

    /// Evaluate against an object's labels
    pub fn matches(&self, labels: &Labels) -> bool {
        if self.is_match_all() {
            return true;
        }
        match self.operator {
            Operator::In => labels
                .get(&self.key)
                .is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => labels
                .get(&self.key)
                .map_or(true, |v| !self.values.contains(v)),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = || self.values.iter().cloned().collect::<Vec<_>>().join(",");
        match self.operator {
            Operator::In => write!(f, "{} in ({})", self.key, values()),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, values()),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// Conjunction of requirements
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Empty selector
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a requirement
    pub fn add(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Requirements in insertion order
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Whether the selector places no effective restriction
    pub fn is_unrestricted(&self) -> bool {
        self.requirements.iter().all(Requirement::is_match_all)
    }

    /// Evaluate against an object's labels
    pub fn matches(&self, labels: &Labels) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Convert a Kubernetes `LabelSelector`, validating every expression
    pub fn from_label_selector(selector: &LabelSelector) -> Result<Self, SelectorError> {
        let mut out = Selector::new();

        for (key, value) in selector.match_labels.iter().flatten() {
            out = out.add(Requirement::new(
                key.clone(),
                Operator::In,
                Some(value.clone()),
            )?);
        }

        for expr in selector.match_expressions.iter().flatten() {
            let operator: Operator = expr.operator.parse()?;
            out = out.add(Requirement::new(
                expr.key.clone(),
                operator,
                expr.values.clone().unwrap_or_default(),
            )?);
        }

        Ok(out)
    }
}

impl From<Requirement> for Selector {
    fn from(requirement: Requirement) -> Self {
        Selector::new().add(requirement)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_requirement_validation() {
        assert_eq!(
            Requirement::new("", Operator::Exists, None::<String>),
            Err(SelectorError::EmptyKey)
        );
        assert!(matches!(
            Requirement::new("name", Operator::In, None::<String>),
            Err(SelectorError::MissingValues { .. })
        ));
        assert!(matches!(
            Requirement::new("name", Operator::Exists, Some("x".to_string())),
            Err(SelectorError::UnexpectedValues { .. })
        ));
    }

    #[test]
    fn test_requirement_rejects_selector_syntax() {
        assert!(matches!(
            Requirement::new("tier", Operator::In, Some("gold),pool notin (x".to_string())),
            Err(SelectorError::InvalidValue(_))
        ));
        assert!(matches!(
            Requirement::new("tier,pool", Operator::Exists, None::<String>),
            Err(SelectorError::InvalidKey(_))
        ));
        assert!(matches!(
            Requirement::new("tier", Operator::In, Some("gold-tier-ünicode".to_string())),
            Err(SelectorError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_label_selector_cannot_smuggle_requirements() {
        let ls = LabelSelector {
            match_labels: Some([("tier".to_string(), "gold),pool notin (x".to_string())].into()),
            match_expressions: None,
        };

        assert!(matches!(
            Selector::from_label_selector(&ls),
            Err(SelectorError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_matches() {
        let in_req =
            Requirement::new("name", Operator::In, vec!["a".to_string(), "b".to_string()])
                .unwrap();
        let notin_req = Requirement::new("tier", Operator::NotIn, Some("gold".to_string())).unwrap();
        let exists_req = Requirement::new("pool", Operator::Exists, None::<String>).unwrap();
        let absent_req = Requirement::new("pool", Operator::DoesNotExist, None::<String>).unwrap();

        for (req, lbls, expected, msg) in [
            (&in_req, labels(&[("name", "a")]), true, "in match"),
            (&in_req, labels(&[("name", "c")]), false, "in mismatch"),
            (&in_req, labels(&[]), false, "in absent"),
            (&notin_req, labels(&[]), true, "notin absent"),
            (&notin_req, labels(&[("tier", "gold")]), false, "notin excluded"),
            (&exists_req, labels(&[("pool", "x")]), true, "exists present"),
            (&exists_req, labels(&[]), false, "exists absent"),
            (&absent_req, labels(&[]), true, "does not exist"),
        ] {
            assert_eq!(req.matches(&lbls), expected, "{}", msg);
        }
    }

    #[test]
    fn test_match_all_never_excludes() {
        let selector = Selector::from(Requirement::match_all());
        assert!(selector.is_unrestricted());
        assert!(selector.matches(&labels(&[])));
        assert!(selector.matches(&labels(&[("name", "anything")])));
    }

    #[test]
    fn test_display_uses_query_syntax() {
        let selector = Selector::new()
            .add(
                Requirement::new(
                    "name",
                    Operator::In,
                    vec!["slow-hdd".to_string(), "fast-ssd".to_string()],
                )
                .unwrap(),
            )
            .add(Requirement::new("pool", Operator::DoesNotExist, None::<String>).unwrap());

        assert_eq!(selector.to_string(), "name in (fast-ssd,slow-hdd),!pool");
    }

    #[test]
    fn test_from_label_selector() {
        let ls = LabelSelector {
            match_labels: Some([("pool".to_string(), "oil".to_string())].into()),
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "zone".into(),
                operator: "NotIn".into(),
                values: Some(vec!["eu-1".into()]),
            }]),
        };

        let selector = Selector::from_label_selector(&ls).unwrap();
        assert_eq!(selector.to_string(), "pool in (oil),zone notin (eu-1)");
        assert!(!selector.is_unrestricted());
    }

    #[test]
    fn test_from_label_selector_rejects_bad_operator() {
        let ls = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "zone".into(),
                operator: "Near".into(),
                values: None,
            }]),
        };

        assert_eq!(
            Selector::from_label_selector(&ls),
            Err(SelectorError::UnknownOperator("Near".into()))
        );
    }
}
