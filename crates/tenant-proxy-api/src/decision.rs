//! Selector decision
//!
//! Folds the rules of every tenant a caller belongs to into one
//! request-scoped decision for a single kind.

use std::collections::BTreeSet;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use regex::Regex;

use crate::kind::ProxyKind;
use crate::tenant::{OwnershipRule, ProxyTenant};

/// Accumulated visibility for one kind
#[derive(Clone, Debug, Default)]
pub struct SelectorDecision {
    /// Some tenant grants unrestricted access
    pub allowed: bool,
    /// Names granted by exact rules
    pub exact: BTreeSet<String>,
    /// Patterns granted by regex rules, de-duplicated by source text
    pub regex: Vec<Regex>,
    /// Raw selectors, in tenant order
    pub raw: Vec<LabelSelector>,
}

impl SelectorDecision {
    /// Fold every tenant's rule for `kind`
    ///
    /// Tenants without a rule for the kind contribute nothing.
    pub fn fold(kind: ProxyKind, tenants: &[ProxyTenant]) -> Self {
        let mut decision = Self::default();

        for tenant in tenants {
            match tenant.rule(kind) {
                None => {}
                Some(OwnershipRule::Unrestricted) => decision.allowed = true,
                Some(OwnershipRule::Exact(names)) => {
                    decision.exact.extend(names.iter().cloned());
                }
                Some(OwnershipRule::Regex(re)) => {
                    if !decision.regex.iter().any(|r| r.as_str() == re.as_str()) {
                        decision.regex.push(re.clone());
                    }
                }
                Some(OwnershipRule::RawSelector(selector)) => {
                    decision.raw.push(selector.clone());
                }
            }
        }

        decision
    }

    /// Whether a name is granted by an exact or regex rule
    pub fn grants(&self, name: &str) -> bool {
        self.exact.contains(name) || self.regex.iter().any(|re| re.is_match(name))
    }

    /// Candidate names granted by an exact or regex rule
    pub fn matching<'a, I>(&self, candidates: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        candidates
            .into_iter()
            .filter(|name| self.grants(name))
            .cloned()
            .collect()
    }
}
