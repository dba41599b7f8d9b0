//! Route patterns with named variables
//!
//! Patterns are literal paths with `{name}` or `{name:regex}` variables.
//! A bare `{name}` matches one path segment.

use regex::Regex;

use crate::request::PathVars;

/// Default expression for a variable without one
const SEGMENT: &str = "[^/]+";

/// Errors parsing a route pattern
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    /// A `{` has no matching `}`
    #[error("unbalanced braces in route pattern '{0}'")]
    Unbalanced(String),

    /// A variable name is empty or not an identifier
    #[error("invalid variable name '{name}' in route pattern '{pattern}'")]
    InvalidName {
        /// Offending name
        name: String,
        /// Full pattern
        pattern: String,
    },

    /// The compiled expression is invalid
    #[error("invalid route pattern '{pattern}': {source}")]
    Regex {
        /// Full pattern
        pattern: String,
        /// Compilation error
        #[source]
        source: regex::Error,
    },
}

/// Compiled route pattern
#[derive(Clone, Debug)]
pub struct PathPattern {
    source: String,
    regex: Regex,
    names: Vec<String>,
}

impl PathPattern {
    /// Compile a pattern
    ///
    /// # Examples
    ///
    /// ```
    /// use tenant_proxy_api::routing::PathPattern;
    ///
    /// let pattern = PathPattern::parse("/apis/storage.k8s.io/{version}/storageclasses/{name}").unwrap();
    /// let vars = pattern.captures("/apis/storage.k8s.io/v1/storageclasses/fast-ssd").unwrap();
    /// assert_eq!(vars["name"], "fast-ssd");
    /// assert!(pattern.captures("/apis/storage.k8s.io/v1/storageclasses").is_none());
    /// ```
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let mut expr = String::from("^");
        let mut names = Vec::new();
        let mut rest = pattern;

        while let Some(open) = rest.find('{') {
            expr.push_str(&regex::escape(&rest[..open]));

            let close = closing_brace(&rest[open..])
                .ok_or_else(|| PatternError::Unbalanced(pattern.to_string()))?;
            let var = &rest[open + 1..open + close];
            let (name, var_expr) = var.split_once(':').unwrap_or((var, SEGMENT));

            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(PatternError::InvalidName {
                    name: name.to_string(),
                    pattern: pattern.to_string(),
                });
            }

            expr.push_str(&format!("(?P<{}>{})", name, var_expr));
            names.push(name.to_string());
            rest = &rest[open + close + 1..];
        }

        if rest.contains('}') {
            return Err(PatternError::Unbalanced(pattern.to_string()));
        }
        expr.push_str(&regex::escape(rest));
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|source| PatternError::Regex {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
            names,
        })
    }

    /// Pattern as written
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Variables of a matching path, or `None` if the path does not match
    pub fn captures(&self, path: &str) -> Option<PathVars> {
        let caps = self.regex.captures(path)?;
        Some(
            self.names
                .iter()
                .filter_map(|name| {
                    caps.name(name)
                        .map(|m| (name.clone(), m.as_str().to_string()))
                })
                .collect(),
        )
    }
}

/// Offset of the `}` closing the `{` at the start of `s`
fn closing_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
