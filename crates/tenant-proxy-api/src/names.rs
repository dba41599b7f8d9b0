//! Kubernetes name and label syntax
//!
//! Object names and label keys/values end up inside field and label
//! selector strings, where `,`, `=`, `(` and spaces are syntax. Anything
//! that reaches a selector passes through these checks first.

/// Longest DNS subdomain (object names, label key prefixes)
const DNS_SUBDOMAIN_MAX: usize = 253;

/// Longest label name or value
const LABEL_MAX: usize = 63;

/// Validate a DNS subdomain (RFC 1123), the syntax of cluster-scoped names
///
/// Lowercase alphanumerics, `-` and `.`; every dot-separated part starts
/// and ends with an alphanumeric.
pub fn validate_dns_subdomain(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("name cannot be empty".to_string());
    }
    if s.len() > DNS_SUBDOMAIN_MAX {
        return Err(format!(
            "name exceeds {} characters: {}",
            DNS_SUBDOMAIN_MAX, s
        ));
    }

    for part in s.split('.') {
        let valid = !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !part.starts_with('-')
            && !part.ends_with('-');
        if !valid {
            return Err(format!("name is not a valid DNS subdomain: {}", s));
        }
    }

    Ok(())
}

/// Validate a label key: an optional DNS subdomain prefix and `/`, then a name
pub fn validate_label_key(key: &str) -> Result<(), String> {
    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            validate_dns_subdomain(prefix)
                .map_err(|e| format!("invalid prefix of label key '{}': {}", key, e))?;
            name
        }
        None => key,
    };

    if name.is_empty() {
        return Err(format!("label key '{}' has an empty name", key));
    }
    validate_label_segment(name).map_err(|e| format!("invalid label key '{}': {}", key, e))
}

/// Validate a label value (may be empty)
pub fn validate_label_value(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Ok(());
    }
    validate_label_segment(value).map_err(|e| format!("invalid label value '{}': {}", value, e))
}

/// Up to 63 of `[A-Za-z0-9._-]`, alphanumeric at both ends
fn validate_label_segment(s: &str) -> Result<(), String> {
    if s.len() > LABEL_MAX {
        return Err(format!("exceeds {} characters", LABEL_MAX));
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err("only alphanumerics, '-', '_' and '.' are allowed".to_string());
    }

    let alnum = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !alnum(s.chars().next()) || !alnum(s.chars().last()) {
        return Err("must start and end with an alphanumeric character".to_string());
    }

    Ok(())
}
