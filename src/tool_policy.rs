use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Wildcard pattern matching (simple glob: `*` matches any char sequence)
// ---------------------------------------------------------------------------

/// Match a capability name against a pattern that may contain `*` wildcards.
/// Examples: `search_*` matches `search_hiring_trends`,
///           `*_memory` matches `load_memory`.
pub fn matches_wildcard(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let mut remaining = name;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !remaining.starts_with(part) {
                return false;
            }
            remaining = &remaining[part.len()..];
        } else if i == parts.len() - 1 {
            return remaining.ends_with(part);
        } else {
            match remaining.find(part) {
                Some(pos) => remaining = &remaining[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

/// Check if any pattern in the list matches the given capability name.
pub fn any_pattern_matches(patterns: &[&str], name: &str) -> bool {
    patterns.iter().any(|p| matches_wildcard(p, name))
}

// ---------------------------------------------------------------------------
// Filter capabilities by allow/deny with wildcard support
// ---------------------------------------------------------------------------

/// Retain only capabilities matching at least one allow pattern. If the allow
/// list is empty, everything passes. Deny patterns are applied after allow and
/// take precedence: a capability matching both is denied.
pub fn filter_capabilities(
    capabilities: BTreeSet<String>,
    allow_patterns: &[String],
    deny_patterns: &[String],
) -> BTreeSet<String> {
    let allow: Vec<&str> = allow_patterns
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    let deny: Vec<&str> = deny_patterns
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    capabilities
        .into_iter()
        .filter(|name| {
            let allowed = allow.is_empty() || any_pattern_matches(&allow, name);
            let denied = !deny.is_empty() && any_pattern_matches(&deny, name);
            if denied {
                tracing::debug!(capability = %name, "Capability denied by deny_tools policy");
            }
            allowed && !denied
        })
        .collect()
}
