//! Response filtering.
//!
//! Filters are literal substring replacements applied in declaration order.
//! A single pass is not always idempotent: a replacement can join with its
//! neighbours to form a pattern again (`"ab" -> "a"` turns `"abb"` into
//! `"ab"`). The filter chain is therefore re-applied until the text stops
//! changing, bounded by `MAX_FILTER_PASSES`.
//!
//! Validation rejects the filter sets that could keep rewriting forever:
//! empty patterns, and replacements that contain any pattern in the set.

use relay_contracts::{
    config::ResponseFilter,
    error::{RelayError, RelayResult},
};

/// Upper bound on full passes over the filter chain.
pub const MAX_FILTER_PASSES: usize = 8;

/// Check that `candidate` can be appended to `existing`.
pub fn validate_filter(existing: &[ResponseFilter], candidate: &ResponseFilter) -> RelayResult<()> {
    if candidate.pattern.is_empty() {
        return Err(RelayError::ConfigError {
            reason: "response filter pattern must not be empty".to_string(),
        });
    }

    if candidate.replacement.contains(&candidate.pattern) {
        return Err(RelayError::ConfigError {
            reason: format!(
                "response filter replacement '{}' contains its own pattern '{}'",
                candidate.replacement, candidate.pattern
            ),
        });
    }

    for filter in existing {
        if candidate.replacement.contains(&filter.pattern) {
            return Err(RelayError::ConfigError {
                reason: format!(
                    "response filter replacement '{}' contains existing pattern '{}'",
                    candidate.replacement, filter.pattern
                ),
            });
        }
        if filter.replacement.contains(&candidate.pattern) {
            return Err(RelayError::ConfigError {
                reason: format!(
                    "response filter pattern '{}' occurs in existing replacement '{}'",
                    candidate.pattern, filter.replacement
                ),
            });
        }
    }

    Ok(())
}

/// Validate a complete filter list, as loaded from configuration.
pub fn validate_filters(filters: &[ResponseFilter]) -> RelayResult<()> {
    for (i, filter) in filters.iter().enumerate() {
        validate_filter(&filters[..i], filter)?;
    }
    Ok(())
}

/// Apply `filters` to `text` until it reaches a fixed point.
pub fn apply_filters(filters: &[ResponseFilter], text: &str) -> String {
    let mut current = text.to_string();
    if filters.is_empty() {
        return current;
    }

    for _ in 0..MAX_FILTER_PASSES {
        let next = apply_once(filters, &current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn apply_once(filters: &[ResponseFilter], text: &str) -> String {
    filters.iter().fold(text.to_string(), |acc, filter| {
        if acc.contains(&filter.pattern) {
            acc.replace(&filter.pattern, &filter.replacement)
        } else {
            acc
        }
    })
}
