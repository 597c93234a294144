//! Resource hierarchy resolution.
//!
//! Resource names alternate collection and id segments
//! (`projects/p1/datasets/d1`). A policy set on a resource applies to every
//! descendant, and a policy on the root literal applies to everything.

use crate::validation::FormatError;

/// Reserved name of the hierarchy root
pub const ROOT_RESOURCE: &str = "/";

/// Segment matching any id; never stored or queried as a concrete resource
pub const WILDCARD_SEGMENT: &str = "-";

/// Whether any segment of `name` is the wildcard
pub fn contains_wildcard(name: &str) -> bool {
    name.split('/').any(|segment| segment == WILDCARD_SEGMENT)
}

/// Resources whose policies apply to `resource`: the root, every
/// collection/id ancestor from the top down, then the resource itself.
/// Candidates containing a wildcard segment are left out.
pub fn ancestors_of(resource: &str) -> Vec<String> {
    let mut ancestors = vec![ROOT_RESOURCE.to_string()];
    if resource == ROOT_RESOURCE {
        return ancestors;
    }

    let segment_count = resource.split('/').count();
    let mut prefix = String::with_capacity(resource.len());
    for (consumed, segment) in (1..).zip(resource.split('/')) {
        if consumed > 1 {
            prefix.push('/');
        }
        prefix.push_str(segment);
        if consumed % 2 == 0 && consumed < segment_count && !contains_wildcard(&prefix) {
            ancestors.push(prefix.clone());
        }
    }

    if !contains_wildcard(resource) {
        ancestors.push(resource.to_string());
    }
    ancestors
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~' | '@' | ':' | '+' | '%')
}

/// Check `name` against the relative resource-name grammar.
///
/// The root literal is not a relative name and is handled by callers.
pub fn validate_resource_name(name: &str) -> Result<(), FormatError> {
    if name.is_empty() {
        return Err(FormatError::new("resource name is empty"));
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err(FormatError::new("resource name must not start or end with '/'"));
    }
    for segment in name.split('/') {
        if segment.is_empty() {
            return Err(FormatError::new("resource name contains an empty segment"));
        }
        if !segment.chars().all(is_segment_char) {
            return Err(FormatError::new(format!(
                "segment '{}' contains invalid characters",
                segment
            )));
        }
    }
    Ok(())
}
