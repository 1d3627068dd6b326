//! Topic name and filter validation
//!
//! Rules follow MQTT topic semantics, which the bridge relies on for routing:
//! - `/` separates levels
//! - `+` matches exactly one level and must occupy the whole level
//! - `#` matches zero or more trailing levels and must be the last level
//! - topics starting with `$` never match filters starting with a wildcard

/// Maximum encoded length of a topic or filter
const MAX_TOPIC_LEN: usize = 65535;

/// Validate a concrete topic name (used for publishing)
pub fn validate_topic_name(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic name cannot be empty");
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err("topic name exceeds maximum length");
    }
    if topic.contains('\0') {
        return Err("topic name cannot contain null character");
    }
    if topic.contains(['+', '#']) {
        return Err("topic name cannot contain wildcards");
    }
    Ok(())
}

/// Validate a subscription filter
pub fn validate_topic_filter(filter: &str) -> Result<(), &'static str> {
    if filter.is_empty() {
        return Err("topic filter cannot be empty");
    }
    if filter.len() > MAX_TOPIC_LEN {
        return Err("topic filter exceeds maximum length");
    }
    if filter.contains('\0') {
        return Err("topic filter cannot contain null character");
    }

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        if level.contains('#') && (level != "#" || levels.peek().is_some()) {
            return Err("multi-level wildcard must be the entire last level");
        }
        if level.contains('+') && level != "+" {
            return Err("single-level wildcard must occupy entire level");
        }
    }
    Ok(())
}

/// Validate a single topic level used as an identifier (root, bridge id,
/// device id). It must be non-empty and contain no separators or wildcards.
pub fn validate_topic_level(level: &str) -> Result<(), &'static str> {
    if level.is_empty() {
        return Err("topic level cannot be empty");
    }
    if level.contains(['/', '+', '#', '\0']) {
        return Err("topic level cannot contain '/', wildcards or null characters");
    }
    Ok(())
}

/// Check whether a topic filter matches a topic name
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    for filter_level in filter.split('/') {
        if filter_level == "#" {
            return true;
        }
        match topic_levels.next() {
            Some(_) if filter_level == "+" => {}
            Some(level) if level == filter_level => {}
            _ => return false,
        }
    }

    topic_levels.next().is_none()
}
