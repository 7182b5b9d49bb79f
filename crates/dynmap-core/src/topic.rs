//! Topic utilities.
//!
//! Topics are `/`-separated level lists. `+` matches exactly one level and
//! `#` matches any number of trailing levels.

/// Level separator.
pub const TOPIC_SEPARATOR: char = '/';
/// Multi-level wildcard.
pub const TOPIC_WILDCARD_MULTI: &str = "#";
/// Single-level wildcard.
pub const TOPIC_WILDCARD_SINGLE: &str = "+";

/// Canonical form of a topic: trimmed, repeated separators collapsed,
/// leading and trailing separators stripped.
///
/// `"  //device///+/temp/ "` becomes `"device/+/temp"`.
pub fn normalize_topic(topic: &str) -> String {
    topic
        .trim()
        .split(TOPIC_SEPARATOR)
        .filter(|level| !level.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Split a topic into its levels, dropping leading and trailing separators.
///
/// `"/device/hamburg/temperature/"` gives `["device", "hamburg", "temperature"]`.
pub fn split_topic_excluding_separator(topic: &str) -> Vec<String> {
    let stripped = topic.trim().trim_matches(TOPIC_SEPARATOR);
    if stripped.is_empty() {
        return Vec::new();
    }
    stripped.split(TOPIC_SEPARATOR).map(str::to_string).collect()
}

/// Split a topic into levels and separators, keeping every separator as its
/// own token so the topic can be reassembled after levels are replaced.
///
/// `"/device/hamburg/"` gives `["/", "device", "/", "hamburg", "/"]`.
pub fn split_topic_including_separator(topic: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in topic.chars() {
        if c == TOPIC_SEPARATOR {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            tokens.push(TOPIC_SEPARATOR.to_string());
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Derive the pattern a sample topic is authored against: a trailing
/// multi-level wildcard becomes a single-level placeholder.
///
/// `"device/#"` gives `"device/+"`.
pub fn derive_sample_topic(topic: &str) -> String {
    let normalized = normalize_topic(topic);
    match normalized.strip_suffix(TOPIC_WILDCARD_MULTI) {
        Some(prefix) => format!("{}{}", prefix, TOPIC_WILDCARD_SINGLE),
        None => normalized,
    }
}

/// Whether the topic contains any wildcard.
pub fn is_wildcard_topic(topic: &str) -> bool {
    topic.contains(TOPIC_WILDCARD_MULTI) || topic.contains(TOPIC_WILDCARD_SINGLE)
}

/// Whether a concrete (or more specific) topic matches a wildcard pattern.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pattern_levels = split_topic_excluding_separator(pattern);
    let topic_levels = split_topic_excluding_separator(topic);

    for (i, level) in pattern_levels.iter().enumerate() {
        if level == TOPIC_WILDCARD_MULTI {
            // `#` needs at least one remaining level
            return topic_levels.len() > i;
        }
        match topic_levels.get(i) {
            Some(t) if level == TOPIC_WILDCARD_SINGLE || level == t => {}
            _ => return false,
        }
    }
    pattern_levels.len() == topic_levels.len()
}

/// Rebuild `topic` with its non-separator levels replaced, in order, by
/// `levels`. Surplus topic levels are kept; surplus replacement levels are
/// ignored.
///
/// `substitute_topic_levels("/evt/+/out", ["evt", "d1", "out"])` gives `"/evt/d1/out"`.
pub fn substitute_topic_levels(topic: &str, levels: &[String]) -> String {
    let mut tokens = split_topic_including_separator(topic);
    let mut replacements = levels.iter();
    for token in tokens.iter_mut() {
        if token.len() == 1 && token.starts_with(TOPIC_SEPARATOR) {
            continue;
        }
        match replacements.next() {
            Some(level) => *token = level.clone(),
            None => break,
        }
    }
    tokens.concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_topic() {
        assert_eq!(normalize_topic("  //device///+/temp/ "), "device/+/temp");
        assert_eq!(normalize_topic("device/#/"), "device/#");
        assert_eq!(normalize_topic("/"), "");
        assert_eq!(normalize_topic(""), "");
    }

    #[test]
    fn test_split_excluding_separator() {
        assert_eq!(
            split_topic_excluding_separator("/device/hamburg/temperature/"),
            vec!["device", "hamburg", "temperature"]
        );
        assert!(split_topic_excluding_separator("//").is_empty());
    }

    #[test]
    fn test_split_including_separator() {
        assert_eq!(
            split_topic_including_separator("/device/hamburg/"),
            vec!["/", "device", "/", "hamburg", "/"]
        );
        assert_eq!(
            split_topic_including_separator("a//b"),
            vec!["a", "/", "/", "b"]
        );
        assert_eq!(split_topic_including_separator("a/b").concat(), "a/b");
    }

    #[test]
    fn test_derive_sample_topic() {
        assert_eq!(derive_sample_topic("device/#"), "device/+");
        assert_eq!(derive_sample_topic("/device/#/"), "device/+");
        assert_eq!(derive_sample_topic("device/+/temp"), "device/+/temp");
    }

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("topic/", "topic/"));
        assert!(!topic_matches("topic/", "topic/value"));
        assert!(topic_matches("topic/#", "topic/value"));
        assert!(topic_matches("topic/+", "topic/value"));
        assert!(!topic_matches("topic/+", "topic/important/value"));
        assert!(topic_matches("topic/+/value", "topic/important/value"));
        assert!(topic_matches("device/#", "device/+/rom/"));
        assert!(!topic_matches("device/#", "device"));
    }

    #[test]
    fn test_substitute_topic_levels() {
        let levels = vec!["evt".to_string(), "d1".to_string(), "out".to_string()];
        assert_eq!(substitute_topic_levels("/evt/+/out", &levels), "/evt/d1/out");
        assert_eq!(
            substitute_topic_levels("evt/+/out/extra", &levels),
            "evt/d1/out/extra"
        );
    }

    #[test]
    fn test_is_wildcard_topic() {
        assert!(is_wildcard_topic("a/+"));
        assert!(is_wildcard_topic("a/#"));
        assert!(!is_wildcard_topic("a/b"));
    }
}
