//! MQTT topic filter validation and matching
//!
//! Implements the MQTT 3.1.1 wildcard rules (section 4.7) used to check that a
//! delivered message belongs to the bridge's subscription.

use thiserror::Error;

/// Validate a subscription topic filter
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }
    if filter.contains('\0') {
        return Err(TopicError::NullCharacter);
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(TopicError::MisplacedMultiLevelWildcard(filter.to_string()));
        }
        if level.contains('+') && *level != "+" {
            return Err(TopicError::MisplacedSingleLevelWildcard(filter.to_string()));
        }
    }

    Ok(())
}

/// Check whether a concrete topic name matches a (valid) topic filter
pub fn topic_matches_filter(filter: &str, topic: &str) -> bool {
    // Wildcards at the first level never match system topics
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Topic filter errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic filter cannot be empty")]
    Empty,
    #[error("Topic filter cannot contain a null character")]
    NullCharacter,
    #[error("'#' must occupy the whole last level: {0}")]
    MisplacedMultiLevelWildcard(String),
    #[error("'+' must occupy a whole level: {0}")]
    MisplacedSingleLevelWildcard(String),
}
