//! Topic names.
//!
//! Topics partition which connections receive which events; in practice a
//! topic name is a match identifier like `match-123`.

/// Maximum topic name length.
pub const MAX_TOPIC_LENGTH: usize = 128;

/// A topic identifier.
pub type TopicId = String;

/// Validate a topic name.
///
/// # Errors
///
/// Returns an error message if the topic name is invalid.
pub fn validate_topic(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Topic name cannot be empty");
    }
    if name.len() > MAX_TOPIC_LENGTH {
        return Err("Topic name too long");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Topic name contains invalid characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_validation() {
        assert!(validate_topic("match-123").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("bad\ntopic").is_err());

        let long_name = "a".repeat(MAX_TOPIC_LENGTH + 1);
        assert!(validate_topic(&long_name).is_err());
    }
}
