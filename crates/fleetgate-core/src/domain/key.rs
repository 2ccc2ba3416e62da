//! Rate limit key identity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

const SEPARATOR: char = ':';

/// Identity of a rate-limited principal, as resolved by the authentication
/// layer (a vehicle VIN, a client id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    /// Validate a raw subject id. Empty ids and ids containing the key
    /// separator are rejected.
    pub fn parse(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(DomainError::InvalidSubject("subject id is empty".to_string()));
        }
        if trimmed.contains(SEPARATOR) {
            return Err(DomainError::InvalidSubject(format!(
                "subject id '{}' contains '{}'",
                trimmed, SEPARATOR
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite key of one sliding window: (subject, resource).
///
/// Rendered as `{subject}:{resource}`. Stores add their own namespace prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    subject: SubjectId,
    resource: String,
}

impl RateLimitKey {
    pub fn new(subject: SubjectId, resource: impl Into<String>) -> Result<Self, DomainError> {
        let resource = resource.into();
        if resource.trim().is_empty() {
            return Err(DomainError::InvalidResource("resource is empty".to_string()));
        }

        Ok(Self { subject, resource })
    }

    /// Parse a rendered key back into its parts.
    pub fn parse(raw: &str) -> Option<Self> {
        let (subject, resource) = raw.split_once(SEPARATOR)?;
        let subject = SubjectId::parse(subject).ok()?;
        Self::new(subject, resource).ok()
    }

    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Glob pattern matching every window of `subject`.
    pub fn subject_pattern(subject: &SubjectId) -> String {
        format!("{}{}*", escape_pattern(subject.as_str()), SEPARATOR)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.subject, SEPARATOR, self.resource)
    }
}

/// Escape glob metacharacters so `raw` only matches itself.
pub fn escape_pattern(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_renders_subject_and_resource() {
        let subject = SubjectId::parse("123456").unwrap();
        let key = RateLimitKey::new(subject, "/api/telemetry/capture").unwrap();
        assert_eq!(key.to_string(), "123456:/api/telemetry/capture");
    }

    #[test]
    fn test_key_parse_round_trips_template() {
        let key = RateLimitKey::parse("veh-9:/api/vehicles/{vin}/alerts").unwrap();
        assert_eq!(key.subject().as_str(), "veh-9");
        assert_eq!(key.resource(), "/api/vehicles/{vin}/alerts");
    }

    #[test]
    fn test_subject_rejects_separator_and_empty() {
        assert!(SubjectId::parse("").is_err());
        assert!(SubjectId::parse("   ").is_err());
        assert!(SubjectId::parse("a:b").is_err());
    }

    #[test]
    fn test_empty_resource_rejected() {
        let subject = SubjectId::parse("1").unwrap();
        assert!(matches!(
            RateLimitKey::new(subject, " "),
            Err(DomainError::InvalidResource(_))
        ));
    }

    #[test]
    fn test_subject_pattern_escapes_glob_chars() {
        let subject = SubjectId::parse("fleet*[1]").unwrap();
        assert_eq!(RateLimitKey::subject_pattern(&subject), r"fleet\*\[1\]:*");
    }
}
