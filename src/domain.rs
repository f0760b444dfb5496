use std::fmt;

/// # Domain Error
///
/// Returned when a domain name fails the validation rules of RFC 4408:
/// non-empty, two or more labels, each 1-63 characters of
/// `[A-Za-z0-9_-]`, no empty non-terminal label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainError {
    domain: String,
    reason: &'static str,
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid domain name \"{}\": {}", self.domain, self.reason)
    }
}

impl std::error::Error for DomainError {}

/// Validate a domain name per spec §4.2. Trailing dot is tolerated and
/// stripped before label counting.
pub fn validate_domain(domain: &str) -> Result<(), DomainError> {
    let err = |reason: &'static str| {
        Err(DomainError {
            domain: domain.to_string(),
            reason,
        })
    };

    if domain.is_empty() {
        return err("empty domain");
    }

    let trimmed = domain.strip_suffix('.').unwrap_or(domain);
    if trimmed.is_empty() {
        return err("empty domain");
    }

    let mut label_count = 0usize;
    for label in trimmed.split('.') {
        if label.is_empty() {
            return err("contains a non-terminal zero-length label");
        }
        if label.len() > 63 {
            return err("contains a too long label");
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return err("contains an illegal character");
        }
        label_count += 1;
    }

    if label_count < 2 {
        return err("must have at least two labels");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_domain() {
        assert!(validate_domain("example.com").is_ok());
    }

    #[test]
    fn accepts_trailing_dot() {
        assert!(validate_domain("example.com.").is_ok());
    }

    #[test]
    fn rejects_single_label() {
        assert!(validate_domain("localhost").is_err());
    }

    #[test]
    fn rejects_empty_label() {
        assert!(validate_domain("example..com").is_err());
    }

    #[test]
    fn rejects_illegal_character() {
        assert!(validate_domain("exa mple.com").is_err());
    }

    #[test]
    fn label_length_boundary() {
        let ok_label = "a".repeat(63);
        let too_long = "a".repeat(64);
        assert!(validate_domain(&format!("{ok_label}.com")).is_ok());
        assert!(validate_domain(&format!("{too_long}.com")).is_err());
    }
}
