use std::fmt;

use serde::{Deserialize, Serialize};

/// # Verdict
///
/// The outcome of an SPF evaluation (RFC 4408 §2.6). Exactly one verdict
/// is produced per root `check_host()` call, unless the call is canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// No SPF records were published, or the input domain could not be
    /// resolved into a check at all.
    None,
    /// The domain owner has explicitly chosen not to assert anything
    /// about the client IP.
    Neutral,
    /// The client is authorized to use the domain in the given identity.
    Pass,
    /// The client is explicitly not authorized to use the domain.
    Fail,
    /// A weaker statement that the client is probably not authorized.
    SoftFail,
    /// A transient (usually DNS) error prevented evaluation; a retry may
    /// succeed without operator intervention.
    TempError,
    /// The published record could not be interpreted; retrying will not
    /// help until the domain operator fixes it.
    PermError,
}

impl Verdict {
    /// The lowercase RFC 4408 token for this verdict, as it would appear
    /// in a `Received-SPF:` header (construction of that header is left
    /// to the caller).
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::None => "none",
            Verdict::Neutral => "neutral",
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::SoftFail => "softfail",
            Verdict::TempError => "temperror",
            Verdict::PermError => "permerror",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// # Qualifier
///
/// The leading `+`/`-`/`~`/`?` of a mechanism, defaulting to `+` (pass)
/// when omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Qualifier {
    /// `+`, the default.
    Pass,
    /// `-`
    Fail,
    /// `~`
    SoftFail,
    /// `?`
    Neutral,
}

impl Qualifier {
    /// Parse a qualifier character, defaulting to `Pass` for anything
    /// that is not one of `+-~?`.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Qualifier::Pass),
            '-' => Some(Qualifier::Fail),
            '~' => Some(Qualifier::SoftFail),
            '?' => Some(Qualifier::Neutral),
            _ => None,
        }
    }

    /// The verdict a matching mechanism with this qualifier emits.
    pub fn as_verdict(self) -> Verdict {
        match self {
            Qualifier::Pass => Verdict::Pass,
            Qualifier::Fail => Verdict::Fail,
            Qualifier::SoftFail => Verdict::SoftFail,
            Qualifier::Neutral => Verdict::Neutral,
        }
    }
}

impl Default for Qualifier {
    fn default() -> Self {
        Qualifier::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_tokens_match_rfc() {
        assert_eq!(Verdict::Pass.as_str(), "pass");
        assert_eq!(Verdict::SoftFail.as_str(), "softfail");
        assert_eq!(Verdict::TempError.to_string(), "temperror");
    }

    #[test]
    fn qualifier_defaults_to_pass() {
        assert_eq!(Qualifier::default(), Qualifier::Pass);
        assert_eq!(Qualifier::from_char('x'), None);
        assert_eq!(Qualifier::from_char('-').unwrap().as_verdict(), Verdict::Fail);
    }
}
