use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::macros::{MacroError, MacroSpec};
use crate::result::Qualifier;

/// A policy record failed to parse (spec §4.4): any syntactic violation
/// is a single failure the driver maps to `permerror`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError(String);

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed SPF record: {}", self.0)
    }
}

impl std::error::Error for RecordError {}

impl From<MacroError> for RecordError {
    fn from(e: MacroError) -> Self {
        RecordError(e.to_string())
    }
}

fn syntax(msg: impl Into<String>) -> RecordError {
    RecordError(msg.into())
}

/// A macro-string that must expand to a domain name (spec §4.2/§4.3). A
/// `DomainSpec` is never empty — the parser rejects `:` with nothing
/// after it, since an absent domainspec is represented as `None` on the
/// owning mechanism, not as an empty one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSpec(MacroSpec);

impl DomainSpec {
    fn parse(text: &str) -> Result<Self, RecordError> {
        if text.is_empty() {
            return Err(syntax("empty domainspec"));
        }
        Ok(Self(MacroSpec::parse(text)?))
    }

    /// Expand this domainspec against `ctx`, validating the result as a
    /// domain name.
    pub async fn expand(
        &self,
        ctx: &crate::context::EvalContext,
        resolver: &dyn crate::resolver::DnsResolver,
    ) -> Result<String, MacroError> {
        self.0.expand(ctx, resolver).await
    }
}

/// One mechanism, with its payload already tokenized (spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mechanism {
    /// `all` — matches unconditionally.
    All,
    /// `include:domainspec`.
    Include(DomainSpec),
    /// `a[:domainspec][/cidr4[//cidr6]]`.
    A {
        /// `None` means "use the evaluated domain".
        domain: Option<DomainSpec>,
        /// IPv4 prefix length, defaulting to 32.
        cidr4: u8,
        /// IPv6 prefix length, defaulting to 128.
        cidr6: u8,
    },
    /// `mx[:domainspec][/cidr4[//cidr6]]`.
    Mx {
        /// `None` means "use the evaluated domain".
        domain: Option<DomainSpec>,
        /// IPv4 prefix length, defaulting to 32.
        cidr4: u8,
        /// IPv6 prefix length, defaulting to 128.
        cidr6: u8,
    },
    /// `ptr[:domainspec]`.
    Ptr(Option<DomainSpec>),
    /// `ip4:a.b.c.d[/cidr]`.
    Ip4 {
        /// The literal network address.
        addr: Ipv4Addr,
        /// Prefix length, defaulting to 32.
        cidr: u8,
    },
    /// `ip6:addr[/cidr]`.
    Ip6 {
        /// The literal network address.
        addr: Ipv6Addr,
        /// Prefix length, defaulting to 128.
        cidr: u8,
    },
    /// `exists:domainspec`.
    Exists(DomainSpec),
}

/// A rule-list entry: either a mechanism (which carries a qualifier) or
/// a modifier (spec §3's tagged `Rule` record, specialized by direction
/// of use — modifiers never carry a meaningful qualifier, so `Directive`
/// keeps them out of the qualified-mechanism arm entirely).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// A mechanism, matched under `qualifier`.
    Mechanism(Qualifier, Mechanism),
    /// `redirect=domainspec` — evaluated only if no earlier mechanism
    /// matched and `current` has run off the end of the rule list.
    Redirect(DomainSpec),
    /// `exp=domainspec` — parsed and retained, never executed (non-goal).
    Exp(DomainSpec),
    /// Any other `name=value` modifier — parsed and retained, never
    /// executed.
    Unknown {
        /// The modifier's name, lowercased.
        name: String,
        /// The modifier's raw value, unparsed.
        value: String,
    },
}

/// A fully parsed `v=spf1` record: an ordered rule list plus the index
/// of the (at most one) `redirect=` modifier, matching the "compiled
/// rules" data model of spec §3.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedRecord {
    /// Rules in source order, mechanisms and modifiers interleaved.
    pub rules: Vec<Directive>,
    /// Index into `rules` of the `redirect=` modifier, if any.
    pub redirect_index: Option<usize>,
}

/// Parse a `v=spf1` policy string into an ordered rule list (spec §4.4).
pub fn parse_record(text: &str) -> Result<ParsedRecord, RecordError> {
    let mut rules = Vec::new();
    let redirect_index = parse_record_into(text, &mut rules)?;
    Ok(ParsedRecord { rules, redirect_index })
}

/// Parse a `v=spf1` policy string into a caller-supplied buffer, clearing
/// it first. Returns the index of the `redirect=` modifier, if any.
/// Reusing a buffer pulled from a [`crate::pool::RulePool`] avoids a
/// fresh allocation per evaluation (spec §4.7).
pub fn parse_record_into(
    text: &str,
    rules: &mut Vec<Directive>,
) -> Result<Option<usize>, RecordError> {
    rules.clear();

    if text.len() < 6 || !text[..6].eq_ignore_ascii_case("v=spf1") {
        return Err(syntax("record does not begin with v=spf1"));
    }
    let rest = &text[6..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return Err(syntax("v=spf1 must be followed by end-of-string or space"));
    }

    let mut redirect_index = None;
    let mut exp_seen = false;

    for term in rest.split_ascii_whitespace() {
        let directive = parse_term(term)?;
        match &directive {
            Directive::Redirect(_) => {
                if redirect_index.is_some() {
                    return Err(syntax("more than one redirect= modifier"));
                }
                redirect_index = Some(rules.len());
            }
            Directive::Exp(_) => {
                if exp_seen {
                    return Err(syntax("more than one exp= modifier"));
                }
                exp_seen = true;
            }
            _ => {}
        }
        rules.push(directive);
    }

    Ok(redirect_index)
}

fn parse_term(term: &str) -> Result<Directive, RecordError> {
    let mut chars = term.chars();
    let mut rest = term;
    let qualifier = match term.chars().next() {
        Some(c @ ('+' | '-' | '~' | '?')) => {
            chars.next();
            rest = &term[c.len_utf8()..];
            Qualifier::from_char(c).expect("matched qualifier char")
        }
        _ => Qualifier::default(),
    };

    let name_end = rest
        .find(|c: char| matches!(c, ':' | '/' | '='))
        .unwrap_or(rest.len());
    let name = &rest[..name_end];
    if name.is_empty() {
        return Err(syntax(format!("empty mechanism/modifier name in \"{term}\"")));
    }
    let payload = &rest[name_end..];
    let lower = name.to_ascii_lowercase();

    let mechanism = match lower.as_str() {
        "all" => {
            if !payload.is_empty() {
                return Err(syntax("\"all\" takes no payload"));
            }
            Some(Mechanism::All)
        }
        "include" => Some(Mechanism::Include(parse_required_domainspec(payload)?)),
        "exists" => Some(Mechanism::Exists(parse_required_domainspec(payload)?)),
        "a" => {
            let (domain, cidr4, cidr6) = parse_a_or_mx_payload(payload)?;
            Some(Mechanism::A { domain, cidr4, cidr6 })
        }
        "mx" => {
            let (domain, cidr4, cidr6) = parse_a_or_mx_payload(payload)?;
            Some(Mechanism::Mx { domain, cidr4, cidr6 })
        }
        "ptr" => Some(Mechanism::Ptr(parse_optional_domainspec(payload)?)),
        "ip4" => {
            let (addr, cidr) = parse_ip4_payload(payload)?;
            Some(Mechanism::Ip4 { addr, cidr })
        }
        "ip6" => {
            let (addr, cidr) = parse_ip6_payload(payload)?;
            Some(Mechanism::Ip6 { addr, cidr })
        }
        _ => None,
    };

    if let Some(mechanism) = mechanism {
        return Ok(Directive::Mechanism(qualifier, mechanism));
    }

    // Not a known mechanism keyword: must be a modifier, `name=value`.
    let value = payload
        .strip_prefix('=')
        .ok_or_else(|| syntax(format!("unknown mechanism \"{name}\" in \"{term}\"")))?;

    match lower.as_str() {
        "redirect" => Ok(Directive::Redirect(DomainSpec::parse(value)?)),
        "exp" => Ok(Directive::Exp(DomainSpec::parse(value)?)),
        _ => Ok(Directive::Unknown {
            name: lower,
            value: value.to_string(),
        }),
    }
}

fn parse_required_domainspec(payload: &str) -> Result<DomainSpec, RecordError> {
    let value = payload
        .strip_prefix(':')
        .ok_or_else(|| syntax("expected ':' domainspec"))?;
    DomainSpec::parse(value)
}

fn parse_optional_domainspec(payload: &str) -> Result<Option<DomainSpec>, RecordError> {
    if payload.is_empty() {
        return Ok(None);
    }
    Ok(Some(parse_required_domainspec(payload)?))
}

fn parse_a_or_mx_payload(payload: &str) -> Result<(Option<DomainSpec>, u8, u8), RecordError> {
    let (has_colon, body) = match payload.strip_prefix(':') {
        Some(rest) => (true, rest),
        None => (false, payload),
    };

    let (domain_part, cidr4, cidr6) = parse_trailing_cidr(body, 32, 128)?;

    if !has_colon && !domain_part.is_empty() {
        return Err(syntax(format!(
            "unexpected text before CIDR suffix in \"{payload}\""
        )));
    }

    let domain = if has_colon {
        Some(DomainSpec::parse(domain_part)?)
    } else {
        None
    };

    Ok((domain, cidr4, cidr6))
}

fn parse_ip4_payload(payload: &str) -> Result<(Ipv4Addr, u8), RecordError> {
    let stripped = payload
        .strip_prefix(':')
        .ok_or_else(|| syntax("ip4 requires ':' literal address"))?;
    let (addr_part, cidr_part) = match stripped.find('/') {
        Some(pos) => (&stripped[..pos], &stripped[pos + 1..]),
        None => (stripped, ""),
    };
    let addr: Ipv4Addr = addr_part
        .parse()
        .map_err(|_| syntax(format!("invalid IPv4 literal \"{addr_part}\"")))?;
    let cidr = if cidr_part.is_empty() {
        32
    } else {
        parse_cidr_number(cidr_part, 32)?
    };
    Ok((addr, cidr))
}

fn parse_ip6_payload(payload: &str) -> Result<(Ipv6Addr, u8), RecordError> {
    let stripped = payload
        .strip_prefix(':')
        .ok_or_else(|| syntax("ip6 requires ':' literal address"))?;
    let (addr_part, cidr_part) = match stripped.find('/') {
        Some(pos) => (&stripped[..pos], &stripped[pos + 1..]),
        None => (stripped, ""),
    };
    let addr: Ipv6Addr = addr_part
        .parse()
        .map_err(|_| syntax(format!("invalid IPv6 literal \"{addr_part}\"")))?;
    let cidr = if cidr_part.is_empty() {
        128
    } else {
        parse_cidr_number(cidr_part, 128)?
    };
    Ok((addr, cidr))
}

/// Split `body` into its domainspec prefix and a trailing `/cidr4[//cidr6]`
/// suffix, scanning from the right end (spec §4.4). RFC 4408 §8.1 lists `/`
/// as a legal macro-string delimiter character, so a domainspec can itself
/// contain one (e.g. `%{ir/}._spf.%{d}`) — finding the first `/` in the
/// combined text would split at the wrong place. Instead this reads the
/// final digit run, requires the byte right before it to be `/`, and checks
/// one byte further back for a second `/` introducing a `cidr6` suffix.
/// Returns the defaults with an empty suffix when no trailing `/digits`
/// pattern is present at all.
fn parse_trailing_cidr(
    body: &str,
    default4: u8,
    default6: u8,
) -> Result<(&str, u8, u8), RecordError> {
    let d1 = trailing_digit_run_start(body);
    if d1 == body.len() || d1 == 0 || body.as_bytes()[d1 - 1] != b'/' {
        return Ok((body, default4, default6));
    }
    let p1 = d1 - 1;

    if p1 > 0 && body.as_bytes()[p1 - 1] == b'/' {
        let p2 = p1 - 1;
        let d2 = trailing_digit_run_start(&body[..p2]);
        if d2 != p2 && d2 > 0 && body.as_bytes()[d2 - 1] == b'/' {
            // "<domain>/cidr4//cidr6"
            let cidr4 = parse_cidr_number(&body[d2..p2], 32)?;
            let cidr6 = parse_cidr_number(&body[d1..], 128)?;
            Ok((&body[..d2 - 1], cidr4, cidr6))
        } else {
            // "<domain>//cidr6", no cidr4
            let cidr6 = parse_cidr_number(&body[d1..], 128)?;
            Ok((&body[..p2], default4, cidr6))
        }
    } else {
        // "<domain>/cidr4", no cidr6
        let cidr4 = parse_cidr_number(&body[d1..], 32)?;
        Ok((&body[..p1], cidr4, default6))
    }
}

/// Byte offset where the trailing run of ASCII-digit bytes begins (`s.len()`
/// if `s` doesn't end in a digit).
fn trailing_digit_run_start(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = bytes.len();
    while i > 0 && bytes[i - 1].is_ascii_digit() {
        i -= 1;
    }
    i
}

/// Parse a decimal CIDR prefix length: no sign, no leading zero on a
/// multi-digit value, within `[0, max]` (spec §4.4).
fn parse_cidr_number(text: &str, max: u8) -> Result<u8, RecordError> {
    if text.is_empty() {
        return Err(syntax("empty CIDR prefix"));
    }
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(syntax(format!("non-numeric CIDR prefix \"{text}\"")));
    }
    if text.len() > 1 && text.starts_with('0') {
        return Err(syntax(format!("leading zero in CIDR prefix \"{text}\"")));
    }
    let value: u32 = text
        .parse()
        .map_err(|_| syntax(format!("invalid CIDR prefix \"{text}\"")))?;
    if value > max as u32 {
        return Err(syntax(format!("CIDR prefix {value} exceeds {max}")));
    }
    Ok(value as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_ip4_and_all() {
        let record = parse_record("v=spf1 ip4:1.2.3.0/24 -all").unwrap();
        assert_eq!(record.rules.len(), 2);
        assert_eq!(
            record.rules[0],
            Directive::Mechanism(
                Qualifier::Pass,
                Mechanism::Ip4 {
                    addr: "1.2.3.0".parse().unwrap(),
                    cidr: 24,
                }
            )
        );
        assert_eq!(
            record.rules[1],
            Directive::Mechanism(Qualifier::Fail, Mechanism::All)
        );
    }

    #[test]
    fn rejects_missing_version_tag() {
        assert!(parse_record("ip4:1.2.3.4 -all").is_err());
    }

    #[test]
    fn a_mechanism_defaults_to_evaluated_domain() {
        let record = parse_record("v=spf1 a -all").unwrap();
        assert_eq!(
            record.rules[0],
            Directive::Mechanism(
                Qualifier::Pass,
                Mechanism::A {
                    domain: None,
                    cidr4: 32,
                    cidr6: 128,
                }
            )
        );
    }

    #[test]
    fn mx_with_dual_cidr() {
        let record = parse_record("v=spf1 mx/24//64 -all").unwrap();
        assert_eq!(
            record.rules[0],
            Directive::Mechanism(
                Qualifier::Pass,
                Mechanism::Mx {
                    domain: None,
                    cidr4: 24,
                    cidr6: 64,
                }
            )
        );
    }

    #[test]
    fn redirect_recorded_and_at_most_one() {
        let record = parse_record("v=spf1 redirect=_spf.example.com").unwrap();
        assert_eq!(record.redirect_index, Some(0));

        let err = parse_record("v=spf1 redirect=a.example redirect=b.example");
        assert!(err.is_err());
    }

    #[test]
    fn exp_allowed_once() {
        assert!(parse_record("v=spf1 exp=explain.example -all").is_ok());
        assert!(parse_record("v=spf1 exp=a.example exp=b.example -all").is_err());
    }

    #[test]
    fn unknown_modifier_is_retained() {
        let record = parse_record("v=spf1 x-custom=somevalue -all").unwrap();
        assert_eq!(
            record.rules[0],
            Directive::Unknown {
                name: "x-custom".to_string(),
                value: "somevalue".to_string(),
            }
        );
    }

    #[test]
    fn rejects_leading_zero_cidr() {
        assert!(parse_record("v=spf1 ip4:1.2.3.4/024 -all").is_err());
    }

    #[test]
    fn cidr_zero_is_accepted() {
        let record = parse_record("v=spf1 ip4:0.0.0.0/0 -all").unwrap();
        assert_eq!(
            record.rules[0],
            Directive::Mechanism(
                Qualifier::Pass,
                Mechanism::Ip4 {
                    addr: "0.0.0.0".parse().unwrap(),
                    cidr: 0,
                }
            )
        );
    }

    #[test]
    fn include_requires_domainspec() {
        assert!(parse_record("v=spf1 include -all").is_err());
        assert!(parse_record("v=spf1 include: -all").is_err());
    }

    #[test]
    fn a_domainspec_containing_delimiter_slash_is_not_mistaken_for_cidr() {
        // `%{ir/}` uses '/' as a macro delimiter (RFC 4408 §8.1); the CIDR
        // suffix must be found by scanning from the right, not by the first
        // '/' in the term, or this domainspec gets truncated mid-macro.
        let record = parse_record("v=spf1 a:%{ir/}._spf.%{d}/24 -all").unwrap();
        assert_eq!(
            record.rules[0],
            Directive::Mechanism(
                Qualifier::Pass,
                Mechanism::A {
                    domain: Some(DomainSpec::parse("%{ir/}._spf.%{d}").unwrap()),
                    cidr4: 24,
                    cidr6: 128,
                }
            )
        );
    }

    #[test]
    fn mx_domainspec_with_embedded_slash_and_dual_cidr() {
        let record = parse_record("v=spf1 mx:%{ir/}.example.com/24//64 -all").unwrap();
        assert_eq!(
            record.rules[0],
            Directive::Mechanism(
                Qualifier::Pass,
                Mechanism::Mx {
                    domain: Some(DomainSpec::parse("%{ir/}.example.com").unwrap()),
                    cidr4: 24,
                    cidr6: 64,
                }
            )
        );
    }
}
