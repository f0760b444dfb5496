use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::future::join_all;
use log::{debug, info, warn};

use crate::context::{Cancellation, EvalContext, MAX_DNS_MECHANISMS, MAX_RECURSION_DEPTH, MAX_RR_FANOUT};
use crate::domain::validate_domain;
use crate::error::SpfError;
use crate::ip::ClientIp;
use crate::macros::MacroError;
use crate::ptr;
use crate::record::{self, Directive, Mechanism};
use crate::resolver::{DnsError, DnsResolver};
use crate::result::{Qualifier, Verdict};

pub use crate::pool::RulePool;

/// A handle returned by [`SpfEngine::check_host`] letting a caller cancel
/// an in-flight evaluation (spec §2 component 8, §3 "completion: canceled
/// flag", §4.8: "cancel(handle) marks canceled..."). Cloning the flag into
/// every `include`/`redirect` child context means one `cancel()` call
/// stops the whole tree at its next rule-loop boundary, not just the root.
/// Canceling after the check has already completed has no effect.
#[derive(Clone)]
pub struct CancelHandle(Cancellation);

impl CancelHandle {
    /// Mark the associated `check_host()` call canceled.
    pub fn cancel(&self) {
        self.0.cancel();
    }
}

/// Knobs an embedding application can tighten on a [`SpfEngine`]; the
/// defaults are the RFC 4408 values. Grounded on the teacher's
/// `SMTPServer` builder-style configuration rather than a global
/// constant table.
#[derive(Debug, Clone, Copy)]
pub struct SpfLimits {
    /// Maximum DNS-consuming mechanisms across a root context and its
    /// descendants before `permerror`.
    pub max_dns_mechanisms: u8,
    /// Maximum `include:`/`redirect=` recursion depth before `permerror`.
    pub max_recursion_depth: u8,
    /// Whether to also query the legacy type-99 `SPF` RR alongside `TXT`.
    pub query_spf_type: bool,
}

impl Default for SpfLimits {
    fn default() -> Self {
        Self {
            max_dns_mechanisms: MAX_DNS_MECHANISMS,
            max_recursion_depth: MAX_RECURSION_DEPTH,
            query_spf_type: true,
        }
    }
}

/// `true` iff `text` begins with the `v=spf1` version tag (case-
/// insensitive) followed by end-of-string or a space — the record
/// retriever's qualification rule (spec §4.5).
fn is_policy_record(text: &str) -> bool {
    text.len() >= 6
        && text[..6].eq_ignore_ascii_case("v=spf1")
        && (text.len() == 6 || text.as_bytes()[6] == b' ')
}

/// Outcome of fetching and selecting a domain's policy record: either a
/// single candidate text ready to parse, or a terminal verdict the
/// retriever itself determined (spec §4.5 items 3-5).
enum Fetched {
    Record(String),
    Terminal(Verdict),
}

/// Fetch TXT (and, unless disabled, type-99 SPF) records for `domain`
/// concurrently and select the unique `v=spf1` candidate (spec §4.5).
/// `txt`/`spf` are queried together rather than staged, which makes the
/// original's "too-many, tentatively, until the slower reply arrives"
/// bookkeeping structurally unreachable — see SPEC_FULL.md §C.3.
async fn fetch_policy(domain: &str, resolver: &dyn DnsResolver, query_spf_type: bool) -> Fetched {
    let (txt_res, spf_res) = if query_spf_type {
        tokio::join!(resolver.lookup_txt(domain), resolver.lookup_spf(domain))
    } else {
        (resolver.lookup_txt(domain).await, Err(DnsError::NotFound(domain.to_string())))
    };

    let txt_in_error = matches!(txt_res, Err(DnsError::Failure(_)));
    let spf_in_error = query_spf_type && matches!(spf_res, Err(DnsError::Failure(_)));

    let txt_qualifying: Vec<String> = txt_res
        .unwrap_or_default()
        .into_iter()
        .filter(|r| is_policy_record(r))
        .collect();
    let spf_qualifying: Vec<String> = spf_res
        .unwrap_or_default()
        .into_iter()
        .filter(|r| is_policy_record(r))
        .collect();

    // SPF-type answers take precedence over TXT when both are queried
    // and the SPF set has at least one qualifying record (spec §4.5.3).
    let candidates = if !spf_qualifying.is_empty() {
        spf_qualifying
    } else {
        txt_qualifying
    };

    if candidates.len() > 1 {
        warn!("domain {domain} published more than one v=spf1 record");
        return Fetched::Terminal(Verdict::PermError);
    }
    if let Some(record) = candidates.into_iter().next() {
        return Fetched::Record(record);
    }

    if txt_in_error || spf_in_error {
        info!("DNS failure fetching policy record for {domain}");
        Fetched::Terminal(Verdict::TempError)
    } else {
        debug!("no SPF policy record published for {domain}");
        Fetched::Terminal(Verdict::None)
    }
}

/// Resolve `name`'s `A`/`AAAA` records (matching the context's address
/// family) and check each against `cidr4`/`cidr6`. Returns
/// `(matched, dns_error_occurred)`.
async fn resolve_and_match(
    ctx: &EvalContext,
    resolver: &dyn DnsResolver,
    name: &str,
    cidr4: u8,
    cidr6: u8,
) -> (bool, bool) {
    if ctx.client_ip.is_v6() {
        match resolver.lookup_aaaa(name).await {
            Ok(addrs) => (addrs.iter().any(|a| ctx.client_ip.matches_v6(*a, cidr6)), false),
            Err(DnsError::NotFound(_)) => (false, false),
            Err(DnsError::Failure(_)) => (false, true),
        }
    } else {
        match resolver.lookup_a(name).await {
            Ok(addrs) => (addrs.iter().any(|a| ctx.client_ip.matches_v4(*a, cidr4)), false),
            Err(DnsError::NotFound(_)) => (false, false),
            Err(DnsError::Failure(_)) => (false, true),
        }
    }
}

/// Expand an optional domainspec, defaulting to the context's evaluated
/// domain when absent (spec §4.3's "empty macro-string" rule, applied
/// to mechanisms that allow an omitted payload).
async fn expand_or_domain(
    domain: &Option<record::DomainSpec>,
    ctx: &EvalContext,
    resolver: &dyn DnsResolver,
) -> Result<String, MacroError> {
    match domain {
        Some(spec) => spec.expand(ctx, resolver).await,
        None => Ok(ctx.domain.clone()),
    }
}

/// Map a macro-expansion failure to its terminal verdict (spec §7).
/// `%{p}` hitting a genuine DNS transport failure is a `temperror`, same
/// as any other DNS transport failure; every other `MacroError` is a
/// malformed macro-string, a `permerror` (spec §4.3, §4.8).
fn macro_error_to_verdict(err: MacroError) -> Verdict {
    match err {
        MacroError::PtrDnsFailure => Verdict::TempError,
        MacroError::Syntax(_) | MacroError::InvalidDomain(_) => Verdict::PermError,
    }
}

/// Result of dispatching one mechanism: either advance to the next
/// rule, or stop the whole evaluation with a verdict.
enum Dispatch {
    Advance,
    Terminal(Verdict),
}

async fn dispatch_mechanism(
    qualifier: Qualifier,
    mechanism: &Mechanism,
    ctx: &EvalContext,
    resolver: &dyn DnsResolver,
    pool: &RulePool,
    limits: SpfLimits,
) -> Dispatch {
    match mechanism {
        Mechanism::All => Dispatch::Terminal(qualifier.as_verdict()),

        Mechanism::Ip4 { addr, cidr } => {
            if ctx.client_ip.matches_v4(*addr, *cidr) {
                Dispatch::Terminal(qualifier.as_verdict())
            } else {
                Dispatch::Advance
            }
        }
        Mechanism::Ip6 { addr, cidr } => {
            if ctx.client_ip.matches_v6(*addr, *cidr) {
                Dispatch::Terminal(qualifier.as_verdict())
            } else {
                Dispatch::Advance
            }
        }

        Mechanism::A { domain, cidr4, cidr6 } => {
            if !ctx.budget.charge() {
                return Dispatch::Terminal(Verdict::PermError);
            }
            let name = match expand_or_domain(domain, ctx, resolver).await {
                Ok(name) => name,
                Err(e) => return Dispatch::Terminal(macro_error_to_verdict(e)),
            };
            let (matched, errored) = resolve_and_match(ctx, resolver, &name, *cidr4, *cidr6).await;
            if matched {
                Dispatch::Terminal(qualifier.as_verdict())
            } else if errored {
                Dispatch::Terminal(Verdict::TempError)
            } else {
                Dispatch::Advance
            }
        }

        Mechanism::Mx { domain, cidr4, cidr6 } => {
            if !ctx.budget.charge() {
                return Dispatch::Terminal(Verdict::PermError);
            }
            let name = match expand_or_domain(domain, ctx, resolver).await {
                Ok(name) => name,
                Err(e) => return Dispatch::Terminal(macro_error_to_verdict(e)),
            };
            match resolver.lookup_mx(&name).await {
                Err(DnsError::NotFound(_)) => Dispatch::Advance,
                Err(DnsError::Failure(_)) => Dispatch::Terminal(Verdict::TempError),
                Ok(hosts) => {
                    // Spec §4.6/§5/§9: the fan-out of A/AAAA lookups under
                    // one MX rule completes independently; no candidate's
                    // answer is special beyond "the first match wins."
                    let candidates: Vec<String> = hosts.into_iter().take(MAX_RR_FANOUT).collect();
                    let results = join_all(
                        candidates
                            .iter()
                            .map(|host| resolve_and_match(ctx, resolver, host, *cidr4, *cidr6)),
                    )
                    .await;
                    let mut any_error = false;
                    for (matched, errored) in results {
                        if matched {
                            return Dispatch::Terminal(qualifier.as_verdict());
                        }
                        any_error |= errored;
                    }
                    if any_error {
                        Dispatch::Terminal(Verdict::TempError)
                    } else {
                        Dispatch::Advance
                    }
                }
            }
        }

        Mechanism::Exists(domainspec) => {
            if !ctx.budget.charge() {
                return Dispatch::Terminal(Verdict::PermError);
            }
            let name = match domainspec.expand(ctx, resolver).await {
                Ok(name) => name,
                Err(e) => return Dispatch::Terminal(macro_error_to_verdict(e)),
            };
            match resolver.lookup_a(&name).await {
                Ok(addrs) if !addrs.is_empty() => Dispatch::Terminal(qualifier.as_verdict()),
                Ok(_) | Err(DnsError::NotFound(_)) => Dispatch::Advance,
                Err(DnsError::Failure(_)) => Dispatch::Terminal(Verdict::TempError),
            }
        }

        Mechanism::Ptr(domainspec) => {
            if !ctx.budget.charge() {
                return Dispatch::Terminal(Verdict::PermError);
            }
            match ptr::resolve_validated_names(ctx, resolver).await {
                Err(_) => Dispatch::Terminal(Verdict::TempError),
                Ok(names) => {
                    let target = match expand_or_domain(domainspec, ctx, resolver).await {
                        Ok(target) => target,
                        Err(e) => return Dispatch::Terminal(macro_error_to_verdict(e)),
                    };
                    if names.iter().any(|n| ptr::matches_domainspec(n, &target)) {
                        Dispatch::Terminal(qualifier.as_verdict())
                    } else {
                        Dispatch::Advance
                    }
                }
            }
        }

        Mechanism::Include(domainspec) => {
            if !ctx.budget.charge() {
                return Dispatch::Terminal(Verdict::PermError);
            }
            let target = match domainspec.expand(ctx, resolver).await {
                Ok(target) => target,
                Err(e) => return Dispatch::Terminal(macro_error_to_verdict(e)),
            };
            let Some(child_ctx) = ctx.child(target) else {
                return Dispatch::Terminal(Verdict::PermError);
            };
            let child_verdict = evaluate_boxed(&child_ctx, resolver, pool, limits).await;
            match child_verdict {
                Verdict::Pass => Dispatch::Terminal(qualifier.as_verdict()),
                Verdict::Fail | Verdict::SoftFail | Verdict::Neutral => Dispatch::Advance,
                Verdict::TempError => Dispatch::Terminal(Verdict::TempError),
                Verdict::PermError | Verdict::None => Dispatch::Terminal(Verdict::PermError),
            }
        }
    }
}

/// Handle running off the end of the rule list: either resume via the
/// recorded `redirect=` modifier, or emit `neutral` (spec §4.6.3).
async fn handle_end_of_rules(
    ctx: &EvalContext,
    resolver: &dyn DnsResolver,
    pool: &RulePool,
    limits: SpfLimits,
    rules: &[Directive],
    redirect_index: Option<usize>,
) -> Verdict {
    let Some(idx) = redirect_index else {
        return Verdict::Neutral;
    };
    let Directive::Redirect(domainspec) = &rules[idx] else {
        unreachable!("redirect_index always points at a Directive::Redirect")
    };
    if !ctx.budget.charge() {
        return Verdict::PermError;
    }
    let target = match domainspec.expand(ctx, resolver).await {
        Ok(target) => target,
        Err(e) => return macro_error_to_verdict(e),
    };
    let Some(child_ctx) = ctx.child(target) else {
        return Verdict::PermError;
    };
    match evaluate_boxed(&child_ctx, resolver, pool, limits).await {
        Verdict::None => Verdict::PermError,
        other => other,
    }
}

/// The rule-by-rule evaluation driver for one context (spec §4.6). Boxed
/// at every recursive call site ([`evaluate_boxed`]) since an `async fn`
/// cannot directly call itself without an unbounded state-machine size.
async fn evaluate(ctx: &EvalContext, resolver: &dyn DnsResolver, pool: &RulePool, limits: SpfLimits) -> Verdict {
    let fetched = fetch_policy(&ctx.domain, resolver, limits.query_spf_type).await;
    let text = match fetched {
        Fetched::Terminal(verdict) => return verdict,
        Fetched::Record(text) => text,
    };

    let mut rules = pool.acquire();
    let redirect_index = match record::parse_record_into(&text, &mut rules) {
        Ok(idx) => idx,
        Err(e) => {
            warn!("malformed SPF record for {}: {e}", ctx.domain);
            pool.release(rules);
            return Verdict::PermError;
        }
    };

    let mut current = 0usize;
    let verdict = loop {
        if ctx.cancellation.is_canceled() {
            debug!("{}: evaluation canceled at rule {current}", ctx.domain);
            pool.release(rules);
            return Verdict::None;
        }
        if current >= rules.len() {
            break handle_end_of_rules(ctx, resolver, pool, limits, &rules, redirect_index).await;
        }
        let advance = match &rules[current] {
            Directive::Mechanism(qualifier, mechanism) => {
                debug!("{}: evaluating rule {current} ({mechanism:?})", ctx.domain);
                match dispatch_mechanism(*qualifier, mechanism, ctx, resolver, pool, limits).await {
                    Dispatch::Advance => true,
                    Dispatch::Terminal(verdict) => break verdict,
                }
            }
            Directive::Redirect(_) | Directive::Exp(_) | Directive::Unknown { .. } => true,
        };
        if advance {
            current += 1;
        }
    };

    pool.release(rules);
    info!("{}: evaluation produced {verdict}", ctx.domain);
    verdict
}

fn evaluate_boxed<'a>(
    ctx: &'a EvalContext,
    resolver: &'a dyn DnsResolver,
    pool: &'a RulePool,
    limits: SpfLimits,
) -> Pin<Box<dyn Future<Output = Verdict> + 'a>> {
    Box::pin(evaluate(ctx, resolver, pool, limits))
}

/// # SPF Engine
///
/// The public façade (spec §4.8): construct once per DNS resolver, then
/// call [`SpfEngine::check`] per incoming message. Reuses one
/// [`RulePool`] across calls, the same way the teacher keeps one
/// `TokioAsyncResolver` alive behind `SMTPConnection` rather than
/// rebuilding it per message.
pub struct SpfEngine {
    resolver: Arc<dyn DnsResolver>,
    limits: SpfLimits,
    pool: RulePool,
}

impl SpfEngine {
    /// Build an engine over `resolver` with the RFC-default limits.
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self::with_limits(resolver, SpfLimits::default())
    }

    /// Build an engine with caller-supplied limits.
    pub fn with_limits(resolver: Arc<dyn DnsResolver>, limits: SpfLimits) -> Self {
        Self {
            resolver,
            limits,
            pool: RulePool::new(),
        }
    }

    /// Start evaluating `(ip, domain, sender, helo)`, returning immediately
    /// with a [`CancelHandle`] and the future that will resolve to one of
    /// the seven SPF verdicts (spec §2 component 8, §4.8). Malformed-but-
    /// representable input (an unparseable IP, a sender whose domain
    /// doesn't validate) resolves the returned future synchronously to
    /// `Ok(Verdict::None)`; `Err(SpfError::MalformedInput)` is reserved for
    /// input no verdict can speak to. Calling [`CancelHandle::cancel`]
    /// before the future resolves makes it resolve to
    /// `Err(SpfError::Canceled)` instead of a verdict — the evaluation
    /// stops at its next rule-loop boundary rather than mid-dispatch.
    pub fn check_host<'a>(
        &'a self,
        ip: &str,
        domain: &str,
        sender: &str,
        helo: &str,
    ) -> (CancelHandle, Pin<Box<dyn Future<Output = Result<Verdict, SpfError>> + 'a>>) {
        if [ip, domain, sender, helo].iter().any(|s| s.contains('\0')) {
            let result = Err(SpfError::MalformedInput("argument contains a NUL byte".to_string()));
            return (CancelHandle(Cancellation::new()), Box::pin(std::future::ready(result)));
        }

        let Some(client_ip) = ClientIp::parse(ip) else {
            debug!("check_host(): unparseable client IP \"{ip}\"");
            return (CancelHandle(Cancellation::new()), Box::pin(std::future::ready(Ok(Verdict::None))));
        };

        let sender = if let Some(local_part) = sender.strip_prefix('@') {
            format!("postmaster@{local_part}")
        } else if sender.is_empty() {
            format!("postmaster@{helo}")
        } else {
            sender.to_string()
        };

        if validate_domain(domain).is_err() {
            debug!("check_host(): invalid evaluated domain \"{domain}\"");
            return (CancelHandle(Cancellation::new()), Box::pin(std::future::ready(Ok(Verdict::None))));
        }
        let sender_domain = sender.split_once('@').map(|(_, d)| d).unwrap_or("");
        if validate_domain(sender_domain).is_err() {
            debug!("check_host(): sender \"{sender}\" has no valid domain");
            return (CancelHandle(Cancellation::new()), Box::pin(std::future::ready(Ok(Verdict::None))));
        }

        let ctx = EvalContext::root_with_limits(
            client_ip,
            domain.to_string(),
            sender,
            helo.to_string(),
            self.limits.max_dns_mechanisms,
            self.limits.max_recursion_depth,
        );
        let handle = CancelHandle(ctx.cancellation.clone());

        let resolver = self.resolver.as_ref();
        let pool = &self.pool;
        let limits = self.limits;
        let future = Box::pin(async move {
            let cancellation = ctx.cancellation.clone();
            let verdict = evaluate(&ctx, resolver, pool, limits).await;
            if cancellation.is_canceled() {
                Err(SpfError::Canceled)
            } else {
                Ok(verdict)
            }
        });
        (handle, future)
    }

    /// Evaluate `(ip, domain, sender, helo)` and return one of the seven
    /// SPF verdicts. A thin wrapper over [`SpfEngine::check_host`] for
    /// callers that have no use for mid-flight cancellation.
    pub async fn check(
        &self,
        ip: &str,
        domain: &str,
        sender: &str,
        helo: &str,
    ) -> Result<Verdict, SpfError> {
        let (_handle, future) = self.check_host(ip, domain, sender, helo);
        future.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::test_support::FakeResolver;

    fn engine(resolver: FakeResolver) -> SpfEngine {
        SpfEngine::new(Arc::new(resolver))
    }

    #[tokio::test]
    async fn basic_pass() {
        let mut r = FakeResolver::new();
        r.set_txt("example.com", vec!["v=spf1 ip4:1.2.3.0/24 -all"]);
        let e = engine(r);
        let v = e.check("1.2.3.4", "example.com", "a@example.com", "ex.com").await.unwrap();
        assert_eq!(v, Verdict::Pass);
    }

    #[tokio::test]
    async fn basic_fail() {
        let mut r = FakeResolver::new();
        r.set_txt("example.com", vec!["v=spf1 ip4:1.2.3.0/24 -all"]);
        let e = engine(r);
        let v = e.check("5.6.7.8", "example.com", "a@example.com", "ex.com").await.unwrap();
        assert_eq!(v, Verdict::Fail);
    }

    #[tokio::test]
    async fn softfail_and_neutral_and_empty() {
        for (record, expect) in [
            ("v=spf1 ~all", Verdict::SoftFail),
            ("v=spf1 ?all", Verdict::Neutral),
            ("v=spf1", Verdict::Neutral),
        ] {
            let mut r = FakeResolver::new();
            r.set_txt("example.com", vec![record]);
            let e = engine(r);
            let v = e.check("5.6.7.8", "example.com", "a@example.com", "ex.com").await.unwrap();
            assert_eq!(v, expect, "{record}");
        }
    }

    #[tokio::test]
    async fn redirect_chain() {
        let mut r = FakeResolver::new();
        r.set_txt("a.example", vec!["v=spf1 redirect=b.example"]);
        r.set_txt("b.example", vec!["v=spf1 ip4:1.2.3.4 -all"]);
        let e = engine(r);
        let v = e.check("1.2.3.4", "a.example", "a@a.example", "ex.com").await.unwrap();
        assert_eq!(v, Verdict::Pass);
    }

    #[tokio::test]
    async fn include_chain_pass_and_missing_permerror() {
        let mut r = FakeResolver::new();
        r.set_txt("top.example", vec!["v=spf1 include:sub.example -all"]);
        r.set_txt("sub.example", vec!["v=spf1 ip4:1.2.3.4 -all"]);
        let e = engine(r);
        let v = e.check("1.2.3.4", "top.example", "a@top.example", "ex.com").await.unwrap();
        assert_eq!(v, Verdict::Pass);

        let mut r2 = FakeResolver::new();
        r2.set_txt("top.example", vec!["v=spf1 include:missing.example -all"]);
        let e2 = engine(r2);
        let v2 = e2.check("1.2.3.4", "top.example", "a@top.example", "ex.com").await.unwrap();
        assert_eq!(v2, Verdict::PermError);
    }

    #[tokio::test]
    async fn two_records_is_permerror() {
        let mut r = FakeResolver::new();
        r.set_txt(
            "example.com",
            vec!["v=spf1 -all", "v=spf1 +all"],
        );
        let e = engine(r);
        let v = e.check("1.2.3.4", "example.com", "a@example.com", "ex.com").await.unwrap();
        assert_eq!(v, Verdict::PermError);
    }

    #[tokio::test]
    async fn mechanism_budget_exhaustion_is_permerror() {
        let mut r = FakeResolver::new();
        // 11 DNS-consuming "exists" mechanisms, none of which match.
        let terms: Vec<String> = (0..11).map(|i| format!("exists:x{i}.example")).collect();
        let record = format!("v=spf1 {} -all", terms.join(" "));
        r.set_txt("example.com", vec![record.as_str()]);
        for i in 0..11 {
            r.set_a(&format!("x{i}.example"), vec![]);
        }
        let e = engine(r);
        let v = e.check("1.2.3.4", "example.com", "a@example.com", "ex.com").await.unwrap();
        assert_eq!(v, Verdict::PermError);
    }

    #[tokio::test]
    async fn no_record_is_none() {
        let r = FakeResolver::new();
        let e = engine(r);
        let v = e.check("1.2.3.4", "example.com", "a@example.com", "ex.com").await.unwrap();
        assert_eq!(v, Verdict::None);
    }

    #[tokio::test]
    async fn dns_failure_fetching_record_is_temperror() {
        let mut r = FakeResolver::new();
        r.fail_record_lookup("example.com");
        let e = engine(r);
        let v = e.check("1.2.3.4", "example.com", "a@example.com", "ex.com").await.unwrap();
        assert_eq!(v, Verdict::TempError);
    }

    #[tokio::test]
    async fn unparseable_ip_is_synchronous_none() {
        let e = engine(FakeResolver::new());
        let v = e.check("not-an-ip", "example.com", "a@example.com", "ex.com").await.unwrap();
        assert_eq!(v, Verdict::None);
    }

    #[tokio::test]
    async fn nul_byte_is_malformed_input_error() {
        let e = engine(FakeResolver::new());
        let err = e.check("1.2.3.4", "example.com\0", "a@example.com", "ex.com").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn ptr_dns_failure_inside_a_macro_is_temperror_not_permerror() {
        let mut r = FakeResolver::new();
        r.set_txt("example.com", vec!["v=spf1 exists:%{p}.example -all"]);
        r.fail_ptr_lookup("4.3.2.1.in-addr.arpa.");
        let e = engine(r);
        let v = e.check("1.2.3.4", "example.com", "a@example.com", "ex.com").await.unwrap();
        assert_eq!(v, Verdict::TempError);
    }

    #[tokio::test]
    async fn cancel_before_completion_yields_canceled_error() {
        let mut r = FakeResolver::new();
        r.set_txt("example.com", vec!["v=spf1 include:sub.example -all"]);
        r.set_txt("sub.example", vec!["v=spf1 ip4:1.2.3.4 -all"]);
        let e = engine(r);
        let (handle, future) = e.check_host("1.2.3.4", "example.com", "a@example.com", "ex.com");
        handle.cancel();
        let result = future.await;
        assert_eq!(result, Err(SpfError::Canceled));
    }

    #[tokio::test]
    async fn cancel_after_completion_has_no_effect() {
        let mut r = FakeResolver::new();
        r.set_txt("example.com", vec!["v=spf1 ip4:1.2.3.0/24 -all"]);
        let e = engine(r);
        let (handle, future) = e.check_host("1.2.3.4", "example.com", "a@example.com", "ex.com");
        let result = future.await;
        handle.cancel();
        assert_eq!(result, Ok(Verdict::Pass));
    }

    #[tokio::test]
    async fn mx_host_fanout_matches_on_a_later_candidate() {
        let mut r = FakeResolver::new();
        r.set_txt("example.com", vec!["v=spf1 mx -all"]);
        r.set_mx("example.com", vec!["mx1.example.com", "mx2.example.com"]);
        r.set_a("mx1.example.com", vec!["9.9.9.9".parse().unwrap()]);
        r.set_a("mx2.example.com", vec!["1.2.3.4".parse().unwrap()]);
        let e = engine(r);
        let v = e.check("1.2.3.4", "example.com", "a@example.com", "ex.com").await.unwrap();
        assert_eq!(v, Verdict::Pass);
    }
}
