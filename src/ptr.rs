use futures_util::future::join_all;

use crate::context::{EvalContext, MAX_RR_FANOUT};
use crate::ip::ClientIp;
use crate::resolver::{DnsError, DnsResolver};

/// A PTR resolution hit a genuine DNS transport/server failure rather
/// than simply finding nothing. Per spec §7, this is terminal unless a
/// sibling candidate already validated — callers only ever see this
/// marker when *no* candidate validated.
#[derive(Debug, Clone, Copy)]
pub struct PtrDnsFailure;

/// Run the PTR resolution shared by the `ptr` mechanism and the `%p`
/// macro (spec §4.6): reverse-resolve the client IP, then forward-resolve
/// (up to [`MAX_RR_FANOUT`]) of the returned names, keeping only the
/// names whose forward answer contains the client's exact address.
///
/// A match in any candidate wins over a transport failure in a sibling
/// candidate (spec §7); only a DNS failure with zero validated names is
/// reported as [`PtrDnsFailure`].
pub async fn resolve_validated_names(
    ctx: &EvalContext,
    resolver: &dyn DnsResolver,
) -> Result<Vec<String>, PtrDnsFailure> {
    let reverse_name = ctx.client_ip.reverse_dns_name();
    let candidates = match resolver.lookup_ptr(&reverse_name).await {
        Ok(names) => names,
        Err(DnsError::NotFound(_)) => return Ok(Vec::new()),
        Err(DnsError::Failure(_)) => return Err(PtrDnsFailure),
    };

    // Spec §4.6/§5/§9: forward-resolutions of the candidate names complete
    // independently ("parallel A/AAAA resolutions under one PTR rule"); a
    // match in any candidate wins over a transport failure in a sibling,
    // so every candidate's outcome is collected before the decision below.
    let candidates: Vec<String> = candidates.into_iter().take(MAX_RR_FANOUT).collect();
    let forward_results = join_all(candidates.iter().map(|candidate| async move {
        if ctx.client_ip.is_v6() {
            resolver
                .lookup_aaaa(candidate)
                .await
                .map(|addrs| addrs.into_iter().any(|a| ClientIp::from(std::net::IpAddr::V6(a)) == ctx.client_ip))
        } else {
            resolver
                .lookup_a(candidate)
                .await
                .map(|addrs| addrs.into_iter().any(|a| ClientIp::from(std::net::IpAddr::V4(a)) == ctx.client_ip))
        }
    }))
    .await;

    let mut validated = Vec::new();
    let mut any_error = false;

    for (candidate, forward) in candidates.iter().zip(forward_results) {
        match forward {
            Ok(true) => validated.push(strip_trailing_dot(candidate)),
            Ok(false) => {}
            Err(DnsError::NotFound(_)) => {}
            Err(DnsError::Failure(_)) => any_error = true,
        }
    }

    if validated.is_empty() && any_error {
        Err(PtrDnsFailure)
    } else {
        Ok(validated)
    }
}

/// The `%{p}` macro: the first validated PTR name, or the literal
/// `"unknown"` if none validated. Cached on `ctx` for the rest of its
/// lifetime once computed (spec §9 Open Questions).
pub async fn validated_name(
    ctx: &EvalContext,
    resolver: &dyn DnsResolver,
) -> Result<String, PtrDnsFailure> {
    if let Some(cached) = ctx.cached_validated_name() {
        return Ok(cached);
    }
    let names = resolve_validated_names(ctx, resolver).await?;
    let chosen = names
        .into_iter()
        .next()
        .unwrap_or_else(|| "unknown".to_string());
    ctx.set_validated_name(chosen.clone());
    Ok(chosen)
}

/// `true` if `candidate` (case-insensitive) equals `domainspec`, or is a
/// sub-label of it (shares a trailing `.domainspec`) — the `ptr`
/// mechanism's match rule (spec §4.6).
pub fn matches_domainspec(candidate: &str, domainspec: &str) -> bool {
    let candidate = strip_trailing_dot(candidate);
    let domainspec = strip_trailing_dot(domainspec);
    if candidate.eq_ignore_ascii_case(&domainspec) {
        return true;
    }
    let suffix = format!(".{domainspec}");
    candidate.len() > suffix.len()
        && candidate[candidate.len() - suffix.len()..].eq_ignore_ascii_case(&suffix)
}

fn strip_trailing_dot(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_string()
}
