#![deny(missing_docs)]
#![deny(warnings)]
#![deny(unused_imports)]
#![deny(unused_must_use)]
#![deny(unused_variables)]
#![deny(unused_mut)]

//! # SPF Engine
//!
//! `spf-engine` is an asynchronous Sender Policy Framework (RFC 4408)
//! evaluation engine. Given a client IP, an evaluated domain, a sender
//! mailbox and a HELO identity, it fetches the domain's policy record
//! over DNS, parses it, and walks its directives to one of seven
//! verdicts: `none`, `neutral`, `pass`, `fail`, `softfail`, `temperror`,
//! `permerror`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use spf_engine::engine::SpfEngine;
//! use spf_engine::resolver::TrustDnsResolver;
//!
//! #[tokio::main]
//! async fn main() {
//!     let resolver: Arc<dyn spf_engine::resolver::DnsResolver> =
//!         Arc::new(TrustDnsResolver::from_system_conf().unwrap());
//!     let engine = SpfEngine::new(resolver);
//!
//!     let verdict = engine
//!         .check("203.0.113.4", "example.com", "sender@example.com", "mail.example.com")
//!         .await
//!         .unwrap();
//!
//!     log::info!("SPF verdict: {verdict}");
//! }
//! ```
//!
//! ## Scope
//!
//! This crate is the evaluation engine only: it does not parse SMTP
//! commands, emit `Received-SPF:` headers, fetch `exp=` explanations, or
//! cache DNS answers — those are an embedding application's job. See
//! [`engine::SpfLimits`] for the knobs it does expose.
//!
//! ## License
//!
//! Licensed under the MIT license. See LICENSE for more information.

/// # Context
///
/// The in-flight evaluation state shared by one `check_host()` call and
/// all of its `include:`/`redirect=` descendants: the query key, the
/// DNS-mechanism budget, the recursion depth, and the PTR-validated-name
/// cache.
pub mod context;
/// # Domain
///
/// The RFC 4408 domain-name validator: label count, label length, and
/// character-set rules.
pub mod domain;
/// # Engine
///
/// The record retriever, the rule-by-rule evaluation driver, and the
/// public [`engine::SpfEngine`] façade.
pub mod engine;
/// # Error
///
/// The façade-level error type for input no `Verdict` can speak to.
pub mod error;
/// # IP
///
/// IPv4/IPv6 parsing, v4-mapped-v6 normalization, and CIDR matching.
pub mod ip;
/// # Macros
///
/// The RFC 4408 §8 macro-string expander.
pub mod macros;
/// # Pool
///
/// A process-wide free list of rule-list buffers, reused across checks.
pub mod pool;
/// # Ptr
///
/// The PTR-validation routine shared by the `ptr` mechanism and the
/// `%{p}` macro letter.
pub mod ptr;
/// # Record
///
/// The `v=spf1` directive parser: mechanisms, modifiers, and CIDR
/// grammar.
pub mod record;
/// # Resolver
///
/// The `DnsResolver` collaborator trait, a `trust-dns-resolver`-backed
/// implementation, and (under `#[cfg(test)]`) a scripted fake.
pub mod resolver;
/// # Result
///
/// The `Verdict` and `Qualifier` enums.
pub mod result;
