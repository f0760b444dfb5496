use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::ip::ClientIp;

/// Hard ceiling on DNS-consuming mechanisms across a root context and all
/// of its descendants (spec §3, §4.6).
pub const MAX_DNS_MECHANISMS: u8 = 10;

/// Hard ceiling on `include:`/`redirect=` recursion depth (spec §3, §4.6).
pub const MAX_RECURSION_DEPTH: u8 = 15;

/// Answers beyond the 10th `MX` or `PTR` record are ignored (spec §3, §4.6).
pub const MAX_RR_FANOUT: usize = 10;

/// The DNS-mechanism budget, shared by a root context and every
/// `include`/`redirect` descendant it spawns. Spec §3: "the counter is
/// inherited by children and returned to the parent on child completion" —
/// modeled here as a single `Rc`-shared counter rather than a pass-down/
/// read-back pair, since every context in one evaluation tree lives on
/// the same thread for the tree's whole lifetime.
#[derive(Clone)]
pub struct MechanismBudget {
    charged: Rc<AtomicU8>,
    limit: u8,
}

impl MechanismBudget {
    /// A fresh, zeroed budget for a new root context, capped at `limit`
    /// (the RFC default is [`MAX_DNS_MECHANISMS`], but an embedding
    /// application may tighten it via `SpfLimits`).
    pub fn new(limit: u8) -> Self {
        Self {
            charged: Rc::new(AtomicU8::new(0)),
            limit,
        }
    }

    /// Charge one DNS-consuming mechanism. Returns `false` once the
    /// budget is exhausted (the caller must emit `PermError`).
    #[must_use]
    pub fn charge(&self) -> bool {
        // Single-threaded cooperative model (spec §5): no CAS race is
        // possible between the load and the store.
        let current = self.charged.load(Ordering::Relaxed);
        if current >= self.limit {
            return false;
        }
        self.charged.store(current + 1, Ordering::Relaxed);
        true
    }
}

impl Default for MechanismBudget {
    fn default() -> Self {
        Self::new(MAX_DNS_MECHANISMS)
    }
}

/// The cancellation flag shared by a root context and every `include`/
/// `redirect` descendant it spawns (spec §2 component 8, §3, §4.8, §5).
/// Modeled as an `Rc<AtomicBool>` for the same reason as
/// [`MechanismBudget`]: every context in one evaluation tree lives on the
/// same thread for the tree's whole lifetime, so a shared counter/flag
/// needs no CAS and no cross-thread synchronization.
#[derive(Clone)]
pub struct Cancellation {
    flag: Rc<AtomicBool>,
}

impl Cancellation {
    /// A fresh, not-yet-canceled flag for a new root context.
    pub fn new() -> Self {
        Self {
            flag: Rc::new(AtomicBool::new(false)),
        }
    }

    /// Mark this context tree canceled. Every context sharing this flag
    /// (the root and all of its `include`/`redirect` children) observes
    /// the cancellation the next time it checks.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// `true` once [`Cancellation::cancel`] has been called anywhere on
    /// this tree.
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// # Evaluation Context
///
/// One in-flight `check_host()` invocation (spec §3). Child contexts
/// spawned for `include:`/`redirect=` carry their own query key but share
/// this context's [`MechanismBudget`] and an incremented `depth`.
pub struct EvalContext {
    /// Client IP under evaluation, already v4-mapped-v6 normalized.
    pub client_ip: ClientIp,
    /// The domain currently being checked (changes across `include`/
    /// `redirect` children; never macro-expanded itself).
    pub domain: String,
    /// The full `MAIL FROM` (or `HELO`-derived) mailbox, `postmaster@...`
    /// substituted if the caller supplied none.
    pub sender: String,
    /// The HELO/EHLO identity presented by the client.
    pub helo: String,
    /// Recursion depth; the root context is depth 0.
    pub depth: u8,
    /// Recursion ceiling for this evaluation tree (spec §3; RFC default
    /// [`MAX_RECURSION_DEPTH`]).
    pub max_depth: u8,
    /// DNS-mechanism budget, shared across the whole evaluation tree.
    pub budget: MechanismBudget,
    /// Cancellation flag, shared across the whole evaluation tree. Set by
    /// [`crate::engine::CancelHandle::cancel`]; checked at rule-loop
    /// boundaries in `evaluate()`.
    pub cancellation: Cancellation,
    /// The PTR name validated by `%p` or the `ptr` mechanism, cached for
    /// the remainder of this context's lifetime once set (spec §9 Open
    /// Questions: retained for the context's lifetime, not just the
    /// triggering rule).
    validated: RefCell<Option<String>>,
}

impl EvalContext {
    /// A root context, depth 0, with a fresh mechanism budget, using the
    /// RFC-default limits.
    pub fn root(client_ip: ClientIp, domain: String, sender: String, helo: String) -> Self {
        Self::root_with_limits(client_ip, domain, sender, helo, MAX_DNS_MECHANISMS, MAX_RECURSION_DEPTH)
    }

    /// A root context with caller-supplied `SpfLimits` values.
    pub fn root_with_limits(
        client_ip: ClientIp,
        domain: String,
        sender: String,
        helo: String,
        max_dns_mechanisms: u8,
        max_depth: u8,
    ) -> Self {
        Self {
            client_ip,
            domain,
            sender,
            helo,
            depth: 0,
            max_depth,
            budget: MechanismBudget::new(max_dns_mechanisms),
            cancellation: Cancellation::new(),
            validated: RefCell::new(None),
        }
    }

    /// A child context for `include:`/`redirect=`, inheriting this
    /// context's IP, sender, HELO, budget and `depth + 1`. Returns `None`
    /// if that would exceed this tree's recursion ceiling.
    pub fn child(&self, domain: String) -> Option<Self> {
        if self.depth >= self.max_depth {
            return None;
        }
        Some(Self {
            client_ip: self.client_ip,
            domain,
            sender: self.sender.clone(),
            helo: self.helo.clone(),
            depth: self.depth + 1,
            max_depth: self.max_depth,
            budget: self.budget.clone(),
            cancellation: self.cancellation.clone(),
            validated: RefCell::new(None),
        })
    }

    /// The sender's local part (before `@`).
    pub fn local_part(&self) -> &str {
        self.sender.split('@').next().unwrap_or("")
    }

    /// The sender's domain (after `@`).
    pub fn sender_domain(&self) -> &str {
        self.sender.split_once('@').map(|(_, d)| d).unwrap_or("")
    }

    /// The cached validated PTR name, if `%p`/`ptr` has already run in
    /// this context.
    pub fn cached_validated_name(&self) -> Option<String> {
        self.validated.borrow().clone()
    }

    /// Cache the validated PTR name (or the literal `"unknown"`) for the
    /// remainder of this context's lifetime.
    pub fn set_validated_name(&self, name: String) {
        *self.validated.borrow_mut() = Some(name);
    }
}
