use std::sync::Mutex;

use crate::record::Directive;

/// How many idle rule buffers the pool keeps around. Beyond this, an
/// evaluation that drops a buffer just lets it deallocate; the cap only
/// bounds idle memory, not concurrency.
const MAX_IDLE_BUFFERS: usize = 64;

/// # Rule Pool
///
/// A process-wide free list of `Vec<Directive>` buffers (spec §4.7's
/// "context pool", reworked for a stackless engine: there is no longer a
/// context object to recycle, but the rule-list allocation a record
/// parse would otherwise make fresh every time is worth reusing, the
/// same way the teacher reuses `SMTPConnection`'s scratch buffers rather
/// than allocating per message.
pub struct RulePool {
    free: Mutex<Vec<Vec<Directive>>>,
}

impl RulePool {
    /// An empty pool; the first few acquisitions allocate normally.
    pub fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    /// Take a buffer from the free list, or allocate a fresh empty one.
    pub fn acquire(&self) -> Vec<Directive> {
        self.free
            .lock()
            .expect("rule pool mutex poisoned")
            .pop()
            .unwrap_or_default()
    }

    /// Return a buffer to the free list for reuse. Its contents are
    /// dropped and its capacity retained; the pool discards buffers
    /// beyond [`MAX_IDLE_BUFFERS`] rather than growing without bound.
    pub fn release(&self, mut buffer: Vec<Directive>) {
        buffer.clear();
        let mut free = self.free.lock().expect("rule pool mutex poisoned");
        if free.len() < MAX_IDLE_BUFFERS {
            free.push(buffer);
        }
    }
}

impl Default for RulePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquired_buffer_is_reused_after_release() {
        let pool = RulePool::new();
        let mut buf = pool.acquire();
        buf.reserve(32);
        let cap = buf.capacity();
        pool.release(buf);

        let reused = pool.acquire();
        assert!(reused.capacity() >= cap);
    }

    #[test]
    fn idle_cap_bounds_pool_growth() {
        let pool = RulePool::new();
        for _ in 0..(MAX_IDLE_BUFFERS + 10) {
            pool.release(Vec::new());
        }
        assert_eq!(pool.free.lock().unwrap().len(), MAX_IDLE_BUFFERS);
    }
}
