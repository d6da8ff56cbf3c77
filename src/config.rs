//! Boot-time configuration.
//!
//! The executive takes a single `Config` at construction and never
//! reconfigures afterwards — pool sizes and the core count are fixed for
//! the life of the system, so no allocation happens on interrupt paths.

/// Hop bound for the priority-inheritance wait-for-graph walk.
///
/// Boost propagation only recurses on a strict priority increase, so
/// circular wait-for graphs quiesce on their own; the bound is a hard
/// stop for pathological chains. A clamped walk is logged at warn.
pub const MAX_BOOST_HOPS: usize = 8;

/// Number of distinct signal numbers (0..NSIG).
pub const NSIG: usize = 32;

/// Executive construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Number of processor cores. `1` selects the uniprocessor merge
    /// path; anything larger selects the SMP path.
    pub cores: usize,
    /// Pre-allocated pending-signal entries for normal-context senders.
    pub sig_pool: usize,
    /// Pre-allocated pending-signal entries reserved for senders in
    /// interrupt context, so interrupt-time `raise` never allocates.
    pub sig_irq_pool: usize,
}

impl Config {
    /// A small uniprocessor configuration, useful for bring-up.
    pub const fn uniprocessor() -> Self {
        Self {
            cores: 1,
            sig_pool: 32,
            sig_irq_pool: 8,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::uniprocessor()
    }
}
