//! # Intrusive Reference Count
//!
//! ```text
//! AtomicU32 = [ closing:1 | count:31 ]
//! ```
//!
//! The release that takes the count to zero also sets `closing` in the same
//! CAS. From then on `try_add_ref` fails, so a resource being torn down can
//! never be revived by a racing `add_ref`.

use std::sync::atomic::{AtomicU32, Ordering};

const CLOSING: u32 = 1 << 31;
const COUNT_MASK: u32 = CLOSING - 1;

/// Lock-free reference count with a closing bit.
///
/// Starts at one reference, owned by the creator.
#[derive(Debug)]
pub struct RefCount {
    state: AtomicU32,
}

impl RefCount {
    /// Creates a count holding one reference.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(1),
        }
    }

    /// Current number of references.
    #[inline]
    #[must_use]
    pub fn count(&self) -> u32 {
        self.state.load(Ordering::Acquire) & COUNT_MASK
    }

    /// Returns true once the last reference has been released.
    #[inline]
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.state.load(Ordering::Acquire) & CLOSING != 0
    }

    /// Takes another reference unless the count already reached zero.
    pub fn try_add_ref(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let count = current & COUNT_MASK;
            if current & CLOSING != 0 || count == 0 {
                return false;
            }
            if count == COUNT_MASK {
                tracing::error!("reference count overflow");
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Drops one reference.
    ///
    /// Returns `true` for exactly one caller: the one whose release took the
    /// count to zero. That caller owns destruction.
    pub fn release(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let count = current & COUNT_MASK;
            if count == 0 {
                tracing::error!("release of reference count already at zero");
                return false;
            }
            let next = if count == 1 { CLOSING } else { current - 1 };
            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return count == 1,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}

/// Types that embed a [`RefCount`].
///
/// ```rust
/// use keel_core::{RefCount, RefCounted};
///
/// struct Shader { refs: RefCount }
///
/// impl RefCounted for Shader {
///     fn ref_count(&self) -> &RefCount { &self.refs }
/// }
///
/// let shader = Shader { refs: RefCount::new() };
/// assert!(shader.add_ref());
/// assert!(!shader.release());
/// assert!(shader.release());
/// assert!(!shader.add_ref());
/// ```
pub trait RefCounted {
    /// The embedded count.
    fn ref_count(&self) -> &RefCount;

    /// See [`RefCount::try_add_ref`].
    fn add_ref(&self) -> bool {
        self.ref_count().try_add_ref()
    }

    /// See [`RefCount::release`].
    fn release(&self) -> bool {
        self.ref_count().release()
    }
}
