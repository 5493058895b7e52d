//! Liveness tracking for memory and callbacks that cross the boundary
//!
//! Borrow checking covers everything that stays inside Rust. Addresses that
//! leave as plain values (pointer arguments, callback entry points) carry a
//! [`LivenessToken`] instead, so a stale address is rejected before it
//! reaches native code.

use crate::error::{FfiError, FfiResult};
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Owner side of a liveness flag; revokes every token on drop
#[derive(Debug)]
pub struct Liveness {
    flag: Arc<AtomicBool>,
    parent: Option<LivenessToken>,
}

impl Liveness {
    /// Create a live scope with no parent
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(true)),
            parent: None,
        }
    }

    /// Create a scope that also dies when `parent` dies
    pub fn child_of(parent: LivenessToken) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(true)),
            parent: Some(parent),
        }
    }

    /// Token observing this scope (and its parent)
    pub fn token(&self) -> LivenessToken {
        LivenessToken {
            flag: Arc::clone(&self.flag),
            parent: self.parent.clone().map(Box::new),
        }
    }

    /// End the scope early
    pub fn revoke(&self) {
        self.flag.store(false, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        self.flag.load(Ordering::Acquire) && self.parent.as_ref().map_or(true, |p| p.is_alive())
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Liveness {
    fn drop(&mut self) {
        self.revoke();
    }
}

/// Observer side of a liveness flag
#[derive(Debug, Clone)]
pub struct LivenessToken {
    flag: Arc<AtomicBool>,
    parent: Option<Box<LivenessToken>>,
}

impl LivenessToken {
    /// True while the owning scope and all of its ancestors are alive
    pub fn is_alive(&self) -> bool {
        self.flag.load(Ordering::Acquire) && self.parent.as_ref().map_or(true, |p| p.is_alive())
    }

    /// `DanglingView` unless alive
    pub fn ensure_view(&self) -> FfiResult<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(FfiError::DanglingView)
        }
    }

    /// `DanglingCallback` unless alive
    pub fn ensure_callback(&self) -> FfiResult<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(FfiError::DanglingCallback)
        }
    }
}

/// First error raised by a callback, shared between a trampoline and the
/// binders that pass it to native code
#[derive(Debug, Clone, Default)]
pub(crate) struct FaultSlot(Arc<Mutex<Option<FfiError>>>);

impl FaultSlot {
    /// Keep `error` unless an earlier one is still pending
    pub(crate) fn record(&self, error: FfiError) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    pub(crate) fn take(&self) -> Option<FfiError> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Null pointer check returning `NullPointer` tagged with the producer
pub fn check_null(ptr: *const c_void, producer: &str) -> FfiResult<*const c_void> {
    if ptr.is_null() {
        Err(FfiError::NullPointer(producer.to_string()))
    } else {
        Ok(ptr)
    }
}
