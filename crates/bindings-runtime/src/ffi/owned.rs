//! Ownership of native-allocated memory
//!
//! An [`OwnedNativeBuffer`] is the single release authority for memory a
//! native allocator returned. Release happens exactly once: explicitly
//! through [`release`](OwnedNativeBuffer::release) or when the buffer is
//! dropped. Moving the buffer moves the authority with it.

use crate::error::{FfiError, FfiResult};
use crate::ffi::caller::SignatureBinder;
use crate::ffi::events::{BoundaryEvent, EventLogger};
use crate::ffi::safety::{check_null, Liveness, LivenessToken};
use crate::ffi::types::{NativePtr, TypeDescriptor, Value};
use crate::ffi::view::BufferView;
use bindings_config::ReleasePolicy;
use std::cell::Cell;
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Native allocation released through a bound releasing function
pub struct OwnedNativeBuffer {
    address: usize,
    element: TypeDescriptor,
    count: usize,
    releaser: SignatureBinder,
    policy: ReleasePolicy,
    released: bool,
    liveness: Liveness,
    logger: Arc<dyn EventLogger>,
    // Send but not Sync
    _not_sync: PhantomData<Cell<()>>,
}

impl OwnedNativeBuffer {
    /// Call `allocator` and take ownership of the `count` elements it returns
    ///
    /// `allocator` must return `T*` for a scalar `T` and `releaser` must take
    /// that pointer (or `void*`) and return nothing.
    ///
    /// # Safety
    ///
    /// The allocation returned for `args` must hold at least `count`
    /// elements. Views borrowed from the buffer are bounds-checked against
    /// `count` only, so an overstated count lets them reach past the
    /// allocation.
    pub unsafe fn acquire(
        allocator: &SignatureBinder,
        args: &[Value],
        count: usize,
        releaser: &SignatureBinder,
    ) -> FfiResult<Self> {
        let element = match &allocator.signature().ret {
            TypeDescriptor::Pointer(pointee) if pointee.is_scalar() => (**pointee).clone(),
            other => {
                return Err(FfiError::signature(
                    allocator.symbol(),
                    format!("allocator must return a pointer to a scalar, not {}", other),
                ))
            }
        };
        check_releaser(releaser, &element)?;

        let address = match allocator.call(args)? {
            Value::Pointer(ptr) => check_null(ptr.as_ptr(), allocator.symbol())? as usize,
            other => {
                return Err(FfiError::type_mismatch(
                    &allocator.signature().ret,
                    other.descriptor(),
                ))
            }
        };

        let handle = allocator.handle();
        let logger = Arc::clone(handle.logger());
        logger.log(BoundaryEvent::BufferAcquired {
            symbol: allocator.symbol().to_string(),
            count,
        });

        Ok(Self {
            address,
            element,
            count,
            releaser: releaser.clone(),
            policy: handle.release_policy(),
            released: false,
            liveness: Liveness::new(),
            logger,
            _not_sync: PhantomData,
        })
    }

    /// Behavior of a second [`release`](Self::release)
    pub fn with_policy(mut self, policy: ReleasePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ReleasePolicy {
        self.policy
    }

    /// Release the memory
    ///
    /// Views and pointer arguments derived from the buffer are dead
    /// afterwards. Releasing twice fails with `DoubleFree`, or does nothing
    /// under [`ReleasePolicy::Ignore`].
    pub fn release(&mut self) -> FfiResult<()> {
        if self.released {
            return match self.policy {
                ReleasePolicy::Error => {
                    self.logger.log(BoundaryEvent::DoubleFreeRejected {
                        address: self.address,
                    });
                    Err(FfiError::DoubleFree {
                        address: self.address,
                    })
                }
                ReleasePolicy::Ignore => Ok(()),
            };
        }

        self.liveness.revoke();
        // A failed release still ends ownership; retrying could free twice
        self.released = true;

        let ptr = NativePtr::unchecked(self.address, self.releaser_pointee());
        self.releaser.call(&[Value::Pointer(ptr)])?;

        self.logger.log(BoundaryEvent::BufferReleased {
            address: self.address,
            count: self.count,
        });
        Ok(())
    }

    fn releaser_pointee(&self) -> TypeDescriptor {
        match self.releaser.signature().args.first() {
            Some(TypeDescriptor::Pointer(pointee)) => (**pointee).clone(),
            _ => self.element.clone(),
        }
    }

    /// Bounds-checked view of the elements, dead once the buffer is released
    pub fn borrow_view(&self) -> FfiResult<BufferView<'_>> {
        if self.released {
            return Err(FfiError::DanglingView);
        }
        // Safety: the allocation holds count elements until release, and
        // the view's liveness follows the buffer's
        let view = unsafe {
            BufferView::from_borrowed(
                self.address as *mut c_void,
                self.element.clone(),
                self.count,
                None,
            )?
        };
        Ok(view.with_liveness(self.liveness.token()))
    }

    /// Give up ownership without releasing
    pub fn into_raw(mut self) -> *mut c_void {
        self.released = true;
        self.address as *mut c_void
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn element_type(&self) -> &TypeDescriptor {
        &self.element
    }

    pub fn address(&self) -> usize {
        self.address
    }

    /// Token observing the buffer; dies on release
    pub fn liveness_token(&self) -> LivenessToken {
        self.liveness.token()
    }
}

fn check_releaser(releaser: &SignatureBinder, element: &TypeDescriptor) -> FfiResult<()> {
    let signature = releaser.signature();
    let accepts = match signature.args.as_slice() {
        [TypeDescriptor::Pointer(pointee)] => {
            **pointee == TypeDescriptor::Void || **pointee == *element
        }
        _ => false,
    };

    if !accepts || signature.ret != TypeDescriptor::Void {
        return Err(FfiError::signature(
            releaser.symbol(),
            format!(
                "releaser must be void ({}*) or void (void*), not {}",
                element, signature
            ),
        ));
    }
    Ok(())
}

impl Drop for OwnedNativeBuffer {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.release() {
            self.logger.log(BoundaryEvent::ReleaseFailed {
                address: self.address,
                reason: e.to_string(),
            });
        }
    }
}

impl fmt::Debug for OwnedNativeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedNativeBuffer")
            .field("address", &format_args!("{:#x}", self.address))
            .field("element", &self.element)
            .field("count", &self.count)
            .field("releaser", &self.releaser.symbol())
            .field("policy", &self.policy)
            .field("released", &self.released)
            .finish()
    }
}
