//! Exported global variables

use crate::error::{FfiError, FfiResult};
use crate::ffi::events::BoundaryEvent;
use crate::ffi::loader::NativeHandle;
use crate::ffi::marshal;
use crate::ffi::types::{NativeScalar, TypeDescriptor, Value};
use std::ffi::c_void;
use std::sync::Arc;

/// Typed accessor for a scalar exported by a library
#[derive(Debug, Clone)]
pub struct GlobalVariable {
    handle: Arc<NativeHandle>,
    name: String,
    ty: TypeDescriptor,
    address: usize,
}

impl NativeHandle {
    /// Bind the exported global `name` as a scalar of type `ty`
    ///
    /// The type cannot be checked against the library; reading a global
    /// with the wrong type yields garbage, not an error.
    pub fn global(self: &Arc<Self>, name: &str, ty: TypeDescriptor) -> FfiResult<GlobalVariable> {
        if !ty.is_scalar() {
            return Err(FfiError::UnsupportedType(format!(
                "global '{}' must be a scalar, not {}",
                name, ty
            )));
        }

        let address = self.resolve(name)? as usize;
        self.logger().log(BoundaryEvent::GlobalResolved {
            symbol: name.to_string(),
        });

        Ok(GlobalVariable {
            handle: Arc::clone(self),
            name: name.to_string(),
            ty,
            address,
        })
    }
}

impl GlobalVariable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    pub fn get(&self) -> FfiResult<Value> {
        let _guard = self.handle.enter()?;
        // Safety: address was resolved from the mapped library and ty is scalar
        unsafe {
            marshal::read_native(
                self.address as *const c_void,
                &self.ty,
                self.handle.encoding(),
            )
        }
    }

    pub fn set(&self, value: &Value) -> FfiResult<()> {
        let _guard = self.handle.enter()?;
        // Safety: as in get; write_native checks value against ty
        unsafe { marshal::write_native(self.address as *mut c_void, &self.ty, value) }
    }

    pub fn get_as<T: NativeScalar>(&self) -> FfiResult<T> {
        let value = self.get()?;
        T::from_value(&value).ok_or_else(|| FfiError::type_mismatch(T::DESCRIPTOR, &self.ty))
    }

    pub fn set_as<T: NativeScalar>(&self, value: T) -> FfiResult<()> {
        self.set(&value.into_value())
    }
}
