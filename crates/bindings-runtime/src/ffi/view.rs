//! Bounds-checked views over contiguous memory

use crate::error::{FfiError, FfiResult};
use crate::ffi::marshal;
use crate::ffi::safety::{Liveness, LivenessToken};
use crate::ffi::types::{NativePtr, NativeScalar, TypeDescriptor, Value};
use bindings_config::TextEncoding;
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;

/// Typed, strided view over memory the view does not own
///
/// The shape is presentation only: [`reshape`](BufferView::reshape) never
/// changes the element count or stride. Every access checks bounds, and the
/// view's liveness (when it was tied to an owner) before touching memory.
pub struct BufferView<'a> {
    base: usize,
    element: TypeDescriptor,
    count: usize,
    stride: usize,
    shape: Vec<usize>,
    scope: Liveness,
    _marker: PhantomData<&'a mut [u8]>,
}

impl<'a> BufferView<'a> {
    /// View over a local slice, borrowed mutably for the view's lifetime
    pub fn from_slice<T: NativeScalar>(slice: &'a mut [T]) -> Self {
        Self {
            base: slice.as_mut_ptr() as usize,
            element: T::DESCRIPTOR,
            count: slice.len(),
            stride: std::mem::size_of::<T>(),
            shape: vec![slice.len()],
            scope: Liveness::new(),
            _marker: PhantomData,
        }
    }

    /// View over raw memory
    ///
    /// `stride` defaults to the element size.
    ///
    /// # Safety
    ///
    /// `address` must be valid for reads and writes of `count` elements
    /// `stride` bytes apart for as long as the view is used. Unless the view
    /// is tied to its owner with [`with_liveness`](Self::with_liveness),
    /// nothing detects the memory going away.
    pub unsafe fn from_borrowed(
        address: *mut c_void,
        element: TypeDescriptor,
        count: usize,
        stride: Option<usize>,
    ) -> FfiResult<Self> {
        if !element.is_scalar() {
            return Err(FfiError::type_mismatch("scalar element type", &element));
        }

        let element_size = element.size();
        let stride = stride.unwrap_or(element_size);
        if stride < element_size {
            return Err(FfiError::InvalidStride {
                stride,
                element_size,
            });
        }
        if address.is_null() && count > 0 {
            return Err(FfiError::NullPointer("buffer view".to_string()));
        }

        Ok(Self {
            base: address as usize,
            element,
            count,
            stride,
            shape: vec![count],
            scope: Liveness::new(),
            _marker: PhantomData,
        })
    }

    /// Tie the view to the owner behind `token`
    pub fn with_liveness(mut self, token: LivenessToken) -> Self {
        self.scope = Liveness::child_of(token);
        self
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

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn is_alive(&self) -> bool {
        self.scope.is_alive()
    }

    /// Reinterpret the flat elements as `shape` (row-major)
    pub fn reshape(&mut self, shape: &[usize]) -> FfiResult<()> {
        let product = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim));

        if shape.is_empty() || product != Some(self.count) {
            return Err(FfiError::ShapeMismatch {
                shape: shape.to_vec(),
                count: self.count,
            });
        }
        self.shape = shape.to_vec();
        Ok(())
    }

    /// Flat index of row-major coordinates in the current shape
    pub fn index_of(&self, coords: &[usize]) -> FfiResult<usize> {
        if coords.len() != self.shape.len() {
            return Err(FfiError::ShapeMismatch {
                shape: coords.to_vec(),
                count: self.count,
            });
        }

        let mut index = 0;
        for (&coord, &dim) in coords.iter().zip(&self.shape) {
            if coord >= dim {
                return Err(FfiError::IndexOutOfBounds {
                    index: coord,
                    len: dim,
                });
            }
            index = index * dim + coord;
        }
        Ok(index)
    }

    fn element_ptr(&self, index: usize) -> FfiResult<*mut c_void> {
        self.scope.token().ensure_view()?;
        if index >= self.count {
            return Err(FfiError::IndexOutOfBounds {
                index,
                len: self.count,
            });
        }
        Ok((self.base + index * self.stride) as *mut c_void)
    }

    pub fn get(&self, index: usize) -> FfiResult<Value> {
        let ptr = self.element_ptr(index)?;
        // Safety: index is in bounds and the view is alive
        unsafe { marshal::read_native(ptr, &self.element, TextEncoding::default()) }
    }

    pub fn get_at(&self, coords: &[usize]) -> FfiResult<Value> {
        self.get(self.index_of(coords)?)
    }

    /// Store `value`; its type must equal the element type
    pub fn set(&mut self, index: usize, value: &Value) -> FfiResult<()> {
        let ptr = self.element_ptr(index)?;
        // Safety: as in get; write_native rejects a mismatched value
        unsafe { marshal::write_native(ptr, &self.element, value) }
    }

    pub fn set_at(&mut self, coords: &[usize], value: &Value) -> FfiResult<()> {
        let index = self.index_of(coords)?;
        self.set(index, value)
    }

    pub fn read<T: NativeScalar>(&self, index: usize) -> FfiResult<T> {
        if self.element != T::DESCRIPTOR {
            return Err(FfiError::type_mismatch(T::DESCRIPTOR, &self.element));
        }
        let value = self.get(index)?;
        T::from_value(&value).ok_or_else(|| FfiError::type_mismatch(T::DESCRIPTOR, &self.element))
    }

    pub fn write<T: NativeScalar>(&mut self, index: usize, value: T) -> FfiResult<()> {
        self.set(index, &value.into_value())
    }

    pub fn to_vec<T: NativeScalar>(&self) -> FfiResult<Vec<T>> {
        (0..self.count).map(|i| self.read(i)).collect()
    }

    pub fn values(&self) -> FfiResult<Vec<Value>> {
        (0..self.count).map(|i| self.get(i)).collect()
    }

    /// True when elements are packed back to back
    pub fn is_contiguous(&self) -> bool {
        self.stride == self.element.size()
    }

    /// Pointer argument to the first element, rejected once the view is gone
    ///
    /// Native code sees a plain `T*`, so only contiguous views convert.
    pub fn as_arg(&mut self) -> FfiResult<Value> {
        if !self.is_contiguous() {
            return Err(FfiError::InvalidStride {
                stride: self.stride,
                element_size: self.element.size(),
            });
        }
        Ok(Value::Pointer(NativePtr::tracked(
            self.base,
            self.element.clone(),
            self.scope.token(),
        )))
    }
}

impl fmt::Debug for BufferView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferView")
            .field("base", &format_args!("{:#x}", self.base))
            .field("element", &self.element)
            .field("count", &self.count)
            .field("stride", &self.stride)
            .field("shape", &self.shape)
            .finish()
    }
}
