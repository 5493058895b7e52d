//! Typed façade over the `bindings_demo` library surface
//!
//! Binds every declared function once, from the declarations below, and
//! exposes them with Rust types. Element counts cross as `unsigned int`.

use crate::error::{FfiError, FfiResult};
use crate::ffi::caller::SignatureBinder;
use crate::ffi::callbacks::CallbackTrampoline;
use crate::ffi::global::GlobalVariable;
use crate::ffi::interface::InterfaceDescription;
use crate::ffi::loader::NativeHandle;
use crate::ffi::owned::OwnedNativeBuffer;
use crate::ffi::types::{NativePtr, NativeScalar, TypeDescriptor, Value};
use crate::ffi::view::BufferView;
use std::collections::BTreeMap;
use std::ffi::c_void;
use std::sync::Arc;

/// Declarations of the library surface
pub const SURFACE_HEADER: &str = "
extern int a;
extern double b;
extern char c;

int func_ret_int(int val);
double func_ret_double(double val);
char *func_ret_str(char *val);
char func_many_args(int val1, double val2, char val3, short val4);

void arr_minus_one(int *data, unsigned int arr_size);
int *gen_arr(unsigned int size);
void fill_arr(int *arr, unsigned int size);
void qsort_wrap(int *arr, unsigned int size, unsigned int el_size);
int comp(const int *a, const int *b);
void upd_arr(int *arr, unsigned int size, int (*callback)(int));
void free_arr(int *p);

char *do_nothing_function(char *some_str);
";

/// One handle, one binding per declared function, one accessor per global
#[derive(Debug)]
pub struct NativeSurface {
    handle: Arc<NativeHandle>,
    interface: InterfaceDescription,
    functions: BTreeMap<String, SignatureBinder>,
    globals: BTreeMap<String, GlobalVariable>,
}

impl NativeSurface {
    /// Bind the whole surface from `handle`
    pub fn open(handle: Arc<NativeHandle>) -> FfiResult<Self> {
        let interface = InterfaceDescription::parse(SURFACE_HEADER)?;

        let mut functions = BTreeMap::new();
        for (name, _) in interface.functions() {
            // Safety: the declarations are the library's own header
            let binder = unsafe { SignatureBinder::bind_declared(&handle, &interface, name)? };
            functions.insert(name.to_string(), binder);
        }

        let mut globals = BTreeMap::new();
        for (name, ty) in interface.globals() {
            globals.insert(name.to_string(), handle.global(name, ty.clone())?);
        }

        Ok(Self {
            handle,
            interface,
            functions,
            globals,
        })
    }

    pub fn handle(&self) -> &Arc<NativeHandle> {
        &self.handle
    }

    pub fn interface(&self) -> &InterfaceDescription {
        &self.interface
    }

    /// Binding of a declared function
    pub fn binder(&self, name: &str) -> FfiResult<&SignatureBinder> {
        self.functions
            .get(name)
            .ok_or_else(|| FfiError::SymbolNotFound {
                library: self.handle.path().to_path_buf(),
                symbol: name.to_string(),
            })
    }

    fn call(&self, name: &str, args: &[Value]) -> FfiResult<Value> {
        self.binder(name)?.call(args)
    }

    fn call_scalar<T: NativeScalar>(&self, name: &str, args: &[Value]) -> FfiResult<T> {
        let value = self.call(name, args)?;
        T::from_value(&value).ok_or_else(|| FfiError::type_mismatch(T::DESCRIPTOR, value.descriptor()))
    }

    fn call_text(&self, name: &str, text: &str) -> FfiResult<String> {
        match self.call(name, &[Value::str(text)])? {
            Value::Str(s) => Ok(s),
            other => Err(FfiError::type_mismatch(TypeDescriptor::CString, other.descriptor())),
        }
    }

    fn global(&self, name: &str) -> FfiResult<&GlobalVariable> {
        self.globals
            .get(name)
            .ok_or_else(|| FfiError::SymbolNotFound {
                library: self.handle.path().to_path_buf(),
                symbol: name.to_string(),
            })
    }

    pub fn func_ret_int(&self, val: i32) -> FfiResult<i32> {
        self.call_scalar("func_ret_int", &[Value::Int32(val)])
    }

    pub fn func_ret_double(&self, val: f64) -> FfiResult<f64> {
        self.call_scalar("func_ret_double", &[Value::Double(val)])
    }

    pub fn func_ret_str(&self, val: &str) -> FfiResult<String> {
        self.call_text("func_ret_str", val)
    }

    pub fn func_many_args(&self, val1: i32, val2: f64, val3: u8, val4: i16) -> FfiResult<u8> {
        self.call_scalar(
            "func_many_args",
            &[
                Value::Int32(val1),
                Value::Double(val2),
                Value::Char(val3),
                Value::Int16(val4),
            ],
        )
    }

    pub fn do_nothing_function(&self, some_str: &str) -> FfiResult<String> {
        self.call_text("do_nothing_function", some_str)
    }

    /// Decrement every element in place
    pub fn arr_minus_one(&self, view: &mut BufferView<'_>) -> FfiResult<()> {
        let size = element_count(view)?;
        self.call("arr_minus_one", &[view.as_arg()?, size])?;
        Ok(())
    }

    /// Overwrite element `i` with `i`
    pub fn fill_arr(&self, view: &mut BufferView<'_>) -> FfiResult<()> {
        let size = element_count(view)?;
        self.call("fill_arr", &[view.as_arg()?, size])?;
        Ok(())
    }

    /// Native array `0..size`, released through `free_arr`
    pub fn gen_arr(&self, size: u32) -> FfiResult<OwnedNativeBuffer> {
        // Safety: gen_arr(size) allocates exactly size ints
        unsafe {
            OwnedNativeBuffer::acquire(
                self.binder("gen_arr")?,
                &[Value::UInt32(size)],
                size as usize,
                self.binder("free_arr")?,
            )
        }
    }

    /// Replace every element with `callback(element)`
    pub fn upd_arr(&self, view: &mut BufferView<'_>, callback: &CallbackTrampoline) -> FfiResult<()> {
        let size = element_count(view)?;
        self.call("upd_arr", &[view.as_arg()?, size, callback.as_arg()])?;
        Ok(())
    }

    /// Sort in place with the library's own comparator
    pub fn qsort_wrap(&self, view: &mut BufferView<'_>) -> FfiResult<()> {
        let size = element_count(view)?;
        let el_size = u32::try_from(view.element_type().size())
            .map_err(|_| FfiError::UnsupportedType(view.element_type().to_string()))?;
        self.call("qsort_wrap", &[view.as_arg()?, size, Value::UInt32(el_size)])?;
        Ok(())
    }

    /// The library's comparator applied to two values
    pub fn comp(&self, a: i32, b: i32) -> FfiResult<i32> {
        let (mut a, mut b) = (a, b);
        // Safety: both locals outlive the call and comp only reads them
        let args = unsafe {
            [
                Value::Pointer(NativePtr::from_raw(
                    &mut a as *mut i32 as *mut c_void,
                    TypeDescriptor::Int32,
                )),
                Value::Pointer(NativePtr::from_raw(
                    &mut b as *mut i32 as *mut c_void,
                    TypeDescriptor::Int32,
                )),
            ]
        };
        self.call_scalar("comp", &args)
    }

    pub fn a(&self) -> FfiResult<i32> {
        self.global("a")?.get_as()
    }

    pub fn set_a(&self, value: i32) -> FfiResult<()> {
        self.global("a")?.set_as(value)
    }

    pub fn b(&self) -> FfiResult<f64> {
        self.global("b")?.get_as()
    }

    pub fn set_b(&self, value: f64) -> FfiResult<()> {
        self.global("b")?.set_as(value)
    }

    pub fn c(&self) -> FfiResult<u8> {
        self.global("c")?.get_as()
    }

    pub fn set_c(&self, value: u8) -> FfiResult<()> {
        self.global("c")?.set_as(value)
    }
}

fn element_count(view: &BufferView<'_>) -> FfiResult<Value> {
    u32::try_from(view.len())
        .map(Value::UInt32)
        .map_err(|_| {
            FfiError::UnsupportedType(format!(
                "{} elements do not fit in unsigned int",
                view.len()
            ))
        })
}
