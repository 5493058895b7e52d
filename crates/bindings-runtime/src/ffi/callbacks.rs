//! FFI Callbacks - native code calling local functions
//!
//! A [`CallbackTrampoline`] wraps a Rust closure in a libffi closure, giving
//! it a stable C entry point for the trampoline's lifetime:
//! 1. Native code calls the entry point with C arguments
//! 2. Arguments are decoded into `Value`s using the declared signature
//! 3. The local function runs; its result is checked against the return type
//! 4. The result is stored in the native return slot
//!
//! Errors and panics never unwind into native code. The entry point stores a
//! zero result and records the first failure, which the binder making the
//! native call reports once that call returns.

use crate::error::{FfiError, FfiResult};
use crate::ffi::events::{BoundaryEvent, EventLogger, NullEventLogger};
use crate::ffi::marshal::{self, MarshalContext};
use crate::ffi::safety::{FaultSlot, Liveness};
use crate::ffi::types::{CallbackRef, NativePtr, Signature, TypeDescriptor, Value};
use bindings_config::TextEncoding;
use libffi::low::{ffi_arg, ffi_cif, ffi_sarg};
use libffi::middle::{Cif, Closure};
use std::any::Any;
use std::ffi::c_void;
use std::fmt;
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type LocalFunction = dyn Fn(&[Value]) -> FfiResult<Value> + Send + Sync;

/// State reachable from the native entry point
struct TrampolineState {
    func: Box<LocalFunction>,
    signature: Signature,
    invocations: AtomicUsize,
    faults: FaultSlot,
    logger: Arc<dyn EventLogger>,
}

impl TrampolineState {
    /// Decode arguments, run the local function, check its result
    ///
    /// # Safety
    ///
    /// `args` must hold one valid pointer per declared argument.
    unsafe fn dispatch(&self, args: *const *const c_void) -> FfiResult<Value> {
        let mut values = Vec::with_capacity(self.signature.arity());
        for (i, ty) in self.signature.args.iter().enumerate() {
            let ptr = *args.add(i);
            values.push(marshal::read_native(ptr, ty, TextEncoding::default())?);
        }

        let result = (self.func)(&values)?;
        marshal::check_value(&self.signature.ret, &result)?;
        Ok(result)
    }

    fn fail(&self, error: FfiError) {
        self.logger.log(BoundaryEvent::CallbackFailed {
            message: error.to_string(),
        });
        self.faults.record(error);
    }
}

/// libffi closure callback
unsafe extern "C" fn entry(
    _cif: &ffi_cif,
    result: &mut ffi_arg,
    args: *const *const c_void,
    state: &TrampolineState,
) {
    state.invocations.fetch_add(1, Ordering::Relaxed);

    let value = match panic::catch_unwind(AssertUnwindSafe(|| state.dispatch(args))) {
        Ok(Ok(value)) => value,
        Ok(Err(error)) => {
            state.fail(error);
            zero_value(&state.signature.ret)
        }
        Err(payload) => {
            state.fail(FfiError::NativeFault {
                symbol: state.signature.to_descriptor().to_string(),
                reason: format!("callback panicked: {}", panic_message(&*payload)),
            });
            zero_value(&state.signature.ret)
        }
    };
    store_result(result, &value);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

fn zero_value(ty: &TypeDescriptor) -> Value {
    match ty {
        TypeDescriptor::Int32 => Value::Int32(0),
        TypeDescriptor::Int64 => Value::Int64(0),
        TypeDescriptor::Int16 => Value::Int16(0),
        TypeDescriptor::UInt32 => Value::UInt32(0),
        TypeDescriptor::USize => Value::USize(0),
        TypeDescriptor::Double => Value::Double(0.0),
        TypeDescriptor::Char => Value::Char(0),
        TypeDescriptor::Pointer(pointee) => Value::Pointer(NativePtr::null((**pointee).clone())),
        TypeDescriptor::CString | TypeDescriptor::FunctionPointer { .. } | TypeDescriptor::Void => {
            Value::Void
        }
    }
}

/// Store a result in the closure's return slot
///
/// Integers narrower than `ffi_arg` are widened, sign-extended when signed.
unsafe fn store_result(result: &mut ffi_arg, value: &Value) {
    let slot = result as *mut ffi_arg;
    match value {
        Value::Int32(v) => *slot = *v as ffi_sarg as ffi_arg,
        Value::Int16(v) => *slot = *v as ffi_sarg as ffi_arg,
        Value::UInt32(v) => *slot = *v as ffi_arg,
        Value::Char(v) => {
            *slot = if c_char::MIN == 0 {
                *v as ffi_arg
            } else {
                *v as i8 as ffi_sarg as ffi_arg
            }
        }
        Value::Int64(v) => (slot as *mut i64).write_unaligned(*v),
        Value::USize(v) => (slot as *mut usize).write_unaligned(*v),
        Value::Double(v) => (slot as *mut f64).write_unaligned(*v),
        Value::Pointer(p) => (slot as *mut usize).write_unaligned(p.address()),
        Value::Str(_) | Value::Callback(_) | Value::Void => {}
    }
}

/// Local function callable from native code
///
/// The entry point stays valid until the trampoline is dropped. A
/// [`CallbackRef`] handed out earlier is rejected with `DanglingCallback`
/// from then on; a raw entry address kept by native code is not tracked.
pub struct CallbackTrampoline {
    // Dropped first: tokens die before the code does
    liveness: Liveness,
    _closure: Closure<'static>,
    cif: Cif,
    state: Box<TrampolineState>,
    descriptor: TypeDescriptor,
    code: usize,
}

impl CallbackTrampoline {
    /// Wrap `func` as a native function of type `descriptor`
    ///
    /// `descriptor` must be a `FunctionPointer` whose arguments are scalars
    /// or pointers; the return may also be `void`.
    pub fn wrap<F>(func: F, descriptor: TypeDescriptor) -> FfiResult<Self>
    where
        F: Fn(&[Value]) -> FfiResult<Value> + Send + Sync + 'static,
    {
        Self::wrap_with_logger(func, descriptor, Arc::new(NullEventLogger))
    }

    pub fn wrap_with_logger<F>(
        func: F,
        descriptor: TypeDescriptor,
        logger: Arc<dyn EventLogger>,
    ) -> FfiResult<Self>
    where
        F: Fn(&[Value]) -> FfiResult<Value> + Send + Sync + 'static,
    {
        let signature = callback_signature(&descriptor)?;
        let cif = signature.cif();

        let state = Box::new(TrampolineState {
            func: Box::new(func),
            signature: signature.clone(),
            invocations: AtomicUsize::new(0),
            faults: FaultSlot::default(),
            logger: Arc::clone(&logger),
        });

        // Safety: the box is never moved out of and is dropped after the
        // closure (field order), so the reference outlives every call
        let userdata: &'static TrampolineState = unsafe { &*(state.as_ref() as *const _) };
        let closure = Closure::new(cif.clone(), entry, userdata);
        let code = *closure.code_ptr() as usize;

        logger.log(BoundaryEvent::CallbackCreated {
            signature: descriptor.to_string(),
        });

        Ok(Self {
            liveness: Liveness::new(),
            _closure: closure,
            cif,
            state,
            descriptor,
            code,
        })
    }

    /// Native-callable address of the trampoline
    pub fn as_native_entry_point(&self) -> *const c_void {
        self.code as *const c_void
    }

    /// Argument value for a `FunctionPointer` parameter
    pub fn callback_ref(&self) -> CallbackRef {
        CallbackRef::new(
            self.code,
            self.descriptor.clone(),
            self.liveness.token(),
            self.state.faults.clone(),
        )
    }

    pub fn as_arg(&self) -> Value {
        Value::Callback(self.callback_ref())
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn signature(&self) -> &Signature {
        &self.state.signature
    }

    /// Times the entry point has been entered
    pub fn invocations(&self) -> usize {
        self.state.invocations.load(Ordering::Relaxed)
    }

    /// First failure recorded since the last take
    pub fn take_error(&self) -> Option<FfiError> {
        self.state.faults.take()
    }

    /// Call the entry point through the C ABI
    ///
    /// A failure inside the local function is returned as is.
    pub fn invoke(&self, args: &[Value]) -> FfiResult<Value> {
        let signature = &self.state.signature;
        if args.len() != signature.arity() {
            return Err(FfiError::ArityMismatch {
                expected: signature.arity(),
                got: args.len(),
            });
        }

        let mut ctx = MarshalContext::new(TextEncoding::default());
        for (arg, ty) in args.iter().zip(&signature.args) {
            ctx.push(arg, ty)?;
        }

        self.state.faults.take();
        let symbol = self.descriptor.to_string();
        // Safety: the cif is the one the closure was prepared with
        let result = unsafe { marshal::call_native(&self.cif, self.code, &signature.ret, &ctx, &symbol) };

        match self.state.faults.take() {
            Some(error) => Err(error),
            None => result,
        }
    }
}

fn callback_signature(descriptor: &TypeDescriptor) -> FfiResult<Signature> {
    const SYMBOL: &str = "callback";

    let signature = Signature::from_descriptor(descriptor)
        .ok_or_else(|| FfiError::signature(SYMBOL, format!("{} is not a function pointer", descriptor)))?;
    signature.validate(SYMBOL)?;

    let unsupported = |ty: &TypeDescriptor| {
        matches!(
            ty,
            TypeDescriptor::CString | TypeDescriptor::FunctionPointer { .. }
        )
    };
    if let Some(ty) = signature.args.iter().find(|ty| unsupported(ty)) {
        return Err(FfiError::signature(
            SYMBOL,
            format!("{} parameters are not supported in callbacks", ty),
        ));
    }
    if unsupported(&signature.ret) {
        return Err(FfiError::signature(
            SYMBOL,
            format!("{} results are not supported in callbacks", signature.ret),
        ));
    }
    Ok(signature)
}

impl fmt::Debug for CallbackTrampoline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackTrampoline")
            .field("descriptor", &self.descriptor.to_string())
            .field("code", &format_args!("{:#x}", self.code))
            .field("invocations", &self.invocations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::events::MemoryEventLogger;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn int_to_int() -> TypeDescriptor {
        TypeDescriptor::function(vec![TypeDescriptor::Int32], TypeDescriptor::Int32)
    }

    fn doubler() -> CallbackTrampoline {
        CallbackTrampoline::wrap(
            |args| match args {
                [Value::Int32(x)] => Ok(Value::Int32(x * 2)),
                _ => unreachable!("signature checked by the trampoline"),
            },
            int_to_int(),
        )
        .unwrap()
    }

    #[test]
    fn test_invoke_through_entry_point() {
        let trampoline = doubler();
        assert!(!trampoline.as_native_entry_point().is_null());
        assert_eq!(trampoline.invoke(&[Value::Int32(21)]), Ok(Value::Int32(42)));
        assert_eq!(trampoline.invoke(&[Value::Int32(-4)]), Ok(Value::Int32(-8)));
        assert_eq!(trampoline.invocations(), 2);
    }

    #[test]
    fn test_entry_point_is_a_c_function() {
        let trampoline = doubler();
        let f: extern "C" fn(i32) -> i32 =
            unsafe { std::mem::transmute(trampoline.as_native_entry_point()) };
        assert_eq!(f(5), 10);
    }

    #[rstest]
    #[case(TypeDescriptor::Int64, Value::Int64(-1 << 40))]
    #[case(TypeDescriptor::Int16, Value::Int16(-3))]
    #[case(TypeDescriptor::UInt32, Value::UInt32(u32::MAX))]
    #[case(TypeDescriptor::Double, Value::Double(0.25))]
    #[case(TypeDescriptor::Char, Value::Char(b'Z'))]
    fn test_identity_callbacks(#[case] ty: TypeDescriptor, #[case] value: Value) {
        let trampoline = CallbackTrampoline::wrap(
            |args| Ok(args[0].clone()),
            TypeDescriptor::function(vec![ty.clone()], ty),
        )
        .unwrap();
        assert_eq!(trampoline.invoke(&[value.clone()]), Ok(value));
    }

    #[test]
    fn test_pointer_arguments() {
        let int_ptr = TypeDescriptor::pointer(TypeDescriptor::Int32);
        let trampoline = CallbackTrampoline::wrap(
            |args| match args {
                [Value::Pointer(a), Value::Pointer(b)] => {
                    let (a, b) = unsafe { (a.read_scalar::<i32>()?, b.read_scalar::<i32>()?) };
                    Ok(Value::Int32(a - b))
                }
                _ => unreachable!(),
            },
            TypeDescriptor::function(vec![int_ptr.clone(), int_ptr], TypeDescriptor::Int32),
        )
        .unwrap();

        let (mut x, mut y) = (7i32, 10i32);
        let args = unsafe {
            [
                Value::Pointer(NativePtr::from_raw(&mut x as *mut i32 as *mut c_void, TypeDescriptor::Int32)),
                Value::Pointer(NativePtr::from_raw(&mut y as *mut i32 as *mut c_void, TypeDescriptor::Int32)),
            ]
        };
        assert_eq!(trampoline.invoke(&args), Ok(Value::Int32(-3)));
    }

    #[test]
    fn test_void_callback() {
        let trampoline =
            CallbackTrampoline::wrap(|_| Ok(Value::Void), TypeDescriptor::function(vec![], TypeDescriptor::Void))
                .unwrap();
        assert_eq!(trampoline.invoke(&[]), Ok(Value::Void));
    }

    #[rstest]
    #[case(TypeDescriptor::Int32)]
    #[case(TypeDescriptor::function(vec![TypeDescriptor::CString], TypeDescriptor::Int32))]
    #[case(TypeDescriptor::function(vec![], TypeDescriptor::CString))]
    #[case(TypeDescriptor::function(vec![TypeDescriptor::Void], TypeDescriptor::Int32))]
    fn test_unsupported_descriptors(#[case] descriptor: TypeDescriptor) {
        let result = CallbackTrampoline::wrap(|_| Ok(Value::Void), descriptor);
        assert!(matches!(result, Err(FfiError::SignatureMismatch { .. })));
    }

    #[test]
    fn test_error_becomes_zero_and_is_recorded() {
        let logger = Arc::new(MemoryEventLogger::new());
        let trampoline = CallbackTrampoline::wrap_with_logger(
            |_| Err(FfiError::UnsupportedType("nope".to_string())),
            int_to_int(),
            logger.clone(),
        )
        .unwrap();

        let f: extern "C" fn(i32) -> i32 =
            unsafe { std::mem::transmute(trampoline.as_native_entry_point()) };
        assert_eq!(f(9), 0);
        assert_eq!(
            trampoline.take_error(),
            Some(FfiError::UnsupportedType("nope".to_string()))
        );
        assert_eq!(trampoline.take_error(), None);
        assert!(logger
            .events()
            .iter()
            .any(|e| matches!(e, BoundaryEvent::CallbackFailed { .. })));
    }

    #[test]
    fn test_wrong_return_type_recorded() {
        let trampoline = CallbackTrampoline::wrap(|_| Ok(Value::Double(1.0)), int_to_int()).unwrap();
        assert!(matches!(
            trampoline.invoke(&[Value::Int32(1)]),
            Err(FfiError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_panic_does_not_unwind_into_native_code() {
        let trampoline = CallbackTrampoline::wrap(|_| panic!("boom"), int_to_int()).unwrap();
        match trampoline.invoke(&[Value::Int32(1)]) {
            Err(FfiError::NativeFault { reason, .. }) => assert!(reason.contains("boom")),
            other => panic!("expected NativeFault, got {:?}", other),
        }
    }

    #[test]
    fn test_callback_ref_dangles_after_drop() {
        let trampoline = doubler();
        let callback = trampoline.callback_ref();
        assert!(callback.is_alive());

        drop(trampoline);
        assert!(!callback.is_alive());
        assert_eq!(
            marshal::check_value(&int_to_int(), &Value::Callback(callback)),
            Err(FfiError::DanglingCallback)
        );
    }

    #[test]
    fn test_callback_ref_requires_matching_descriptor() {
        let trampoline = doubler();
        let other = TypeDescriptor::function(vec![TypeDescriptor::Int64], TypeDescriptor::Int32);
        assert!(matches!(
            marshal::check_value(&other, &trampoline.as_arg()),
            Err(FfiError::TypeMismatch { .. })
        ));
    }
}
