//! Boundary crossing benchmarks
//!
//! Compares sorting an `int` array through the C runtime's `qsort` with a
//! Rust comparator behind a trampoline against the library's own
//! `qsort_wrap`, and measures the fixed cost of a bound scalar call.

use bindings_runtime::ffi::{
    BufferView, CallbackTrampoline, LibraryLoader, NativeHandle, NativeSurface, Signature,
    SignatureBinder, TypeDescriptor, Value,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

fn fixture() -> NativeSurface {
    let path = bindings_fixture::library_path().to_string_lossy().into_owned();
    let handle: Arc<NativeHandle> = NativeHandle::open(&path).unwrap();
    NativeSurface::open(handle).unwrap()
}

fn comparator() -> TypeDescriptor {
    TypeDescriptor::function(
        vec![
            TypeDescriptor::pointer(TypeDescriptor::Int32),
            TypeDescriptor::pointer(TypeDescriptor::Int32),
        ],
        TypeDescriptor::Int32,
    )
}

fn ascending() -> CallbackTrampoline {
    CallbackTrampoline::wrap(
        |args| match args {
            [Value::Pointer(a), Value::Pointer(b)] => {
                let (a, b) = unsafe { (a.read_scalar::<i32>()?, b.read_scalar::<i32>()?) };
                Ok(Value::Int32(a.cmp(&b) as i32))
            }
            _ => Ok(Value::Int32(0)),
        },
        comparator(),
    )
    .unwrap()
}

fn libc_qsort() -> SignatureBinder {
    let libc = LibraryLoader::new().open_c_runtime().unwrap();
    unsafe {
        SignatureBinder::bind(
            &libc,
            "qsort",
            Signature::new(
                vec![
                    TypeDescriptor::pointer(TypeDescriptor::Void),
                    TypeDescriptor::USize,
                    TypeDescriptor::USize,
                    comparator(),
                ],
                TypeDescriptor::Void,
            ),
        )
    }
    .unwrap()
}

/// Deterministic shuffled input
fn unsorted(len: usize) -> Vec<i32> {
    (0..len as i32).map(|i| (i * 7919) % len as i32).collect()
}

// ============================================================================
// Scalar Calls
// ============================================================================

fn bench_scalar_call(c: &mut Criterion) {
    let surface = fixture();
    c.bench_function("func_ret_int", |b| {
        b.iter(|| surface.func_ret_int(black_box(42)).unwrap());
    });
    c.bench_function("func_many_args", |b| {
        b.iter(|| {
            surface
                .func_many_args(black_box(15), 18.1617, b'X', 32000)
                .unwrap()
        });
    });
}

// ============================================================================
// Sorting: trampoline comparator vs native comparator
// ============================================================================

fn bench_sort(c: &mut Criterion) {
    let surface = fixture();
    let qsort = libc_qsort();
    let cmp = ascending();

    let mut group = c.benchmark_group("sort");
    for len in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(len as u64));

        group.bench_with_input(BenchmarkId::new("trampoline", len), &len, |b, &len| {
            b.iter(|| {
                let mut data = unsorted(len);
                let mut view = BufferView::from_slice(&mut data);
                qsort
                    .call(&[
                        view.as_arg().unwrap(),
                        Value::USize(len),
                        Value::USize(std::mem::size_of::<i32>()),
                        cmp.as_arg(),
                    ])
                    .unwrap();
            });
        });

        group.bench_with_input(BenchmarkId::new("native", len), &len, |b, &len| {
            b.iter(|| {
                let mut data = unsorted(len);
                surface
                    .qsort_wrap(&mut BufferView::from_slice(&mut data))
                    .unwrap();
            });
        });
    }
    group.finish();
}

// ============================================================================
// Native buffers
// ============================================================================

fn bench_owned_buffer(c: &mut Criterion) {
    let surface = fixture();
    c.bench_function("gen_arr_1k_sum", |b| {
        b.iter(|| {
            let buffer = surface.gen_arr(black_box(1024)).unwrap();
            let view = buffer.borrow_view().unwrap();
            view.to_vec::<i32>().unwrap().iter().map(|&x| x as i64).sum::<i64>()
        });
    });
}

criterion_group!(benches, bench_scalar_call, bench_sort, bench_owned_buffer);
criterion_main!(benches);
