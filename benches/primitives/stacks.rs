//! Single threaded cost of the intrusive and the ABA-tagged stack.

use std::hint::black_box;
use std::ptr::{self, NonNull};
use std::sync::atomic::AtomicPtr;

use criterion::{BenchmarkId, Criterion};
use saavy_rt::sync::{AtomicBits, AtomicIntrusiveStack, Linked, MpmcStack};

#[repr(align(64))]
struct Node {
    next: AtomicPtr<Node>,
}

unsafe impl Linked for Node {
    fn next_slot(&self) -> &AtomicPtr<Node> {
        &self.next
    }
}

const RUNS: &[usize] = &[16, 256];

pub fn bench_stacks(c: &mut Criterion) {
    let mut group = c.benchmark_group("primitives/stacks");

    for &run in RUNS {
        let nodes: Vec<Node> = (0..run)
            .map(|_| Node {
                next: AtomicPtr::new(ptr::null_mut()),
            })
            .collect();

        let intrusive = AtomicIntrusiveStack::new();
        group.bench_with_input(BenchmarkId::new("intrusive_push_drain", run), &run, |b, _| {
            b.iter(|| {
                for node in &nodes {
                    unsafe { intrusive.push(NonNull::from(node)) };
                }
                black_box(intrusive.pop_reversed().count())
            })
        });

        let mpmc = MpmcStack::new();
        group.bench_with_input(BenchmarkId::new("mpmc_push_pop", run), &run, |b, _| {
            b.iter(|| {
                for node in &nodes {
                    unsafe { mpmc.push(NonNull::from(node)) };
                }
                let mut popped = 0;
                while mpmc.pop().is_some() {
                    popped += 1;
                }
                black_box(popped)
            })
        });
    }

    let bits = AtomicBits::new(1024);
    group.bench_function("bits_toggle_1024", |b| {
        b.iter(|| {
            for pos in 0..bits.size() {
                bits.xor(pos, true);
            }
            black_box(bits.all(false))
        })
    });

    group.finish();
}
