//! Thin helpers over the bevy task pools for uniform data parallel work

use bevy::tasks::{AsyncComputeTaskPool, ComputeTaskPool, TaskPool};

/// The pool running the short data parallel passes. Initialized on first use so the terrain also
/// works outside of a bevy App
pub(crate) fn compute_pool() -> &'static TaskPool {
    ComputeTaskPool::get_or_init(TaskPool::default)
}

/// The pool running whole jobs that may span several frames
pub(crate) fn async_pool() -> &'static TaskPool {
    AsyncComputeTaskPool::get_or_init(TaskPool::default)
}

/// Run `f` over consecutive `batch` sized slices of `items` on the compute pool and collect the
/// results in slice order. `f` receives the index of the first item of its slice
pub(crate) fn par_batches_mut<T, R, F>(items: &mut [T], batch: usize, f: F) -> Vec<R>
where
    T: Send,
    R: Send + 'static,
    F: Fn(usize, &mut [T]) -> R + Send + Sync,
{
    let f = &f;
    let chunks = items.chunks_mut(batch.max(1));
    compute_pool().scope(|scope| {
        for (i, chunk) in chunks.enumerate() {
            scope.spawn(async move { f(i * batch, chunk) });
        }
    })
}

#[test]
fn test_batches_keep_order() {
    let mut items: Vec<usize> = (0..1000).collect();
    let starts = par_batches_mut(&mut items, 64, |start, slice| {
        for v in slice.iter_mut() {
            *v *= 2;
        }
        start
    });
    assert_eq!((0..1000).step_by(64).collect::<Vec<_>>(), starts);
    assert!(items.iter().enumerate().all(|(i, v)| *v == i * 2));
}
