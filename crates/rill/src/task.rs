//! Cooperative task spawning.
//!
//! The whole graph runs on one cooperative thread; the only things that
//! ever suspend are projection resolvers. This module is the single place
//! that spawns tasks for them: a thread-local single-threaded executor plus
//! an abort-on-drop [`TaskHandle`].
//!
//! Mutations never block on the executor. Callers pump it explicitly with
//! [`drain`] (typically once per logical tick, or after a batch of
//! mutations in tests) and every spawned worker runs until it stalls.

use std::cell::RefCell;
use std::future::Future;

use futures_executor::{LocalPool, LocalSpawner};
use futures_util::FutureExt;
use futures_util::future::AbortHandle;
use futures_util::task::LocalSpawnExt;

thread_local! {
    static RUNTIME: (RefCell<LocalPool>, LocalSpawner) = {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        (RefCell::new(pool), spawner)
    };
}

/// Handle to a spawned task. Dropping it aborts the task at its next
/// suspension point.
pub struct TaskHandle {
    abort: AbortHandle,
}

impl TaskHandle {
    /// Aborts the task without consuming the handle.
    pub fn abort(&self) {
        self.abort.abort();
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

/// Spawns a task on the thread-local executor.
///
/// The task does not run until [`drain`] is called.
pub fn spawn(future: impl Future<Output = ()> + 'static) -> TaskHandle {
    let (abortable, abort) = {
        let (future, handle) = futures_util::future::abortable(future);
        (future.map(|_aborted| ()), handle)
    };
    RUNTIME.with(|(_, spawner)| {
        spawner
            .spawn_local(abortable)
            .expect("task executor is gone");
    });
    TaskHandle { abort }
}

/// Runs every spawned task until all of them stall.
///
/// Must not be called from inside a task.
pub fn drain() {
    RUNTIME.with(|(pool, _)| pool.borrow_mut().run_until_stalled());
}

/// Yields to the executor once, re-scheduling the task immediately.
pub async fn yield_now() {
    let mut yielded = false;
    std::future::poll_fn(move |cx| {
        if yielded {
            std::task::Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            std::task::Poll::Pending
        }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use futures_channel::mpsc;
    use futures_util::StreamExt;

    #[test]
    fn spawned_task_runs_on_drain() {
        let ran = Rc::new(Cell::new(false));
        let handle = {
            let ran = Rc::clone(&ran);
            spawn(async move { ran.set(true) })
        };

        assert!(!ran.get());
        drain();
        assert!(ran.get());
        drop(handle);
    }

    #[test]
    fn dropping_the_handle_aborts_a_pending_task() {
        let (tx, mut rx) = mpsc::unbounded::<u32>();
        let seen = Rc::new(Cell::new(0u32));

        let handle = {
            let seen = Rc::clone(&seen);
            spawn(async move {
                while let Some(event) = rx.next().await {
                    seen.set(event);
                }
            })
        };

        tx.unbounded_send(1).unwrap();
        drain();
        assert_eq!(seen.get(), 1);

        drop(handle);
        tx.unbounded_send(2).unwrap();
        drain();
        assert_eq!(seen.get(), 1);
    }
}
