use std::panic::{self, AssertUnwindSafe};

use crossbeam::channel::Receiver;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::Error;

/// Handle to a task submitted with [`Scheduler::submit`]
pub struct TaskHandle<T> {
    name: &'static str,
    rx: Receiver<std::result::Result<T, String>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task has finished and returns its output.
    pub fn join(self) -> Result<T> {
        match self.rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(msg)) => Err(Error::TaskFailed(format!("{}: {}", self.name, msg))),
            Err(_) => Err(Error::TaskFailed(format!(
                "{}: worker dropped the task",
                self.name
            ))),
        }
    }
}

/// Bounded worker pool. All work runs to completion, there is no cancellation.
pub struct Scheduler {
    pool: ThreadPool,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("adamerge-worker-{}", i))
            .build()
            .map_err(|e| Error::InvalidState(format!("Failed to build worker pool: {}", e)))?;

        tracing::debug!(threads = config.threads, "scheduler started");
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Spawn a detached task and return a handle to join on.
    pub fn submit<F, T>(&self, name: &'static str, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = crossbeam::channel::bounded(1);
        self.pool.spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message);
            if result.is_err() {
                tracing::error!(task = name, "task panicked");
            }
            let _ = tx.send(result);
        });
        TaskHandle { name, rx }
    }

    /// Runs `f` once per item on the pool and waits for every task.
    ///
    /// Items may borrow from the caller, so each task can be handed an
    /// exclusive `&mut` into a shared arena. Outputs keep the item order. If
    /// any task fails the first error is returned, after all tasks finished.
    pub fn scatter<I, F, T>(&self, name: &'static str, items: I, f: F) -> Result<Vec<T>>
    where
        I: IntoIterator,
        I::Item: Send,
        F: Fn(I::Item) -> Result<T> + Sync,
        T: Send,
    {
        let items: Vec<I::Item> = items.into_iter().collect();
        let mut slots: Vec<Option<Result<T>>> = Vec::with_capacity(items.len());
        slots.resize_with(items.len(), || None);

        let f = &f;
        self.pool.in_place_scope(|s| {
            for (slot, item) in slots.iter_mut().zip(items) {
                s.spawn(move |_| {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| f(item)))
                        .unwrap_or_else(|p| {
                            Err(Error::TaskFailed(format!("{}: {}", name, panic_message(p))))
                        });
                    *slot = Some(result);
                });
            }
        });

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(Error::TaskFailed(format!("{}: task produced no result", name)))
                })
            })
            .collect()
    }

    /// Runs `background` on the pool while `foreground` runs on the calling
    /// thread, then joins both.
    pub fn fork<B, F, RB, RF>(&self, background: B, foreground: F) -> Result<(RB, RF)>
    where
        B: FnOnce() -> RB + Send,
        RB: Send,
        F: FnOnce() -> RF,
    {
        let mut bg: Option<std::result::Result<RB, String>> = None;

        let fg = self.pool.in_place_scope(|s| {
            s.spawn(|_| {
                bg = Some(panic::catch_unwind(AssertUnwindSafe(background)).map_err(panic_message));
            });
            foreground()
        });

        match bg {
            Some(Ok(value)) => Ok((value, fg)),
            Some(Err(msg)) => Err(Error::TaskFailed(format!("background: {}", msg))),
            None => Err(Error::TaskFailed("background: task produced no result".into())),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn scheduler(threads: usize) -> Scheduler {
        Scheduler::new(&SchedulerConfig::default().threads(threads)).unwrap()
    }

    #[test]
    fn test_submit_and_join() -> Result<()> {
        let scheduler = scheduler(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let counter = counter.clone();
                scheduler.submit("count", move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    i * 2
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.join()?);
        }

        assert_eq!(results, (0..8).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        Ok(())
    }

    #[test]
    fn test_submit_panic_surfaces_as_error() {
        let scheduler = scheduler(1);
        let handle = scheduler.submit("explode", || -> usize { panic!("boom") });
        match handle.join() {
            Err(Error::TaskFailed(msg)) => assert!(msg.contains("boom")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_scatter_mutates_each_item_exclusively() -> Result<()> {
        let scheduler = scheduler(4);
        let mut values = vec![1u64, 2, 3, 4, 5];

        let doubled = scheduler.scatter("double", values.iter_mut(), |v| {
            *v *= 2;
            Ok(*v)
        })?;

        assert_eq!(doubled, vec![2, 4, 6, 8, 10]);
        assert_eq!(values, vec![2, 4, 6, 8, 10]);
        Ok(())
    }

    #[test]
    fn test_scatter_waits_for_all_before_error() {
        let scheduler = scheduler(2);
        let finished = AtomicUsize::new(0);

        let result = scheduler.scatter("mixed", 0..6, |i| {
            finished.fetch_add(1, Ordering::SeqCst);
            if i == 3 {
                Err(Error::InvalidState("three".into()))
            } else {
                Ok(i)
            }
        });

        assert!(matches!(result, Err(Error::InvalidState(_))));
        assert_eq!(finished.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_scatter_empty() -> Result<()> {
        let scheduler = scheduler(1);
        let out: Vec<u32> = scheduler.scatter("none", Vec::<u32>::new(), Ok)?;
        assert!(out.is_empty());
        Ok(())
    }

    #[test]
    fn test_fork_joins_background() -> Result<()> {
        let scheduler = scheduler(1);
        let data = vec![1, 2, 3];

        let (bg, fg) = scheduler.fork(|| data.iter().sum::<i32>(), || data.len())?;

        assert_eq!(bg, 6);
        assert_eq!(fg, 3);
        Ok(())
    }

    #[test]
    fn test_fork_nested_scatter() -> Result<()> {
        let scheduler = scheduler(1);

        let (bg, fg) = scheduler.fork(
            || 40,
            || scheduler.scatter("inner", 0..4, |i| Ok(i + 1)),
        )?;

        assert_eq!(bg, 40);
        assert_eq!(fg?, vec![1, 2, 3, 4]);
        Ok(())
    }
}
