//! Bounded worker pool for the persona and section fan-out stages.
//!
//! Contract: at most `max_workers` tasks run concurrently, and results come
//! back in input order regardless of completion order. Tasks must not share
//! mutable state; each gets its own input item.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared flag that degrades the pool to one concurrent task.
///
/// Set by the LM resilience layer after repeated rate-limit errors; the pool
/// checks it when sizing itself, so a stage started under pressure runs
/// sequentially instead of amplifying the stampede.
#[derive(Debug, Default, Clone)]
pub struct SafeMode {
    flag: Arc<AtomicBool>,
}

impl SafeMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engage(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            tracing::warn!("safe mode engaged: worker pools degrade to 1 concurrent task");
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Run `task` over `items` with at most `max_workers` concurrent executions.
///
/// Results are collected in input order. A panicking task poisons only its
/// own slot; the panic is propagated once all workers have drained.
pub fn map_bounded<T, R, F>(max_workers: usize, safe_mode: &SafeMode, items: Vec<T>, task: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(usize, T) -> R + Sync,
{
    let n = items.len();
    if n == 0 {
        return Vec::new();
    }

    let workers = if safe_mode.is_engaged() {
        1
    } else {
        max_workers.max(1).min(n)
    };

    if workers == 1 {
        return items
            .into_iter()
            .enumerate()
            .map(|(i, item)| task(i, item))
            .collect();
    }

    let queue: Mutex<VecDeque<(usize, T)>> = Mutex::new(items.into_iter().enumerate().collect());
    let results: Mutex<Vec<Option<R>>> = Mutex::new((0..n).map(|_| None).collect());

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let next = queue.lock().expect("worker queue poisoned").pop_front();
                let Some((idx, item)) = next else { break };
                let out = task(idx, item);
                results.lock().expect("worker results poisoned")[idx] = Some(out);
            });
        }
    });

    results
        .into_inner()
        .expect("worker results poisoned")
        .into_iter()
        .map(|slot| slot.expect("worker task did not produce a result"))
        .collect()
}
