//! Exclusive interval locking over virtual sector ranges (§5).
//!
//! The source this was distilled from models this as a condition variable:
//! a waiter blocks an OS thread until the lock-holder notifies on release.
//! That's wrong for a cooperative single-threaded scheduler — blocking a
//! thread here would starve every other task, including the one expected to
//! release the lock. `tokio::sync::Notify` is the idiomatic replacement: it
//! suspends only the waiting task, handing the executor back to everyone
//! else, which is exactly what "cooperative" is supposed to mean.
//!
//! Fairness is resolved as FIFO among *overlapping* claims (§9's open
//! question): a later request only has to wait behind an earlier one if
//! their intervals actually intersect. Two callers locking disjoint sector
//! ranges still run concurrently — serializing all of them for fairness
//! would defeat the cache's one real scalability property.

use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};

use crate::intervalset::{Interval, IntervalSet};

#[derive(Debug, Default)]
struct State {
    locked: IntervalSet,
    /// Arrival-ordered claims not yet granted.
    pending: VecDeque<(u64, Interval)>,
    next_ticket: u64,
}

fn blocked(state: &State, ticket: u64, interval: Interval) -> bool {
    if state.locked.intersects(interval) {
        return true;
    }
    state
        .pending
        .iter()
        .take_while(|(id, _)| *id != ticket)
        .any(|(_, other)| other.start <= interval.end && interval.start <= other.end)
}

/// Exclusive, interval-granularity locking for the range-lock cache.
#[derive(Debug, Default)]
pub struct RangeLocks {
    state: Mutex<State>,
    notify: Notify,
}

impl RangeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with exclusive ownership of `interval`, waiting out any
    /// overlapping claim that arrived earlier.
    pub async fn with_lock<F, Fut, T>(&self, interval: Interval, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let ticket = {
            let mut state = self.state.lock().await;
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.pending.push_back((ticket, interval));
            ticket
        };

        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if !blocked(&state, ticket, interval) {
                    state.pending.retain(|(id, _)| *id != ticket);
                    state.locked.insert(interval);
                    break;
                }
            }
            notified.await;
        }

        let result = f().await;

        {
            let mut state = self.state.lock().await;
            state.locked.remove(interval);
        }
        self.notify.notify_waiters();

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn disjoint_intervals_run_concurrently() {
        let locks = Arc::new(RangeLocks::new());
        let counter = Arc::new(AtomicU32::new(0));

        let l1 = locks.clone();
        let c1 = counter.clone();
        let a = tokio::spawn(async move {
            l1.with_lock(Interval::new(0, 9), || async {
                c1.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        });

        let l2 = locks.clone();
        let c2 = counter.clone();
        let b = tokio::spawn(async move {
            l2.with_lock(Interval::new(100, 109), || async {
                c2.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        });

        a.await.unwrap();
        b.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn overlapping_claims_serialize() {
        let locks = Arc::new(RangeLocks::new());
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let l1 = locks.clone();
        let o1 = order.clone();
        let first = locks
            .with_lock(Interval::new(0, 9), || async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                o1.lock().await.push(1);
            });

        let o2 = order.clone();
        let second = l1.with_lock(Interval::new(5, 15), || async move {
            o2.lock().await.push(2);
        });

        tokio::join!(first, second);
        assert_eq!(*order.lock().await, vec![1, 2]);
    }
}
