//! Unbounded async FIFO with a close sentinel.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::oneshot;

/// An unbounded FIFO whose `pop` suspends until a value arrives.
///
/// Two parallel backlogs: buffered-but-unconsumed values and waiting
/// consumers; at most one is non-empty at any time (a push satisfies a
/// waiter immediately when one exists). `close` wakes every waiter with the
/// end sentinel (`None`) and discards buffered values; afterwards pops
/// return `None` immediately and pushes are warned no-ops.
pub struct AsyncQueue<T> {
    state: Mutex<State<T>>,
}

struct State<T> {
    open: bool,
    buffered: VecDeque<T>,
    waiters: VecDeque<oneshot::Sender<Option<T>>>,
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AsyncQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                open: true,
                buffered: VecDeque::new(),
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn push(&self, value: T) {
        let mut state = self.lock();

        if !state.open {
            tracing::warn!("ignoring push to closed AsyncQueue");
            return;
        }

        let mut value = value;
        loop {
            match state.waiters.pop_front() {
                Some(waiter) => match waiter.send(Some(value)) {
                    Ok(()) => return,
                    // Waiter gave up (dropped its future); try the next one.
                    Err(returned) => match returned {
                        Some(v) => value = v,
                        None => return,
                    },
                },
                None => {
                    state.buffered.push_back(value);
                    return;
                }
            }
        }
    }

    /// Next value, suspending while the queue is open and empty. `None` is
    /// the end sentinel.
    pub async fn pop(&self) -> Option<T> {
        let receiver = {
            let mut state = self.lock();

            if let Some(value) = state.buffered.pop_front() {
                return Some(value);
            }
            if !state.open {
                return None;
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        // A dropped sender means the queue itself was dropped: closed.
        receiver.await.unwrap_or(None)
    }

    pub fn close(&self) {
        let mut state = self.lock();
        state.open = false;
        state.buffered.clear();
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(None);
        }
    }

    pub fn is_closed(&self) -> bool {
        !self.lock().open
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn push_then_pop_is_fifo() {
        let queue = AsyncQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(2));
        assert_eq!(queue.pop().await, Some(3));
    }

    #[tokio::test]
    async fn pop_suspends_until_push() {
        let queue = Arc::new(AsyncQueue::new());

        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(42);
        assert_eq!(popper.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn close_wakes_waiters_and_discards_buffered() {
        let queue = Arc::new(AsyncQueue::<i32>::new());

        // M = 2 waiting consumers.
        let poppers: Vec<_> = (0..2)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.pop().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // N buffered values cannot coexist with waiters, so buffer after
        // draining the waiters is exercised separately below.
        queue.close();

        for popper in poppers {
            assert_eq!(popper.await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn buffered_values_are_discarded_on_close() {
        let queue = AsyncQueue::new();
        queue.push("a");
        queue.push("b");
        queue.close();

        // Poppers after close get the sentinel, not the discarded values.
        assert_eq!(queue.pop().await, None);
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn push_after_close_is_ignored() {
        let queue = AsyncQueue::new();
        queue.close();
        queue.push(1);
        assert_eq!(queue.pop().await, None);
    }
}
