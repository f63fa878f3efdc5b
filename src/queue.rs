//! Bounded producer/consumer queue between the acquisition thread and the
//! caller.
//!
//! The queue is the sole mutable point shared by the two threads. It carries
//! payload slots plus two sentinels: `End`, pushed once when the source is
//! exhausted or the worker exits, and `Drained`, armed by the media backend
//! after `End` has been consumed so a second read past the end is
//! diagnosable.
//!
//! Overflow behavior is a property of the queue, not of the push site: the
//! producer installs one [`OverflowPolicy`] at construction.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// How long a stalled producer sleeps between high-water checks.
const BACKPRESSURE_POLL: Duration = Duration::from_millis(100);

/// One queue entry.
pub(crate) enum Slot<T> {
    Item(T),
    /// Source exhausted; no further items will arrive.
    End,
    /// A previous `End` has already been consumed.
    Drained,
}

/// Reaction when the queue grows past its high-water mark.
#[derive(Clone, Copy, Debug)]
pub(crate) enum OverflowPolicy {
    /// Stall the producer, polling until the queue drains below `low` or
    /// stop is requested. Keeps every item; only valid for sources that can
    /// wait (seekable inputs).
    WaitForSpace { high: usize, low: usize },
    /// Discard the `drop` oldest entries. Newest wins; for realtime sources
    /// that cannot wait.
    DropOldest { high: usize, drop: usize },
    /// Evict every second entry, halving the queue while preserving
    /// chronological spacing. Used by the camera backends.
    ThinByHalf { high: usize },
}

struct Inner<T> {
    slots: VecDeque<Slot<T>>,
    stop: bool,
}

pub(crate) struct FrameQueue<T> {
    inner: Mutex<Inner<T>>,
    /// Signaled on push; the consumer waits here.
    available: Condvar,
    /// Signaled on pop; a stalled producer waits here.
    drained: Condvar,
    policy: OverflowPolicy,
}

impl<T> std::fmt::Debug for FrameQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameQueue").field("policy", &self.policy).finish()
    }
}

impl<T> FrameQueue<T> {
    pub(crate) fn new(policy: OverflowPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: VecDeque::new(),
                stop: false,
            }),
            available: Condvar::new(),
            drained: Condvar::new(),
            policy,
        }
    }

    /// Producer side. Applies the overflow policy, then appends. May block
    /// under `WaitForSpace` until the consumer catches up or stop is
    /// requested.
    pub(crate) fn push(&self, item: T) {
        let mut inner = self.inner.lock().unwrap();
        match self.policy {
            OverflowPolicy::WaitForSpace { high, low } => {
                if inner.slots.len() > high {
                    while !inner.stop && inner.slots.len() >= low {
                        let (guard, _) = self
                            .drained
                            .wait_timeout(inner, BACKPRESSURE_POLL)
                            .unwrap();
                        inner = guard;
                    }
                }
            }
            OverflowPolicy::DropOldest { high, drop } => {
                if inner.slots.len() > high {
                    let keep = inner.slots.len().saturating_sub(drop);
                    while inner.slots.len() > keep {
                        inner.slots.pop_front();
                    }
                }
            }
            OverflowPolicy::ThinByHalf { high } => {
                if inner.slots.len() > high {
                    remove_every_second(&mut inner.slots);
                }
            }
        }
        inner.slots.push_back(Slot::Item(item));
        drop(inner);
        self.available.notify_one();
    }

    /// Marks the source as exhausted. Pushed once, by the worker, on exit.
    pub(crate) fn push_end(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.slots.push_back(Slot::End);
        drop(inner);
        self.available.notify_one();
    }

    /// Arms the already-drained sentinel after `End` was consumed.
    pub(crate) fn push_drained(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.slots.push_back(Slot::Drained);
        drop(inner);
        self.available.notify_one();
    }

    /// Consumer side. Blocks until a slot arrives or stop is requested;
    /// stop wins over pending items so a cancelled reader returns promptly.
    pub(crate) fn pop_blocking(&self) -> Slot<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.stop {
                return Slot::End;
            }
            if let Some(slot) = inner.slots.pop_front() {
                drop(inner);
                self.drained.notify_one();
                return slot;
            }
            inner = self.available.wait(inner).unwrap();
        }
    }

    /// Requests prompt shutdown and wakes both sides.
    pub(crate) fn request_stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stop = true;
        drop(inner);
        self.available.notify_all();
        self.drained.notify_all();
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.inner.lock().unwrap().stop
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().slots.len()
    }
}

fn remove_every_second<T>(slots: &mut VecDeque<Slot<T>>) {
    let mut index = 0;
    slots.retain(|_| {
        let keep = index % 2 == 0;
        index += 1;
        keep
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn drain_numbers(queue: &FrameQueue<u64>) -> Vec<u64> {
        let mut out = Vec::new();
        loop {
            match queue.pop_blocking() {
                Slot::Item(n) => out.push(n),
                Slot::End | Slot::Drained => return out,
            }
        }
    }

    #[test]
    fn fifo_order_then_end() {
        let queue = FrameQueue::new(OverflowPolicy::DropOldest { high: 100, drop: 90 });
        for n in 0..5 {
            queue.push(n);
        }
        queue.push_end();
        assert_eq!(drain_numbers(&queue), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn drop_oldest_keeps_the_newest_items() {
        let queue = FrameQueue::new(OverflowPolicy::DropOldest { high: 100, drop: 90 });
        for n in 0..150 {
            queue.push(n);
        }
        queue.push_end();
        let numbers = drain_numbers(&queue);
        assert!(numbers.len() <= 101 + 1);
        // Strictly increasing with a gap where the eviction happened.
        assert!(numbers.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*numbers.last().unwrap(), 149);
        assert!(numbers[0] > 0);
    }

    #[test]
    fn thin_by_half_keeps_every_second_entry() {
        let queue = FrameQueue::new(OverflowPolicy::ThinByHalf { high: 9 });
        for n in 0..11 {
            queue.push(n);
        }
        queue.push_end();
        let numbers = drain_numbers(&queue);
        // The first ten entries were thinned to the even-indexed ones before
        // the eleventh was appended.
        assert_eq!(numbers, vec![0, 2, 4, 6, 8, 10]);
    }

    #[test]
    fn wait_for_space_never_drops_and_stays_bounded() {
        let queue = Arc::new(FrameQueue::new(OverflowPolicy::WaitForSpace {
            high: 100,
            low: 80,
        }));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for n in 0..300u64 {
                    queue.push(n);
                }
                queue.push_end();
            })
        };

        let mut numbers = Vec::new();
        let mut max_len = 0;
        loop {
            max_len = max_len.max(queue.len());
            match queue.pop_blocking() {
                Slot::Item(n) => numbers.push(n),
                Slot::End | Slot::Drained => break,
            }
        }
        producer.join().unwrap();

        // One push may land past the high-water mark before the producer
        // starts stalling.
        assert!(max_len <= 101 + 1, "queue grew to {max_len}");
        assert_eq!(numbers, (0..300).collect::<Vec<_>>());
    }

    #[test]
    fn stop_wakes_a_blocked_consumer() {
        let queue: Arc<FrameQueue<u64>> = Arc::new(FrameQueue::new(OverflowPolicy::DropOldest {
            high: 100,
            drop: 90,
        }));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || matches!(queue.pop_blocking(), Slot::End))
        };
        thread::sleep(Duration::from_millis(20));
        queue.request_stop();
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn stop_unblocks_a_stalled_producer() {
        let queue = Arc::new(FrameQueue::new(OverflowPolicy::WaitForSpace {
            high: 2,
            low: 2,
        }));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for n in 0..10u64 {
                    queue.push(n);
                }
            })
        };
        thread::sleep(Duration::from_millis(50));
        queue.request_stop();
        producer.join().unwrap();
    }
}
