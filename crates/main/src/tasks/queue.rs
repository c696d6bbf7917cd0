////////////////////////////////////////////////////////////////////////////////
// This file is part of "Pons", an embeddable cross-runtime                   //
// interoperability platform.                                                 //
//                                                                            //
// This work is proprietary software with source-available code.              //
//                                                                            //
// To copy, use, distribute, or contribute to this work, you must agree to    //
// the terms of the General License Agreement:                                //
//                                                                            //
// https://github.com/Eliah-Lakhin/pons/blob/master/EULA.md                   //
//                                                                            //
// The agreement grants a Basic Commercial License, allowing you to use       //
// this work in non-commercial and limited commercial products with a total   //
// gross revenue cap. To remove this commercial limit for one of your         //
// products, you must acquire a Full Commercial License.                      //
//                                                                            //
// If you contribute to the source code, documentation, or related materials, //
// you must grant me an exclusive license to these contributions.             //
// Contributions are governed by the "Contributions" section of the General   //
// License Agreement.                                                         //
//                                                                            //
// Copying the work in parts is strictly forbidden, except as permitted       //
// under the General License Agreement.                                       //
//                                                                            //
// If you do not or cannot agree to the terms of this Agreement,              //
// do not use this work.                                                      //
//                                                                            //
// This work is provided "as is", without any warranties, express or implied, //
// except where such disclaimers are legally invalid.                         //
//                                                                            //
// Copyright (c) 2024 Ilya Lakhin (Илья Александрович Лахин).                 //
// All rights reserved.                                                       //
////////////////////////////////////////////////////////////////////////////////

use std::{
    collections::VecDeque,
    fmt::{Debug, Formatter},
    sync::{Condvar, Mutex},
};

use log::trace;

use crate::tasks::TASKS_LOG;

/// An unbounded multi-producer, single-consumer blocking queue of opaque
/// text payloads with a one-shot termination signal.
///
/// Any number of threads may [push](Self::push) items; the dedicated
/// consumer thread [pops](Self::pop) them in strict FIFO order, blocking
/// while the queue is empty. [Notify](Self::notify) unblocks a waiting
/// consumer that has nothing left to drain.
///
/// The empty string is reserved as the shutdown sentinel of the payload
/// protocol: `pop` returns it once the queue is terminating and drained, and
/// producers must never push it.
pub struct ConcurrentQueue {
    state: Mutex<QueueState>,
    signal: Condvar,
}

impl Default for ConcurrentQueue {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for ConcurrentQueue {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        let guard = self.state.lock().unwrap_or_else(|poison| poison.into_inner());

        formatter
            .debug_struct("ConcurrentQueue")
            .field("pending", &guard.items.len())
            .field("terminating", &guard.terminating)
            .finish()
    }
}

impl ConcurrentQueue {
    #[inline(always)]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                terminating: false,
            }),
            signal: Condvar::new(),
        }
    }

    /// Appends `item` to the back of the queue and wakes one waiting
    /// consumer.
    ///
    /// Pushing never blocks the producer. Items pushed after
    /// [notify](Self::notify) are still delivered.
    pub fn push(&self, item: impl Into<String>) {
        let item = item.into();

        debug_assert!(
            !item.is_empty(),
            "Empty payload pushed into the concurrent queue.",
        );

        let mut guard = self.state.lock().unwrap_or_else(|poison| poison.into_inner());

        guard.items.push_back(item);

        drop(guard);

        self.signal.notify_one();
    }

    /// Removes and returns the front item, blocking while the queue is empty
    /// and not terminating.
    ///
    /// Returns the empty sentinel once the queue is terminating and has no
    /// pending items. Pending items are always drained first: termination
    /// does not discard them.
    pub fn pop(&self) -> String {
        let mut guard = self.state.lock().unwrap_or_else(|poison| poison.into_inner());

        loop {
            if let Some(item) = guard.items.pop_front() {
                return item;
            }

            if guard.terminating {
                return String::new();
            }

            // The emptiness re-check on every wake guards against spurious
            // wakeups and racing producers.
            guard = self
                .signal
                .wait(guard)
                .unwrap_or_else(|poison| poison.into_inner());
        }
    }

    /// Signals termination and wakes one waiting consumer.
    ///
    /// The signal is one-way and irreversible. The queue remains usable:
    /// `push` still enqueues, and `pop` still drains pending items,
    /// returning the sentinel only when the queue is empty.
    pub fn notify(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|poison| poison.into_inner());

        guard.terminating = true;

        drop(guard);

        trace!(target: TASKS_LOG, "Queue termination signaled.");

        self.signal.notify_one();
    }

    /// Returns the current number of pending items.
    pub fn len(&self) -> usize {
        let guard = self.state.lock().unwrap_or_else(|poison| poison.into_inner());

        guard.items.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct QueueState {
    items: VecDeque<String>,
    terminating: bool,
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{mpsc::channel, Arc},
        thread,
        time::Duration,
    };

    use crate::tasks::queue::ConcurrentQueue;

    #[test]
    fn test_fifo_order() {
        let queue = ConcurrentQueue::new();

        queue.push("A");
        queue.push("B");
        queue.push("C");

        assert_eq!(queue.len(), 3);

        assert_eq!(queue.pop(), "A");
        assert_eq!(queue.pop(), "B");
        assert_eq!(queue.pop(), "C");

        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(ConcurrentQueue::new());

        let (sender, receiver) = channel();

        let consumer = {
            let queue = Arc::clone(&queue);

            thread::spawn(move || {
                let _ = sender.send(queue.pop());
            })
        };

        // The consumer has nothing to pop yet.
        assert!(receiver
            .recv_timeout(Duration::from_millis(100))
            .is_err());

        queue.push("payload");

        assert_eq!(
            receiver
                .recv_timeout(Duration::from_secs(10))
                .expect("consumer delivers the item"),
            "payload",
        );

        consumer.join().expect("consumer thread success");
    }

    #[test]
    fn test_notify_unblocks_empty_waiter() {
        let queue = Arc::new(ConcurrentQueue::new());

        let consumer = {
            let queue = Arc::clone(&queue);

            thread::spawn(move || queue.pop())
        };

        // Give the consumer a chance to block first.
        thread::sleep(Duration::from_millis(50));

        queue.notify();

        assert_eq!(consumer.join().expect("consumer thread success"), "");
    }

    #[test]
    fn test_notify_before_pop_returns_sentinel() {
        let queue = ConcurrentQueue::new();

        queue.notify();

        assert_eq!(queue.pop(), "");
    }

    #[test]
    fn test_pending_items_drain_after_notify() {
        let queue = ConcurrentQueue::new();

        queue.push("A");
        queue.push("B");

        queue.notify();

        assert_eq!(queue.pop(), "A");
        assert_eq!(queue.pop(), "B");
        assert_eq!(queue.pop(), "");
        assert_eq!(queue.pop(), "");
    }

    #[test]
    fn test_push_after_notify_still_delivered() {
        let queue = ConcurrentQueue::new();

        queue.notify();

        queue.push("late");

        assert_eq!(queue.pop(), "late");
        assert_eq!(queue.pop(), "");
    }

    #[test]
    fn test_producers_preserve_external_order() {
        let queue = Arc::new(ConcurrentQueue::new());

        let (sender, receiver) = channel();

        let first = {
            let queue = Arc::clone(&queue);

            thread::spawn(move || {
                queue.push("X");

                // The happens-before edge between the two producers.
                let _ = sender.send(());
            })
        };

        let second = {
            let queue = Arc::clone(&queue);

            thread::spawn(move || {
                receiver.recv().expect("first producer signal");

                queue.push("Y");
            })
        };

        first.join().expect("first producer success");
        second.join().expect("second producer success");

        assert_eq!(queue.pop(), "X");
        assert_eq!(queue.pop(), "Y");
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        const PRODUCERS: usize = 4;
        const ITEMS: usize = 100;

        let queue = Arc::new(ConcurrentQueue::new());

        let producers = (0..PRODUCERS)
            .map(|producer| {
                let queue = Arc::clone(&queue);

                thread::spawn(move || {
                    for item in 0..ITEMS {
                        queue.push(format!("{producer}:{item}"));
                    }
                })
            })
            .collect::<Vec<_>>();

        for producer in producers {
            producer.join().expect("producer thread success");
        }

        let mut next = [0; PRODUCERS];

        for _ in 0..PRODUCERS * ITEMS {
            let item = queue.pop();

            let (producer, item) = item.split_once(':').expect("well-formed payload");

            let producer = producer.parse::<usize>().expect("producer index");
            let item = item.parse::<usize>().expect("item index");

            assert_eq!(item, next[producer]);

            next[producer] += 1;
        }

        assert!(queue.is_empty());
    }
}
