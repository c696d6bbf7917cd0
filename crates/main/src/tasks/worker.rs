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
    io,
    mem::take,
    thread::{Builder, JoinHandle},
};

use lady_deirdre::sync::Shared;
use log::{error, trace};

use crate::tasks::{queue::ConcurrentQueue, TASKS_LOG};

/// A dedicated consumer thread draining a [ConcurrentQueue].
///
/// The worker pops items in a loop and feeds each one to the handler until
/// the shutdown sentinel arrives. Dropping the worker signals
/// [notify](ConcurrentQueue::notify) on the queue and joins the thread, so
/// pending items pushed before the drop are still handled.
pub struct QueueWorker {
    queue: Shared<ConcurrentQueue>,
    handle: Option<JoinHandle<()>>,
}

impl QueueWorker {
    /// Spawns a named consumer thread over `queue`.
    ///
    /// Thread creation failures surface the underlying
    /// [Error](std::io::Error) of the spawn attempt.
    pub fn spawn(
        name: impl AsRef<str>,
        queue: Shared<ConcurrentQueue>,
        mut handler: impl FnMut(String) + Send + 'static,
    ) -> io::Result<Self> {
        let name = String::from(name.as_ref());

        let handle = {
            let queue = queue.clone();
            let name = name.clone();

            Builder::new().name(name.clone()).spawn(move || {
                trace!(target: TASKS_LOG, "{name} Thread initialized.");

                loop {
                    let item = queue.as_ref().pop();

                    if item.is_empty() {
                        break;
                    }

                    handler(item);
                }

                trace!(target: TASKS_LOG, "{name} Thread finishing.");
            })?
        };

        Ok(Self {
            queue,
            handle: Some(handle),
        })
    }

    /// Grants access to the consumed queue, e.g. for pushing work items.
    #[inline(always)]
    pub fn queue(&self) -> &ConcurrentQueue {
        self.queue.as_ref()
    }
}

impl Drop for QueueWorker {
    fn drop(&mut self) {
        let Some(handle) = take(&mut self.handle) else {
            return;
        };

        self.queue.as_ref().notify();

        let name = String::from(handle.thread().name().unwrap_or(""));

        trace!(target: TASKS_LOG, "{name} Thread join...");

        match handle.join() {
            Ok(()) => {
                trace!(target: TASKS_LOG, "{name} Thread released.");
            }

            Err(_) => {
                error!(target: TASKS_LOG, "{name} Thread release failure.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use lady_deirdre::sync::Shared;

    use crate::tasks::{queue::ConcurrentQueue, worker::QueueWorker};

    #[test]
    fn test_worker_drains_items() {
        let queue = Shared::new(ConcurrentQueue::new());

        let collected = Arc::new(Mutex::new(Vec::new()));

        let worker = {
            let collected = Arc::clone(&collected);

            QueueWorker::spawn("TestConsumer", queue.clone(), move |item| {
                collected
                    .lock()
                    .unwrap_or_else(|poison| poison.into_inner())
                    .push(item);
            })
            .expect("worker thread spawn")
        };

        worker.queue().push("A");
        worker.queue().push("B");
        worker.queue().push("C");

        // The drop path signals termination and joins the consumer, so the
        // pending items are drained first.
        drop(worker);

        let collected = collected
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());

        assert_eq!(collected.as_slice(), ["A", "B", "C"]);

        assert!(queue.as_ref().is_empty());
    }

    #[test]
    fn test_worker_stops_without_items() {
        let queue = Shared::new(ConcurrentQueue::new());

        let worker = QueueWorker::spawn("IdleConsumer", queue, |_| ())
            .expect("worker thread spawn");

        drop(worker);
    }

    #[test]
    fn test_worker_stops_on_manual_notify() {
        let queue = Shared::new(ConcurrentQueue::new());

        let worker = QueueWorker::spawn("ManualConsumer", queue.clone(), |_| ())
            .expect("worker thread spawn");

        queue.as_ref().push("payload");
        queue.as_ref().notify();

        drop(worker);

        assert!(queue.as_ref().is_empty());
    }
}
