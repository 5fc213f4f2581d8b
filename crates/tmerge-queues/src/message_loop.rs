use std::cell::Cell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use tmerge_types::QueueId;

use crate::error::Result;
use crate::memory::MessageLoopTaskQueues;
use crate::task_runner::TaskRunner;

thread_local! {
    static CURRENT_QUEUE: Cell<Option<QueueId>> = const { Cell::new(None) };
}

/// The queue whose message loop runs on the calling thread, if any.
pub fn current_task_queue_id() -> Option<QueueId> {
    CURRENT_QUEUE.with(Cell::get)
}

/// A named OS thread servicing one task queue.
///
/// The loop runs tasks from its queue (and from any queue it owns through a
/// merge) until terminated. Dropping the loop terminates it and joins the
/// thread, then disposes the queue.
pub struct MessageLoop {
    name: String,
    queue_id: QueueId,
    queues: Arc<MessageLoopTaskQueues>,
    thread: Option<JoinHandle<()>>,
}

impl MessageLoop {
    /// Create a queue in `queues` and spawn a thread that services it.
    pub fn spawn(name: &str, queues: Arc<MessageLoopTaskQueues>) -> Result<Self> {
        let queue_id = queues.create_task_queue();
        let loop_queues = queues.clone();
        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(queue_id, &loop_queues));
        let thread = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                queues.dispose(queue_id);
                return Err(e.into());
            }
        };
        debug!(name, queue = %queue_id, "message loop started");
        Ok(Self {
            name: name.to_string(),
            queue_id,
            queues,
            thread: Some(thread),
        })
    }

    /// The queue this loop services.
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// The thread name given at spawn time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A posting handle for this loop's queue.
    pub fn task_runner(&self) -> TaskRunner {
        TaskRunner::new(self.queue_id, self.queues.clone())
    }

    /// Stop the loop and wait for its thread to exit.
    ///
    /// A task already running finishes first. Calling this from the loop's
    /// own thread only signals termination.
    pub fn terminate(&mut self) {
        self.queues.terminate(self.queue_id);
        let Some(handle) = self.thread.take() else {
            return;
        };
        if current_task_queue_id() == Some(self.queue_id) {
            return;
        }
        if handle.join().is_err() {
            warn!(name = %self.name, queue = %self.queue_id, "message loop thread panicked");
        }
    }
}

impl Drop for MessageLoop {
    fn drop(&mut self) {
        self.terminate();
        self.queues.dispose(self.queue_id);
    }
}

fn run(queue_id: QueueId, queues: &MessageLoopTaskQueues) {
    CURRENT_QUEUE.with(|c| c.set(Some(queue_id)));
    let mut ran = 0u64;
    while let Some(task) = queues.wait_for_task(queue_id) {
        task();
        ran += 1;
    }
    CURRENT_QUEUE.with(|c| c.set(None));
    debug!(queue = %queue_id, tasks_run = ran, "message loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::TaskQueues;
    use std::sync::mpsc;

    #[test]
    fn loop_runs_posted_tasks_on_its_thread() {
        let queues = Arc::new(MessageLoopTaskQueues::new());
        let ml = MessageLoop::spawn("worker", queues.clone()).unwrap();
        let (tx, rx) = mpsc::channel();

        ml.task_runner()
            .post_task(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send((name, current_task_queue_id())).unwrap();
            })
            .unwrap();

        let (name, current) = rx.recv().unwrap();
        assert_eq!(name.as_deref(), Some("worker"));
        assert_eq!(current, Some(ml.queue_id()));
    }

    #[test]
    fn no_current_queue_off_loop() {
        assert_eq!(current_task_queue_id(), None);
    }

    #[test]
    fn merged_tasks_run_on_owner_thread() {
        let queues = Arc::new(MessageLoopTaskQueues::new());
        let platform = MessageLoop::spawn("platform", queues.clone()).unwrap();
        let raster = MessageLoop::spawn("raster", queues.clone()).unwrap();
        assert!(queues.merge(platform.queue_id(), raster.queue_id()));

        let (tx, rx) = mpsc::channel();
        let checker = queues.clone();
        let raster_id = raster.queue_id();
        raster
            .task_runner()
            .post_task(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send((name, checker.runs_tasks_on_current_thread(raster_id)))
                    .unwrap();
            })
            .unwrap();

        let (name, on_raster_queue) = rx.recv().unwrap();
        assert_eq!(name.as_deref(), Some("platform"));
        assert!(on_raster_queue);
    }

    #[test]
    fn tasks_return_to_subsumed_thread_after_unmerge() {
        let queues = Arc::new(MessageLoopTaskQueues::new());
        let platform = MessageLoop::spawn("platform", queues.clone()).unwrap();
        let raster = MessageLoop::spawn("raster", queues.clone()).unwrap();
        assert!(queues.merge(platform.queue_id(), raster.queue_id()));
        assert!(queues.unmerge(platform.queue_id(), raster.queue_id()));

        let (tx, rx) = mpsc::channel();
        raster
            .task_runner()
            .post_task(move || {
                tx.send(thread::current().name().map(str::to_string)).unwrap();
            })
            .unwrap();
        assert_eq!(rx.recv().unwrap().as_deref(), Some("raster"));
    }

    #[test]
    fn terminate_is_idempotent() {
        let queues = Arc::new(MessageLoopTaskQueues::new());
        let mut ml = MessageLoop::spawn("worker", queues.clone()).unwrap();
        ml.terminate();
        ml.terminate();
        assert!(ml.task_runner().post_task(|| {}).is_err());
    }

    #[test]
    fn drop_disposes_queue() {
        let queues = Arc::new(MessageLoopTaskQueues::new());
        let id = {
            let ml = MessageLoop::spawn("worker", queues.clone()).unwrap();
            ml.queue_id()
        };
        assert!(queues.register_task(id, Box::new(|| {})).is_err());
    }
}
