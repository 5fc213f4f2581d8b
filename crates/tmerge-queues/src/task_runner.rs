use std::fmt;
use std::sync::Arc;

use tmerge_types::QueueId;

use crate::error::Result;
use crate::memory::MessageLoopTaskQueues;
use crate::traits::TaskQueues;

/// Cloneable handle for posting work to one queue.
#[derive(Clone)]
pub struct TaskRunner {
    queue_id: QueueId,
    queues: Arc<MessageLoopTaskQueues>,
}

impl TaskRunner {
    pub fn new(queue_id: QueueId, queues: Arc<MessageLoopTaskQueues>) -> Self {
        Self { queue_id, queues }
    }

    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// The registry this runner posts into.
    pub fn task_queues(&self) -> &Arc<MessageLoopTaskQueues> {
        &self.queues
    }

    /// Append `task` to the queue.
    pub fn post_task<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.queues.register_task(self.queue_id, Box::new(task))
    }

    /// Whether the calling thread services this runner's queue, either
    /// directly or through a merge.
    pub fn runs_tasks_on_current_thread(&self) -> bool {
        self.queues.runs_tasks_on_current_thread(self.queue_id)
    }

    /// Run `task` inline when already on the queue's thread, post it
    /// otherwise.
    pub fn run_now_or_post_task<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.runs_tasks_on_current_thread() {
            task();
            Ok(())
        } else {
            self.post_task(task)
        }
    }
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("queue_id", &self.queue_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_loop::MessageLoop;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    #[test]
    fn run_now_or_post_queues_when_off_loop() {
        let queues = Arc::new(MessageLoopTaskQueues::new());
        let q = queues.create_task_queue();
        let runner = TaskRunner::new(q, queues.clone());

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        runner
            .run_now_or_post_task(move || flag.store(true, Ordering::SeqCst))
            .unwrap();

        // No loop services `q` on this thread, so the task was queued.
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(queues.pending_task_count(q), 1);
    }

    #[test]
    fn run_now_or_post_runs_inline_on_loop_thread() {
        let queues = Arc::new(MessageLoopTaskQueues::new());
        let ml = MessageLoop::spawn("worker", queues.clone()).unwrap();
        let runner = ml.task_runner();
        let (tx, rx) = mpsc::channel();

        let inner = runner.clone();
        runner
            .post_task(move || {
                let ran_inline = Arc::new(AtomicBool::new(false));
                let flag = ran_inline.clone();
                inner
                    .run_now_or_post_task(move || flag.store(true, Ordering::SeqCst))
                    .unwrap();
                tx.send(ran_inline.load(Ordering::SeqCst)).unwrap();
            })
            .unwrap();

        assert!(rx.recv().unwrap());
    }

    #[test]
    fn runner_reports_queue_id() {
        let queues = Arc::new(MessageLoopTaskQueues::new());
        let q = queues.create_task_queue();
        let runner = TaskRunner::new(q, queues);
        assert_eq!(runner.queue_id(), q);
        assert!(!runner.runs_tasks_on_current_thread());
    }
}
