// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Manages execution of background tasks
//!
//! The panel has one Driver.  Each background task registered with it runs
//! in its own tokio task and is activated when its period elapses or when a
//! caller asks for it explicitly; activations requested while one is in
//! progress collapse into a single follow-up.  Every task is independently
//! idempotent, so an activation that overlaps a partial failure of the
//! previous one is safe.

use chrono::DateTime;
use chrono::Utc;
use futures::future::BoxFuture;
use slog::Logger;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

/// The work of a background task
///
/// The returned value is a JSON summary of what the activation did,
/// surfaced through [`Driver::task_status`] for observability.
pub trait BackgroundTask: Send + Sync {
    fn activate<'a>(
        &'a mut self,
        log: &'a Logger,
    ) -> BoxFuture<'a, serde_json::Value>;
}

/// Identifies a background task registered with a [`Driver`]
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct TaskName(String);

/// Driver-side state of a background task
struct Task {
    /// what this task does (for developers)
    description: String,
    /// configured period of the task
    period: Duration,
    /// channel used to receive status updates from the task's tokio task
    status: watch::Receiver<TaskStatus>,
    /// join handle for the tokio task executing this background task
    tokio_task: tokio::task::JoinHandle<()>,
    /// used to wake the tokio task for an explicit activation
    notify: Arc<Notify>,
}

/// Drives the execution of background tasks
pub struct Driver {
    tasks: BTreeMap<TaskName, Task>,
}

impl Driver {
    pub fn new() -> Driver {
        Driver { tasks: BTreeMap::new() }
    }

    /// Register a new background task
    ///
    /// The task becomes activatable immediately and will be activated
    /// whenever it has not run for `period`.  Names must be unique; this
    /// function panics on a conflict, which is a programmer error in the
    /// registration list.
    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        period: Duration,
        imp: Box<dyn BackgroundTask>,
        log: &Logger,
    ) -> TaskName {
        let (status_tx, status_rx) =
            watch::channel(TaskStatus { current: None, last: None });
        let notify = Arc::new(Notify::new());
        let log = log.new(o!("background_task" => name.to_string()));
        let task_exec =
            TaskExec::new(period, imp, Arc::clone(&notify), log, status_tx);
        let tokio_task = tokio::task::spawn(task_exec.run());

        let task = Task {
            description: description.to_string(),
            period,
            status: status_rx,
            tokio_task,
            notify,
        };
        if self.tasks.insert(TaskName(name.to_string()), task).is_some() {
            panic!("started two background tasks called {:?}", name);
        }
        TaskName(name.to_string())
    }

    /// Enumerate all registered background tasks
    pub fn tasks(&self) -> impl Iterator<Item = &TaskName> {
        self.tasks.keys()
    }

    fn task_required(&self, task: &TaskName) -> &Task {
        // It should be hard to hit this in practice, since you'd have to
        // have gotten a TaskName from somewhere.  It would have to be
        // another Driver instance.
        self.tasks.get(task).unwrap_or_else(|| {
            panic!("attempted to use non-existent background task: {:?}", task)
        })
    }

    pub fn task_description(&self, task: &TaskName) -> &str {
        &self.task_required(task).description
    }

    pub fn task_period(&self, task: &TaskName) -> Duration {
        self.task_required(task).period
    }

    /// Activate the specified background task
    ///
    /// If the task is currently running, it will be activated again when it
    /// finishes.
    pub fn activate(&self, task: &TaskName) {
        self.task_required(task).notify.notify_one();
    }

    /// Returns the runtime status of the background task
    pub fn task_status(&self, task: &TaskName) -> TaskStatus {
        // Borrowing from a watch channel's receiver blocks the sender.
        // Clone the status so a caller hanging on to it cannot gum up the
        // works.
        self.task_required(task).status.borrow().clone()
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        // Terminate the tokio tasks that were used to run background tasks.
        for (_, t) in &self.tasks {
            t.tokio_task.abort();
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActivationReason {
    Signaled,
    Timeout,
}

#[derive(Clone, Debug)]
pub struct TaskStatus {
    pub current: Option<LastStart>,
    pub last: Option<LastResult>,
}

#[derive(Clone, Debug)]
pub struct LastStart {
    pub start_time: DateTime<Utc>,
    pub reason: ActivationReason,
    pub iteration: u64,
}

#[derive(Clone, Debug)]
pub struct LastResult {
    pub iteration: u64,
    pub start_time: DateTime<Utc>,
    pub elapsed: Duration,
    pub details: serde_json::Value,
}

/// Encapsulates the state the tokio task needs to manage activation of one
/// background task
struct TaskExec {
    period: Duration,
    imp: Box<dyn BackgroundTask>,
    notify: Arc<Notify>,
    log: Logger,
    status_tx: watch::Sender<TaskStatus>,
    iteration: u64,
}

impl TaskExec {
    fn new(
        period: Duration,
        imp: Box<dyn BackgroundTask>,
        notify: Arc<Notify>,
        log: Logger,
        status_tx: watch::Sender<TaskStatus>,
    ) -> TaskExec {
        TaskExec { period, imp, notify, log, status_tx, iteration: 0 }
    }

    async fn run(mut self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.activate(ActivationReason::Timeout).await;
                },

                _ = self.notify.notified() => {
                    self.activate(ActivationReason::Signaled).await;
                }
            }
        }
    }

    async fn activate(&mut self, reason: ActivationReason) {
        self.iteration += 1;
        let iteration = self.iteration;
        let start_time = Utc::now();
        let start_instant = Instant::now();

        debug!(
            self.log,
            "activating";
            "reason" => ?reason,
            "iteration" => iteration,
        );

        self.status_tx.send_modify(|status| {
            status.current =
                Some(LastStart { start_time, reason, iteration });
        });

        let details = self.imp.activate(&self.log).await;

        let elapsed = start_instant.elapsed();
        self.status_tx.send_modify(|status| {
            *status = TaskStatus {
                current: None,
                last: Some(LastResult {
                    iteration,
                    start_time,
                    elapsed,
                    details,
                }),
            };
        });

        debug!(
            self.log,
            "activation complete";
            "elapsed" => ?elapsed,
            "iteration" => iteration,
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::FutureExt;

    /// Simple BackgroundTask impl that just reports how many times it's run.
    struct ReportingTask {
        counter: usize,
        tx: watch::Sender<usize>,
    }

    impl ReportingTask {
        fn new() -> (ReportingTask, watch::Receiver<usize>) {
            let (tx, rx) = watch::channel(0);
            (ReportingTask { counter: 1, tx }, rx)
        }
    }

    impl BackgroundTask for ReportingTask {
        fn activate<'a>(
            &'a mut self,
            _: &'a Logger,
        ) -> BoxFuture<'a, serde_json::Value> {
            async {
                let count = self.counter;
                self.counter += 1;
                self.tx.send_replace(count);
                serde_json::json!({ "count": count })
            }
            .boxed()
        }
    }

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    async fn wait_until_count(mut rx: watch::Receiver<usize>, count: usize) {
        loop {
            let v = *rx.borrow_and_update();
            if v >= count {
                return;
            }
            tokio::time::timeout(Duration::from_secs(60), rx.changed())
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_periodic_activation() {
        let log = test_logger();
        let (task, rx) = ReportingTask::new();
        let mut driver = Driver::new();
        let handle = driver.register(
            "reporting",
            "test task",
            Duration::from_secs(30),
            Box::new(task),
            &log,
        );

        // One immediate activation, then one per period.
        wait_until_count(rx.clone(), 4).await;
        let status = driver.task_status(&handle);
        let last = status.last.unwrap();
        assert!(last.iteration >= 3);
        assert_eq!(driver.task_period(&handle), Duration::from_secs(30));
        assert_eq!(driver.task_description(&handle), "test task");
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_explicit_activation() {
        let log = test_logger();
        let (task, rx) = ReportingTask::new();
        let mut driver = Driver::new();
        let handle = driver.register(
            "reporting",
            "test task",
            // should never fire in this test
            Duration::from_secs(3600),
            Box::new(task),
            &log,
        );

        // the immediate first activation
        wait_until_count(rx.clone(), 1).await;
        driver.activate(&handle);
        wait_until_count(rx.clone(), 2).await;
        let status = driver.task_status(&handle);
        assert!(status.current.is_none());
        let last = status.last.unwrap();
        assert_eq!(last.details["count"], 2);
    }
}
