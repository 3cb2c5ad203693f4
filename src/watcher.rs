//! Filesystem watch and dispatch into the task queue.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::pipeline::PipelineReport;
use crate::queue::TaskQueue;
use crate::tracked::{Task, TrackedSet};

/// Events closer together than this collapse into one
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// The only distinction the dispatcher cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// File content was modified
    Change,
    Other,
}

impl From<&EventKind> for WatchEventKind {
    fn from(kind: &EventKind) -> Self {
        match kind {
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                WatchEventKind::Change
            }
            _ => WatchEventKind::Other,
        }
    }
}

/// What the dispatcher did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Enqueued,
    IgnoredKind,
    Untracked,
    Debounced,
    /// The queue worker is gone; the change was dropped
    QueueClosed,
}

/// Called after each task with its report and how long it took
pub type FinishedHook = Arc<dyn Fn(&PipelineReport, Duration) + Send + Sync>;

/// Turns watch events on tracked maps into queued tasks
pub struct WatchDispatcher {
    tracked: TrackedSet,
    queue: TaskQueue,
    on_finished: Option<FinishedHook>,
}

impl WatchDispatcher {
    pub fn new(tracked: TrackedSet, queue: TaskQueue) -> Self {
        Self {
            tracked,
            queue,
            on_finished: None,
        }
    }

    /// Extra callback run after the outcome has been logged
    pub fn with_finished_hook(mut self, hook: FinishedHook) -> Self {
        self.on_finished = Some(hook);
        self
    }

    /// Apply the dispatch policy to one event
    pub fn on_event(&self, kind: WatchEventKind, path: &Path, now: Instant) -> Dispatch {
        if kind != WatchEventKind::Change {
            return Dispatch::IgnoredKind;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Dispatch::Untracked;
        };
        if !self.tracked.contains(name) {
            return Dispatch::Untracked;
        }
        if !self.tracked.try_activate(name, now, DEBOUNCE_WINDOW) {
            log::trace!("Debounced change to '{}'", name);
            return Dispatch::Debounced;
        }

        log::info!("Detected change to tracked map '{}'", name);
        let task = Task::new(name, path);
        let hook = self.on_finished.clone();
        let on_complete = Box::new(move |report: PipelineReport| {
            let elapsed = now.elapsed();
            log_outcome(&report, elapsed);
            if let Some(hook) = hook {
                hook(&report, elapsed);
            }
        });

        match self.queue.push(task, on_complete) {
            Ok(()) => Dispatch::Enqueued,
            Err(e) => {
                log::error!("Cannot queue '{}': {}", name, e);
                Dispatch::QueueClosed
            }
        }
    }

    /// Watch `watch_dir` until `shutdown` resolves, then drain the queue.
    ///
    /// If `force` resolves while draining, queued tasks are abandoned and this
    /// returns at once.
    pub async fn run<F, G>(self, watch_dir: &Path, recursive: bool, shutdown: F, force: G) -> Result<()>
    where
        F: Future<Output = ()>,
        G: Future<Output = ()>,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(watch_dir, mode)?;
        log::info!(
            "Watching {} for changes to {}",
            watch_dir.display(),
            self.tracked.names().join(", ")
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                received = rx.recv() => match received {
                    Some(Ok(event)) => self.handle(&event),
                    Some(Err(e)) => log::warn!("Watch error: {}", e),
                    None => break,
                },
            }
        }

        drop(watcher);
        log::info!("Stopped watching {}", watch_dir.display());

        let pending = self.queue.pending();
        tokio::select! {
            _ = self.queue.shutdown() => {}
            _ = force => log::warn!("Forced shutdown, abandoning {} queued task(s)", pending),
        }
        Ok(())
    }

    fn handle(&self, event: &Event) {
        let kind = WatchEventKind::from(&event.kind);
        let now = Instant::now();
        for path in &event.paths {
            let dispatch = self.on_event(kind, path, now);
            log::trace!("{:?} {} -> {:?}", event.kind, path.display(), dispatch);
        }
    }
}

fn log_outcome(report: &PipelineReport, elapsed: Duration) {
    let map = report.map_name().unwrap_or_else(|| report.file_name.clone());
    match &report.error {
        None => log::info!("Deployed '{}' as '{}' in {} ms", report.file_name, map, elapsed.as_millis()),
        Some(e) => log::error!(
            "Processing '{}' failed after {} ms: {}",
            report.file_name,
            elapsed.as_millis(),
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TaskProcessor;
    use async_trait::async_trait;
    use notify::event::{CreateKind, DataChange};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskProcessor for Recorder {
        async fn process(&self, task: &Task) -> PipelineReport {
            self.seen.lock().unwrap().push(task.file_name.clone());
            PipelineReport::new(&task.file_name)
        }
    }

    fn dispatcher() -> (WatchDispatcher, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let queue = TaskQueue::start(recorder.clone());
        let tracked = TrackedSet::new(["fy_test.bsp"]);
        (WatchDispatcher::new(tracked, queue), recorder)
    }

    #[test]
    fn test_event_kind_mapping() {
        let data = EventKind::Modify(ModifyKind::Data(DataChange::Content));
        assert_eq!(WatchEventKind::from(&data), WatchEventKind::Change);
        assert_eq!(WatchEventKind::from(&EventKind::Modify(ModifyKind::Any)), WatchEventKind::Change);
        assert_eq!(
            WatchEventKind::from(&EventKind::Create(CreateKind::File)),
            WatchEventKind::Other
        );
        assert_eq!(
            WatchEventKind::from(&EventKind::Access(notify::event::AccessKind::Any)),
            WatchEventKind::Other
        );
    }

    #[tokio::test]
    async fn test_events_within_window_collapse() {
        let (dispatcher, recorder) = dispatcher();
        let path = Path::new("/maps/fy_test.bsp");
        let t0 = Instant::now();

        assert_eq!(dispatcher.on_event(WatchEventKind::Change, path, t0), Dispatch::Enqueued);
        assert_eq!(
            dispatcher.on_event(WatchEventKind::Change, path, t0 + Duration::from_millis(50)),
            Dispatch::Debounced
        );

        dispatcher.queue.shutdown().await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["fy_test.bsp"]);
    }

    #[tokio::test]
    async fn test_events_outside_window_both_enqueue() {
        let (dispatcher, recorder) = dispatcher();
        let path = Path::new("/maps/fy_test.bsp");
        let t0 = Instant::now();

        assert_eq!(dispatcher.on_event(WatchEventKind::Change, path, t0), Dispatch::Enqueued);
        assert_eq!(
            dispatcher.on_event(WatchEventKind::Change, path, t0 + Duration::from_millis(150)),
            Dispatch::Enqueued
        );

        dispatcher.queue.shutdown().await;
        assert_eq!(recorder.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_untracked_and_other_kinds_ignored() {
        let (dispatcher, recorder) = dispatcher();
        let now = Instant::now();

        assert_eq!(
            dispatcher.on_event(WatchEventKind::Change, Path::new("/maps/other.bsp"), now),
            Dispatch::Untracked
        );
        assert_eq!(
            dispatcher.on_event(WatchEventKind::Other, Path::new("/maps/fy_test.bsp"), now),
            Dispatch::IgnoredKind
        );
        // the ignored event must not start a debounce window
        assert_eq!(
            dispatcher.on_event(WatchEventKind::Change, Path::new("/maps/fy_test.bsp"), now),
            Dispatch::Enqueued
        );

        dispatcher.queue.shutdown().await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["fy_test.bsp"]);
    }

    #[tokio::test]
    async fn test_finished_hook_receives_report() {
        let recorder = Arc::new(Recorder::default());
        let queue = TaskQueue::start(recorder);
        let finished = Arc::new(Mutex::new(Vec::new()));
        let sink = finished.clone();
        let dispatcher = WatchDispatcher::new(TrackedSet::new(["fy_test.bsp"]), queue)
            .with_finished_hook(Arc::new(move |report: &PipelineReport, _elapsed| {
                sink.lock().unwrap().push(report.file_name.clone());
            }));

        dispatcher.on_event(WatchEventKind::Change, Path::new("/maps/fy_test.bsp"), Instant::now());
        dispatcher.queue.shutdown().await;

        assert_eq!(*finished.lock().unwrap(), vec!["fy_test.bsp"]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let temp = tempfile::TempDir::new().unwrap();
        let (dispatcher, _recorder) = dispatcher();
        let result = dispatcher
            .run(temp.path(), false, async {}, std::future::pending())
            .await;
        assert!(result.is_ok());
    }

    /// Never finishes on its own
    struct Stalled;

    #[async_trait]
    impl TaskProcessor for Stalled {
        async fn process(&self, task: &Task) -> PipelineReport {
            tokio::time::sleep(Duration::from_secs(60)).await;
            PipelineReport::new(&task.file_name)
        }
    }

    #[tokio::test]
    async fn test_force_abandons_queued_work() {
        let temp = tempfile::TempDir::new().unwrap();
        let queue = TaskQueue::start(Arc::new(Stalled));
        let dispatcher = WatchDispatcher::new(TrackedSet::new(["fy_test.bsp"]), queue);
        let now = Instant::now();
        assert_eq!(
            dispatcher.on_event(WatchEventKind::Change, Path::new("/maps/fy_test.bsp"), now),
            Dispatch::Enqueued
        );

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            dispatcher.run(temp.path(), false, async {}, async {}),
        )
        .await
        .expect("forced shutdown should not wait for the stalled task");
        assert!(result.is_ok());
    }

    #[test]
    fn test_push_after_worker_gone_reports_queue_closed() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let queue = runtime.block_on(async { TaskQueue::start(recorder.clone()) });
        // dropping the runtime drops the worker and its receiver
        drop(runtime);

        let dispatcher = WatchDispatcher::new(TrackedSet::new(["fy_test.bsp"]), queue);
        assert_eq!(
            dispatcher.on_event(WatchEventKind::Change, Path::new("/maps/fy_test.bsp"), Instant::now()),
            Dispatch::QueueClosed
        );
        assert!(recorder.seen.lock().unwrap().is_empty());
    }
}
