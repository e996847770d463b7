//! Worker group shared between the guard and the threads it supervises
//!
//! Every guarded run owns one [`WorkerGroup`]: the primary worker plus any
//! secondary workers it spawned through its [`WorkerContext`]. All group
//! state lives behind one mutex paired with one condvar; every change
//! notifies all waiters, so each wait simply re-checks its own predicate.
//!
//! Cancellation is cooperative. Interrupting the group wakes every
//! interruptible wait ([`WorkerContext::sleep`], [`SpawnedWorker::join`]) and
//! makes [`WorkerContext::checkpoint`] fail, but code that never calls into
//! the context keeps running.

use crate::error::panic_message;
use crate::{Frame, Interrupted, WorkerPanicked};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub(crate) const PRIMARY: usize = 0;

/// How the primary worker ended
pub(crate) enum WorkFailure {
    Error(anyhow::Error),
    Panic(String),
}

pub(crate) type WorkResult = Result<(), WorkFailure>;

pub(crate) type BoxedWork = Box<dyn FnOnce(&WorkerContext) -> anyhow::Result<()> + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadStatus {
    Running,
    /// Parked inside an interruptible wait
    Waiting,
    Finished,
}

struct ThreadSlot {
    name: String,
    frames: Vec<Frame>,
    status: ThreadStatus,
}

#[derive(Default)]
struct GroupState {
    interrupted: bool,
    threads: Vec<ThreadSlot>,
    primary: Option<WorkResult>,
}

#[derive(Default)]
pub(crate) struct WorkerGroup {
    state: Mutex<GroupState>,
    changed: Condvar,
}

/// Name and frames of one group thread, innermost frame first
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ThreadSnapshot {
    pub name: String,
    pub frames: Vec<Frame>,
}

impl WorkerGroup {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, name: &str, root: Frame) -> usize {
        let mut state = self.state.lock();
        state.threads.push(ThreadSlot {
            name: name.to_string(),
            frames: vec![root],
            status: ThreadStatus::Running,
        });
        state.threads.len() - 1
    }

    fn mark_finished(&self, index: usize) {
        let mut state = self.state.lock();
        if let Some(slot) = state.threads.get_mut(index) {
            slot.status = ThreadStatus::Finished;
            slot.frames.clear();
        }
        self.changed.notify_all();
    }

    /// Spawn a named thread registered in this group
    fn spawn_member<T, F>(
        self: &Arc<Self>,
        name: &str,
        root: Frame,
        body: F,
    ) -> std::io::Result<(usize, JoinHandle<T>)>
    where
        T: Send + 'static,
        F: FnOnce(WorkerContext) -> T + Send + 'static,
    {
        let index = self.register(name, root);
        let group = Arc::clone(self);
        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            let _finished = FinishGuard {
                group: &group,
                index,
            };
            body(WorkerContext {
                group: Arc::clone(&group),
                index,
            })
        });

        match spawned {
            Ok(handle) => {
                tracing::debug!(thread = name, "spawned worker thread");
                Ok((index, handle))
            }
            Err(err) => {
                self.mark_finished(index);
                Err(err)
            }
        }
    }

    /// Start the primary worker running `work`
    pub(crate) fn spawn_primary(
        self: &Arc<Self>,
        name: &str,
        location: &Location<'_>,
        work: BoxedWork,
    ) -> std::io::Result<()> {
        let root = Frame::new("guarded work", location);
        let (index, _handle) = self.spawn_member(name, root, move |ctx| {
            let result = match panic::catch_unwind(AssertUnwindSafe(|| work(&ctx))) {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(WorkFailure::Error(err)),
                Err(payload) => Err(WorkFailure::Panic(panic_message(payload.as_ref()))),
            };
            ctx.group.complete_primary(result);
        })?;
        debug_assert_eq!(index, PRIMARY);
        Ok(())
    }

    fn complete_primary(&self, result: WorkResult) {
        let mut state = self.state.lock();
        state.primary = Some(result);
        self.changed.notify_all();
    }

    /// Wait for the primary result until `deadline` (forever if `None`)
    pub(crate) fn wait_primary(&self, deadline: Option<Instant>) -> Option<WorkResult> {
        let mut state = self.state.lock();
        while state.primary.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
        state.primary.take()
    }

    pub(crate) fn try_take_primary(&self) -> Option<WorkResult> {
        self.state.lock().primary.take()
    }

    pub(crate) fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.changed.notify_all();
    }

    /// Wait until every group thread has finished; false if `deadline` passed first
    pub(crate) fn wait_all_finished(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.state.lock();
        loop {
            let live = state
                .threads
                .iter()
                .any(|slot| slot.status != ThreadStatus::Finished);
            if !live {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        return state
                            .threads
                            .iter()
                            .all(|slot| slot.status == ThreadStatus::Finished);
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
    }

    pub(crate) fn snapshot(&self, index: usize) -> Option<ThreadSnapshot> {
        let state = self.state.lock();
        state.threads.get(index).map(snapshot_of)
    }

    /// The live thread most likely responsible for the hang
    ///
    /// Threads busy outside an interruptible wait win over threads parked in one.
    pub(crate) fn pick_stuck(&self) -> Option<ThreadSnapshot> {
        let state = self.state.lock();
        let live = || {
            state
                .threads
                .iter()
                .filter(|slot| slot.status != ThreadStatus::Finished)
        };
        live()
            .find(|slot| slot.status == ThreadStatus::Running)
            .or_else(|| live().next())
            .map(snapshot_of)
    }

    /// Block while `pending` holds, until interrupted or `deadline` passes
    ///
    /// `waiter` names the group thread doing the wait; its frame is pushed
    /// for the duration. Waits from outside the group pass `None`.
    fn wait_interruptibly<P>(
        &self,
        waiter: Option<(usize, Frame)>,
        deadline: Option<Instant>,
        mut pending: P,
    ) -> Result<(), Interrupted>
    where
        P: FnMut(&GroupState) -> bool,
    {
        let mut state = self.state.lock();
        if state.interrupted {
            return Err(Interrupted);
        }
        let waiter = waiter.map(|(index, frame)| {
            let slot = &mut state.threads[index];
            slot.frames.push(frame);
            slot.status = ThreadStatus::Waiting;
            (index, slot.frames.len() - 1)
        });

        let result = loop {
            if state.interrupted {
                break Err(Interrupted);
            }
            if !pending(&*state) {
                break Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        break if state.interrupted { Err(Interrupted) } else { Ok(()) };
                    }
                }
                None => self.changed.wait(&mut state),
            }
        };

        if let Some((index, depth)) = waiter {
            let slot = &mut state.threads[index];
            slot.frames.truncate(depth);
            slot.status = ThreadStatus::Running;
        }
        result
    }
}

fn snapshot_of(slot: &ThreadSlot) -> ThreadSnapshot {
    ThreadSnapshot {
        name: slot.name.clone(),
        frames: slot.frames.iter().rev().cloned().collect(),
    }
}

/// Marks a group thread finished on exit, including unwinding exits
struct FinishGuard<'a> {
    group: &'a WorkerGroup,
    index: usize,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.group.mark_finished(self.index);
    }
}

/// Handle given to a unit of work for cooperating with its guard
///
/// Each group thread gets its own context; it is not `Clone` so frames are
/// always attributed to the thread that pushed them.
pub struct WorkerContext {
    group: Arc<WorkerGroup>,
    index: usize,
}

impl WorkerContext {
    /// Name of the thread this context belongs to
    pub fn thread_name(&self) -> String {
        self.group.state.lock().threads[self.index].name.clone()
    }

    /// Returns true once the guard has asked the group to stop
    pub fn is_interrupted(&self) -> bool {
        self.group.state.lock().interrupted
    }

    /// Fail fast if the group has been interrupted
    pub fn checkpoint(&self) -> Result<(), Interrupted> {
        if self.is_interrupted() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early with `Interrupted` on cancellation
    #[track_caller]
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let frame = Frame::new("sleep", Location::caller());
        let deadline = Instant::now().checked_add(duration);
        self.group
            .wait_interruptibly(Some((self.index, frame)), deadline, |_| true)
    }

    /// Push a diagnostic frame that stays on this thread's stack until the guard drops
    #[track_caller]
    pub fn enter(&self, label: impl Into<String>) -> FrameGuard<'_> {
        let frame = Frame::new(label, Location::caller());
        let mut state = self.group.state.lock();
        let frames = &mut state.threads[self.index].frames;
        frames.push(frame);
        FrameGuard {
            ctx: self,
            depth: frames.len() - 1,
        }
    }

    /// Start a secondary worker in this group
    ///
    /// The new thread receives its own context, is interrupted together with
    /// the rest of the group, and is a candidate for stuck-thread reports.
    #[track_caller]
    pub fn spawn<T, F>(&self, name: impl Into<String>, f: F) -> std::io::Result<SpawnedWorker<T>>
    where
        T: Send + 'static,
        F: FnOnce(&WorkerContext) -> T + Send + 'static,
    {
        let name = name.into();
        let root = Frame::new("spawned worker", Location::caller());
        let (index, handle) = self
            .group
            .spawn_member(&name, root, move |ctx| f(&ctx))?;
        Ok(SpawnedWorker {
            name,
            group: Arc::clone(&self.group),
            index,
            handle,
        })
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// Pops a frame pushed by [`WorkerContext::enter`]
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct FrameGuard<'a> {
    ctx: &'a WorkerContext,
    depth: usize,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.ctx.group.state.lock();
        state.threads[self.ctx.index].frames.truncate(self.depth);
    }
}

/// Secondary worker started through [`WorkerContext::spawn`]
pub struct SpawnedWorker<T> {
    name: String,
    group: Arc<WorkerGroup>,
    index: usize,
    handle: JoinHandle<T>,
}

impl<T> SpawnedWorker<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker to finish
    ///
    /// The wait is interruptible: if the worker's group is cancelled first
    /// this returns [`Interrupted`] and the worker keeps running. A panic in
    /// the worker is reported as [`WorkerPanicked`]. The join frame is only
    /// recorded when `ctx` belongs to the same group as the worker.
    #[track_caller]
    pub fn join(self, ctx: &WorkerContext) -> anyhow::Result<T> {
        let frame = Frame::new(format!("join {}", self.name), Location::caller());
        let waiter = Arc::ptr_eq(&self.group, &ctx.group).then_some((ctx.index, frame));
        let target = self.index;
        self.group.wait_interruptibly(waiter, None, |state| {
            state.threads[target].status != ThreadStatus::Finished
        })?;

        self.handle.join().map_err(|payload| {
            WorkerPanicked {
                name: self.name.clone(),
                message: panic_message(payload.as_ref()),
            }
            .into()
        })
    }
}

impl<T> std::fmt::Debug for SpawnedWorker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedWorker")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
