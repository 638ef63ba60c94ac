// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative scheduler.
//!
//! One scheduler owns a run queue and a main task (the caller that created
//! it). Control only moves at explicit points: `schedule`,
//! `schedule_remove`/`run`, blocking channel operations, kills, and task
//! exit. Every move is decided under the state lock and carried out after
//! the lock is released, so the resumed context always sees settled state.
//!
//! Failure routing: a task that ends with an error (other than
//! `TaskTerminated`) or a panic hands the error to the task that last
//! switched into it. That task is resumed immediately and sees the error
//! from the scheduling call that dispatched the failed task.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::channel::{Channel, WaitList};
use crate::config::SchedulerConfig;
use crate::context::{ContextFactory, Entry, ExecutionContext, ThreadContextFactory};
use crate::error::{Error, Result};
use crate::hooks::{ChannelEvent, Hooks, SwitchEvent, SwitchReason};
use crate::queue::RunQueue;
use crate::task::{Task, TaskId};

/// Counters since the scheduler was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub spawned: u64,
    pub finished: u64,
    pub failed: u64,
    pub killed: u64,
    pub switches: u64,
}

struct State {
    queue: RunQueue,
    main: Task,
    /// Set-up, not yet dead tasks (main excluded).
    live: BTreeMap<TaskId, Task>,
    /// Contexts of dead tasks, finalized by whoever runs next.
    graveyard: Vec<Arc<dyn ExecutionContext>>,
    stats: SchedulerStats,
}

pub(crate) struct Shared {
    state: Mutex<State>,
    factory: Box<dyn ContextFactory>,
    config: SchedulerConfig,
    hooks: Hooks,
}

/// Handle to a scheduler. Clones share the same run queue; task bodies
/// receive one as their argument.
///
/// The handle returned by the constructors, and its clones, own the
/// scheduler. When the last of them is dropped every remaining task is
/// killed and its thread joined. Handles given to task bodies and held by
/// channels do not keep the scheduler alive, so task bodies should use their
/// `&Scheduler` argument rather than capture a clone of the owner.
#[derive(Clone)]
pub struct Scheduler {
    // Dropped before `shared` so the teardown can still reach the state.
    owner: Option<Arc<Owner>>,
    shared: Arc<Shared>,
}

/// Shared by the owning handles. Its drop tears the scheduler down.
struct Owner {
    shared: Weak<Shared>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            Scheduler::from_shared(shared).teardown();
        }
    }
}

/// A switch decided under the state lock.
struct Switch {
    event: SwitchEvent,
    target: Arc<dyn ExecutionContext>,
}

/// How a task body ended.
enum Exit {
    Returned,
    Failed(Error),
    Panicked(String),
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Scheduler with thread-backed contexts and default settings. The
    /// calling thread becomes the main task.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let factory = ThreadContextFactory::new(&config);
        Self::with_factory(config, factory)
    }

    /// Scheduler backed by a custom context factory.
    pub fn with_factory(config: SchedulerConfig, factory: impl ContextFactory + 'static) -> Self {
        let main_context = factory.main_context();
        let shared = Arc::new_cyclic(|weak| {
            let main = Task::new_main(weak.clone(), main_context);
            let mut queue = RunQueue::new();
            queue.set_current(main.clone());
            Shared {
                state: Mutex::new(State {
                    queue,
                    main,
                    live: BTreeMap::new(),
                    graveyard: Vec::new(),
                    stats: SchedulerStats::default(),
                }),
                factory: Box::new(factory),
                config,
                hooks: Hooks::default(),
            }
        });
        let owner = Arc::new(Owner {
            shared: Arc::downgrade(&shared),
        });
        Self {
            shared,
            owner: Some(owner),
        }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            owner: None,
        }
    }

    /// Handle that does not own the scheduler.
    pub(crate) fn detached(&self) -> Self {
        Self::from_shared(self.shared.clone())
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    // === Tasks ===

    /// Unbound task holding `func`. Not alive and not queued until `setup`.
    pub fn create_task<F>(&self, func: F) -> Task
    where
        F: FnOnce(&Scheduler) -> Result<()> + Send + 'static,
    {
        Task::new(Arc::downgrade(&self.shared), Some(Box::new(func)))
    }

    /// Task with nothing bound yet; see `Task::bind`.
    pub fn task(&self) -> Task {
        Task::new(Arc::downgrade(&self.shared), None)
    }

    /// Create and set up in one step: the task is alive and queued.
    pub fn spawn<F>(&self, func: F) -> Result<Task>
    where
        F: FnOnce(&Scheduler) -> Result<()> + Send + 'static,
    {
        self.create_task(func).setup()
    }

    /// New rendezvous channel.
    pub fn channel<T: Send + 'static>(&self) -> Channel<T> {
        Channel::new(self)
    }

    pub fn current_task(&self) -> Task {
        let st = self.shared.state.lock();
        st.queue
            .current()
            .cloned()
            .unwrap_or_else(|| st.main.clone())
    }

    pub fn main_task(&self) -> Task {
        self.shared.state.lock().main.clone()
    }

    /// Runnable tasks, the running one included.
    pub fn runcount(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Every set-up task that has not died yet, main excluded.
    pub fn live_tasks(&self) -> Vec<Task> {
        self.shared.state.lock().live.values().cloned().collect()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.state.lock().stats
    }

    pub fn set_schedule_callback<F>(&self, cb: F)
    where
        F: Fn(&SwitchEvent) + Send + Sync + 'static,
    {
        self.shared.hooks.set_switch(Some(Arc::new(cb)));
    }

    pub fn clear_schedule_callback(&self) {
        self.shared.hooks.set_switch(None);
    }

    pub fn set_channel_callback<F>(&self, cb: F)
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.shared.hooks.set_channel(Some(Arc::new(cb)));
    }

    pub fn clear_channel_callback(&self) {
        self.shared.hooks.set_channel(None);
    }

    // === Scheduling ===

    /// Yield to the next ready task; the caller goes to the tail of the run
    /// queue. Returns at once when nothing else is ready.
    pub fn schedule(&self) -> Result<()> {
        let me = self.current_task();
        self.take_pending(&me)?;
        let own = own_context(&me)?;
        let sw = {
            let mut st = self.shared.state.lock();
            let Some(next) = st.queue.rotate() else {
                return Ok(());
            };
            self.prepare(&mut st, me.id(), &next, Some(&me), SwitchReason::Yield)?
        };
        self.perform(&me, &*own, sw)
    }

    /// Like `schedule`, but the caller leaves the run queue and stays out
    /// until something re-inserts or wakes it. Control falls back to the
    /// main task when nothing else is ready.
    pub fn schedule_remove(&self) -> Result<()> {
        let me = self.current_task();
        self.take_pending(&me)?;
        let own = own_context(&me)?;
        let sw = {
            let mut st = self.shared.state.lock();
            if me.is_main() && !st.queue.has_ready() {
                return Ok(());
            }
            st.queue.take_current();
            let next = self.next_runnable(&mut st);
            self.prepare(&mut st, me.id(), &next, Some(&me), SwitchReason::Remove)?
        };
        self.perform(&me, &*own, sw)
    }

    /// Run every queued task until none is runnable, then return to main.
    /// Returns early with the error of a failed task it dispatched.
    pub fn run(&self) -> Result<()> {
        let me = self.current_task();
        if !me.is_main() {
            return Err(Error::invalid(me.id(), "only the main task can call run()"));
        }
        debug!(runnable = self.runcount(), "run");
        self.schedule_remove()
    }

    /// Kill every task still alive. Main only.
    pub fn shutdown(&self) -> Result<()> {
        let me = self.current_task();
        if !me.is_main() {
            return Err(Error::invalid(me.id(), "only the main task can shut down"));
        }
        self.kill_live(|_| true)
    }

    /// Last owner handle gone. Main can unwind everything; from anywhere
    /// else only tasks that never ran can be discarded without a switch.
    fn teardown(&self) {
        let from_main = self.current_task().is_main() && !std::thread::panicking();
        let result = if from_main {
            self.kill_live(|_| true)
        } else {
            self.kill_live(|task| !task.slot().started)
        };
        if let Err(err) = result {
            warn!(error = %err, "task failed while tearing down the scheduler");
        }
        let left = self.shared.state.lock().live.len();
        if left > 0 {
            warn!(tasks = left, "scheduler dropped with tasks still parked");
        }
    }

    fn kill_live(&self, select: impl Fn(&Task) -> bool) -> Result<()> {
        let victims: Vec<Task> = self.live_tasks().into_iter().filter(|t| select(t)).collect();
        debug!(tasks = victims.len(), "killing live tasks");
        let mut first_err = None;
        for task in victims {
            if let Err(err) = task.kill() {
                warn!(task = %task.id(), error = %err, "task failed while shutting down");
                first_err.get_or_insert(err);
            }
        }
        self.reap();
        first_err.map_or(Ok(()), Err)
    }

    // === Task operations (called through `Task`) ===

    pub(crate) fn setup_task(&self, task: &Task) -> Result<()> {
        if task.is_main() {
            return Err(Error::invalid(task.id(), "the main task is always bound"));
        }
        {
            let slot = task.slot();
            if slot.alive {
                return Err(Error::invalid(task.id(), "already set up"));
            }
            if slot.func.is_none() {
                return Err(Error::invalid(task.id(), "no callable bound"));
            }
        }

        let context = self.shared.factory.create(task.id(), self.entry_for(task))?;

        let mut st = self.shared.state.lock();
        {
            let mut slot = task.slot();
            slot.context = Some(context);
            slot.alive = true;
            slot.started = false;
            slot.blocked_on = None;
            slot.pending = None;
            slot.resumer = None;
        }
        st.queue.push_back(task.clone());
        st.live.insert(task.id(), task.clone());
        st.stats.spawned += 1;
        drop(st);

        debug!(task = %task, "set up");
        Ok(())
    }

    pub(crate) fn raise_in(&self, target: &Task, err: Error) -> Result<()> {
        if target.is_main() {
            return Err(Error::invalid(target.id(), "the main task cannot be killed"));
        }
        let me = self.current_task();
        if *target == me {
            return Err(err);
        }
        self.take_pending(&me)?;

        let started = {
            let mut st = self.shared.state.lock();
            let (alive, started, wait_list) = {
                let mut slot = target.slot();
                (slot.alive, slot.started, slot.blocked_on.take())
            };
            if !alive {
                return Ok(());
            }
            if let Some(wait_list) = wait_list {
                wait_list.withdraw(target.id());
            }
            if !started {
                st.queue.remove(target.id());
                st.live.remove(&target.id());
                let context = {
                    let mut slot = target.slot();
                    slot.alive = false;
                    slot.func = None;
                    slot.context.take()
                };
                if let Some(context) = context {
                    context.kill();
                    st.graveyard.push(context);
                }
                st.stats.killed += 1;
            }
            started
        };

        if !started {
            debug!(task = %target.id(), "discarded before it ever ran");
            self.reap();
            return if err.is_terminated() {
                Ok(())
            } else {
                Err(Error::TaskFailed {
                    id: target.id(),
                    source: Box::new(err),
                })
            };
        }

        debug!(task = %target.id(), error = %err, "raising in task");
        set_pending(target, err);
        self.switch_now(&me, target, true, SwitchReason::Raise)
    }

    pub(crate) fn insert_task(&self, task: &Task) -> Result<()> {
        if task.is_main() {
            return Err(Error::invalid(task.id(), "the main task is not inserted by hand"));
        }
        let mut st = self.shared.state.lock();
        {
            let slot = task.slot();
            if !slot.alive {
                return Err(Error::invalid(task.id(), "is not alive"));
            }
            if slot.blocked_on.is_some() {
                return Err(Error::invalid(task.id(), "is blocked on a channel"));
            }
        }
        if !st.queue.contains(task.id()) {
            st.queue.push_back(task.clone());
        }
        Ok(())
    }

    pub(crate) fn remove_task(&self, task: &Task) -> Result<()> {
        if task.is_main() {
            return Err(Error::invalid(task.id(), "the main task cannot be removed"));
        }
        let mut st = self.shared.state.lock();
        if st.queue.current() == Some(task) {
            return Err(Error::invalid(task.id(), "is running; use schedule_remove()"));
        }
        if task.slot().blocked_on.is_some() {
            return Err(Error::invalid(task.id(), "is blocked on a channel"));
        }
        st.queue.remove(task.id());
        Ok(())
    }

    pub(crate) fn run_task(&self, task: &Task) -> Result<()> {
        let me = self.current_task();
        if *task == me {
            return Ok(());
        }
        self.take_pending(&me)?;
        if !self.shared.state.lock().queue.is_ready(task.id()) {
            return Err(Error::invalid(task.id(), "is not waiting in the run queue"));
        }
        self.switch_now(&me, task, true, SwitchReason::Run)
    }

    pub(crate) fn queue_contains(&self, id: TaskId) -> bool {
        self.shared.state.lock().queue.contains(id)
    }

    // === Channel support ===

    /// Whether `me` may park. Main parking with nothing ready would never
    /// come back.
    pub(crate) fn can_block(&self, me: &Task) -> bool {
        !me.is_main() || self.shared.state.lock().queue.has_ready()
    }

    /// Park the running task on `wait_list` and switch away. Returns once a
    /// partner wakes it, or with the error raised at the wakeup.
    pub(crate) fn block_current(&self, me: &Task, wait_list: Arc<dyn WaitList>) -> Result<()> {
        let own = own_context(me)?;
        let sw = {
            let mut st = self.shared.state.lock();
            st.queue.take_current();
            me.slot().blocked_on = Some(wait_list);
            let next = self.next_runnable(&mut st);
            self.prepare(&mut st, me.id(), &next, Some(me), SwitchReason::Block)?
        };
        self.perform(me, &*own, sw)
    }

    /// Make a task taken off a wait list runnable again.
    pub(crate) fn wake(&self, task: &Task) {
        let mut st = self.shared.state.lock();
        task.slot().blocked_on = None;
        st.queue.push_back(task.clone());
    }

    /// Run a task just taken off a wait list right away; the caller goes to
    /// the tail of the run queue.
    pub(crate) fn hand_off(&self, me: &Task, target: &Task) -> Result<()> {
        self.switch_now(me, target, false, SwitchReason::Handoff)
    }

    pub(crate) fn channel_event(&self, event: ChannelEvent) {
        trace!(
            channel = %event.channel,
            task = %event.task,
            sending = event.sending,
            will_block = event.will_block,
            "channel op"
        );
        self.shared.hooks.channel(&event);
    }

    // === Internals ===

    /// First ready task, or main when nothing is ready. If main is itself
    /// parked on a channel nobody can wake it: pull it off and raise
    /// `Deadlock` there.
    fn next_runnable(&self, st: &mut State) -> Task {
        if let Some(next) = st.queue.pop_ready() {
            return next;
        }
        let main = st.main.clone();
        let parked_on = main.slot().blocked_on.take();
        if let Some(wait_list) = parked_on {
            wait_list.withdraw(main.id());
            warn!(channel = %wait_list.channel_id(), "deadlock: every task is blocked, waking main");
            set_pending(&main, Error::Deadlock);
        }
        main
    }

    /// Make `to` the running head and record the switch.
    fn prepare(
        &self,
        st: &mut State,
        from: TaskId,
        to: &Task,
        resumer: Option<&Task>,
        reason: SwitchReason,
    ) -> Result<Switch> {
        let target = {
            let mut slot = to.slot();
            slot.started = true;
            if let Some(resumer) = resumer.filter(|r| *r != to) {
                slot.resumer = Some(resumer.downgrade());
            }
            slot.context.clone()
        };
        let target = target.ok_or_else(|| Error::invalid(to.id(), "has no execution context"))?;
        st.queue.set_current(to.clone());
        st.stats.switches += 1;
        Ok(Switch {
            event: SwitchEvent {
                from,
                to: to.id(),
                reason,
            },
            target,
        })
    }

    fn perform(&self, me: &Task, own: &dyn ExecutionContext, sw: Switch) -> Result<()> {
        trace!(from = %sw.event.from, to = %sw.event.to, reason = ?sw.event.reason, "switch");
        self.shared.hooks.switched(&sw.event);
        sw.target.switch(own);
        self.resumed(me)
    }

    /// Bookkeeping on the way back in: finalize dead contexts, then raise
    /// whatever was left pending for us.
    fn resumed(&self, me: &Task) -> Result<()> {
        self.reap();
        self.take_pending(me)
    }

    /// Raise an error left for `me` by a kill or a failed task.
    pub(crate) fn take_pending(&self, me: &Task) -> Result<()> {
        let pending = me.slot().pending.take();
        match pending {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Re-arm an error that interrupted an operation which had already
    /// completed. It is raised at the task's next scheduling point.
    pub(crate) fn defer_error(&self, me: &Task, err: Error) {
        debug!(task = %me.id(), error = %err, "operation completed, error deferred");
        set_pending(me, err);
    }

    fn reap(&self) {
        let dead = std::mem::take(&mut self.shared.state.lock().graveyard);
        for context in dead {
            context.finalize();
        }
    }

    fn switch_now(
        &self,
        me: &Task,
        target: &Task,
        caller_first: bool,
        reason: SwitchReason,
    ) -> Result<()> {
        let own = own_context(me)?;
        let sw = {
            let mut st = self.shared.state.lock();
            st.queue.remove(target.id());
            target.slot().blocked_on = None;
            st.queue.take_current();
            if caller_first {
                st.queue.push_front(me.clone());
            } else {
                st.queue.push_back(me.clone());
            }
            self.prepare(&mut st, me.id(), target, Some(me), reason)?
        };
        self.perform(me, &*own, sw)
    }

    fn entry_for(&self, task: &Task) -> Entry {
        let shared = Arc::downgrade(&self.shared);
        let task = task.clone();
        Box::new(move || {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let sched = Scheduler::from_shared(shared);
            let exit = sched.enter(&task);
            sched.finish(&task, exit);
        })
    }

    fn enter(&self, task: &Task) -> Exit {
        if let Err(err) = self.resumed(task) {
            return Exit::Failed(err);
        }
        let func = task.slot().func.take();
        let Some(func) = func else {
            return Exit::Returned;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| func(self))) {
            Ok(Ok(())) => Exit::Returned,
            Ok(Err(err)) => Exit::Failed(err),
            Err(payload) => Exit::Panicked(panic_message(payload.as_ref())),
        }
    }

    /// Last act of a task: leave the queue, queue the context for
    /// finalization, and hand control on. Never returns to the body.
    fn finish(&self, task: &Task, exit: Exit) {
        let id = task.id();
        let terminated = matches!(&exit, Exit::Failed(err) if err.is_terminated());
        let failure = match exit {
            Exit::Returned => None,
            Exit::Failed(err) if err.is_terminated() => None,
            Exit::Failed(err) => Some(Error::TaskFailed {
                id,
                source: Box::new(err),
            }),
            Exit::Panicked(message) => Some(Error::Panicked { id, message }),
        };
        match &failure {
            Some(err) => debug!(task = %id, error = %err, "task failed"),
            None => debug!(task = %id, "task finished"),
        }

        let sw = {
            let mut st = self.shared.state.lock();
            if st.queue.current() == Some(task) {
                st.queue.take_current();
            }
            st.queue.remove(id);
            st.live.remove(&id);

            let (context, resumer) = {
                let mut slot = task.slot();
                slot.alive = false;
                slot.blocked_on = None;
                slot.pending = None;
                (
                    slot.context.take(),
                    slot.resumer.take().and_then(|w| w.upgrade()).map(Task::from_inner),
                )
            };
            if let Some(context) = context {
                st.graveyard.push(context);
            }

            let driver = resumer
                .filter(|r| r.is_alive())
                .unwrap_or_else(|| st.main.clone());

            let prepared = match failure {
                Some(err) => {
                    st.stats.failed += 1;
                    self.deliver(&mut st, &driver, err);
                    self.prepare(&mut st, id, &driver, None, SwitchReason::Fail)
                }
                None => {
                    if terminated {
                        st.stats.killed += 1;
                    } else {
                        st.stats.finished += 1;
                    }
                    let next = self.next_runnable(&mut st);
                    self.prepare(&mut st, id, &next, Some(&driver), SwitchReason::Finish)
                }
            };
            match prepared {
                Ok(sw) => sw,
                Err(err) => {
                    error!(task = %id, error = %err, "no context to hand control to, falling back to main");
                    let main = st.main.clone();
                    match self.prepare(&mut st, id, &main, None, SwitchReason::Finish) {
                        Ok(sw) => sw,
                        Err(_) => return,
                    }
                }
            }
        };

        trace!(from = %sw.event.from, to = %sw.event.to, reason = ?sw.event.reason, "switch");
        self.shared.hooks.switched(&sw.event);
        sw.target.resume();
    }

    /// Detach `target` from wherever it waits and leave `err` pending.
    fn deliver(&self, st: &mut State, target: &Task, err: Error) {
        st.queue.remove(target.id());
        let wait_list = target.slot().blocked_on.take();
        if let Some(wait_list) = wait_list {
            wait_list.withdraw(target.id());
        }
        set_pending(target, err);
    }
}

/// Leave `err` to be raised at the task's next resumption point. Every
/// setter hands control to the task right away, so a second error can only
/// come from a scheduler bug.
fn set_pending(task: &Task, err: Error) {
    let mut slot = task.slot();
    debug_assert!(
        slot.pending.is_none(),
        "task {} already has an error pending",
        task.id()
    );
    match &slot.pending {
        None => slot.pending = Some(err),
        Some(first) => {
            error!(task = %task.id(), kept = %first, lost = %err, "second error raised before the first was seen");
        }
    }
}

fn own_context(me: &Task) -> Result<Arc<dyn ExecutionContext>> {
    me.slot()
        .context
        .clone()
        .ok_or_else(|| Error::invalid(me.id(), "has no execution context"))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
