// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Synchronous rendezvous channels.
//!
//! A channel has no buffer. `send` completes only when a receiver takes the
//! value, `receive` only when a sender provides one; whichever side arrives
//! first parks on the channel's wait list. The sign of `balance` says which
//! side is waiting (positive: senders, negative: receivers) and its
//! magnitude how many.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::hooks::ChannelEvent;
use crate::scheduler::Scheduler;
use crate::task::{Task, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Which side runs first after a rendezvous that wakes a parked partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preference {
    /// The active side keeps running; the woken partner is queued.
    #[default]
    Neither,
    /// A woken receiver runs at once; the sender goes to the tail.
    Receiver,
    /// A woken sender runs at once; the receiver goes to the tail.
    Sender,
}

/// A place tasks park on. The scheduler uses it to pull a task out when it
/// is killed or raised into while waiting.
pub(crate) trait WaitList: Send + Sync {
    fn channel_id(&self) -> ChannelId;

    /// Drop `task` from the wait list. Returns false if it was not there.
    fn withdraw(&self, task: TaskId) -> bool;
}

/// Value in flight. A parked sender's slot holds its value; a parked
/// receiver's slot is filled by the sender that matches it.
type Slot<T> = Arc<Mutex<Option<Result<T>>>>;

struct Waiter<T> {
    task: Task,
    slot: Slot<T>,
}

struct ChannelState<T> {
    balance: isize,
    waiters: VecDeque<Waiter<T>>,
    closing: bool,
    preference: Preference,
}

impl<T> ChannelState<T> {
    fn is_closed(&self) -> bool {
        self.closing && self.waiters.is_empty()
    }

    /// Pop the head waiter if it is on the opposite side.
    fn take_partner(&mut self, sending: bool) -> Option<Waiter<T>> {
        let partner_waiting = if sending {
            self.balance < 0
        } else {
            self.balance > 0
        };
        if !partner_waiting {
            return None;
        }
        let waiter = self.waiters.pop_front()?;
        self.balance += if sending { 1 } else { -1 };
        Some(waiter)
    }
}

struct ChannelInner<T> {
    id: ChannelId,
    state: Mutex<ChannelState<T>>,
}

impl<T: Send + 'static> WaitList for ChannelInner<T> {
    fn channel_id(&self) -> ChannelId {
        self.id
    }

    fn withdraw(&self, task: TaskId) -> bool {
        let mut st = self.state.lock();
        let Some(idx) = st.waiters.iter().position(|w| w.task.id() == task) else {
            return false;
        };
        st.waiters.remove(idx);
        if st.balance > 0 {
            st.balance -= 1;
        } else {
            st.balance += 1;
        }
        true
    }
}

/// Handle to a rendezvous channel carrying values of type `T`. Clones share
/// the same channel.
pub struct Channel<T> {
    inner: Arc<ChannelInner<T>>,
    sched: Scheduler,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            sched: self.sched.clone(),
        }
    }
}

impl<T: Send + 'static> Channel<T> {
    pub(crate) fn new(sched: &Scheduler) -> Self {
        let id = ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(ChannelInner {
                id,
                state: Mutex::new(ChannelState {
                    balance: 0,
                    waiters: VecDeque::new(),
                    closing: false,
                    preference: sched.config().default_preference,
                }),
            }),
            sched: sched.detached(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// Hand `value` to a receiver, parking until one arrives.
    pub fn send(&self, value: T) -> Result<()> {
        self.transmit(Ok(value))
    }

    /// Like `send`, but the receiver gets `Err(err)` from `receive`.
    pub fn send_error(&self, err: Error) -> Result<()> {
        self.transmit(Err(err))
    }

    /// Send every item in order. Returns how many were sent.
    pub fn send_sequence<I>(&self, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = T>,
    {
        let mut sent = 0;
        for item in items {
            self.send(item)?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Take a value from a sender, parking until one arrives.
    ///
    /// A receiver killed after a sender already handed it a value still gets
    /// the value; the kill is raised at its next scheduling point.
    pub fn receive(&self) -> Result<T> {
        let me = self.sched.current_task();
        self.sched.take_pending(&me)?;
        let may_block = self.sched.can_block(&me);

        let mut st = self.inner.state.lock();
        if st.is_closed() {
            return Err(self.closed());
        }

        if let Some(sender) = st.take_partner(false) {
            let preference = st.preference;
            drop(st);
            let msg = sender.slot.lock().take();
            self.notify(&me, false, false);
            if preference == Preference::Sender {
                if let Err(err) = self.sched.hand_off(&me, &sender.task) {
                    self.sched.defer_error(&me, err);
                }
            } else {
                self.sched.wake(&sender.task);
            }
            return msg.unwrap_or_else(|| Err(self.closed()));
        }

        if st.closing {
            return Err(self.closed());
        }
        if !may_block {
            return Err(Error::Deadlock);
        }

        let slot: Slot<T> = Arc::new(Mutex::new(None));
        st.waiters.push_back(Waiter {
            task: me.clone(),
            slot: slot.clone(),
        });
        st.balance -= 1;
        drop(st);

        self.notify(&me, false, true);
        let woke = self.sched.block_current(&me, self.inner.clone());
        let msg = slot.lock().take();
        match (woke, msg) {
            (Ok(()), msg) => msg.unwrap_or_else(|| Err(self.closed())),
            (Err(err), Some(msg)) => {
                self.sched.defer_error(&me, err);
                msg
            }
            (Err(err), None) => Err(err),
        }
    }

    /// Receive until the channel is closed. Other errors are yielded.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { channel: self }
    }

    /// Stop accepting new waiters. Parked tasks stay parked and can still be
    /// matched; once the wait list drains the channel is closed.
    pub fn close(&self) {
        self.inner.state.lock().closing = true;
        debug!(channel = %self.inner.id, "closing");
    }

    /// Accept waiters again.
    pub fn open(&self) {
        self.inner.state.lock().closing = false;
        debug!(channel = %self.inner.id, "reopened");
    }

    pub fn is_closing(&self) -> bool {
        self.inner.state.lock().closing
    }

    /// Closing with nobody left on the wait list.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().is_closed()
    }

    /// Parked senders minus parked receivers.
    pub fn balance(&self) -> isize {
        self.inner.state.lock().balance
    }

    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// Parked tasks, oldest first.
    pub fn waiting_tasks(&self) -> Vec<Task> {
        let st = self.inner.state.lock();
        st.waiters.iter().map(|w| w.task.clone()).collect()
    }

    pub fn preference(&self) -> Preference {
        self.inner.state.lock().preference
    }

    pub fn set_preference(&self, preference: Preference) {
        self.inner.state.lock().preference = preference;
    }

    fn transmit(&self, msg: Result<T>) -> Result<()> {
        let me = self.sched.current_task();
        self.sched.take_pending(&me)?;
        let may_block = self.sched.can_block(&me);

        let mut st = self.inner.state.lock();
        if st.is_closed() {
            return Err(self.closed());
        }

        if let Some(receiver) = st.take_partner(true) {
            let preference = st.preference;
            drop(st);
            *receiver.slot.lock() = Some(msg);
            self.notify(&me, true, false);
            if preference == Preference::Receiver {
                return self.sched.hand_off(&me, &receiver.task);
            }
            self.sched.wake(&receiver.task);
            return Ok(());
        }

        if st.closing {
            return Err(self.closed());
        }
        if !may_block {
            return Err(Error::Deadlock);
        }

        let slot: Slot<T> = Arc::new(Mutex::new(Some(msg)));
        st.waiters.push_back(Waiter {
            task: me.clone(),
            slot: slot.clone(),
        });
        st.balance += 1;
        drop(st);

        self.notify(&me, true, true);
        let woke = self.sched.block_current(&me, self.inner.clone());
        match woke {
            Err(err) if slot.lock().is_none() => {
                // A receiver took the value before the error arrived.
                self.sched.defer_error(&me, err);
                Ok(())
            }
            woke => woke,
        }
    }

    fn notify(&self, me: &Task, sending: bool, will_block: bool) {
        self.sched.channel_event(ChannelEvent {
            channel: self.inner.id,
            task: me.id(),
            sending,
            will_block,
        });
    }

    fn closed(&self) -> Error {
        Error::ChannelClosed {
            channel: self.inner.id,
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("balance", &st.balance)
            .field("closing", &st.closing)
            .field("preference", &st.preference)
            .finish()
    }
}

/// Receiving iterator returned by `Channel::iter`.
pub struct Iter<'a, T> {
    channel: &'a Channel<T>,
}

impl<T: Send + 'static> Iterator for Iter<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.channel.receive() {
            Err(Error::ChannelClosed { .. }) => None,
            other => Some(other),
        }
    }
}

impl<'a, T: Send + 'static> IntoIterator for &'a Channel<T> {
    type Item = Result<T>;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
