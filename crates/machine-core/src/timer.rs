//! Global time-ordered queue of future device callbacks.
//!
//! The queue stores events, not closures: a fired entry is handed back to the
//! caller as a [`TimerFired`] record naming the owning device and its opaque
//! parameter. The machine routes that record to [`crate::Device::on_timer`].
//! Keeping the queue closure-free keeps it enumerable for save-state code and
//! lets callbacks schedule new entries while the queue is being drained.

use std::collections::BTreeMap;

use log::trace;

use crate::{DeviceId, Time};

/// Generation-checked handle to a timer entry.
///
/// Handles to freed entries go stale; every operation on a stale handle is a
/// silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TimerId {
    index: u32,
    generation: u32,
}

impl TimerId {
    /// Slot index, stable for the lifetime of the entry.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }
}

/// One entry popped from the queue because its fire time was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    /// Handle of the entry that fired.
    pub id: TimerId,
    /// Device the callback is routed to.
    pub owner: DeviceId,
    /// Opaque parameter supplied when the entry was created.
    pub param: u64,
    /// Nominal fire time.
    pub time: Time,
}

/// Introspection record for one live timer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TimerInfo {
    /// Entry handle.
    pub id: TimerId,
    /// Owning device.
    pub owner: DeviceId,
    /// Opaque callback parameter.
    pub param: u64,
    /// Absolute fire time (meaningful only when `enabled`).
    pub fire_time: Time,
    /// Re-arm period, [`Time::ZERO`] for one-shots.
    pub period: Time,
    /// Whether the entry is waiting in the queue.
    pub enabled: bool,
    /// Persistent entries survive their one-shot firing.
    pub persistent: bool,
}

#[derive(Debug, Clone)]
struct TimerSlot {
    generation: u32,
    live: bool,
    owner: DeviceId,
    param: u64,
    expire: Time,
    period: Time,
    enabled: bool,
    persistent: bool,
    seq: u64,
}

/// Priority-ordered set of future timer events.
///
/// Entries are ordered by `(fire time, insertion sequence)` so entries that
/// share a fire time pop in the order they were scheduled.
#[derive(Debug, Clone, Default)]
pub struct TimerQueue {
    now: Time,
    next_seq: u64,
    order: BTreeMap<(Time, u64), u32>,
    slots: Vec<TimerSlot>,
    free: Vec<u32>,
}

impl TimerQueue {
    /// Creates an empty queue positioned at [`Time::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Time up to which the queue has been advanced.
    #[must_use]
    pub const fn now(&self) -> Time {
        self.now
    }

    /// Moves the queue clock forward without firing anything.
    ///
    /// Never moves backwards. Entries due at or before `time` stay pending and
    /// will be clamped to fire at the next opportunity.
    pub fn set_now(&mut self, time: Time) {
        if time > self.now {
            self.now = time;
        }
    }

    /// Number of armed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` when nothing is armed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Schedules a one-shot or recurring entry `delay` after [`Self::now`].
    ///
    /// A zero `period` makes a one-shot whose slot is freed once it fires.
    pub fn schedule(&mut self, owner: DeviceId, delay: Time, period: Time, param: u64) -> TimerId {
        self.schedule_at(owner, self.now.saturating_add(delay), period, param)
    }

    /// Schedules an entry at an absolute time. Past times are clamped to [`Self::now`].
    pub fn schedule_at(&mut self, owner: DeviceId, fire_time: Time, period: Time, param: u64) -> TimerId {
        let id = self.alloc_slot(owner, param, false);
        self.arm(id, fire_time, period);
        id
    }

    /// Allocates a persistent, disarmed entry that can be armed later via
    /// [`Self::adjust`]. The handle stays valid after one-shot firings.
    pub fn allocate(&mut self, owner: DeviceId, param: u64) -> TimerId {
        self.alloc_slot(owner, param, true)
    }

    /// Re-arms an entry `delay` after [`Self::now`] without changing its identity.
    ///
    /// Returns `false` for stale handles.
    pub fn adjust(&mut self, id: TimerId, delay: Time, period: Time) -> bool {
        self.adjust_at(id, self.now.saturating_add(delay), period)
    }

    /// Re-arms an entry at an absolute time, clamped to [`Self::now`].
    ///
    /// Returns `false` for stale handles.
    pub fn adjust_at(&mut self, id: TimerId, fire_time: Time, period: Time) -> bool {
        if self.slot(id).is_none() {
            return false;
        }
        self.disarm(id);
        self.arm(id, fire_time, period);
        true
    }

    /// Disarms an entry. Transient entries are freed.
    ///
    /// Returns `true` when an armed entry was removed; cancelling an entry that
    /// already fired, or a stale handle, does nothing.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        let persistent = slot.persistent;
        let was_armed = self.disarm(id);
        if !persistent {
            self.release(id);
        }
        was_armed
    }

    /// Frees an entry regardless of its kind.
    pub fn remove(&mut self, id: TimerId) {
        if self.slot(id).is_some() {
            self.disarm(id);
            self.release(id);
        }
    }

    /// Arms or disarms an entry while keeping its fire time and period.
    ///
    /// Re-enabling an entry whose fire time has passed makes it due immediately.
    pub fn set_enabled(&mut self, id: TimerId, enabled: bool) {
        let Some(slot) = self.slot(id) else {
            return;
        };
        match (slot.enabled, enabled) {
            (false, true) => {
                let (expire, period) = (slot.expire, slot.period);
                self.arm(id, expire, period);
            }
            (true, false) => {
                self.disarm(id);
            }
            _ => {}
        }
    }

    /// Returns whether the entry is armed. Stale handles report `false`.
    #[must_use]
    pub fn is_enabled(&self, id: TimerId) -> bool {
        self.slot(id).is_some_and(|slot| slot.enabled)
    }

    /// Absolute fire time of an armed entry.
    #[must_use]
    pub fn fire_time(&self, id: TimerId) -> Option<Time> {
        self.slot(id)
            .and_then(|slot| slot.enabled.then_some(slot.expire))
    }

    /// Time remaining until an armed entry fires.
    #[must_use]
    pub fn remaining(&self, id: TimerId) -> Option<Time> {
        self.fire_time(id).map(|expire| expire - self.now)
    }

    /// Replaces the opaque parameter carried by an entry.
    pub fn set_param(&mut self, id: TimerId, param: u64) {
        if let Some(slot) = self.slot_mut(id) {
            slot.param = param;
        }
    }

    /// Fire time of the soonest armed entry.
    #[must_use]
    pub fn next_fire_time(&self) -> Option<Time> {
        self.order.keys().next().map(|(time, _)| *time)
    }

    /// Span between [`Self::now`] and the soonest armed entry.
    #[must_use]
    pub fn time_until_next(&self) -> Option<Time> {
        self.next_fire_time().map(|time| time - self.now)
    }

    /// Pops the soonest entry if it is due at or before `limit`.
    ///
    /// The queue clock moves to the entry's fire time. Recurring entries are
    /// re-armed one period after their nominal fire time; one-shots are
    /// disarmed, and transient one-shots are freed.
    pub fn pop_due(&mut self, limit: Time) -> Option<TimerFired> {
        let (&(time, seq), &index) = self.order.iter().next()?;
        if time > limit {
            return None;
        }
        self.order.remove(&(time, seq));

        let slot = &mut self.slots[index as usize];
        let fired = TimerFired {
            id: TimerId {
                index,
                generation: slot.generation,
            },
            owner: slot.owner,
            param: slot.param,
            time,
        };
        if time > self.now {
            self.now = time;
        }

        if slot.period.is_zero() {
            slot.enabled = false;
            if !slot.persistent {
                self.release(fired.id);
            }
        } else {
            let next = time.saturating_add(slot.period);
            let seq = self.next_seq;
            self.next_seq += 1;
            slot.expire = next;
            slot.seq = seq;
            self.order.insert((next, seq), index);
        }

        trace!("timer {index} fired at {time} for device {}", fired.owner.index());
        Some(fired)
    }

    /// Fires every entry due at or before `time` in fire-time order, then
    /// moves the clock to `time`.
    ///
    /// `fire` receives the queue so it can schedule, adjust or cancel entries.
    /// Entries it schedules at or before `time` fire later in the same call,
    /// after the callback that scheduled them has returned.
    pub fn advance_to<F>(&mut self, time: Time, mut fire: F)
    where
        F: FnMut(&mut Self, TimerFired),
    {
        while let Some(fired) = self.pop_due(time) {
            fire(self, fired);
        }
        self.set_now(time);
    }

    /// Introspection over every live entry: armed entries in fire order, then
    /// disarmed persistent entries in handle order.
    #[must_use]
    pub fn entries(&self) -> Vec<TimerInfo> {
        let mut entries: Vec<TimerInfo> = self
            .order
            .values()
            .map(|&index| self.info(index))
            .collect();
        entries.extend(
            self.slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.live && !slot.enabled)
                .filter_map(|(index, _)| u32::try_from(index).ok())
                .map(|index| self.info(index)),
        );
        entries
    }

    fn info(&self, index: u32) -> TimerInfo {
        let slot = &self.slots[index as usize];
        TimerInfo {
            id: TimerId {
                index,
                generation: slot.generation,
            },
            owner: slot.owner,
            param: slot.param,
            fire_time: slot.expire,
            period: slot.period,
            enabled: slot.enabled,
            persistent: slot.persistent,
        }
    }

    fn alloc_slot(&mut self, owner: DeviceId, param: u64, persistent: bool) -> TimerId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.live = true;
            slot.owner = owner;
            slot.param = param;
            slot.expire = Time::ZERO;
            slot.period = Time::ZERO;
            slot.enabled = false;
            slot.persistent = persistent;
            return TimerId {
                index,
                generation: slot.generation,
            };
        }

        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(TimerSlot {
            generation: 0,
            live: true,
            owner,
            param,
            expire: Time::ZERO,
            period: Time::ZERO,
            enabled: false,
            persistent,
            seq: 0,
        });
        TimerId {
            index,
            generation: 0,
        }
    }

    fn arm(&mut self, id: TimerId, fire_time: Time, period: Time) {
        let expire = fire_time.max(self.now);
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(slot) = self.slot_mut(id) {
            slot.expire = expire;
            slot.period = period;
            slot.enabled = true;
            slot.seq = seq;
            self.order.insert((expire, seq), id.index);
        }
    }

    fn disarm(&mut self, id: TimerId) -> bool {
        let Some(slot) = self.slot_mut(id) else {
            return false;
        };
        if !slot.enabled {
            return false;
        }
        slot.enabled = false;
        let key = (slot.expire, slot.seq);
        self.order.remove(&key);
        true
    }

    fn release(&mut self, id: TimerId) {
        let slot = &mut self.slots[id.index as usize];
        slot.live = false;
        slot.enabled = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
    }

    fn slot(&self, id: TimerId) -> Option<&TimerSlot> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.live && slot.generation == id.generation)
    }

    fn slot_mut(&mut self, id: TimerId) -> Option<&mut TimerSlot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.live && slot.generation == id.generation)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::{TimerFired, TimerQueue};
    use crate::{DeviceId, Time};

    const OWNER: DeviceId = DeviceId::from_index(0);

    fn us(value: u64) -> Time {
        Time::from_micros(value)
    }

    fn drain(queue: &mut TimerQueue, until: Time) -> Vec<TimerFired> {
        let mut fired = Vec::new();
        queue.advance_to(until, |_, event| fired.push(event));
        fired
    }

    #[test]
    fn entries_fire_in_time_order_and_later_entries_stay_pending() {
        let mut queue = TimerQueue::new();
        queue.schedule(OWNER, us(30), Time::ZERO, 3);
        queue.schedule(OWNER, us(10), Time::ZERO, 1);
        queue.schedule(OWNER, us(50), Time::ZERO, 5);
        queue.schedule(OWNER, us(20), Time::ZERO, 2);

        let fired = drain(&mut queue, us(30));
        let params: Vec<u64> = fired.iter().map(|event| event.param).collect();
        assert_eq!(params, vec![1, 2, 3]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_fire_time(), Some(us(50)));
        assert_eq!(queue.now(), us(30));
    }

    #[test]
    fn equal_fire_times_pop_in_scheduling_order() {
        let mut queue = TimerQueue::new();
        for param in 0..8 {
            queue.schedule(OWNER, us(5), Time::ZERO, param);
        }
        let params: Vec<u64> = drain(&mut queue, us(5))
            .iter()
            .map(|event| event.param)
            .collect();
        assert_eq!(params, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn recurring_entry_stops_after_cancel() {
        let mut queue = TimerQueue::new();
        let id = queue.schedule(OWNER, us(10), us(10), 0);

        let times: Vec<Time> = drain(&mut queue, us(35))
            .iter()
            .map(|event| event.time)
            .collect();
        assert_eq!(times, vec![us(10), us(20), us(30)]);

        assert!(queue.cancel(id));
        assert!(drain(&mut queue, us(100)).is_empty());
        assert!(!queue.cancel(id));
    }

    #[test]
    fn past_fire_times_clamp_to_now() {
        let mut queue = TimerQueue::new();
        queue.set_now(us(100));
        let id = queue.schedule_at(OWNER, us(40), Time::ZERO, 0);
        assert_eq!(queue.fire_time(id), Some(us(100)));
        assert_eq!(queue.time_until_next(), Some(Time::ZERO));
    }

    #[test]
    fn adjust_keeps_identity_and_moves_fire_time() {
        let mut queue = TimerQueue::new();
        let id = queue.schedule(OWNER, us(10), Time::ZERO, 7);
        assert!(queue.adjust(id, us(25), Time::ZERO));
        assert_eq!(queue.fire_time(id), Some(us(25)));

        let fired = drain(&mut queue, us(30));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].id, id);
        assert_eq!(fired[0].time, us(25));
        assert_eq!(fired[0].param, 7);
    }

    #[test]
    fn fired_transient_handles_go_stale() {
        let mut queue = TimerQueue::new();
        let id = queue.schedule(OWNER, us(1), Time::ZERO, 0);
        drain(&mut queue, us(1));

        assert!(!queue.adjust(id, us(1), Time::ZERO));
        assert!(!queue.cancel(id));
        assert!(queue.is_empty());

        let reused = queue.schedule(OWNER, us(1), Time::ZERO, 0);
        assert_eq!(reused.index(), id.index());
        assert_ne!(reused, id);
        assert!(!queue.is_enabled(id));
        assert!(queue.is_enabled(reused));
    }

    #[test]
    fn persistent_timers_survive_firing_and_can_be_rearmed() {
        let mut queue = TimerQueue::new();
        let id = queue.allocate(OWNER, 42);
        assert!(!queue.is_enabled(id));
        assert!(drain(&mut queue, us(10)).is_empty());

        assert!(queue.adjust(id, us(5), Time::ZERO));
        assert_eq!(drain(&mut queue, us(20)).len(), 1);
        assert!(!queue.is_enabled(id));

        assert!(queue.adjust(id, us(5), Time::ZERO));
        assert_eq!(queue.fire_time(id), Some(us(25)));
        assert_eq!(queue.entries().len(), 1);
    }

    #[test]
    fn zero_delay_entries_scheduled_by_a_callback_fire_after_it_returns() {
        let mut queue = TimerQueue::new();
        queue.schedule(OWNER, us(10), Time::ZERO, 1);
        queue.schedule(OWNER, us(10), Time::ZERO, 2);

        let mut order = Vec::new();
        queue.advance_to(us(10), |queue, event| {
            order.push(event.param);
            if event.param == 1 {
                queue.schedule(OWNER, Time::ZERO, Time::ZERO, 3);
            }
        });
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn callbacks_may_schedule_later_entries_within_the_same_advance() {
        let mut queue = TimerQueue::new();
        queue.schedule(OWNER, us(10), Time::ZERO, 1);

        let mut times = Vec::new();
        queue.advance_to(us(50), |queue, event| {
            times.push(event.time);
            if event.param == 1 {
                queue.schedule(OWNER, us(15), Time::ZERO, 2);
                queue.schedule(OWNER, us(100), Time::ZERO, 3);
            }
        });
        assert_eq!(times, vec![us(10), us(25)]);
        assert_eq!(queue.next_fire_time(), Some(us(110)));
    }

    #[test]
    fn disabling_preserves_fire_time_for_reenable() {
        let mut queue = TimerQueue::new();
        let id = queue.schedule(OWNER, us(30), Time::ZERO, 0);
        queue.set_enabled(id, false);
        assert!(queue.is_empty());
        assert!(drain(&mut queue, us(40)).is_empty());

        queue.set_enabled(id, true);
        assert_eq!(queue.fire_time(id), Some(us(40)));
        assert_eq!(drain(&mut queue, us(40)).len(), 1);
    }

    #[test]
    fn entries_enumerate_armed_then_disarmed() {
        let mut queue = TimerQueue::new();
        let idle = queue.allocate(OWNER, 9);
        let late = queue.schedule(OWNER, us(20), us(5), 2);
        let early = queue.schedule(OWNER, us(10), Time::ZERO, 1);

        let ids: Vec<_> = queue.entries().iter().map(|info| info.id).collect();
        assert_eq!(ids, vec![early, late, idle]);
        let late_info = queue.entries()[1];
        assert_eq!(late_info.period, us(5));
        assert!(late_info.enabled);
        assert!(!late_info.persistent);
    }

    #[rstest]
    #[case(us(0), 0)]
    #[case(us(9), 0)]
    #[case(us(10), 1)]
    #[case(us(29), 2)]
    #[case(us(30), 3)]
    fn recurring_firings_up_to_limit(#[case] limit: Time, #[case] expected: usize) {
        let mut queue = TimerQueue::new();
        queue.schedule(OWNER, us(10), us(10), 0);
        assert_eq!(drain(&mut queue, limit).len(), expected);
    }

    proptest! {
        #[test]
        fn property_pop_order_is_sorted_and_stable(delays in prop::collection::vec(0_u64..64, 1..48)) {
            let mut queue = TimerQueue::new();
            for (param, delay) in delays.iter().enumerate() {
                queue.schedule(OWNER, us(*delay), Time::ZERO, param as u64);
            }

            let fired = drain(&mut queue, us(64));
            prop_assert_eq!(fired.len(), delays.len());
            for pair in fired.windows(2) {
                prop_assert!(pair[0].time <= pair[1].time);
                if pair[0].time == pair[1].time {
                    prop_assert!(pair[0].param < pair[1].param);
                }
            }
            prop_assert!(queue.is_empty());
        }
    }
}
