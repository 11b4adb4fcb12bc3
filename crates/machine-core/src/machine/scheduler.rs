use log::{trace, warn};

use super::context::{ExecFrame, MachineContext};
use crate::{DiagCounters, ExecContext, SuspendReason, Time, TraceEvent};

/// Drives every live unit and the timer queue to `target`.
///
/// Each iteration picks the least-advanced live unit (lowest index on
/// ties), fires the next timer due no later than that unit's local time,
/// and otherwise runs the unit for one slice bounded by the quantum, the next
/// timer and `target`. Timers due at exactly a unit's local time fire
/// before the unit runs again.
pub(super) fn run_until(ctx: &MachineContext, target: Time) {
    loop {
        let pick = least_advanced(ctx);
        let limit = match pick {
            Some(index) => ctx.units[index].local_time.get().min(target),
            None => target,
        };

        if fire_next(ctx, limit) {
            continue;
        }
        ctx.timers.borrow_mut().set_now(limit);

        let Some(index) = pick else {
            break;
        };
        if ctx.units[index].local_time.get() >= target {
            break;
        }
        run_slice(ctx, index, target);
    }
}

fn least_advanced(ctx: &MachineContext) -> Option<usize> {
    ctx.units
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_live())
        .min_by_key(|(index, slot)| (slot.local_time.get(), *index))
        .map(|(index, _)| index)
}

/// Fires the soonest timer if it is due at or before `limit`.
///
/// Only one timer fires per call: its callback may wake or suspend a unit,
/// so the caller picks the least-advanced unit again before anything later
/// on the timeline happens.
fn fire_next(ctx: &MachineContext, limit: Time) -> bool {
    let fired = ctx.timers.borrow_mut().pop_due(limit);
    let Some(fired) = fired else {
        return false;
    };
    trace!("timer {} fired for {} at {}", fired.id.index(), fired.owner, fired.time);
    ctx.dispatch_timer(&fired);
    true
}

fn run_slice(ctx: &MachineContext, index: usize, target: Time) {
    let slot = &ctx.units[index];
    let start = slot.local_time.get();
    let quantum = ctx.quantum_at(start);
    let mut end = start.saturating_add(quantum).min(target);
    if let Some(next) = ctx.timers.borrow().next_fire_time() {
        end = end.min(next);
    }
    let span = end.saturating_sub(start);
    let cycles = slot.clock.time_to_cycles_ceil(span).max(1);

    ctx.frame.set(Some(ExecFrame {
        unit: index,
        slice_start: start,
        requested: cycles,
        end,
    }));
    ctx.budget.set(i64::try_from(cycles).unwrap_or(i64::MAX));
    slot.yield_requested.set(false);
    ctx.trace(TraceEvent::SliceStart {
        unit: slot.device,
        at: start,
        cycles,
    });

    let outcome = ctx.with_device_dyn(slot.device, |device| {
        device.execution_unit().map(|cpu| {
            let exec = ExecContext::new(ctx, index, &slot.lines, cycles);
            let consumed = cpu.run(&exec, cycles);
            (consumed, cpu.run_state().trap())
        })
    });

    ctx.frame.set(None);
    let (consumed, trap) = match outcome {
        Ok(Some(result)) => result,
        Ok(None) | Err(_) => {
            warn!("{}: not runnable, disabling", ctx.devices.tag(slot.device));
            slot.suspend.set(slot.suspend.get() | SuspendReason::DISABLED);
            return;
        }
    };
    // A slice that made no progress is charged in full so time advances.
    let charged = if consumed == 0 { cycles } else { consumed };

    slot.local_time
        .set(start.saturating_add(slot.period.saturating_mul(charged)));
    slot.total_cycles
        .set(slot.total_cycles.get().saturating_add(consumed));
    ctx.update_diag(|diag| diag.record_slice(cycles, consumed));
    if slot.yield_requested.replace(false) {
        ctx.update_diag(DiagCounters::record_yield);
    }
    ctx.trace(TraceEvent::SliceEnd {
        unit: slot.device,
        at: slot.local_time.get(),
        consumed,
    });

    if let Some(cause) = trap {
        if !slot.suspend.get().contains(SuspendReason::TRAPPED) {
            warn!(
                "{}: trapped ({cause}) at {}",
                ctx.devices.tag(slot.device),
                slot.local_time.get()
            );
            slot.suspend.set(slot.suspend.get() | SuspendReason::TRAPPED);
            ctx.update_diag(DiagCounters::record_trap);
            ctx.trace(TraceEvent::UnitTrapped {
                unit: slot.device,
                cause,
                at: slot.local_time.get(),
            });
        }
    }
}
