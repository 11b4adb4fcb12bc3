//! Timer queue behavior as observed through a running machine.

use std::cell::RefCell;
use std::rc::Rc;

use bitflags as _;
use log as _;
use machine_core::{
    ClockRate, ConfigError, Device, DeviceId, Machine, MachineConfig, MachineContext, Time,
    TimerFired, TimerId,
};
use proptest as _;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

type FiredLog = Rc<RefCell<Vec<(u64, Time)>>>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const fn us(value: u64) -> Time {
    Time::from_micros(value)
}

/// Schedules a fixed plan on start and records every firing.
struct Recorder {
    plan: Vec<(Time, Time, u64)>,
    log: FiredLog,
    cancel_after: Option<usize>,
    chain_zero_delay: bool,
    ids: Vec<TimerId>,
    id: Option<DeviceId>,
}

impl Recorder {
    fn new(plan: Vec<(Time, Time, u64)>, log: &FiredLog) -> Self {
        Self {
            plan,
            log: Rc::clone(log),
            cancel_after: None,
            chain_zero_delay: false,
            ids: Vec::new(),
            id: None,
        }
    }
}

impl Device for Recorder {
    fn start(&mut self, ctx: &MachineContext, id: DeviceId) -> Result<(), ConfigError> {
        self.id = Some(id);
        for &(delay, period, param) in &self.plan {
            self.ids.push(ctx.schedule(id, delay, period, param));
        }
        Ok(())
    }

    fn on_timer(&mut self, ctx: &MachineContext, timer: &TimerFired) {
        assert_eq!(ctx.now(), timer.time);
        self.log.borrow_mut().push((timer.param, timer.time));
        let fired = self.log.borrow().len();
        if self.cancel_after == Some(fired) {
            ctx.cancel_timer(timer.id);
        }
        if self.chain_zero_delay && timer.param < 100 {
            if let Some(id) = self.id {
                ctx.schedule(id, Time::ZERO, Time::ZERO, timer.param + 100);
            }
        }
    }
}

fn machine_with(recorder: Recorder) -> Machine {
    init_logging();
    let mut builder = Machine::builder(MachineConfig::default());
    builder
        .add_device_instance("recorder", ClockRate::default(), None, recorder)
        .expect("add recorder");
    builder.build().expect("build")
}

#[test]
fn timers_fire_in_time_order_with_ties_in_scheduling_order() {
    let log = FiredLog::default();
    let plan = vec![
        (us(30), Time::ZERO, 1),
        (us(10), Time::ZERO, 2),
        (us(10), Time::ZERO, 3),
        (us(50), Time::ZERO, 4),
    ];
    let mut machine = machine_with(Recorder::new(plan, &log));

    machine.run_until(us(40));

    assert_eq!(*log.borrow(), vec![(2, us(10)), (3, us(10)), (1, us(30))]);
    assert_eq!(machine.time(), us(40));
    let snapshot = machine.snapshot();
    assert_eq!(snapshot.timers.len(), 1);
    assert_eq!(snapshot.timers[0].param, 4);
    assert_eq!(snapshot.timers[0].fire_time, us(50));
    assert_eq!(machine.diag().timers_fired, 3);
}

#[test]
fn recurring_timer_stops_once_its_callback_cancels_it() {
    let log = FiredLog::default();
    let mut recorder = Recorder::new(vec![(us(10), us(10), 7)], &log);
    recorder.cancel_after = Some(3);
    let mut machine = machine_with(recorder);

    machine.run_until(us(100));

    let times: Vec<_> = log.borrow().iter().map(|&(_, at)| at).collect();
    assert_eq!(times, vec![us(10), us(20), us(30)]);
    assert!(machine.snapshot().timers.is_empty());
}

#[test]
fn zero_delay_timer_from_a_callback_fires_at_the_same_time_after_it() {
    let log = FiredLog::default();
    let mut recorder = Recorder::new(vec![(us(5), Time::ZERO, 1), (us(5), Time::ZERO, 2)], &log);
    recorder.chain_zero_delay = true;
    let mut machine = machine_with(recorder);

    machine.run_until(us(6));

    assert_eq!(
        *log.borrow(),
        vec![(1, us(5)), (2, us(5)), (101, us(5)), (102, us(5))]
    );
}

#[rstest]
#[case(us(9), 0)]
#[case(us(10), 1)]
#[case(us(35), 3)]
fn timers_due_exactly_at_the_target_fire(#[case] target: Time, #[case] expected: usize) {
    let log = FiredLog::default();
    let mut machine = machine_with(Recorder::new(vec![(us(10), us(10), 0)], &log));

    machine.run_until(target);

    assert_eq!(log.borrow().len(), expected);
    assert_eq!(machine.time(), target);
}

#[test]
fn repeated_runs_to_the_same_target_change_nothing() {
    let log = FiredLog::default();
    let mut machine = machine_with(Recorder::new(vec![(us(10), us(10), 0)], &log));

    machine.run_until(us(25));
    let before = machine.snapshot();
    machine.run_until(us(25));
    machine.run_until(us(20));

    assert_eq!(machine.snapshot(), before);
    assert_eq!(log.borrow().len(), 2);
}
