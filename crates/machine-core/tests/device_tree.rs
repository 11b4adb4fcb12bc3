//! Device tree construction, lifecycle hooks and device coupling.

use std::cell::RefCell;
use std::rc::Rc;

use bitflags as _;
use log as _;
use machine_core::cpu::acc8::{STATE_A, STATE_FLAGS, STATE_PC};
use machine_core::{
    Acc8, ClockRate, ConfigError, Device, DeviceAccessError, DeviceId, DeviceParams,
    DeviceRegistry, Machine, MachineConfig, MachineContext, RunState, StateError, StateId, Time,
    TimerFired,
};
use proptest as _;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

type Journal = Rc<RefCell<Vec<String>>>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Journals its lifecycle and optionally depends on another device.
struct Node {
    name: &'static str,
    needs: Option<&'static str>,
    journal: Journal,
}

impl Node {
    fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            needs: None,
            journal: Rc::clone(journal),
        }
    }

    fn needing(mut self, tag: &'static str) -> Self {
        self.needs = Some(tag);
        self
    }
}

impl Device for Node {
    fn start(&mut self, ctx: &MachineContext, id: DeviceId) -> Result<(), ConfigError> {
        if let Some(tag) = self.needs {
            ctx.require_device(id, tag)?;
        }
        self.journal.borrow_mut().push(format!("start {}", self.name));
        Ok(())
    }

    fn reset(&mut self, _ctx: &MachineContext) {
        self.journal.borrow_mut().push(format!("reset {}", self.name));
    }

    fn stop(&mut self) {
        self.journal.borrow_mut().push(format!("stop {}", self.name));
    }
}

#[test]
fn devices_start_and_reset_in_insertion_order_and_stop_on_drop() {
    init_logging();
    let journal = Journal::default();
    let mut builder = Machine::builder(MachineConfig::default());
    let board = builder
        .add_device_instance("board", ClockRate::default(), None, Node::new("board", &journal))
        .expect("board");
    builder
        .add_device_instance("psg", ClockRate::from_mhz(2), Some(board), Node::new("psg", &journal).needing("latch"))
        .expect("psg");
    builder
        .add_device_instance("latch", ClockRate::default(), Some(board), Node::new("latch", &journal))
        .expect("latch");
    let machine = builder.build().expect("build");

    assert_eq!(machine.context().find_device("board:psg").map(|id| id.index()), Some(1));
    drop(machine);

    assert_eq!(
        *journal.borrow(),
        vec![
            "start board",
            "start psg",
            "start latch",
            "reset board",
            "reset psg",
            "reset latch",
            "stop board",
            "stop psg",
            "stop latch",
        ]
    );
}

#[test]
fn missing_dependency_aborts_construction() {
    init_logging();
    let journal = Journal::default();
    let mut builder = Machine::builder(MachineConfig::default());
    builder
        .add_device_instance("psg", ClockRate::default(), None, Node::new("psg", &journal).needing("soundlatch"))
        .expect("psg");

    let err = builder.build().expect_err("missing dependency");

    assert_eq!(
        err,
        ConfigError::MissingDevice {
            requested_by: "psg".into(),
            tag: "soundlatch".into(),
        }
    );
}

#[rstest]
#[case("z80", ConfigError::UnknownDeviceType("z80".into()))]
#[case("acc8", ConfigError::ZeroClock("maincpu".into()))]
fn invalid_devices_are_rejected(#[case] type_name: &str, #[case] expected: ConfigError) {
    let mut builder = Machine::builder(MachineConfig::default());

    let err = builder
        .add_device("maincpu", type_name, ClockRate::default(), None)
        .expect_err("rejected");

    assert_eq!(err, expected);
}

#[test]
fn duplicate_tags_and_memory_tags_are_rejected() {
    let mut builder = Machine::builder(MachineConfig::default());
    builder
        .add_device("maincpu", "acc8", ClockRate::from_mhz(1), None)
        .expect("first");
    builder.add_ram("ram", 16).expect("ram");

    assert_eq!(
        builder.add_device("maincpu", "acc8", ClockRate::from_mhz(1), None),
        Err(ConfigError::DuplicateTag("maincpu".into()))
    );
    assert_eq!(
        builder.add_rom("ram", &[0; 4]).map(|_| ()),
        Err(ConfigError::DuplicateMemoryTag("ram".into()))
    );
}

#[test]
fn registry_types_are_constructed_by_name() {
    init_logging();
    let journal = Journal::default();
    let mut registry = DeviceRegistry::with_builtin();
    {
        let journal = Rc::clone(&journal);
        registry.register("node", move |params: &DeviceParams| {
            journal.borrow_mut().push(params.tag.clone());
            Ok(Box::new(Node::new("node", &journal)) as Box<dyn Device>)
        });
    }
    let mut builder = Machine::builder(MachineConfig::default()).with_registry(registry);
    let board = builder
        .add_device("board", "node", ClockRate::default(), None)
        .expect("board");
    builder
        .add_device("cpu", "acc8", ClockRate::from_mhz(1), Some(board))
        .expect("cpu");
    let machine = builder.build().expect("build");

    assert_eq!(journal.borrow()[0], "board");
    let nodes: Vec<_> = machine
        .context()
        .devices()
        .iter()
        .map(|(_, node)| (node.tag().to_owned(), node.type_name().to_owned()))
        .collect();
    assert_eq!(
        nodes,
        vec![
            ("board".to_owned(), "node".to_owned()),
            ("board:cpu".to_owned(), "acc8".to_owned()),
        ]
    );
    assert_eq!(machine.context().execution_units().count(), 1);
}

#[test]
fn register_state_is_read_and_written_by_id() {
    let mut builder = Machine::builder(MachineConfig::default());
    let cpu = builder
        .add_device("maincpu", "acc8", ClockRate::from_mhz(1), None)
        .expect("cpu");
    let machine = builder.build().expect("build");
    let ctx = machine.context();

    ctx.set_state(cpu, STATE_PC, 0x1_2345).expect("set pc");
    ctx.set_state(cpu, STATE_FLAGS, 0xFF).expect("set flags");

    assert_eq!(ctx.get_state(cpu, STATE_PC), Ok(0x2345));
    assert_eq!(ctx.get_state(cpu, STATE_FLAGS), Ok(0x07));
    assert_eq!(
        ctx.get_state(cpu, StateId(42)),
        Err(DeviceAccessError::State(StateError::UnknownId(StateId(42))))
    );
    assert_eq!(ctx.with_device(cpu, |acc8: &mut Acc8| acc8.pc()), Ok(0x2345));
    assert_eq!(ctx.run_state(cpu), Some(RunState::Running));
}

/// Pokes its own cell and a neighbour from a timer callback.
struct Meddler {
    outcome: Rc<RefCell<Vec<Result<u64, DeviceAccessError>>>>,
}

impl Device for Meddler {
    fn start(&mut self, ctx: &MachineContext, id: DeviceId) -> Result<(), ConfigError> {
        ctx.schedule(id, Time::from_micros(5), Time::ZERO, 0);
        Ok(())
    }

    fn on_timer(&mut self, ctx: &MachineContext, timer: &TimerFired) {
        let mut outcome = self.outcome.borrow_mut();
        outcome.push(ctx.with_device(timer.owner, |_: &mut Self| 0));
        let cpu = ctx.find_device("maincpu").expect("cpu");
        outcome.push(ctx.with_device(cpu, |_: &mut Self| 0));
        outcome.push(ctx.get_state(cpu, STATE_A));
    }
}

#[test]
fn device_access_reports_busy_and_wrong_type() {
    let outcome = Rc::new(RefCell::new(Vec::new()));
    let mut builder = Machine::builder(MachineConfig::default());
    builder
        .add_device("maincpu", "acc8", ClockRate::from_mhz(1), None)
        .expect("cpu");
    builder
        .add_device_instance(
            "meddler",
            ClockRate::default(),
            None,
            Meddler {
                outcome: Rc::clone(&outcome),
            },
        )
        .expect("meddler");
    let mut machine = builder.build().expect("build");

    machine.run_for(Time::from_micros(10));

    assert_eq!(
        *outcome.borrow(),
        vec![
            Err(DeviceAccessError::Busy("meddler".into())),
            Err(DeviceAccessError::WrongType("maincpu".into())),
            Ok(0),
        ]
    );
}

#[test]
fn input_lines_are_validated_per_unit() {
    let mut builder = Machine::builder(MachineConfig::default());
    let cpu = builder
        .add_device("maincpu", "acc8", ClockRate::from_mhz(1), None)
        .expect("cpu");
    let journal = Journal::default();
    let node = builder
        .add_device_instance("node", ClockRate::default(), None, Node::new("node", &journal))
        .expect("node");
    let machine = builder.build().expect("build");
    let ctx = machine.context();

    assert_eq!(
        ctx.set_input_line(cpu, 7, machine_core::LineState::Assert),
        Err(DeviceAccessError::UnknownInputLine {
            tag: "maincpu".into(),
            line: 7,
        })
    );
    assert_eq!(
        ctx.set_input_line(node, 0, machine_core::LineState::Assert),
        Err(DeviceAccessError::NotExecutionUnit("node".into()))
    );
}
