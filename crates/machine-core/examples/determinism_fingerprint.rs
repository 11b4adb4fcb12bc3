//! Deterministic replay fingerprint generator used for cross-host comparison.
//!
//! Builds a two-processor machine with a periodic interrupt source, runs a
//! fixed number of frames and prints the snapshot fingerprint.

use bitflags as _;
use log::info;
use machine_core::cpu::acc8::IRQ_LINE;
use machine_core::{
    Acc8, Acc8Config, ClockRate, ConfigError, Device, DeviceId, Handler, LineState, Machine,
    MachineConfig, MachineContext, SpaceKind, Time, TimerFired,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

const FRAMES: usize = 30;

/// `EI; loop: LDA $2000; ADD #1; STA $2000; JMP loop`
const MAIN_PROGRAM: &[u8] = &[
    0x70, 0x11, 0x00, 0x20, 0x40, 0x01, 0x20, 0x00, 0x20, 0x50, 0x01, 0x80,
];
/// `INX; RETI`
const MAIN_ISR: &[u8] = &[0x31, 0x72];
/// `loop: LDA $2000; STA $2001; JMP loop`
const AUDIO_PROGRAM: &[u8] = &[0x11, 0x00, 0x20, 0x20, 0x01, 0x20, 0x50, 0x00, 0x80];

/// Raises the main processor's IRQ once per scanline-ish period.
struct IrqSource {
    cpu: Option<DeviceId>,
}

impl Device for IrqSource {
    fn start(&mut self, ctx: &MachineContext, id: DeviceId) -> Result<(), ConfigError> {
        self.cpu = Some(ctx.require_device(id, "maincpu")?);
        ctx.schedule(id, Time::from_micros(64), Time::from_micros(64), 0);
        Ok(())
    }

    fn on_timer(&mut self, ctx: &MachineContext, _timer: &TimerFired) {
        if let Some(cpu) = self.cpu {
            if let Err(err) = ctx.set_input_line(cpu, IRQ_LINE, LineState::Hold) {
                log::warn!("irq source: {err}");
            }
        }
    }
}

fn rom_image(program: &[u8], isr: &[u8]) -> Vec<u8> {
    let mut image = vec![0_u8; 0x8000];
    image[..program.len()].copy_from_slice(program);
    image[0x100..0x100 + isr.len()].copy_from_slice(isr);
    image[0x7FF0..0x7FF2].copy_from_slice(&0x8100_u16.to_le_bytes());
    image[0x7FFE..0x8000].copy_from_slice(&0x8000_u16.to_le_bytes());
    image
}

fn build() -> Result<Machine, ConfigError> {
    let mut builder = Machine::builder(MachineConfig::default().with_quantum(Time::from_micros(50)));
    let shared = builder.add_ram("shared", 0x100)?;
    for (tag, clock, program, isr) in [
        ("maincpu", ClockRate::from_hz(1_789_773), MAIN_PROGRAM, MAIN_ISR),
        ("audiocpu", ClockRate::from_hz(3_579_545), AUDIO_PROGRAM, MAIN_ISR),
    ] {
        builder.add_device_instance(tag, clock, None, Acc8::new(tag, Acc8Config::default()))?;
        let ram = builder.add_ram(&format!("{tag}:ram"), 0x2000)?;
        let rom = builder.add_rom(&format!("{tag}:rom"), &rom_image(program, isr))?;
        builder.install(tag, SpaceKind::Program, 0x0000..=0x1FFF, Handler::ram(&ram))?;
        builder.install(tag, SpaceKind::Program, 0x2000..=0x20FF, Handler::ram(&shared))?;
        builder.install(tag, SpaceKind::Program, 0x8000..=0xFFFF, Handler::rom(&rom))?;
    }
    builder.add_device_instance("irq", ClockRate::default(), None, IrqSource { cpu: None })?;
    builder.build()
}

fn main() -> Result<(), ConfigError> {
    env_logger::init();
    let mut machine = build()?;
    for _ in 0..FRAMES {
        machine.run_frame();
    }
    let snapshot = machine.snapshot();
    info!("ran to {} with {:?}", snapshot.time, machine.diag());
    println!("{:016x}", snapshot.fingerprint());
    Ok(())
}
