//! Throughput harness for the execution engine.
//!
//! Measures emulated cycles and scheduler slices per host second for
//! machines with a growing number of acc8 processors sharing one RAM
//! block. Each worker thread builds and drives its own machine.
//!
//! Run with `cargo run --release --example performance_harness`.

#![allow(clippy::pedantic)]

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use bitflags as _;
use machine_core::{
    Acc8, Acc8Config, ClockRate, ConfigError, Handler, Machine, MachineConfig, SpaceKind, Time,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

const NUM_THREADS: usize = 4;
const CLOCK_HZ: u64 = 4_000_000;
const QUANTUM_US: u64 = 50;

/// `loop: LDA $2000; ADD #1; STA $2000; LDX #3; INX; JMP loop`
const MIXED_LOOP: &[u8] = &[
    0x11, 0x00, 0x20, 0x40, 0x01, 0x20, 0x00, 0x20, 0x30, 0x03, 0x31, 0x50, 0x00, 0x80,
];

/// `loop: NOP; JMP loop`
const NOP_LOOP: &[u8] = &[0x00, 0x50, 0x00, 0x80];

struct BenchmarkResult {
    name: String,
    cycles_per_second: f64,
    slices_per_second: f64,
    realtime_factor: f64,
}

fn build(units: usize, program: &[u8]) -> Result<Machine, ConfigError> {
    let config = MachineConfig::default().with_quantum(Time::from_micros(QUANTUM_US));
    let mut builder = Machine::builder(config);
    let shared = builder.add_ram("shared", 0x100)?;
    let mut image = vec![0_u8; 0x8000];
    image[..program.len()].copy_from_slice(program);
    image[0x7FFE..].copy_from_slice(&0x8000_u16.to_le_bytes());
    let rom = builder.add_rom("rom", &image)?;
    for index in 0..units {
        let tag = format!("cpu{index}");
        builder.add_device_instance(
            &tag,
            ClockRate::from_hz(CLOCK_HZ),
            None,
            Acc8::new(&tag, Acc8Config::default()),
        )?;
        builder.install(&tag, SpaceKind::Program, 0x2000..=0x20FF, Handler::ram(&shared))?;
        builder.install(&tag, SpaceKind::Program, 0x8000..=0xFFFF, Handler::rom(&rom))?;
    }
    builder.build()
}

fn benchmark(name: &str, units: usize, program: &'static [u8], duration: Duration) -> BenchmarkResult {
    let (tx, rx) = mpsc::channel();

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let tx = tx.clone();
            thread::spawn(move || {
                let mut machine = match build(units, program) {
                    Ok(machine) => machine,
                    Err(err) => {
                        log::error!("harness machine failed to build: {err}");
                        return;
                    }
                };
                let start = Instant::now();
                while start.elapsed() < duration {
                    machine.run_frame();
                }
                let diag = machine.diag();
                tx.send((diag.cycles, diag.slices, machine.time())).ok();
            })
        })
        .collect();

    for h in handles {
        h.join().ok();
    }

    drop(tx);

    let mut total_cycles = 0u64;
    let mut total_slices = 0u64;
    let mut emulated = 0f64;
    for (cycles, slices, time) in rx {
        total_cycles += cycles;
        total_slices += slices;
        emulated += time.as_micros() as f64 / 1_000_000.0;
    }

    let elapsed_secs = duration.as_secs_f64();
    BenchmarkResult {
        name: format!("{name} x{units}"),
        cycles_per_second: total_cycles as f64 / elapsed_secs,
        slices_per_second: total_slices as f64 / elapsed_secs,
        realtime_factor: emulated / (elapsed_secs * NUM_THREADS as f64),
    }
}

fn format_number(n: f64) -> String {
    if n >= 1_000_000.0 {
        format!("{:.2}M", n / 1_000_000.0)
    } else if n >= 1_000.0 {
        format!("{:.2}K", n / 1_000.0)
    } else {
        format!("{:.2}", n)
    }
}

fn print_results(results: &[BenchmarkResult]) {
    println!();
    println!("threads: {NUM_THREADS}  clock: {CLOCK_HZ} Hz  quantum: {QUANTUM_US} us");
    println!(
        "{:14} {:>14} {:>14} {:>10}",
        "benchmark", "cycles/sec", "slices/sec", "realtime"
    );
    for result in results {
        println!(
            "{:14} {:>14} {:>14} {:>9.2}x",
            result.name,
            format_number(result.cycles_per_second),
            format_number(result.slices_per_second),
            result.realtime_factor
        );
    }
}

fn main() {
    env_logger::init();
    let warmup = Duration::from_millis(500);
    let benchmark_duration = Duration::from_secs(3);

    println!("Running warmup for {:?}...", warmup);
    let _ = benchmark("nop", 1, NOP_LOOP, warmup);

    println!("Running benchmarks for {:?} each...", benchmark_duration);
    let mut results = Vec::new();
    for units in [1, 2, 4, 8] {
        results.push(benchmark("nop", units, NOP_LOOP, benchmark_duration));
        results.push(benchmark("mixed", units, MIXED_LOOP, benchmark_duration));
    }

    print_results(&results);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benchmark_reports_progress() {
        let result = benchmark("nop", 2, NOP_LOOP, Duration::from_millis(100));
        assert!(result.cycles_per_second > 0.0);
        assert!(result.slices_per_second > 0.0);
        assert!(result.realtime_factor > 0.0);
    }
}
