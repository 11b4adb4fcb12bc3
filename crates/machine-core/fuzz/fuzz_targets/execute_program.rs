#![no_main]

use libfuzzer_sys::fuzz_target;
use machine_core::{
    Acc8, Acc8Config, AccessWidth, ClockRate, Handler, Machine, MachineConfig, SpaceKind, Time,
};

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let (header, program) = data.split_at(4);
    let addr = u64::from(u16::from_le_bytes([header[0], header[1]]));
    let width = match header[2] & 0x3 {
        0 => AccessWidth::Byte,
        1 => AccessWidth::Word,
        2 => AccessWidth::DWord,
        _ => AccessWidth::QWord,
    };
    let config = Acc8Config {
        reset_pc: Some(0x8000),
        illegal_opcode_fatal: header[3] & 1 != 0,
    };

    let mut builder = Machine::builder(MachineConfig::default().with_quantum(Time::from_micros(20)));
    let Ok(ram) = builder.add_ram("ram", 0x2000) else {
        return;
    };
    let mut image = vec![0_u8; 0x8000];
    let len = program.len().min(image.len());
    image[..len].copy_from_slice(&program[..len]);
    let Ok(rom) = builder.add_rom("rom", &image) else {
        return;
    };
    for tag in ["cpu0", "cpu1"] {
        if builder
            .add_device_instance(tag, ClockRate::from_mhz(1), None, Acc8::new(tag, config))
            .is_err()
        {
            return;
        }
        let _ = builder.install(tag, SpaceKind::Program, 0x0000..=0x1FFF, Handler::ram(&ram));
        let _ = builder.install(tag, SpaceKind::Program, 0x8000..=0xFFFF, Handler::rom(&rom));
    }
    let Ok(mut machine) = builder.build() else {
        return;
    };

    machine.run_for(Time::from_micros(200));

    let ctx = machine.context();
    if let Some(cpu) = ctx.find_device("cpu0") {
        if let Ok(space) = ctx.address_space(cpu, SpaceKind::Program) {
            let value = space.read(ctx, addr, width);
            space.write(ctx, addr, width, value);
        }
    }
    let _ = machine.snapshot().fingerprint();
});
