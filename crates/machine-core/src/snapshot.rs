//! Point-in-time machine introspection.
//!
//! Snapshots compare equal exactly when two machines are in the same
//! observable state, which makes them the determinism oracle for tests and
//! fingerprinting.

use crate::{RunState, StateId, Time, TimerInfo};

/// Observable state of a whole machine.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineSnapshot {
    /// Time up to which the timer queue has advanced.
    pub time: Time,
    /// Execution units in scheduling order.
    pub units: Vec<UnitSnapshot>,
    /// Timer entries in fire order, disarmed persistent entries last.
    pub timers: Vec<TimerInfo>,
    /// Bank selections in tag order.
    pub banks: Vec<BankSelection>,
    /// Memory contents in tag order.
    pub memory: Vec<MemoryImage>,
}

impl MachineSnapshot {
    /// Unit snapshot by full device tag.
    #[must_use]
    pub fn unit(&self, tag: &str) -> Option<&UnitSnapshot> {
        self.units.iter().find(|unit| unit.tag == tag)
    }

    /// Memory contents by block tag.
    #[must_use]
    pub fn memory(&self, tag: &str) -> Option<&[u8]> {
        self.memory
            .iter()
            .find(|image| image.tag == tag)
            .map(|image| image.bytes.as_slice())
    }

    /// FNV-1a digest over the scheduling-relevant state.
    ///
    /// Memory contents are folded in too, so two runs with equal digests
    /// have executed identically for all practical purposes.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hash = Fnv1a::new();
        hash.write(&self.time.as_attos().to_le_bytes());
        for unit in &self.units {
            hash.write(unit.tag.as_bytes());
            hash.write(&unit.local_time.as_attos().to_le_bytes());
            hash.write(&unit.total_cycles.to_le_bytes());
            hash.write(&[unit.run_state.as_u8(), unit.suspend]);
            for (id, value) in &unit.registers {
                hash.write(&id.0.to_le_bytes());
                hash.write(&value.to_le_bytes());
            }
        }
        for timer in &self.timers {
            hash.write(&timer.owner.as_u32().to_le_bytes());
            hash.write(&timer.param.to_le_bytes());
            hash.write(&timer.fire_time.as_attos().to_le_bytes());
        }
        for bank in &self.banks {
            hash.write(bank.tag.as_bytes());
            hash.write(&u64::try_from(bank.selected).unwrap_or(u64::MAX).to_le_bytes());
        }
        for image in &self.memory {
            hash.write(image.tag.as_bytes());
            hash.write(&image.bytes);
        }
        hash.finish()
    }
}

/// Observable state of one execution unit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct UnitSnapshot {
    /// Full device tag.
    pub tag: String,
    /// Local time.
    pub local_time: Time,
    /// Cycles consumed since construction.
    pub total_cycles: u64,
    /// Execution state.
    pub run_state: RunState,
    /// Raw [`crate::SuspendReason`] bits.
    pub suspend: u8,
    /// Every exposed register.
    pub registers: Vec<(StateId, u64)>,
}

impl UnitSnapshot {
    /// Register value by id.
    #[must_use]
    pub fn register(&self, id: StateId) -> Option<u64> {
        self.registers
            .iter()
            .find(|(entry, _)| *entry == id)
            .map(|&(_, value)| value)
    }
}

/// Selected entry of one bank.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BankSelection {
    /// Bank tag.
    pub tag: String,
    /// Selected entry index.
    pub selected: usize,
}

/// Contents of one memory block.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MemoryImage {
    /// Block tag.
    pub tag: String,
    /// Block contents.
    pub bytes: Vec<u8>,
}

struct Fnv1a(u64);

impl Fnv1a {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    const fn new() -> Self {
        Self(Self::OFFSET_BASIS)
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 ^= u64::from(byte);
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
    }

    const fn finish(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::{BankSelection, MachineSnapshot, MemoryImage, UnitSnapshot};
    use crate::{RunState, StateId, Time};

    fn sample() -> MachineSnapshot {
        MachineSnapshot {
            time: Time::from_micros(5),
            units: vec![UnitSnapshot {
                tag: "maincpu".into(),
                local_time: Time::from_micros(6),
                total_cycles: 6,
                run_state: RunState::Running,
                suspend: 0,
                registers: vec![(StateId(0), 0x1234), (StateId(1), 0x56)],
            }],
            timers: Vec::new(),
            banks: vec![BankSelection {
                tag: "rombank".into(),
                selected: 1,
            }],
            memory: vec![MemoryImage {
                tag: "ram".into(),
                bytes: vec![1, 2, 3],
            }],
        }
    }

    #[test]
    fn lookups_find_units_registers_and_memory() {
        let snapshot = sample();
        let unit = snapshot.unit("maincpu").expect("unit present");
        assert_eq!(unit.register(StateId(0)), Some(0x1234));
        assert_eq!(unit.register(StateId(9)), None);
        assert_eq!(snapshot.memory("ram"), Some(&[1_u8, 2, 3][..]));
        assert!(snapshot.unit("audiocpu").is_none());
    }

    #[test]
    fn fingerprint_tracks_memory_and_bank_changes() {
        let base = sample();
        let mut memory_changed = sample();
        memory_changed.memory[0].bytes[1] = 0xFF;
        let mut bank_changed = sample();
        bank_changed.banks[0].selected = 0;

        assert_eq!(base.fingerprint(), sample().fingerprint());
        assert_ne!(base.fingerprint(), memory_changed.fingerprint());
        assert_ne!(base.fingerprint(), bank_changed.fingerprint());
    }
}
