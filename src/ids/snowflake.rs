// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! 64-bit time-sortable identifiers: 42-bit ms-since-epoch, 10-bit machine
//! id, 12-bit sequence. Epoch is 2024-01-01T00:00:00Z.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Custom epoch: 2024-01-01T00:00:00Z in Unix milliseconds.
pub const EPOCH_MS: u64 = 1_704_067_200_000;

const SEQUENCE_BITS: u32 = 12;
const MACHINE_BITS: u32 = 10;
const TIMESTAMP_BITS: u32 = 42;

const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const MACHINE_MASK: u64 = (1 << MACHINE_BITS) - 1;
const TIMESTAMP_MASK: u64 = (1 << TIMESTAMP_BITS) - 1;

/// A 64-bit snowflake-style identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u64);

impl Id {
    /// Build an id from its constituent parts, matching `FromParts` in the
    /// spec's data model.
    pub fn from_parts(machine_id: u32, sequence: u32, unix_ms: u64) -> Self {
        let ts = unix_ms.saturating_sub(EPOCH_MS) & TIMESTAMP_MASK;
        let machine = (machine_id as u64) & MACHINE_MASK;
        let seq = (sequence as u64) & SEQUENCE_MASK;
        Id((ts << (MACHINE_BITS + SEQUENCE_BITS)) | (machine << SEQUENCE_BITS) | seq)
    }

    /// Raw 64-bit value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Construct from a raw 64-bit value (e.g. decoded off the wire).
    pub fn from_u64(v: u64) -> Self {
        Id(v)
    }

    /// Milliseconds since the Unix epoch this id was minted at.
    pub fn timestamp_unix_ms(self) -> u64 {
        ((self.0 >> (MACHINE_BITS + SEQUENCE_BITS)) & TIMESTAMP_MASK) + EPOCH_MS
    }

    /// The machine id embedded in this id.
    pub fn machine_id(self) -> u32 {
        ((self.0 >> SEQUENCE_BITS) & MACHINE_MASK) as u32
    }

    /// The sequence number embedded in this id.
    pub fn sequence(self) -> u32 {
        (self.0 & SEQUENCE_MASK) as u32
    }

    /// Lowest id sharing this id's millisecond, for range queries.
    pub fn lowerbound(self) -> Id {
        Id(self.0 & !((1u64 << (MACHINE_BITS + SEQUENCE_BITS)) - 1))
    }

    /// Highest id sharing this id's millisecond, for range queries.
    pub fn upperbound(self) -> Id {
        Id(self.0 | ((1u64 << (MACHINE_BITS + SEQUENCE_BITS)) - 1))
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

struct GenState {
    last_ms: u64,
    sequence: u32,
}

/// A single-process monotonic generator. `next()` is strictly increasing
/// across at most 4096 ids per millisecond; beyond that it spins onto the
/// next millisecond.
pub struct Generator {
    machine_id: u32,
    state: Mutex<GenState>,
}

impl Generator {
    /// Create a generator for `machine_id`, seeding the initial sequence
    /// from the low bits of the current time so two generators started in
    /// the same millisecond don't collide on sequence zero.
    pub fn new(machine_id: u32) -> Self {
        let seed = (now_unix_ms() & SEQUENCE_MASK) as u32;
        Self {
            machine_id,
            state: Mutex::new(GenState {
                last_ms: 0,
                sequence: seed,
            }),
        }
    }

    /// Mint the next id, spinning past a millisecond boundary if the
    /// 4096-id budget for the current millisecond is exhausted.
    pub fn next(&self) -> Id {
        loop {
            let mut guard = self.state.lock().expect("snowflake state poisoned");
            let now = now_unix_ms();

            if now > guard.last_ms {
                guard.last_ms = now;
                guard.sequence = (guard.sequence.wrapping_add(1)) & SEQUENCE_MASK as u32;
                return Id::from_parts(self.machine_id, guard.sequence, now);
            }

            let seq = (guard.sequence.wrapping_add(1)) & SEQUENCE_MASK as u32;
            if seq == 0 {
                // Sequence space for this millisecond is exhausted; drop the
                // lock and spin until the clock ticks forward.
                drop(guard);
                std::thread::yield_now();
                continue;
            }
            guard.sequence = seq;
            return Id::from_parts(self.machine_id, seq, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_round_trips() {
        let id = Id::from_parts(42, 7, EPOCH_MS + 12_345);
        assert_eq!(id.machine_id(), 42);
        assert_eq!(id.sequence(), 7);
        assert_eq!(id.timestamp_unix_ms(), EPOCH_MS + 12_345);
    }

    #[test]
    fn bounds_mask_low_bits() {
        let id = Id::from_parts(1, 99, EPOCH_MS + 1);
        assert!(id.lowerbound().as_u64() <= id.as_u64());
        assert!(id.upperbound().as_u64() >= id.as_u64());
        assert_eq!(id.lowerbound().sequence(), 0);
        assert_eq!(id.upperbound().sequence(), (1 << SEQUENCE_BITS) - 1);
    }

    #[test]
    fn generator_is_strictly_increasing() {
        let gen = Generator::new(3);
        let mut prev = gen.next();
        for _ in 0..2000 {
            let id = gen.next();
            assert!(id.as_u64() > prev.as_u64());
            prev = id;
        }
    }

    #[test]
    fn generator_spans_sequence_within_one_ms() {
        // Exercise enough ids in a tight loop that most share a millisecond;
        // whichever millisecond they land in, machine id is stable and
        // sequence values are consistent with the timestamp field.
        let gen = Generator::new(9);
        let mut ids = Vec::with_capacity(1000);
        for _ in 0..1000 {
            ids.push(gen.next());
        }
        for w in ids.windows(2) {
            assert!(w[1].as_u64() > w[0].as_u64());
            assert_eq!(w[0].machine_id(), 9);
        }
    }
}
