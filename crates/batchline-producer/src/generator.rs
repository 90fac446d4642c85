//! Synthetic record generation.

use std::time::Duration;

use batchline_types::{EventRecord, RecordId};
use chrono::{Local, NaiveDateTime, Timelike};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};

const FIRST_NAMES: &[&str] = &[
    "Ada", "Alan", "Barbara", "Claude", "Donald", "Edsger", "Frances", "Grace", "Hedy", "Ivan",
    "John", "Katherine", "Leslie", "Margaret", "Niklaus", "Radia", "Sophie", "Tim",
];

const LAST_NAMES: &[&str] = &[
    "Allen", "Backus", "Dijkstra", "Hamilton", "Hopper", "Johnson", "Knuth", "Lamport",
    "Liskov", "Lovelace", "McCarthy", "Perlman", "Ritchie", "Shannon", "Sutherland", "Turing",
    "Wilson", "Wirth",
];

const CITIES: &[&str] = &[
    "Amsterdam", "Berlin", "Boston", "Buenos Aires", "Cape Town", "Dublin", "Lisbon", "London",
    "Melbourne", "Montreal", "Nairobi", "Osaka", "Porto", "Seoul", "Stockholm", "Toronto",
    "Vienna", "Zurich",
];

/// Youngest generated age.
pub const MIN_AGE: u32 = 18;
/// Oldest generated age.
pub const MAX_AGE: u32 = 80;

/// Produces plausible [`EventRecord`]s.
#[derive(Debug)]
pub struct RecordGenerator {
    rng: StdRng,
}

impl RecordGenerator {
    /// Generator seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic generator; record ids are still random v4 UUIDs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Creates a record stamped with the current local time (whole seconds).
    pub fn next_record(&mut self) -> EventRecord {
        self.record_at(now())
    }

    /// Creates a record with the given creation time.
    pub fn record_at(&mut self, created: NaiveDateTime) -> EventRecord {
        let first = pick(&mut self.rng, FIRST_NAMES);
        let last = pick(&mut self.rng, LAST_NAMES);
        let city = pick(&mut self.rng, CITIES);
        let age = self.rng.gen_range(MIN_AGE..=MAX_AGE);

        EventRecord::new(
            RecordId::new_v4(),
            format!("{first} {last}"),
            age,
            city,
            created,
        )
    }

    /// Random delay in `0..=max`, at millisecond granularity.
    pub fn jitter(&mut self, max: Duration) -> Duration {
        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.rng.gen_range(0..=max_ms))
    }
}

impl Default for RecordGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn pick<'a>(rng: &mut StdRng, options: &[&'a str]) -> &'a str {
    options.choose(rng).copied().unwrap_or_default()
}

fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_well_formed() {
        let mut generator = RecordGenerator::seeded(7);

        for _ in 0..200 {
            let record = generator.next_record();
            assert!((MIN_AGE..=MAX_AGE).contains(&record.age));
            assert!(record.name.contains(' '));
            assert!(CITIES.contains(&record.city.as_str()));
            assert_eq!(record.created_date.nanosecond(), 0);
        }
    }

    #[test]
    fn generated_records_pass_wire_validation() {
        let mut generator = RecordGenerator::seeded(11);
        let record = generator.next_record();

        let payload = record.encode().unwrap();
        assert_eq!(EventRecord::decode(&payload).unwrap(), record);
    }

    #[test]
    fn ids_are_unique() {
        let mut generator = RecordGenerator::seeded(1);
        let a = generator.next_record();
        let b = generator.next_record();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn jitter_stays_within_bound() {
        let mut generator = RecordGenerator::seeded(3);
        let max = Duration::from_millis(500);
        for _ in 0..100 {
            assert!(generator.jitter(max) <= max);
        }
        assert_eq!(generator.jitter(Duration::ZERO), Duration::ZERO);
    }
}
