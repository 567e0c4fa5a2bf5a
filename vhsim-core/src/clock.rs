//! Pub/sub clock driving cycle advancement across the CPU and any
//! clocked peripherals.

use crate::error::{Error, Result};

/// Something that wants to be notified when the clock advances.
pub trait ClockSubscriber: Send {
    fn tick(&mut self, cycles: u64);
}

pub struct Clock {
    frequency: u64,
    cycle_count: u64,
}

impl Clock {
    pub fn new(frequency: u64) -> Result<Self> {
        if frequency == 0 {
            return Err(Error::Configuration(
                vhsim_target::ConfigError::InvalidSchema("clock frequency must be positive".into()),
            ));
        }
        Ok(Self {
            frequency,
            cycle_count: 0,
        })
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Advances the clock by `cycles` and notifies every subscriber
    /// once with the full batch.
    pub fn tick(&mut self, cycles: u64, subscribers: &mut [&mut dyn ClockSubscriber]) {
        if cycles == 0 {
            return;
        }
        self.cycle_count += cycles;
        for sub in subscribers.iter_mut() {
            sub.tick(cycles);
        }
    }

    pub fn reset(&mut self) {
        self.cycle_count = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Counter(u64);
    impl ClockSubscriber for Counter {
        fn tick(&mut self, cycles: u64) {
            self.0 += cycles;
        }
    }

    #[test]
    fn tick_additivity() {
        let mut a = Clock::new(1_000_000).unwrap();
        let mut sub_a = Counter(0);
        {
            let subs: &mut [&mut dyn ClockSubscriber] = &mut [&mut sub_a];
            a.tick(3, subs);
            a.tick(4, subs);
        }

        let mut b = Clock::new(1_000_000).unwrap();
        let mut sub_b = Counter(0);
        {
            let subs: &mut [&mut dyn ClockSubscriber] = &mut [&mut sub_b];
            b.tick(7, subs);
        }

        assert_eq!(a.cycle_count(), b.cycle_count());
        assert_eq!(sub_a.0, sub_b.0);
    }

    #[test]
    fn zero_frequency_rejected() {
        assert!(Clock::new(0).is_err());
    }

    #[test]
    fn reset_zeroes_count() {
        let mut clock = Clock::new(1000).unwrap();
        clock.tick(5, &mut []);
        clock.reset();
        assert_eq!(clock.cycle_count(), 0);
    }
}
