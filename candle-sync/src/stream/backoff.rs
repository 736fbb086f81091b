use std::time::Duration;

use rand::Rng;

/// Delay before each reconnection attempt of the push stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay before every attempt
    Fixed(Duration),
    /// Doubles per consecutive failure up to `max`; with `jitter` the delay is
    /// drawn from the upper half of the computed value
    Exponential {
        initial: Duration,
        max: Duration,
        jitter: bool,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(Duration::from_secs(3))
    }
}

impl ReconnectPolicy {
    /// Delay before reconnection attempt number `attempt` (starting at 0)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(delay) => delay,
            ReconnectPolicy::Exponential {
                initial,
                max,
                jitter,
            } => {
                let factor = 2u32.saturating_pow(attempt.min(31));
                let delay = initial.saturating_mul(factor).min(max);
                if jitter {
                    equal_jitter(delay)
                } else {
                    delay
                }
            }
        }
    }
}

fn equal_jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis().min(u64::MAX as u128) as u64;
    if millis < 2 {
        return delay;
    }
    let half = millis / 2;
    Duration::from_millis(rand::rng().random_range(half..=millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay() {
        struct TestCase {
            policy: ReconnectPolicy,
            attempt: u32,
            expected: Duration,
        }

        let exponential = ReconnectPolicy::Exponential {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
            jitter: false,
        };

        let tests = vec![
            TestCase {
                // TC0: default policy is a fixed 3s
                policy: ReconnectPolicy::default(),
                attempt: 7,
                expected: Duration::from_secs(3),
            },
            TestCase {
                // TC1: first exponential attempt uses the initial delay
                policy: exponential,
                attempt: 0,
                expected: Duration::from_millis(500),
            },
            TestCase {
                // TC2: doubles per attempt
                policy: exponential,
                attempt: 3,
                expected: Duration::from_millis(4_000),
            },
            TestCase {
                // TC3: capped at max
                policy: exponential,
                attempt: 5,
                expected: Duration::from_secs(10),
            },
            TestCase {
                // TC4: huge attempt counts do not overflow
                policy: exponential,
                attempt: u32::MAX,
                expected: Duration::from_secs(10),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(test.policy.delay(test.attempt), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_jitter_stays_in_upper_half() {
        let policy = ReconnectPolicy::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(8),
            jitter: true,
        };

        for attempt in 0..10 {
            let ceiling = Duration::from_secs(1 << attempt.min(3));
            for _ in 0..50 {
                let delay = policy.delay(attempt);
                assert!(delay <= ceiling, "attempt {attempt}: {delay:?} > {ceiling:?}");
                assert!(delay >= ceiling / 2, "attempt {attempt}: {delay:?} < half");
            }
        }
    }
}
