// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Feedback-suppression delay generation (RFC 5401, "Optimal Multicast
//! Feedback").
//!
//! `lambda = ln(group_size) + 1`; `x` is drawn uniformly from
//! `(lambda/max_backoff, lambda*exp(lambda) / (max_backoff*(exp(lambda)-1)))`;
//! `delay = (max_backoff/lambda) * ln(x*(exp(lambda)-1)*(max_backoff/lambda))`.
//!
//! Unicast publications skip the distribution entirely and use a small
//! constant delay - with exactly one receiver there is nothing to suppress
//! against.

use std::time::Duration;

/// Produces the delay a retransmit handler waits before resending data for
/// a NAK'd range.
pub trait DelayGenerator {
    fn next_delay(&self) -> Duration;
}

/// Constant delay used for unicast publications.
#[derive(Debug, Clone, Copy)]
pub struct UnicastDelayGenerator {
    pub delay: Duration,
}

impl Default for UnicastDelayGenerator {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(1),
        }
    }
}

impl DelayGenerator for UnicastDelayGenerator {
    fn next_delay(&self) -> Duration {
        self.delay
    }
}

/// RFC 5401 distribution used for multicast publications. `group_size` is a
/// constant estimate (SPEC_FULL §9: "making it adaptive is future work").
#[derive(Debug, Clone, Copy)]
pub struct MulticastDelayGenerator {
    pub group_size: u32,
    pub max_backoff: Duration,
}

impl Default for MulticastDelayGenerator {
    fn default() -> Self {
        Self {
            group_size: 10,
            max_backoff: Duration::from_millis(20),
        }
    }
}

impl DelayGenerator for MulticastDelayGenerator {
    fn next_delay(&self) -> Duration {
        rfc5401_delay(self.group_size, self.max_backoff, fastrand::f64())
    }
}

/// Either concrete generator, chosen once when a publication is created
/// (unicast vs. multicast channel) and held monomorphically thereafter.
#[derive(Debug, Clone, Copy)]
pub enum AnyDelayGenerator {
    Unicast(UnicastDelayGenerator),
    Multicast(MulticastDelayGenerator),
}

impl DelayGenerator for AnyDelayGenerator {
    fn next_delay(&self) -> Duration {
        match self {
            Self::Unicast(gen) => gen.next_delay(),
            Self::Multicast(gen) => gen.next_delay(),
        }
    }
}

fn rfc5401_delay(group_size: u32, max_backoff: Duration, unit: f64) -> Duration {
    let max_backoff_secs = max_backoff.as_secs_f64();
    let lambda = (group_size.max(1) as f64).ln() + 1.0;
    let exp_lambda = lambda.exp();

    let low = lambda / max_backoff_secs;
    let high = lambda * exp_lambda / (max_backoff_secs * (exp_lambda - 1.0));
    let x = low + unit * (high - low);

    let delay_secs = (max_backoff_secs / lambda) * (x * (exp_lambda - 1.0) * (max_backoff_secs / lambda)).ln();
    Duration::from_secs_f64(delay_secs.clamp(0.0, max_backoff_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unicast_delay_is_constant() {
        let gen = UnicastDelayGenerator::default();
        assert_eq!(gen.next_delay(), gen.next_delay());
    }

    #[test]
    fn multicast_delay_stays_within_max_backoff() {
        let gen = MulticastDelayGenerator {
            group_size: 16,
            max_backoff: Duration::from_millis(50),
        };
        for _ in 0..1000 {
            let delay = gen.next_delay();
            assert!(delay <= gen.max_backoff);
        }
    }

    #[test]
    fn larger_group_size_does_not_panic_or_produce_negative_delay() {
        let gen = MulticastDelayGenerator {
            group_size: 10_000,
            max_backoff: Duration::from_millis(100),
        };
        for _ in 0..100 {
            let _ = gen.next_delay();
        }
    }
}
