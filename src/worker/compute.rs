//! Work item computations run inside worker processes.

use std::time::Duration;

use anyhow::{Context, anyhow, bail};

use super::protocol::Payload;

/// Computes a result for one work item.
///
/// An `Err` (or a panic) becomes a `None` result for that item; the worker
/// keeps going.
pub trait Compute {
    fn compute(&mut self, item: &Payload) -> anyhow::Result<Payload>;
}

impl<F> Compute for F
where
    F: FnMut(&Payload) -> anyhow::Result<Payload>,
{
    fn compute(&mut self, item: &Payload) -> anyhow::Result<Payload> {
        self(item)
    }
}

/// Simulated processing time, sampled uniformly per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Latency {
    pub min: Duration,
    pub max: Duration,
}

impl Default for Latency {
    fn default() -> Self {
        Self::from_millis(100, 1000)
    }
}

impl Latency {
    /// Bounds in milliseconds; reversed bounds are swapped.
    pub fn from_millis(min: u64, max: u64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    /// No simulated latency.
    pub fn none() -> Self {
        Self::from_millis(0, 0)
    }

    pub fn sample(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(fastrand::u64(min..=max))
    }
}

/// `sqrt(x) / x` for numeric items, followed by a random pause.
#[derive(Debug, Clone, Default)]
pub struct SqrtRatio {
    latency: Latency,
}

impl SqrtRatio {
    pub fn new(latency: Latency) -> Self {
        Self { latency }
    }

    fn ratio(item: &Payload) -> anyhow::Result<f64> {
        let x = item
            .as_f64()
            .ok_or_else(|| anyhow!("work item is not a number: {}", item))?;
        if x == 0.0 {
            bail!("division by zero");
        }
        if x < 0.0 {
            bail!("math domain error: square root of {}", x);
        }
        Ok(x.sqrt() / x)
    }
}

impl Compute for SqrtRatio {
    fn compute(&mut self, item: &Payload) -> anyhow::Result<Payload> {
        let value = Self::ratio(item).with_context(|| format!("computing item {}", item));

        let pause = self.latency.sample();
        tracing::debug!(sleep_ms = pause.as_millis() as u64, "sleeping");
        std::thread::sleep(pause);

        let value = value?;
        serde_json::Number::from_f64(value)
            .map(Payload::Number)
            .ok_or_else(|| anyhow!("result {} is not representable", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sqrt_ratio_of_square() {
        let mut compute = SqrtRatio::new(Latency::none());
        assert_eq!(compute.compute(&json!(16)).unwrap(), json!(0.25));
        assert_eq!(compute.compute(&json!(1)).unwrap(), json!(1.0));
    }

    #[test]
    fn test_zero_fails_with_division_error() {
        let mut compute = SqrtRatio::new(Latency::none());
        let err = compute.compute(&json!(0)).unwrap_err();
        let chain = format!("{:#}", err);
        assert!(chain.contains("computing item 0"));
        assert!(chain.contains("division by zero"));
    }

    #[test]
    fn test_negative_and_non_numeric_items_fail() {
        let mut compute = SqrtRatio::new(Latency::none());
        assert!(compute.compute(&json!(-4)).is_err());
        assert!(compute.compute(&json!("nine")).is_err());
        assert!(compute.compute(&Payload::Null).is_err());
    }

    #[test]
    fn test_closures_compute() {
        let mut calls = 0;
        let mut doubler = |item: &Payload| -> anyhow::Result<Payload> {
            calls += 1;
            Ok(json!(item.as_i64().unwrap_or_default() * 2))
        };
        assert_eq!(doubler.compute(&json!(21)).unwrap(), json!(42));
        drop(doubler);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_latency_sample_stays_in_bounds() {
        let latency = Latency::from_millis(5, 15);
        for _ in 0..100 {
            let d = latency.sample();
            assert!(d >= Duration::from_millis(5) && d <= Duration::from_millis(15));
        }
        assert_eq!(Latency::none().sample(), Duration::ZERO);
    }

    #[test]
    fn test_latency_swaps_reversed_bounds() {
        let latency = Latency::from_millis(900, 200);
        assert_eq!(latency.min, Duration::from_millis(200));
        assert_eq!(latency.max, Duration::from_millis(900));
    }
}
