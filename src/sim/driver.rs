//! Throttled tick loop
//!
//! The driver decides *when* a tick runs; what a tick does is up to the
//! closure it is given. Stopping only prevents further ticks: a tick that
//! already started always completes.

use crate::error::SimResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cloneable flag that stops a [`TickDriver`] from another thread
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct TickDriver {
    min_interval: Option<Duration>,
    last_tick: Option<Instant>,
    ticks: u64,
    stop: StopHandle,
}

impl TickDriver {
    /// Driver limited to `target_rate` ticks per second, or unthrottled for `None`
    pub fn new(target_rate: Option<f64>) -> Self {
        let min_interval = target_rate
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .map(|rate| Duration::from_secs_f64(1.0 / rate));
        Self {
            min_interval,
            last_tick: None,
            ticks: 0,
            stop: StopHandle::default(),
        }
    }

    pub fn unthrottled() -> Self {
        Self::new(None)
    }

    pub fn min_interval(&self) -> Option<Duration> {
        self.min_interval
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Time left before the next tick is due at `now`
    pub fn time_until_due(&self, now: Instant) -> Duration {
        match (self.min_interval, self.last_tick) {
            (Some(interval), Some(last)) => interval.saturating_sub(now.duration_since(last)),
            _ => Duration::ZERO,
        }
    }

    /// Run `tick` if one is due at `now`. Returns `Ok(None)` when throttled or stopped.
    pub fn advance<T>(
        &mut self,
        now: Instant,
        tick: impl FnOnce() -> SimResult<T>,
    ) -> SimResult<Option<T>> {
        if self.is_stopped() || !self.time_until_due(now).is_zero() {
            return Ok(None);
        }
        let out = tick()?;
        self.last_tick = Some(now);
        self.ticks += 1;
        Ok(Some(out))
    }

    /// Block, sleeping between ticks, until `max_ticks` ran or the driver is stopped
    pub fn run<T>(&mut self, max_ticks: u64, mut tick: impl FnMut(u64) -> SimResult<T>) -> SimResult<u64> {
        let start = self.ticks;
        while self.ticks - start < max_ticks && !self.is_stopped() {
            let wait = self.time_until_due(Instant::now());
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
            let index = self.ticks;
            self.advance(Instant::now(), || tick(index))?;
        }
        log::debug!(
            "[TickDriver] Ran {} ticks ({} total)",
            self.ticks - start,
            self.ticks
        );
        Ok(self.ticks - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttling() {
        let mut driver = TickDriver::new(Some(10.0));
        let interval = driver.min_interval().unwrap();
        assert!((interval.as_secs_f64() - 0.1).abs() < 1e-6);

        let t0 = Instant::now();
        assert_eq!(driver.advance(t0, || Ok(1)).unwrap(), Some(1));
        assert_eq!(driver.advance(t0 + Duration::from_millis(50), || Ok(2)).unwrap(), None);
        assert_eq!(
            driver.advance(t0 + Duration::from_millis(150), || Ok(3)).unwrap(),
            Some(3)
        );
        assert_eq!(driver.ticks(), 2);
    }

    #[test]
    fn test_stop_prevents_further_ticks() {
        let mut driver = TickDriver::unthrottled();
        let handle = driver.stop_handle();
        let ran = driver
            .run(100, |i| {
                if i == 4 {
                    handle.stop();
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(ran, 5);
        assert!(driver.advance(Instant::now(), || Ok(())).unwrap().is_none());
    }

    #[test]
    fn test_failed_tick_not_counted() {
        let mut driver = TickDriver::unthrottled();
        let result = driver.advance(Instant::now(), || -> SimResult<()> {
            Err(crate::error::SimError::DeviceLost("test".into()))
        });
        assert!(result.is_err());
        assert_eq!(driver.ticks(), 0);
        assert_eq!(TickDriver::new(Some(0.0)).min_interval(), None);
    }
}
