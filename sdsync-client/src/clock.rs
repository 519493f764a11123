//! Clock offset estimate from PING/PONG round trips
//!
//! For each sample `offset = serverTime - (clientSent + rtt / 2)`. The sample
//! with the lowest round-trip time wins, since it bounds the asymmetry error
//! most tightly. With no samples the offset is zero.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    pub rtt: Duration,
    pub offset: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ClockSync {
    best: Option<ClockSample>,
    samples: usize,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one PONG; returns the sample unless the round trip was negative
    pub fn record(
        &mut self,
        client_sent: DateTime<Utc>,
        server_time: DateTime<Utc>,
        received: DateTime<Utc>,
    ) -> Option<ClockSample> {
        let rtt = received.signed_duration_since(client_sent);
        if rtt < Duration::zero() {
            return None;
        }
        let midpoint = client_sent + rtt / 2;
        let sample = ClockSample {
            rtt,
            offset: server_time.signed_duration_since(midpoint),
        };
        self.samples += 1;
        match self.best {
            Some(best) if best.rtt <= sample.rtt => {}
            _ => self.best = Some(sample),
        }
        Some(sample)
    }

    /// Estimated `hub clock - local clock`
    pub fn offset(&self) -> Duration {
        self.best.map(|s| s.offset).unwrap_or_else(Duration::zero)
    }

    /// Local instant expressed on the hub's clock
    pub fn hub_now(&self, local_now: DateTime<Utc>) -> DateTime<Utc> {
        local_now + self.offset()
    }

    pub fn best(&self) -> Option<ClockSample> {
        self.best
    }

    pub fn sample_count(&self) -> usize {
        self.samples
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
