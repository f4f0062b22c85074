//! Retransmission timeout estimation, following the Jacobson/Karels algorithm described in
//! RFC 6298, with Karn's algorithm to avoid sampling RTTs from retransmitted segments.

use crate::util::time::Duration;

/// Minimum retransmission timeout (RFC 6298 recommends at least 1 second, but most modern TCP
/// stacks use a lower bound of 200ms to avoid excessive delay on low-latency, high-loss paths).
const MIN_RTO_MILLIS: u64 = 200;
/// Maximum retransmission timeout. RFC 6298 requires the RTO be capped at no less than 60
/// seconds; we use a more generous 20 minutes to match common userspace TCP implementations.
const MAX_RTO_MILLIS: u64 = 20 * 60 * 1000;
/// The RTO to use before any RTT sample has been taken.
const INITIAL_RTO_MILLIS: u64 = 1000;

/// Tracks the smoothed round-trip time (`SRTT`) and round-trip time variance (`RTTVAR`) for a
/// connection, and computes a retransmission timeout (`RTO`) from them.
#[derive(Clone, Debug)]
pub(crate) struct RtoEstimator<D> {
    srtt: Option<D>,
    rttvar: Option<D>,
}

impl<D: Duration> RtoEstimator<D> {
    pub fn new() -> Self {
        Self {
            srtt: None,
            rttvar: None,
        }
    }

    /// Record a new round-trip time sample. The caller must not call this with a sample taken
    /// from a retransmitted segment (Karn's algorithm): doing so would conflate the RTT of the
    /// original and retransmitted segments, since we can't tell which transmission the ACK is
    /// actually acknowledging.
    pub fn on_sample(&mut self, sample: D) {
        match (self.srtt, self.rttvar) {
            (None, _) | (_, None) => {
                // RFC 6298 2.2: on the first measurement, SRTT <- R, RTTVAR <- R/2
                self.srtt = Some(sample);
                self.rttvar = Some(sample.checked_div(2).unwrap_or(D::ZERO));
            }
            (Some(srtt), Some(rttvar)) => {
                // RFC 6298 2.3:
                //   RTTVAR <- (1 - beta) * RTTVAR + beta * |SRTT - R'|    (beta = 1/4)
                //   SRTT   <- (1 - alpha) * SRTT + alpha * R'            (alpha = 1/8)
                let delta = if sample > srtt {
                    sample.saturating_sub(srtt)
                } else {
                    srtt.saturating_sub(sample)
                };

                let rttvar_scaled = rttvar.saturating_sub(div4(rttvar)).saturating_add(div4(delta));
                let srtt_scaled = srtt.saturating_sub(div8(srtt)).saturating_add(div8(sample));

                self.rttvar = Some(rttvar_scaled);
                self.srtt = Some(srtt_scaled);
            }
        }
    }

    /// Returns the current retransmission timeout, clamped to `[MIN_RTO, MAX_RTO]`.
    pub fn rto(&self) -> D {
        let rto = match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => {
                // RFC 6298 2.3: RTO <- SRTT + max(G, K * RTTVAR)    (K = 4)
                let k_rttvar = rttvar.saturating_mul(4);
                srtt.saturating_add(k_rttvar)
            }
            _ => D::from_millis(INITIAL_RTO_MILLIS),
        };

        clamp(rto)
    }
}

fn div4<D: Duration>(d: D) -> D {
    d.checked_div(4).unwrap_or(D::ZERO)
}

fn div8<D: Duration>(d: D) -> D {
    d.checked_div(8).unwrap_or(D::ZERO)
}

fn clamp<D: Duration>(rto: D) -> D {
    let min = D::from_millis(MIN_RTO_MILLIS);
    let max = D::from_millis(MAX_RTO_MILLIS);

    if rto < min {
        min
    } else if rto > max {
        max
    } else {
        rto
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_rto() {
        let est = RtoEstimator::<std::time::Duration>::new();
        assert_eq!(est.rto(), std::time::Duration::from_millis(INITIAL_RTO_MILLIS));
    }

    #[test]
    fn test_first_sample_sets_srtt() {
        let mut est = RtoEstimator::<std::time::Duration>::new();
        est.on_sample(std::time::Duration::from_millis(100));
        // RTO = SRTT + 4*RTTVAR = 100 + 4*50 = 300ms
        assert_eq!(est.rto(), std::time::Duration::from_millis(300));
    }

    #[test]
    fn test_rto_clamped_to_minimum() {
        let mut est = RtoEstimator::<std::time::Duration>::new();
        for _ in 0..20 {
            est.on_sample(std::time::Duration::from_millis(1));
        }
        assert!(est.rto() >= std::time::Duration::from_millis(MIN_RTO_MILLIS));
    }

    #[test]
    fn test_rto_clamped_to_maximum() {
        let mut est = RtoEstimator::<std::time::Duration>::new();
        est.on_sample(std::time::Duration::from_secs(60 * 60));
        assert!(est.rto() <= std::time::Duration::from_millis(MAX_RTO_MILLIS));
    }

    #[test]
    fn test_stable_rtt_converges() {
        let mut est = RtoEstimator::<std::time::Duration>::new();
        for _ in 0..50 {
            est.on_sample(std::time::Duration::from_millis(100));
        }
        // with a perfectly stable RTT, RTTVAR should shrink towards zero and RTO towards SRTT
        assert!(est.rto() < std::time::Duration::from_millis(150));
    }
}
