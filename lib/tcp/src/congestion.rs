//! Pluggable congestion control algorithms.
//!
//! Each algorithm tracks a congestion window (`cwnd`) and slow-start threshold (`ssthresh`) and
//! reacts to acknowledgements, duplicate acknowledgements, and retransmission timeouts. The
//! [`Cubic`] variant additionally needs to know how much time has elapsed since the start of the
//! current congestion-avoidance epoch, so callers pass an elapsed-time value (in seconds) taken
//! from the connection's [`Dependencies::current_time`](crate::Dependencies::current_time) clock
//! rather than a wall-clock `Instant`, keeping this module independent of any particular `Instant`
//! implementation.

/// Selects which congestion control algorithm a [`Connection`](crate::connection::Connection)
/// should use.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CongestionControlAlgorithm {
    /// Plain additive-increase/multiplicative-decrease. Window growth is linear in both slow
    /// start and congestion avoidance are the simplest policy; loss is only detected via
    /// retransmission timeout (no fast retransmit).
    Aimd,
    /// AIMD plus Reno-style fast retransmit / fast recovery on three duplicate ACKs.
    Reno,
    /// CUBIC window growth (RFC 8312) with Reno-style fast retransmit / fast recovery.
    Cubic,
}

impl Default for CongestionControlAlgorithm {
    fn default() -> Self {
        Self::Cubic
    }
}

/// The congestion-avoidance phase a connection is in, mirroring the classic BSD/Linux TCP state
/// names.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum CongestionState {
    SlowStart,
    Avoidance,
    FastRecovery,
}

/// CUBIC's constant scaling factor. RFC 8312 recommends `C = 0.4`.
const CUBIC_C: f64 = 0.4;
/// CUBIC's multiplicative window decrease factor on loss.
const CUBIC_BETA: f64 = 0.7;
/// Reno/AIMD's multiplicative window decrease factor on loss.
const RENO_BETA: f64 = 0.5;
/// Number of duplicate ACKs required before a fast retransmit is triggered.
const DUP_ACK_THRESHOLD: u32 = 3;

#[derive(Clone, Debug)]
pub(crate) struct CongestionControl {
    algorithm: CongestionControlAlgorithm,
    mss: u32,
    cwnd: u32,
    ssthresh: u32,
    state: CongestionState,
    dup_acks: u32,
    /// Window size (in bytes) just before the most recent loss event. Used by CUBIC as `w_max`.
    w_max: f64,
    /// Elapsed time (in seconds, since an arbitrary but consistent epoch) at the start of the
    /// current congestion-avoidance run. `None` while in slow start.
    epoch_start: Option<f64>,
    /// CUBIC's `K`, the time (in seconds) it takes the window to grow back up to `w_max`.
    k: f64,
}

impl CongestionControl {
    pub fn new(algorithm: CongestionControlAlgorithm, mss: u32) -> Self {
        let mss = mss.max(1);
        Self {
            algorithm,
            mss,
            // RFC 5681 permits an initial window of up to ~4 MSS; we start conservatively at a
            // single segment and let slow start ramp up quickly.
            cwnd: mss,
            // no loss has occurred yet, so allow slow start to grow unhindered
            ssthresh: u32::MAX,
            state: CongestionState::SlowStart,
            dup_acks: 0,
            w_max: mss as f64,
            epoch_start: None,
            k: 0.0,
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    #[cfg(test)]
    pub fn state(&self) -> CongestionState {
        self.state
    }

    /// New data was acknowledged (`bytes_acked` is the number of newly-acknowledged bytes). This
    /// resets the duplicate-ACK counter, since an ACK that advances the cumulative ACK number is
    /// not a duplicate.
    ///
    /// `now_secs` is only consulted by CUBIC, and should be a monotonically non-decreasing
    /// elapsed-time value.
    pub fn on_ack(&mut self, bytes_acked: u32, now_secs: f64) {
        if bytes_acked == 0 {
            return;
        }

        self.dup_acks = 0;

        if self.state == CongestionState::FastRecovery {
            // new data has arrived, so the loss that triggered fast recovery has been repaired
            self.cwnd = self.ssthresh;
            self.state = CongestionState::Avoidance;
            return;
        }

        if self.cwnd < self.ssthresh {
            self.state = CongestionState::SlowStart;
            // classic slow start: grow the window by the number of bytes acknowledged, capped so
            // that we never increase by more than one MSS per acknowledged segment's worth of data
            self.cwnd = self.cwnd.saturating_add(bytes_acked.min(self.mss));
            if self.cwnd >= self.ssthresh {
                self.state = CongestionState::Avoidance;
                self.epoch_start = None;
            }
            return;
        }

        self.state = CongestionState::Avoidance;

        match self.algorithm {
            CongestionControlAlgorithm::Aimd | CongestionControlAlgorithm::Reno => {
                // classic congestion avoidance: increase by roughly one MSS per round-trip, i.e.
                // `mss * mss / cwnd` per acknowledged segment
                let increment = ((self.mss as u64 * bytes_acked as u64) / self.cwnd as u64).max(1);
                self.cwnd = self.cwnd.saturating_add(increment as u32);
            }
            CongestionControlAlgorithm::Cubic => {
                self.cubic_update(now_secs);
            }
        }
    }

    /// A duplicate ACK (an ACK that does not advance the cumulative ACK number) was received.
    /// Returns `true` if this call triggered a fast retransmit (i.e. the duplicate-ACK count just
    /// reached [`DUP_ACK_THRESHOLD`]).
    pub fn on_duplicate_ack(&mut self) -> bool {
        if matches!(self.algorithm, CongestionControlAlgorithm::Aimd) {
            // plain AIMD has no fast retransmit: loss is only detected by timeout
            return false;
        }

        if self.state == CongestionState::FastRecovery {
            // we're already in recovery; inflate the window to reflect the additional segment
            // that has left the network
            self.cwnd = self.cwnd.saturating_add(self.mss);
            return false;
        }

        self.dup_acks += 1;

        if self.dup_acks < DUP_ACK_THRESHOLD {
            return false;
        }

        self.enter_loss_recovery();
        self.cwnd = self.ssthresh.saturating_add(DUP_ACK_THRESHOLD * self.mss);
        self.state = CongestionState::FastRecovery;

        true
    }

    /// A retransmission timeout fired. This is the most conservative loss response: drop to a
    /// single segment and restart slow start.
    pub fn on_timeout(&mut self) {
        self.enter_loss_recovery();
        self.cwnd = self.mss;
        self.state = CongestionState::SlowStart;
        self.dup_acks = 0;
        self.epoch_start = None;
    }

    fn enter_loss_recovery(&mut self) {
        let beta = match self.algorithm {
            CongestionControlAlgorithm::Cubic => CUBIC_BETA,
            _ => RENO_BETA,
        };

        self.w_max = self.cwnd as f64;
        self.ssthresh = ((self.cwnd as f64) * beta).max(2.0 * self.mss as f64) as u32;
    }

    fn cubic_update(&mut self, now_secs: f64) {
        let epoch_start = *self.epoch_start.get_or_insert_with(|| {
            // entering a fresh congestion-avoidance epoch: compute `K`, the time needed to grow
            // back up to `w_max` following RFC 8312's cubic function
            self.k = ((self.w_max * (1.0 - CUBIC_BETA)) / CUBIC_C).cbrt();
            now_secs
        });

        let t = (now_secs - epoch_start).max(0.0);
        let target = CUBIC_C * (t - self.k).powi(3) + self.w_max;
        let target = target.max(self.mss as f64);

        self.cwnd = target.min(u32::MAX as f64) as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_window() {
        let cc = CongestionControl::new(CongestionControlAlgorithm::Reno, 1000);
        assert_eq!(cc.cwnd(), 1000);
        assert_eq!(cc.state(), CongestionState::SlowStart);
    }

    #[test]
    fn test_slow_start_grows_with_acks() {
        let mut cc = CongestionControl::new(CongestionControlAlgorithm::Reno, 1000);
        cc.on_ack(1000, 0.0);
        assert_eq!(cc.cwnd(), 2000);
        cc.on_ack(1000, 0.0);
        assert_eq!(cc.cwnd(), 3000);
    }

    #[test]
    fn test_timeout_resets_to_one_segment() {
        let mut cc = CongestionControl::new(CongestionControlAlgorithm::Reno, 1000);
        cc.on_ack(1000, 0.0);
        cc.on_ack(1000, 0.0);
        assert!(cc.cwnd() > 1000);
        cc.on_timeout();
        assert_eq!(cc.cwnd(), 1000);
        assert_eq!(cc.state(), CongestionState::SlowStart);
        assert!(cc.ssthresh() >= 2 * 1000);
    }

    #[test]
    fn test_aimd_ignores_duplicate_acks() {
        let mut cc = CongestionControl::new(CongestionControlAlgorithm::Aimd, 1000);
        let before = cc.cwnd();
        assert!(!cc.on_duplicate_ack());
        assert!(!cc.on_duplicate_ack());
        assert!(!cc.on_duplicate_ack());
        assert_eq!(cc.cwnd(), before);
    }

    #[test]
    fn test_reno_fast_retransmit_on_third_dup_ack() {
        let mut cc = CongestionControl::new(CongestionControlAlgorithm::Reno, 1000);
        assert!(!cc.on_duplicate_ack());
        assert!(!cc.on_duplicate_ack());
        assert!(cc.on_duplicate_ack());
        assert_eq!(cc.state(), CongestionState::FastRecovery);
        assert!(cc.ssthresh() >= 2 * 1000);
    }

    #[test]
    fn test_reno_exits_recovery_on_new_ack() {
        let mut cc = CongestionControl::new(CongestionControlAlgorithm::Reno, 1000);
        cc.on_ack(1000, 0.0);
        cc.on_ack(1000, 0.0);
        cc.on_duplicate_ack();
        cc.on_duplicate_ack();
        cc.on_duplicate_ack();
        assert_eq!(cc.state(), CongestionState::FastRecovery);
        let ssthresh = cc.ssthresh();
        cc.on_ack(1000, 0.0);
        assert_eq!(cc.state(), CongestionState::Avoidance);
        assert_eq!(cc.cwnd(), ssthresh);
    }

    #[test]
    fn test_cubic_window_grows_over_time() {
        let mut cc = CongestionControl::new(CongestionControlAlgorithm::Cubic, 1000);
        // force into congestion avoidance
        while cc.cwnd() < cc.ssthresh() {
            cc.on_ack(1000, 0.0);
        }
        cc.ssthresh = 1000;
        cc.on_ack(1000, 0.0);
        let w0 = cc.cwnd();
        cc.on_ack(1000, 5.0);
        assert!(cc.cwnd() >= w0);
    }
}
