//! Tunable parameters for the transport, routing and fault layers.
//!
//! `Default` reproduces the classic lab constants. Tests shrink the
//! timeouts so retry paths finish in milliseconds.

use std::time::Duration;

use crate::segment::MAX_SEG_LEN;

/// Parameters of the STCP transport engine.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Number of TCB slots (connection handles) per endpoint.
    pub max_connections: usize,
    /// Largest payload carried by one DATA segment.
    pub max_seg_len: usize,
    /// Wait for SYNACK before resending SYN.
    pub syn_timeout: Duration,
    /// Total SYN transmissions before `connect` gives up.
    pub syn_max_retry: u32,
    /// Wait for FINACK before resending FIN.
    pub fin_timeout: Duration,
    /// Total FIN transmissions before `disconnect` gives up.
    pub fin_max_retry: u32,
    /// Age after which the oldest unacknowledged DATA segment triggers a
    /// Go-Back-N retransmission.
    pub data_timeout: Duration,
    /// How often the send-queue drainer wakes to look for timeouts.
    pub sendbuf_poll_interval: Duration,
    /// Maximum number of sent-but-unacknowledged DATA segments.
    pub gbn_window: usize,
    /// Capacity of the server receive buffer in bytes.
    pub recv_buf_size: usize,
    /// Grace period a server TCB lingers in CLOSE_WAIT after `close`.
    pub closewait_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_seg_len: MAX_SEG_LEN,
            syn_timeout: Duration::from_secs(1),
            syn_max_retry: 5,
            fin_timeout: Duration::from_secs(1),
            fin_max_retry: 5,
            data_timeout: Duration::from_millis(100),
            sendbuf_poll_interval: Duration::from_millis(100),
            gbn_window: 10,
            recv_buf_size: 1_000_000,
            closewait_timeout: Duration::from_secs(10),
        }
    }
}

/// Parameters of the distance-vector routing engine.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Period between distance-vector broadcasts.
    pub route_update_interval: Duration,
    /// A neighbour silent for this long is declared dead.
    pub alive_threshold: Duration,
    /// Capacity of the distance vector (and routing table).
    pub max_node_num: usize,
    /// Number of hash buckets in the routing table.
    pub routing_table_slots: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            route_update_interval: Duration::from_secs(2),
            alive_threshold: Duration::from_secs(10),
            max_node_num: 10,
            routing_table_slots: 10,
        }
    }
}

/// Which end of a hop applies simulated faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultSide {
    /// Faults are applied before a segment is written.
    Sender,
    /// Faults are applied after a frame is read, before validation.
    #[default]
    Receiver,
}

/// Parameters of the loss/corruption simulator.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// Probability in `[0.0, 1.0]` that a segment suffers a fault.
    pub loss_rate: f64,
    /// Where faults are injected.
    pub side: FaultSide,
    /// Seed for reproducible fault sequences; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for FaultConfig {
    fn default() -> Self {
        // lossless until a rate is set
        Self {
            loss_rate: 0.0,
            side: FaultSide::Receiver,
            seed: None,
        }
    }
}

impl FaultConfig {
    /// The classic lab setting: 10% of segments are lost or corrupted.
    pub fn lab() -> Self {
        Self {
            loss_rate: 0.1,
            ..Self::default()
        }
    }
}

/// Complete configuration for one node's stack.
#[derive(Debug, Clone, Default)]
pub struct StackConfig {
    pub transport: TransportConfig,
    pub routing: RoutingConfig,
    pub fault: FaultConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_lab_constants() {
        let t = TransportConfig::default();
        assert_eq!(t.max_connections, 10);
        assert_eq!(t.max_seg_len, 1464);
        assert_eq!(t.syn_max_retry, 5);
        assert_eq!(t.fin_max_retry, 5);
        assert_eq!(t.gbn_window, 10);
        assert_eq!(t.recv_buf_size, 1_000_000);
        assert_eq!(t.closewait_timeout, Duration::from_secs(10));

        let r = RoutingConfig::default();
        assert_eq!(r.max_node_num, 10);
        assert_eq!(r.route_update_interval, Duration::from_secs(2));
        assert_eq!(r.alive_threshold, Duration::from_secs(10));
    }

    #[test]
    fn default_fault_model_is_lossless() {
        let f = FaultConfig::default();
        assert_eq!(f.loss_rate, 0.0);
        assert_eq!(f.side, FaultSide::Receiver);
        assert!((FaultConfig::lab().loss_rate - 0.1).abs() < f64::EPSILON);
    }
}
