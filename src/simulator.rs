//! Fault injection for the transport hop.
//!
//! A real overlay drops and damages segments. To exercise retransmission
//! without a flaky network, every segment crossing the transport/SIP
//! boundary passes through a [`Simulator`], which applies one of:
//!
//! | Fault     | Effect                                                   |
//! |-----------|----------------------------------------------------------|
//! | `Pass`    | Bytes delivered untouched.                               |
//! | `Drop`    | Segment silently discarded.                              |
//! | `Corrupt` | One random bit flipped; the checksum then rejects it.    |
//!
//! Randomness comes from a seeded [`StdRng`] so a failing run can be
//! replayed. Tests that need a specific segment to vanish install a
//! [`FaultRule`], which is matched against the raw header before any
//! random draw.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{FaultConfig, FaultSide};
use crate::segment::{self, SegmentType};

/// What the simulator decided to do with one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Pass,
    Drop,
    Corrupt,
}

/// A scripted fault matched against the raw segment header.
///
/// `None` fields match anything. The rule fires for the first `remaining`
/// matching segments and then retires.
#[derive(Debug, Clone)]
pub struct FaultRule {
    pub seg_type: Option<SegmentType>,
    pub seq_num: Option<u32>,
    pub fault: Fault,
    pub remaining: usize,
}

impl FaultRule {
    /// Drop the first `times` segments of `seg_type`.
    pub fn drop_type(seg_type: SegmentType, times: usize) -> Self {
        Self {
            seg_type: Some(seg_type),
            seq_num: None,
            fault: Fault::Drop,
            remaining: times,
        }
    }

    /// Apply `fault` once to the DATA segment starting at `seq_num`.
    pub fn once_data(seq_num: u32, fault: Fault) -> Self {
        Self {
            seg_type: Some(SegmentType::Data),
            seq_num: Some(seq_num),
            fault,
            remaining: 1,
        }
    }

    fn matches(&self, seg_type: u16, seq_num: u32) -> bool {
        self.remaining > 0
            && self.seg_type.map_or(true, |t| t as u16 == seg_type)
            && self.seq_num.map_or(true, |s| s == seq_num)
    }
}

struct SimState {
    rng: StdRng,
    rules: Vec<FaultRule>,
}

/// Loss and corruption model for one endpoint.
pub struct Simulator {
    config: FaultConfig,
    state: Mutex<SimState>,
}

impl Simulator {
    pub fn new(config: FaultConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config,
            state: Mutex::new(SimState {
                rng,
                rules: Vec::new(),
            }),
        }
    }

    /// A simulator that never interferes.
    pub fn passthrough() -> Self {
        Self::new(FaultConfig {
            seed: Some(0),
            ..FaultConfig::default()
        })
    }

    /// Add a scripted rule. Rules are consulted in insertion order.
    pub fn with_rule(self, rule: FaultRule) -> Self {
        self.state.lock().rules.push(rule);
        self
    }

    pub fn side(&self) -> FaultSide {
        self.config.side
    }

    /// Decide the fate of the encoded segment in `bytes`, damaging it in
    /// place when the verdict is [`Fault::Corrupt`].
    pub fn apply(&self, bytes: &mut [u8]) -> Fault {
        let mut st = self.state.lock();

        let scripted = segment::peek_type_and_seq(bytes).and_then(|(ty, seq)| {
            st.rules.iter_mut().find(|r| r.matches(ty, seq)).map(|r| {
                r.remaining -= 1;
                r.fault
            })
        });

        let rate = self.config.loss_rate.clamp(0.0, 1.0);
        let fault = match scripted {
            Some(f) => f,
            None if rate > 0.0 && st.rng.random_bool(rate) => {
                if st.rng.random_bool(0.5) {
                    Fault::Drop
                } else {
                    Fault::Corrupt
                }
            }
            None => Fault::Pass,
        };

        if fault == Fault::Corrupt && !bytes.is_empty() {
            let bit = st.rng.random_range(0..bytes.len() * 8);
            bytes[bit / 8] ^= 1 << (bit % 8);
        }
        if fault != Fault::Pass {
            log::debug!("[seg] simulated fault {:?} ({} bytes)", fault, bytes.len());
        }
        fault
    }
}
