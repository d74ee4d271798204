//! Connection state machines for both transport roles.
//!
//! Transitions live in [`crate::client`] and [`crate::server`]; this module
//! only names the states.
//!
//! ```text
//!  client                              server
//!
//!  CLOSED ──connect──▶ SYN_SENT        CLOSED ──accept──▶ LISTENING
//!    ▲  ▲                 │              ▲                     │
//!    │  └── retries ──────┤              │                 SYN │
//!    │      exhausted     │ SYNACK       │                     ▼
//!    │                    ▼              │ CLOSE_WAIT ◀─FIN─ CONNECTED
//!    │ FINACK/         CONNECTED         │     │
//!    │ retries            │              └─────┘ timeout after close
//!    │ exhausted          │ disconnect
//!    └───── FIN_WAIT ◀────┘
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Closed,
    /// SYN sent; waiting for SYNACK.
    SynSent,
    Connected,
    /// FIN sent; waiting for FINACK.
    FinWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    #[default]
    Closed,
    /// Waiting for a SYN.
    Listening,
    Connected,
    /// Peer's FIN received; the TCB lingers so late FINs are still answered.
    CloseWait,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::SynSent => "SYN_SENT",
            Self::Connected => "CONNECTED",
            Self::FinWait => "FIN_WAIT",
        })
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Listening => "LISTENING",
            Self::Connected => "CONNECTED",
            Self::CloseWait => "CLOSE_WAIT",
        })
    }
}
