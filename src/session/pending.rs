//! # Pending Commands
//!
//! One command/ack slot per command kind. A slot is either idle (`None`) or
//! holds the exact frame that was sent and when it was last (re)sent.

use crate::transport::Frame;

use super::protocol::{CMD_EXTENDED, CMD_PAIRING_CONFIG, CMD_RF_TEST, CMD_SET_MODE};

/// Commands that wait for an acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Mode,
    Pairing,
    RfTest,
    Extended,
}

impl CommandKind {
    pub const ALL: [CommandKind; 4] = [
        CommandKind::Mode,
        CommandKind::Pairing,
        CommandKind::RfTest,
        CommandKind::Extended,
    ];

    /// Wire command id, also the id of the ack
    pub fn command(self) -> u8 {
        match self {
            CommandKind::Mode => CMD_SET_MODE,
            CommandKind::Pairing => CMD_PAIRING_CONFIG,
            CommandKind::RfTest => CMD_RF_TEST,
            CommandKind::Extended => CMD_EXTENDED,
        }
    }

    pub fn from_command(command: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.command() == command)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// A sent command still awaiting its ack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    /// Frame to resend verbatim
    pub frame: Frame,

    /// Time of the last transmission
    pub since_ms: u64,

    /// Retransmissions so far
    pub retries: u32,
}

/// Command/ack slots, owned by the session and mutated through `&mut`
#[derive(Debug, Default)]
pub struct PendingTable {
    slots: [Option<PendingCommand>; 4],
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start awaiting an ack, replacing whatever this kind was waiting for
    pub fn arm(&mut self, kind: CommandKind, frame: Frame, now_ms: u64) {
        self.slots[kind.index()] = Some(PendingCommand {
            frame,
            since_ms: now_ms,
            retries: 0,
        });
    }

    /// Return to idle, returns the command that was pending
    pub fn clear(&mut self, kind: CommandKind) -> Option<PendingCommand> {
        self.slots[kind.index()].take()
    }

    pub fn get(&self, kind: CommandKind) -> Option<&PendingCommand> {
        self.slots[kind.index()].as_ref()
    }

    pub fn is_pending(&self, kind: CommandKind) -> bool {
        self.slots[kind.index()].is_some()
    }

    pub fn is_idle(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Commands whose ack is overdue at `now_ms`
    ///
    /// Each returned entry has its timestamp refreshed and its retry count
    /// bumped; the caller is expected to resend the frame.
    pub fn due(&mut self, now_ms: u64, timeout_ms: u64) -> Vec<(CommandKind, PendingCommand)> {
        let mut due = Vec::new();

        for kind in CommandKind::ALL {
            if let Some(pending) = self.slots[kind.index()].as_mut() {
                if now_ms.saturating_sub(pending.since_ms) >= timeout_ms {
                    pending.since_ms = now_ms;
                    pending.retries += 1;
                    due.push((kind, pending.clone()));
                }
            }
        }

        due
    }
}
