//! The wire vocabulary exchanged engine→host.
//!
//! Commands are fixed, case-sensitive 4-letter ASCII tokens, optionally
//! followed by an argument. The engine never sends anything else; the host
//! never talks back except by calling the dedicated `Send*BodyChunk`
//! entry points.

/// A single engine→host command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// The transaction finished; no further commands will follow.
    Done,
    /// No command was ready under a non-blocking poll.
    Wait,
    /// The host must replace headers with the enclosed serialized block.
    Whdr(String),
    /// The host must replace the body with the chunk named by this handle.
    Wbod(u32),
    /// The engine wants the host to deliver body data via `SendBodyChunk`.
    Rbod,
    /// The handler produced a synthetic response; chunk is the body, the
    /// second field is the status code.
    Swch(u32, u16),
}

impl Command {
    /// Render the command in its exact wire form.
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self {
            Self::Done => "DONE".to_owned(),
            Self::Wait => "WAIT".to_owned(),
            Self::Whdr(block) => format!("WHDR{block}"),
            Self::Wbod(id) => format!("WBOD{id:x}"),
            Self::Rbod => "RBOD".to_owned(),
            Self::Swch(id, status) => format!("SWCH{id:x} {status}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_bit_exact() {
        assert_eq!(Command::Done.to_wire(), "DONE");
        assert_eq!(Command::Wait.to_wire(), "WAIT");
        assert_eq!(Command::Rbod.to_wire(), "RBOD");
        assert_eq!(Command::Wbod(0xabc).to_wire(), "WBODabc");
        assert_eq!(Command::Swch(0x10, 502).to_wire(), "SWCH10 502");
        assert_eq!(Command::Whdr("A: 1\n\n".to_owned()).to_wire(), "WHDRA: 1\n\n");
    }
}
