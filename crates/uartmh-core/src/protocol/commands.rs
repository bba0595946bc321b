//! Protocol commands
//!
//! Defines the top-level command selectors understood by the MessageHandler firmware.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ProtocolError;

/// Management subcommand used for the identity exchange
pub const SCMD_MANAGE: u8 = 0xFF;

/// Top-level command selectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Firmware configuration and management ("mhconfig")
    MhConfig,

    /// Digital I/O ("digital")
    Digital,

    /// Addressable LED strips ("neopixel")
    Neopixel,
}

impl Command {
    /// Every command the firmware knows about
    pub const ALL: [Command; 3] = [Command::MhConfig, Command::Digital, Command::Neopixel];

    /// The two `cmd` bytes placed in the header
    pub fn bytes(&self) -> [u8; 2] {
        match self {
            Command::MhConfig => [0x00, 0x00],
            Command::Digital => [0x01, 0x00],
            Command::Neopixel => [0x02, 0x00],
        }
    }

    /// Name used by callers to select this command
    pub fn name(&self) -> &'static str {
        match self {
            Command::MhConfig => "mhconfig",
            Command::Digital => "digital",
            Command::Neopixel => "neopixel",
        }
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .iter()
            .copied()
            .find(|c| c.name() == s)
            .ok_or_else(|| ProtocolError::UnknownCommand(s.to_string()))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        assert_eq!(Command::MhConfig.bytes(), [0x00, 0x00]);
        assert_eq!(Command::Digital.bytes(), [0x01, 0x00]);
        assert_eq!(Command::Neopixel.bytes(), [0x02, 0x00]);
    }

    #[test]
    fn test_command_lookup() {
        assert_eq!("digital".parse::<Command>().unwrap(), Command::Digital);
        assert_eq!("mhconfig".parse::<Command>().unwrap(), Command::MhConfig);
        assert!(matches!(
            "servo".parse::<Command>(),
            Err(ProtocolError::UnknownCommand(name)) if name == "servo"
        ));
    }

    #[test]
    fn test_command_serde_names() {
        let json = serde_json::to_string(&Command::Neopixel).unwrap();
        assert_eq!(json, "\"neopixel\"");
        let back: Command = serde_json::from_str("\"digital\"").unwrap();
        assert_eq!(back, Command::Digital);
    }
}
