// Radio command set
//
// Command data is the command id byte followed by an optional UTF-8 argument.

use super::{PacketError, MAX_DATA_SIZE};
use std::fmt;

/// Command id carried in the first data byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    NoOp = 0,
    PayloadExec = 1,
    PayloadTurnOn = 2,
    PayloadTurnOff = 3,
    ManualStateOverride = 4,
}

impl CommandId {
    pub const ALL: [CommandId; 5] = [
        CommandId::NoOp,
        CommandId::PayloadExec,
        CommandId::PayloadTurnOn,
        CommandId::PayloadTurnOff,
        CommandId::ManualStateOverride,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CommandId::NoOp => "NO_OP",
            CommandId::PayloadExec => "PAYLOAD_EXEC",
            CommandId::PayloadTurnOn => "PAYLOAD_TURN_ON",
            CommandId::PayloadTurnOff => "PAYLOAD_TURN_OFF",
            CommandId::ManualStateOverride => "MANUAL_STATE_OVERRIDE",
        }
    }

    /// Look a command up by its wire name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.name().eq_ignore_ascii_case(name))
    }

    pub fn takes_argument(&self) -> bool {
        matches!(self, CommandId::PayloadExec | CommandId::ManualStateOverride)
    }
}

impl TryFrom<u8> for CommandId {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|id| *id as u8 == value)
            .ok_or(PacketError::UnknownCommand(value))
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A flight computer command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    NoOp,
    /// Run a named command on the payload computer
    PayloadExec(String),
    PayloadTurnOn,
    PayloadTurnOff,
    /// Force the flight state machine into the named state
    ManualStateOverride(String),
}

impl Command {
    /// Build a command from its id and (possibly empty) argument
    pub fn new(id: CommandId, arg: impl Into<String>) -> Self {
        match id {
            CommandId::NoOp => Command::NoOp,
            CommandId::PayloadExec => Command::PayloadExec(arg.into()),
            CommandId::PayloadTurnOn => Command::PayloadTurnOn,
            CommandId::PayloadTurnOff => Command::PayloadTurnOff,
            CommandId::ManualStateOverride => Command::ManualStateOverride(arg.into()),
        }
    }

    pub fn id(&self) -> CommandId {
        match self {
            Command::NoOp => CommandId::NoOp,
            Command::PayloadExec(_) => CommandId::PayloadExec,
            Command::PayloadTurnOn => CommandId::PayloadTurnOn,
            Command::PayloadTurnOff => CommandId::PayloadTurnOff,
            Command::ManualStateOverride(_) => CommandId::ManualStateOverride,
        }
    }

    pub fn argument(&self) -> &str {
        match self {
            Command::PayloadExec(arg) | Command::ManualStateOverride(arg) => arg,
            _ => "",
        }
    }

    /// Encode as packet data
    pub fn to_data(&self) -> Result<Vec<u8>, PacketError> {
        let arg = self.argument().as_bytes();
        let size = 1 + arg.len();
        if size > MAX_DATA_SIZE {
            return Err(PacketError::DataTooLarge {
                size,
                max: MAX_DATA_SIZE,
            });
        }

        let mut data = Vec::with_capacity(size);
        data.push(self.id() as u8);
        data.extend_from_slice(arg);
        Ok(data)
    }

    /// Decode packet data
    pub fn from_data(data: &[u8]) -> Result<Self, PacketError> {
        let (&id, arg) = data.split_first().ok_or(PacketError::EmptyCommand)?;
        let id = CommandId::try_from(id)?;
        let arg = std::str::from_utf8(arg).map_err(|_| PacketError::InvalidArgument)?;
        Ok(Self::new(id, arg))
    }

    /// Route to the handler method for this variant
    pub fn dispatch<H: CommandHandler + ?Sized>(&self, handler: &mut H) -> H::Output {
        match self {
            Command::NoOp => handler.no_op(),
            Command::PayloadExec(arg) => handler.payload_exec(arg),
            Command::PayloadTurnOn => handler.payload_turn_on(),
            Command::PayloadTurnOff => handler.payload_turn_off(),
            Command::ManualStateOverride(state) => handler.manual_state_override(state),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.argument() {
            "" => write!(f, "{}", self.id()),
            arg => write!(f, "{} {:?}", self.id(), arg),
        }
    }
}

/// Receiving side of the command set, one method per command
pub trait CommandHandler {
    type Output;

    fn no_op(&mut self) -> Self::Output;
    fn payload_exec(&mut self, command: &str) -> Self::Output;
    fn payload_turn_on(&mut self) -> Self::Output;
    fn payload_turn_off(&mut self) -> Self::Output;
    fn manual_state_override(&mut self, state: &str) -> Self::Output;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl CommandHandler for Recorder {
        type Output = usize;

        fn no_op(&mut self) -> usize {
            self.calls.push("no_op".into());
            self.calls.len()
        }
        fn payload_exec(&mut self, command: &str) -> usize {
            self.calls.push(format!("exec:{}", command));
            self.calls.len()
        }
        fn payload_turn_on(&mut self) -> usize {
            self.calls.push("on".into());
            self.calls.len()
        }
        fn payload_turn_off(&mut self) -> usize {
            self.calls.push("off".into());
            self.calls.len()
        }
        fn manual_state_override(&mut self, state: &str) -> usize {
            self.calls.push(format!("state:{}", state));
            self.calls.len()
        }
    }

    #[test]
    fn test_command_data_encoding() {
        assert_eq!(Command::NoOp.to_data().unwrap(), vec![0]);
        assert_eq!(
            Command::PayloadExec("ls".into()).to_data().unwrap(),
            vec![1, b'l', b's']
        );
        assert_eq!(
            Command::from_data(&[4, b'i', b'd', b'l', b'e']).unwrap(),
            Command::ManualStateOverride("idle".into())
        );
    }

    #[test]
    fn test_bad_command_data() {
        assert!(matches!(Command::from_data(&[]), Err(PacketError::EmptyCommand)));
        assert!(matches!(
            Command::from_data(&[9]),
            Err(PacketError::UnknownCommand(9))
        ));
        assert!(matches!(
            Command::from_data(&[1, 0xFF, 0xFE]),
            Err(PacketError::InvalidArgument)
        ));
        assert!(Command::PayloadExec("x".repeat(MAX_DATA_SIZE)).to_data().is_err());
    }

    #[test]
    fn test_names() {
        assert_eq!(CommandId::from_name("payload_exec"), Some(CommandId::PayloadExec));
        assert_eq!(CommandId::from_name("bogus"), None);
        assert_eq!(CommandId::try_from(3).unwrap(), CommandId::PayloadTurnOff);
        assert_eq!(
            Command::ManualStateOverride("safe".into()).to_string(),
            "MANUAL_STATE_OVERRIDE \"safe\""
        );
    }

    #[test]
    fn test_dispatch() {
        let mut handler = Recorder::default();
        Command::PayloadTurnOn.dispatch(&mut handler);
        Command::PayloadExec("ping".into()).dispatch(&mut handler);
        let n = Command::ManualStateOverride("deploy".into()).dispatch(&mut handler);

        assert_eq!(n, 3);
        assert_eq!(handler.calls, vec!["on", "exec:ping", "state:deploy"]);
    }
}
