use std::fmt;

use super::protocol::ProtocolError;

/// Frame discriminator. The byte values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Position = 0,
    Move = 1,
    PositionRtt = 2,
    MoveRtt = 3,
    DefaultRtt = 4,
    UserAssignment = 5,
    PortRequest = 6,
    PortAssignment = 7,
}

impl Command {
    pub const ALL: [Command; 8] = [
        Command::Position,
        Command::Move,
        Command::PositionRtt,
        Command::MoveRtt,
        Command::DefaultRtt,
        Command::UserAssignment,
        Command::PortRequest,
        Command::PortAssignment,
    ];

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Position => "POSITION",
            Command::Move => "MOVE",
            Command::PositionRtt => "POSITION_RTT",
            Command::MoveRtt => "MOVE_RTT",
            Command::DefaultRtt => "DEFAULT_RTT",
            Command::UserAssignment => "USER_ASSIGNMENT",
            Command::PortRequest => "PORT_REQUEST",
            Command::PortAssignment => "PORT_ASSIGNMENT",
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Command::Position),
            1 => Ok(Command::Move),
            2 => Ok(Command::PositionRtt),
            3 => Ok(Command::MoveRtt),
            4 => Ok(Command::DefaultRtt),
            5 => Ok(Command::UserAssignment),
            6 => Ok(Command::PortRequest),
            7 => Ok(Command::PortAssignment),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        command as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discrete movement intent. Values outside the named compass points are
/// carried through untouched; their meaning belongs to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Direction(pub u8);

impl Direction {
    pub const NORTH: Direction = Direction(0);
    pub const NORTH_EAST: Direction = Direction(1);
    pub const EAST: Direction = Direction(2);
    pub const SOUTH_EAST: Direction = Direction(3);
    pub const SOUTH: Direction = Direction(4);
    pub const SOUTH_WEST: Direction = Direction(5);
    pub const WEST: Direction = Direction(6);
    pub const NORTH_WEST: Direction = Direction(7);

    pub fn name(self) -> Option<&'static str> {
        const NAMES: [&str; 8] = [
            "North",
            "NorthEast",
            "East",
            "SouthEast",
            "South",
            "SouthWest",
            "West",
            "NorthWest",
        ];
        NAMES.get(self.0 as usize).copied()
    }
}

impl From<u8> for Direction {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Unknown({})", self.0),
        }
    }
}
