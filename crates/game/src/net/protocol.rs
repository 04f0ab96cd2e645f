//! Fixed-layout binary frames.
//!
//! Every frame starts with a one byte [`Command`] tag followed by the
//! variant's fields. Multi-byte fields are little-endian, floats are IEEE-754
//! single precision and there is no padding, so each variant has a fixed size.
//!
//! | Variant | Layout | Size |
//! |---|---|---|
//! | [`PositionData`] | tag, user, x, y, z, rot_y | 18 |
//! | [`PositionDataRtt`] | [`PositionData`] + timestamp | 22 |
//! | [`MoveData`] | tag, user, direction, speed | 7 |
//! | [`MoveDataRtt`] | [`MoveData`] + timestamp | 11 |
//! | [`DefaultRtt`] | tag, timestamp | 5 |
//! | [`UserAssignment`] | tag, user | 2 |
//! | [`PortAssignment`] | tag, user, port | 4 |
//! | [`PortRequest`] | tag | 1 |
//!
//! Decoders check the length of the buffer against the size of the *requested*
//! variant and never look at the tag byte. Routing by tag is the job of
//! [`Message::decode`] or the caller.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::command::{Command, Direction};

pub type UserId = u8;

pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_TICK_RATE: u32 = 100;
pub const MAX_FRAME_SIZE: usize = PositionDataRtt::SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("truncated frame: expected {expected} bytes, found {found}")]
    TruncatedFrame { expected: usize, found: usize },
    #[error("unknown command tag: {0}")]
    UnknownCommand(u8),
}

/// Reads the tag byte of a frame, ignoring whatever follows it.
pub fn get_command(data: &[u8]) -> Result<Command, ProtocolError> {
    match data.first() {
        Some(&tag) => Command::try_from(tag),
        None => Err(ProtocolError::TruncatedFrame {
            expected: 1,
            found: 0,
        }),
    }
}

pub trait Frame: Sized {
    /// Tag written by [`Frame::encode`].
    const COMMAND: Command;
    /// Exact encoded length, tag included.
    const SIZE: usize;

    fn encode_body<B: BufMut>(&self, buf: &mut B);

    /// Reads the fields after the tag. `buf` holds at least `SIZE - 1` bytes.
    fn decode_body<B: Buf>(buf: &mut B) -> Self;

    /// Writes exactly `SIZE` bytes. Panics only if `buf` cannot grow, as
    /// with any [`BufMut`] write.
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(Self::COMMAND.as_u8());
        self.encode_body(buf);
    }

    /// Decodes the first `SIZE` bytes of `data`; trailing bytes are ignored.
    fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < Self::SIZE {
            return Err(ProtocolError::TruncatedFrame {
                expected: Self::SIZE,
                found: data.len(),
            });
        }

        let mut body = &data[1..Self::SIZE];
        Ok(Self::decode_body(&mut body))
    }

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionData {
    pub user_id: UserId,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rot_y: f32,
}

impl Frame for PositionData {
    const COMMAND: Command = Command::Position;
    const SIZE: usize = 18;

    fn encode_body<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.user_id);
        buf.put_f32_le(self.x);
        buf.put_f32_le(self.y);
        buf.put_f32_le(self.z);
        buf.put_f32_le(self.rot_y);
    }

    fn decode_body<B: Buf>(buf: &mut B) -> Self {
        Self {
            user_id: buf.get_u8(),
            x: buf.get_f32_le(),
            y: buf.get_f32_le(),
            z: buf.get_f32_le(),
            rot_y: buf.get_f32_le(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionDataRtt {
    pub position: PositionData,
    pub timestamp: u32,
}

impl Frame for PositionDataRtt {
    const COMMAND: Command = Command::PositionRtt;
    const SIZE: usize = PositionData::SIZE + 4;

    fn encode_body<B: BufMut>(&self, buf: &mut B) {
        self.position.encode_body(buf);
        buf.put_u32_le(self.timestamp);
    }

    fn decode_body<B: Buf>(buf: &mut B) -> Self {
        Self {
            position: PositionData::decode_body(buf),
            timestamp: buf.get_u32_le(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveData {
    pub user_id: UserId,
    pub direction: Direction,
    pub speed: f32,
}

impl Frame for MoveData {
    const COMMAND: Command = Command::Move;
    const SIZE: usize = 7;

    fn encode_body<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.user_id);
        buf.put_u8(self.direction.0);
        buf.put_f32_le(self.speed);
    }

    fn decode_body<B: Buf>(buf: &mut B) -> Self {
        Self {
            user_id: buf.get_u8(),
            direction: Direction(buf.get_u8()),
            speed: buf.get_f32_le(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveDataRtt {
    pub movement: MoveData,
    pub timestamp: u32,
}

impl Frame for MoveDataRtt {
    const COMMAND: Command = Command::MoveRtt;
    const SIZE: usize = MoveData::SIZE + 4;

    fn encode_body<B: BufMut>(&self, buf: &mut B) {
        self.movement.encode_body(buf);
        buf.put_u32_le(self.timestamp);
    }

    fn decode_body<B: Buf>(buf: &mut B) -> Self {
        Self {
            movement: MoveData::decode_body(buf),
            timestamp: buf.get_u32_le(),
        }
    }
}

/// Echo of the timestamp carried by an RTT-tagged frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DefaultRtt {
    pub timestamp: u32,
}

impl Frame for DefaultRtt {
    const COMMAND: Command = Command::DefaultRtt;
    const SIZE: usize = 5;

    fn encode_body<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.timestamp);
    }

    fn decode_body<B: Buf>(buf: &mut B) -> Self {
        Self {
            timestamp: buf.get_u32_le(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserAssignment {
    pub user_id: UserId,
}

impl Frame for UserAssignment {
    const COMMAND: Command = Command::UserAssignment;
    const SIZE: usize = 2;

    fn encode_body<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.user_id);
    }

    fn decode_body<B: Buf>(buf: &mut B) -> Self {
        Self {
            user_id: buf.get_u8(),
        }
    }
}

/// Port the client must listen on. A zero `user_id` means the identity
/// follows in a separate [`UserAssignment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortAssignment {
    pub user_id: UserId,
    pub port: u16,
}

impl Frame for PortAssignment {
    const COMMAND: Command = Command::PortAssignment;
    const SIZE: usize = 4;

    fn encode_body<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.user_id);
        buf.put_u16_le(self.port);
    }

    fn decode_body<B: Buf>(buf: &mut B) -> Self {
        Self {
            user_id: buf.get_u8(),
            port: buf.get_u16_le(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortRequest;

impl Frame for PortRequest {
    const COMMAND: Command = Command::PortRequest;
    const SIZE: usize = 1;

    fn encode_body<B: BufMut>(&self, _buf: &mut B) {}

    fn decode_body<B: Buf>(_buf: &mut B) -> Self {
        PortRequest
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message {
    Position(PositionData),
    Move(MoveData),
    PositionRtt(PositionDataRtt),
    MoveRtt(MoveDataRtt),
    DefaultRtt(DefaultRtt),
    UserAssignment(UserAssignment),
    PortRequest(PortRequest),
    PortAssignment(PortAssignment),
}

impl Message {
    /// Routes on the tag byte, then decodes the matching variant.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let message = match get_command(data)? {
            Command::Position => Message::Position(PositionData::decode(data)?),
            Command::Move => Message::Move(MoveData::decode(data)?),
            Command::PositionRtt => Message::PositionRtt(PositionDataRtt::decode(data)?),
            Command::MoveRtt => Message::MoveRtt(MoveDataRtt::decode(data)?),
            Command::DefaultRtt => Message::DefaultRtt(DefaultRtt::decode(data)?),
            Command::UserAssignment => Message::UserAssignment(UserAssignment::decode(data)?),
            Command::PortRequest => Message::PortRequest(PortRequest::decode(data)?),
            Command::PortAssignment => Message::PortAssignment(PortAssignment::decode(data)?),
        };
        Ok(message)
    }

    pub fn command(&self) -> Command {
        match self {
            Message::Position(_) => Command::Position,
            Message::Move(_) => Command::Move,
            Message::PositionRtt(_) => Command::PositionRtt,
            Message::MoveRtt(_) => Command::MoveRtt,
            Message::DefaultRtt(_) => Command::DefaultRtt,
            Message::UserAssignment(_) => Command::UserAssignment,
            Message::PortRequest(_) => Command::PortRequest,
            Message::PortAssignment(_) => Command::PortAssignment,
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Message::Position(frame) => frame.encode(buf),
            Message::Move(frame) => frame.encode(buf),
            Message::PositionRtt(frame) => frame.encode(buf),
            Message::MoveRtt(frame) => frame.encode(buf),
            Message::DefaultRtt(frame) => frame.encode(buf),
            Message::UserAssignment(frame) => frame.encode(buf),
            Message::PortRequest(frame) => frame.encode(buf),
            Message::PortAssignment(frame) => frame.encode(buf),
        }
    }
}

/// Caller-owned scratch space for the send path.
///
/// Each call hands out an immutable [`Bytes`] view of the encoded frame. The
/// backing storage is reclaimed on a later call once every view handed out
/// before it has been dropped, so a steady send loop does not allocate.
#[derive(Debug)]
pub struct FrameBuf {
    buf: BytesMut,
}

impl Default for FrameBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuf {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(MAX_FRAME_SIZE * 8),
        }
    }

    pub fn encode<F: Frame>(&mut self, frame: &F) -> Bytes {
        self.buf.clear();
        self.buf.reserve(F::SIZE);
        frame.encode(&mut self.buf);
        self.buf.split().freeze()
    }
}
