use crate::error::LinkError;
use bytes::{BufMut, Bytes, BytesMut};
use model::{AgentId, MissionId};
use std::fmt::{Debug, Formatter};

/// Fixed header budget of a frame: five one-byte fields and three four-digit
/// counters plus six separators. Counters are transmitted unpadded, so this is
/// the worst case; it is what chunk sizing is computed against.
pub const HEADER_OVERHEAD: usize = 23;

const FIELD_COUNT: usize = 7;

/// Body of handshake frames, where no payload applies.
pub const HANDSHAKE_BODY: &[u8] = b"-.-";

/// Body of ack and close frames: a single NUL.
pub const CONTROL_BODY: &[u8] = b"\0";

/// Protocol role of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// `S` - first leg of the three-way open.
    OpenReq,
    /// `Z` - the server's echo of an open request.
    OpenAck,
    /// `A` - acknowledgment.
    Ack,
    /// `F` - close.
    Close,
    /// `D` - data.
    Data,
}

impl Flag {
    fn byte(self) -> u8 {
        match self {
            Flag::OpenReq => b'S',
            Flag::OpenAck => b'Z',
            Flag::Ack => b'A',
            Flag::Close => b'F',
            Flag::Data => b'D',
        }
    }

    fn from_byte(b: u8) -> Option<Flag> {
        match b {
            b'S' => Some(Flag::OpenReq),
            b'Z' => Some(Flag::OpenAck),
            b'A' => Some(Flag::Ack),
            b'F' => Some(Flag::Close),
            b'D' => Some(Flag::Data),
            _ => None,
        }
    }
}

/// Semantic purpose of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpTag {
    /// `R` - rover registers with the mother-ship.
    Register,
    /// `T` - mother-ship delivers a mission.
    TaskDeliver,
    /// `Q` - rover asks for a mission.
    TaskRequest,
    /// `P` - rover reports mission progress.
    Progress,
    /// `M` - historical metrics tag; accepted and routed like `Progress`,
    /// never produced.
    Metrics,
    /// `N` - acks, closes and reply transfers without an operation.
    None,
    /// `0` - placeholder byte carried in handshake frames.
    Unspecified,
}

impl OpTag {
    fn byte(self) -> u8 {
        match self {
            OpTag::Register => b'R',
            OpTag::TaskDeliver => b'T',
            OpTag::TaskRequest => b'Q',
            OpTag::Progress => b'P',
            OpTag::Metrics => b'M',
            OpTag::None => b'N',
            OpTag::Unspecified => b'0',
        }
    }

    fn from_byte(b: u8) -> Option<OpTag> {
        match b {
            b'R' => Some(OpTag::Register),
            b'T' => Some(OpTag::TaskDeliver),
            b'Q' => Some(OpTag::TaskRequest),
            b'P' => Some(OpTag::Progress),
            b'M' => Some(OpTag::Metrics),
            b'N' => Some(OpTag::None),
            b'0' => Some(OpTag::Unspecified),
            _ => None,
        }
    }
}

/// The size field: a decimal byte count on data frames, the literal `_` on
/// handshake frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSize {
    Bytes(u32),
    Unspecified,
}

/// The link-token field carries two logically distinct values: the rover
/// identity while a connection is being opened, and the mission identifier on
/// every frame after that. `Token` keeps the raw wire value and converts on
/// demand so each side names what it actually extracted.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    pub fn agent(id: &AgentId) -> Token {
        Token(id.as_str().to_owned())
    }

    pub fn mission(id: &MissionId) -> Token {
        Token(id.as_str().to_owned())
    }

    pub fn expect_agent(&self) -> Result<AgentId, LinkError> {
        AgentId::new(&self.0).map_err(|_| LinkError::MalformedFrame("link token is not a valid rover identity"))
    }

    pub fn expect_mission(&self) -> Result<MissionId, LinkError> {
        MissionId::new(&self.0).map_err(|_| LinkError::MalformedFrame("link token is not a valid mission identifier"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

/// One datagram: `flag|token|seq|ack|size|op|body`.
///
/// Bodies are raw bytes and must not contain the pipe separator; the protocol
/// does not escape it, and [`Frame::decode`] rejects any datagram whose field
/// count is not exactly seven.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub flag: Flag,
    pub token: Token,
    pub seq: u32,
    pub ack: u32,
    pub size: PayloadSize,
    pub op: OpTag,
    pub body: Bytes,
}

impl Frame {
    /// `S|<agent>|<seq>|0|_|0|-.-`
    pub fn open_req(agent: &AgentId, seq: u32) -> Frame {
        Frame {
            flag: Flag::OpenReq,
            token: Token::agent(agent),
            seq,
            ack: 0,
            size: PayloadSize::Unspecified,
            op: OpTag::Unspecified,
            body: Bytes::from_static(HANDSHAKE_BODY),
        }
    }

    /// The server's open-ack: the received open request with the flag
    /// rewritten, everything else echoed.
    pub fn open_ack_echo(open_req: &Frame) -> Frame {
        Frame { flag: Flag::OpenAck, ..open_req.clone() }
    }

    /// The client's final handshake leg: `A|<agent>|<seq>|<seq>|_|0|-.-`.
    pub fn handshake_ack(agent: &AgentId, seq: u32) -> Frame {
        Frame {
            flag: Flag::Ack,
            token: Token::agent(agent),
            seq,
            ack: seq,
            size: PayloadSize::Unspecified,
            op: OpTag::Unspecified,
            body: Bytes::from_static(HANDSHAKE_BODY),
        }
    }

    pub fn data(mission: &MissionId, seq: u32, ack: u32, op: OpTag, body: Bytes) -> Frame {
        Frame {
            flag: Flag::Data,
            token: Token::mission(mission),
            seq,
            ack,
            size: PayloadSize::Bytes(body.len() as u32),
            op,
            body,
        }
    }

    /// Ack or close frame with the single-NUL body.
    pub fn control(flag: Flag, mission: &MissionId, seq: u32, ack: u32) -> Frame {
        debug_assert!(matches!(flag, Flag::Ack | Flag::Close));
        Frame {
            flag,
            token: Token::mission(mission),
            seq,
            ack,
            size: PayloadSize::Bytes(CONTROL_BODY.len() as u32),
            op: OpTag::None,
            body: Bytes::from_static(CONTROL_BODY),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flag.byte());
        buf.put_u8(b'|');
        buf.put_slice(self.token.0.as_bytes());
        buf.put_u8(b'|');
        buf.put_slice(self.seq.to_string().as_bytes());
        buf.put_u8(b'|');
        buf.put_slice(self.ack.to_string().as_bytes());
        buf.put_u8(b'|');
        match self.size {
            PayloadSize::Bytes(n) => buf.put_slice(n.to_string().as_bytes()),
            PayloadSize::Unspecified => buf.put_u8(b'_'),
        }
        buf.put_u8(b'|');
        buf.put_u8(self.op.byte());
        buf.put_u8(b'|');
        buf.put_slice(&self.body);
    }

    /// Parses one datagram. The field-count check runs on the raw buffer
    /// before anything is copied out of it.
    pub fn decode(raw: &[u8]) -> Result<Frame, LinkError> {
        let mut fields: [&[u8]; FIELD_COUNT] = [&[]; FIELD_COUNT];
        let mut count = 0;
        for part in raw.split(|b| *b == b'|') {
            if count == FIELD_COUNT {
                return Err(LinkError::MalformedFrame("more than seven fields"));
            }
            fields[count] = part;
            count += 1;
        }
        if count != FIELD_COUNT {
            return Err(LinkError::MalformedFrame("fewer than seven fields"));
        }

        let flag = match fields[0] {
            [b] => Flag::from_byte(*b).ok_or(LinkError::MalformedFrame("unknown flag byte"))?,
            _ => return Err(LinkError::MalformedFrame("flag field is not a single byte")),
        };

        if fields[1].is_empty() || fields[1].len() > 3 {
            return Err(LinkError::MalformedFrame("link token must be 1-3 bytes"));
        }
        let token = std::str::from_utf8(fields[1])
            .map_err(|_| LinkError::MalformedFrame("link token is not valid ASCII"))?;

        let seq = parse_counter(fields[2], "sequence field is not a decimal number")?;
        let ack = parse_counter(fields[3], "ack field is not a decimal number")?;

        let size = match fields[4] {
            [b'_'] => PayloadSize::Unspecified,
            digits => PayloadSize::Bytes(parse_counter(digits, "size field is not a decimal number")?),
        };

        let op = match fields[5] {
            [b] => OpTag::from_byte(*b).ok_or(LinkError::MalformedFrame("unknown operation tag"))?,
            _ => return Err(LinkError::MalformedFrame("operation tag is not a single byte")),
        };

        Ok(Frame {
            flag,
            token: Token(token.to_owned()),
            seq,
            ack,
            size,
            op,
            body: Bytes::copy_from_slice(fields[6]),
        })
    }
}

fn parse_counter(field: &[u8], msg: &'static str) -> Result<u32, LinkError> {
    if field.is_empty() || !field.iter().all(|b| b.is_ascii_digit()) {
        return Err(LinkError::MalformedFrame(msg));
    }
    std::str::from_utf8(field)
        .expect("ascii digits")
        .parse()
        .map_err(|_| LinkError::MalformedFrame(msg))
}
