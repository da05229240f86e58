//! 6P frame layout, header codec and body field accessors.
//!
//! ```text
//! byte 0: | rsv(7:6) | type(5:4) | version(3:0) |
//! byte 1: | code                                 |
//! byte 2: | sfid                                 |
//! byte 3: | gba(7:6) | gab(5:4) | seqno(3:0)     |
//! byte 4+ body ("other fields"), layout depends on (type, code)
//! ```
//!
//! Multi-byte body fields are little-endian.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::core::{CodecError, CELL_SIZE, HEADER_SIZE, MAX_SEQNO, PROTOCOL_VERSION};

/// 6P message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Response = 1,
    Confirmation = 2,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Request),
            1 => Some(Self::Response),
            2 => Some(Self::Confirmation),
            _ => None,
        }
    }
}

/// Command identifiers carried by Requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Add = 0x01,
    Delete = 0x02,
    Status = 0x03,
    List = 0x04,
    Clear = 0x05,
}

impl Command {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Add),
            0x02 => Some(Self::Delete),
            0x03 => Some(Self::Status),
            0x04 => Some(Self::List),
            0x05 => Some(Self::Clear),
            _ => None,
        }
    }

    /// Whether the command changes the schedule and thus the generation
    pub fn alters_schedule(&self) -> bool {
        matches!(self, Command::Add | Command::Delete)
    }
}

/// Return codes carried by Responses and Confirmations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReturnCode {
    Success = 0x06,
    ErrVersion = 0x07,
    ErrSfid = 0x08,
    ErrGen = 0x09,
    ErrBusy = 0x0a,
    ErrNoRes = 0x0b,
    ErrReset = 0x0c,
    Err = 0x0d,
}

impl ReturnCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x06 => Some(Self::Success),
            0x07 => Some(Self::ErrVersion),
            0x08 => Some(Self::ErrSfid),
            0x09 => Some(Self::ErrGen),
            0x0a => Some(Self::ErrBusy),
            0x0b => Some(Self::ErrNoRes),
            0x0c => Some(Self::ErrReset),
            0x0d => Some(Self::Err),
            _ => None,
        }
    }
}

/// The code byte, interpreted according to the message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Command(Command),
    Return(ReturnCode),
}

impl Code {
    /// Interprets a raw code byte for the given message type
    pub fn parse(msg_type: MessageType, value: u8) -> Result<Self, CodecError> {
        let code = match msg_type {
            MessageType::Request => Command::from_u8(value).map(Code::Command),
            MessageType::Response | MessageType::Confirmation => {
                ReturnCode::from_u8(value).map(Code::Return)
            }
        };
        code.ok_or(CodecError::UnsupportedCode {
            msg_type: msg_type as u8,
            code: value,
        })
    }

    /// Raw wire value
    pub fn value(&self) -> u8 {
        match self {
            Code::Command(cmd) => *cmd as u8,
            Code::Return(rc) => *rc as u8,
        }
    }

    pub fn command(&self) -> Option<Command> {
        match self {
            Code::Command(cmd) => Some(*cmd),
            Code::Return(_) => None,
        }
    }

    pub fn return_code(&self) -> Option<ReturnCode> {
        match self {
            Code::Return(rc) => Some(*rc),
            Code::Command(_) => None,
        }
    }

    /// Whether this code is legal for the message type
    pub fn matches(&self, msg_type: MessageType) -> bool {
        match self {
            Code::Command(_) => msg_type == MessageType::Request,
            Code::Return(_) => msg_type != MessageType::Request,
        }
    }
}

impl From<Command> for Code {
    fn from(cmd: Command) -> Self {
        Code::Command(cmd)
    }
}

impl From<ReturnCode> for Code {
    fn from(rc: ReturnCode) -> Self {
        Code::Return(rc)
    }
}

/// CellOptions bit set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CellOptions(pub u8);

impl CellOptions {
    pub const TX: CellOptions = CellOptions(0x01);
    pub const RX: CellOptions = CellOptions(0x02);
    pub const SHARED: CellOptions = CellOptions(0x04);

    pub fn contains(&self, other: CellOptions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CellOptions {
    type Output = CellOptions;

    fn bitor(self, rhs: CellOptions) -> CellOptions {
        CellOptions(self.0 | rhs.0)
    }
}

/// One (timeslot, channel offset) entry of a CellList
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    pub timeslot: u16,
    pub channel_offset: u16,
}

impl Cell {
    pub fn new(timeslot: u16, channel_offset: u16) -> Self {
        Cell {
            timeslot,
            channel_offset,
        }
    }

    pub fn to_bytes(&self) -> [u8; CELL_SIZE] {
        let ts = self.timeslot.to_le_bytes();
        let ch = self.channel_offset.to_le_bytes();
        [ts[0], ts[1], ch[0], ch[1]]
    }

    pub fn from_bytes(buf: [u8; CELL_SIZE]) -> Self {
        Cell {
            timeslot: u16::from_le_bytes([buf[0], buf[1]]),
            channel_offset: u16::from_le_bytes([buf[2], buf[3]]),
        }
    }

    /// Decodes a raw CellList; trailing bytes that do not form a cell are ignored
    pub fn parse_list(raw: &[u8]) -> Vec<Cell> {
        raw.chunks_exact(CELL_SIZE)
            .map(|c| Cell::from_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// Encodes cells back to back
    pub fn encode_list(cells: &[Cell]) -> Vec<u8> {
        cells.iter().flat_map(|c| c.to_bytes()).collect()
    }
}

/// Variable-length fields of a 6P body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Metadata,
    CellOptions,
    NumCells,
    Reserved,
    Offset,
    MaxNumCells,
    CellList,
}

impl Field {
    /// Width of the field; CellList is measured in cells of `CELL_SIZE` bytes
    pub fn size(&self) -> usize {
        match self {
            Field::Metadata | Field::Offset | Field::MaxNumCells => 2,
            Field::CellOptions | Field::NumCells | Field::Reserved => 1,
            Field::CellList => CELL_SIZE,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Field::Metadata => "Metadata",
            Field::CellOptions => "CellOptions",
            Field::NumCells => "NumCells",
            Field::Reserved => "Reserved",
            Field::Offset => "Offset",
            Field::MaxNumCells => "MaxNumCells",
            Field::CellList => "CellList",
        }
    }

    /// Byte offset of the field within the body, if the message defines it
    pub fn offset(&self, msg_type: MessageType, code: Code) -> Option<usize> {
        use Command::*;

        let request = msg_type == MessageType::Request;
        let cmd = code.command();
        let success = code.return_code() == Some(ReturnCode::Success);

        match self {
            Field::Metadata if request => Some(0),
            Field::CellOptions if request && matches!(cmd, Some(Add | Delete | Status | List)) => {
                Some(2)
            }
            Field::NumCells if request && matches!(cmd, Some(Add | Delete)) => Some(3),
            Field::NumCells if msg_type == MessageType::Response && success => Some(0),
            Field::Reserved if request && cmd == Some(List) => Some(3),
            Field::Offset if request && cmd == Some(List) => Some(4),
            Field::MaxNumCells if request && cmd == Some(List) => Some(6),
            Field::CellList if request && matches!(cmd, Some(Add | Delete)) => Some(4),
            Field::CellList if !request && success => Some(0),
            _ => None,
        }
    }

    fn locate(&self, msg_type: MessageType, code: Code, body_len: usize) -> Result<usize, CodecError> {
        let offset = self
            .offset(msg_type, code)
            .ok_or(CodecError::FieldNotPresent(self.name()))?;
        if body_len < offset + self.size() {
            return Err(CodecError::BufferTooSmall {
                needed: offset + self.size(),
                available: body_len,
            });
        }
        Ok(offset)
    }
}

/// Reads a one-byte body field
pub fn get_u8(field: Field, msg_type: MessageType, code: Code, body: &[u8]) -> Result<u8, CodecError> {
    debug_assert_eq!(field.size(), 1);
    let offset = field.locate(msg_type, code, body.len())?;
    Ok(body[offset])
}

/// Writes a one-byte body field
pub fn set_u8(
    field: Field,
    msg_type: MessageType,
    code: Code,
    value: u8,
    body: &mut [u8],
) -> Result<(), CodecError> {
    debug_assert_eq!(field.size(), 1);
    let offset = field.locate(msg_type, code, body.len())?;
    body[offset] = value;
    Ok(())
}

/// Reads a two-byte little-endian body field
pub fn get_u16(field: Field, msg_type: MessageType, code: Code, body: &[u8]) -> Result<u16, CodecError> {
    debug_assert_eq!(field.size(), 2);
    let offset = field.locate(msg_type, code, body.len())?;
    Ok(u16::from_le_bytes([body[offset], body[offset + 1]]))
}

/// Writes a two-byte little-endian body field
pub fn set_u16(
    field: Field,
    msg_type: MessageType,
    code: Code,
    value: u16,
    body: &mut [u8],
) -> Result<(), CodecError> {
    debug_assert_eq!(field.size(), 2);
    let offset = field.locate(msg_type, code, body.len())?;
    body[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Returns the raw CellList of a body, which may be empty
pub fn get_cell_list(msg_type: MessageType, code: Code, body: &[u8]) -> Result<&[u8], CodecError> {
    let offset = Field::CellList
        .offset(msg_type, code)
        .ok_or(CodecError::FieldNotPresent("CellList"))?;
    if body.len() < offset || (body.len() - offset) % CELL_SIZE != 0 {
        return Err(CodecError::InvalidLength {
            code: code.value(),
            len: body.len(),
        });
    }
    Ok(&body[offset..])
}

/// Writes `cells` into the CellList starting at cell index `cell_index`
pub fn set_cell_list(
    msg_type: MessageType,
    code: Code,
    cells: &[u8],
    cell_index: usize,
    body: &mut [u8],
) -> Result<(), CodecError> {
    let prefix = Field::CellList
        .offset(msg_type, code)
        .ok_or(CodecError::FieldNotPresent("CellList"))?;
    if cells.len() % CELL_SIZE != 0 {
        return Err(CodecError::InvalidLength {
            code: code.value(),
            len: cells.len(),
        });
    }
    let too_small = CodecError::BufferTooSmall {
        needed: usize::MAX,
        available: body.len(),
    };
    let offset = cell_index
        .checked_mul(CELL_SIZE)
        .and_then(|n| n.checked_add(prefix))
        .ok_or_else(|| too_small.clone())?;
    let end = offset.checked_add(cells.len()).ok_or(too_small)?;
    if body.len() < end {
        return Err(CodecError::BufferTooSmall {
            needed: end,
            available: body.len(),
        });
    }
    body[offset..end].copy_from_slice(cells);
    Ok(())
}

/// Builds an ADD or DELETE Request body
pub fn cell_request_body(
    cmd: Command,
    metadata: u16,
    options: CellOptions,
    num_cells: u8,
    cells: &[Cell],
) -> Result<Bytes, CodecError> {
    let msg_type = MessageType::Request;
    let code = Code::Command(cmd);
    let cell_offset = Field::CellList
        .offset(msg_type, code)
        .ok_or(CodecError::FieldNotPresent("CellList"))?;
    let mut body = vec![0u8; cell_offset + cells.len() * CELL_SIZE];
    set_u16(Field::Metadata, msg_type, code, metadata, &mut body)?;
    set_u8(Field::CellOptions, msg_type, code, options.0, &mut body)?;
    set_u8(Field::NumCells, msg_type, code, num_cells, &mut body)?;
    for (i, cell) in cells.iter().enumerate() {
        set_cell_list(msg_type, code, &cell.to_bytes(), i, &mut body)?;
    }
    Ok(Bytes::from(body))
}

/// Builds a STATUS Request body
pub fn status_request_body(metadata: u16, options: CellOptions) -> Result<Bytes, CodecError> {
    let code = Code::Command(Command::Status);
    let mut body = [0u8; 3];
    set_u16(Field::Metadata, MessageType::Request, code, metadata, &mut body)?;
    set_u8(Field::CellOptions, MessageType::Request, code, options.0, &mut body)?;
    Ok(Bytes::copy_from_slice(&body))
}

/// Builds a LIST Request body
pub fn list_request_body(
    metadata: u16,
    options: CellOptions,
    offset: u16,
    max_num_cells: u16,
) -> Result<Bytes, CodecError> {
    let msg_type = MessageType::Request;
    let code = Code::Command(Command::List);
    let mut body = [0u8; 8];
    set_u16(Field::Metadata, msg_type, code, metadata, &mut body)?;
    set_u8(Field::CellOptions, msg_type, code, options.0, &mut body)?;
    set_u8(Field::Reserved, msg_type, code, 0, &mut body)?;
    set_u16(Field::Offset, msg_type, code, offset, &mut body)?;
    set_u16(Field::MaxNumCells, msg_type, code, max_num_cells, &mut body)?;
    Ok(Bytes::copy_from_slice(&body))
}

/// Builds a CLEAR Request body
pub fn clear_request_body(metadata: u16) -> Result<Bytes, CodecError> {
    let mut body = [0u8; 2];
    set_u16(
        Field::Metadata,
        MessageType::Request,
        Code::Command(Command::Clear),
        metadata,
        &mut body,
    )?;
    Ok(Bytes::copy_from_slice(&body))
}

/// A decoded or to-be-encoded 6P frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketFrame {
    pub msg_type: MessageType,
    pub code: Code,
    pub sfid: u8,
    /// 4-bit sequence number
    pub seqno: u8,
    /// 2-bit generation field carried in bits 5:4
    pub gab: u8,
    /// 2-bit generation field carried in bits 7:6
    pub gba: u8,
    pub body: Bytes,
}

impl PacketFrame {
    /// Creates a frame; seqno and generation fields are truncated to their widths
    pub fn new(
        msg_type: MessageType,
        code: impl Into<Code>,
        sfid: u8,
        seqno: u8,
        gab: u8,
        gba: u8,
        body: impl Into<Bytes>,
    ) -> Self {
        PacketFrame {
            msg_type,
            code: code.into(),
            sfid,
            seqno: seqno & MAX_SEQNO,
            gab: gab & 0x03,
            gba: gba & 0x03,
            body: body.into(),
        }
    }

    /// Parses a frame, copying the body out of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        Self::decode_bytes(Bytes::copy_from_slice(buf))
    }

    /// Parses a frame, slicing the body out of `buf` without copying
    pub fn decode_bytes(buf: Bytes) -> Result<Self, CodecError> {
        if buf.len() < HEADER_SIZE {
            trace!(len = buf.len(), "6P frame too short");
            return Err(CodecError::TooShort(buf.len()));
        }

        let version = buf[0] & 0x0f;
        if version != PROTOCOL_VERSION {
            trace!(version, "6P frame with unsupported version");
            return Err(CodecError::InvalidVersion(version));
        }

        let raw_type = (buf[0] & 0x30) >> 4;
        let msg_type =
            MessageType::from_u8(raw_type).ok_or(CodecError::UnsupportedType(raw_type))?;
        let code = Code::parse(msg_type, buf[1])?;
        let body = buf.slice(HEADER_SIZE..);
        validate_body_len(msg_type, code, body.len())?;

        Ok(PacketFrame {
            msg_type,
            code,
            sfid: buf[2],
            seqno: buf[3] & 0x0f,
            gab: (buf[3] & 0x30) >> 4,
            gba: (buf[3] & 0xc0) >> 6,
            body,
        })
    }

    /// Number of bytes `encode` produces
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    fn header(&self) -> [u8; HEADER_SIZE] {
        [
            ((self.msg_type as u8) << 4) | PROTOCOL_VERSION,
            self.code.value(),
            self.sfid,
            ((self.gba & 0x03) << 6) | ((self.gab & 0x03) << 4) | (self.seqno & MAX_SEQNO),
        ]
    }

    /// Writes header and body into `dst`, returning the number of bytes written
    pub fn encode_into(&self, dst: &mut [u8]) -> Result<usize, CodecError> {
        let needed = self.encoded_len();
        if dst.len() < needed {
            return Err(CodecError::BufferTooSmall {
                needed,
                available: dst.len(),
            });
        }
        dst[..HEADER_SIZE].copy_from_slice(&self.header());
        dst[HEADER_SIZE..needed].copy_from_slice(&self.body);
        Ok(needed)
    }

    /// Appends header and body to a growable buffer
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_slice(&self.header());
        dst.put_slice(&self.body);
    }

    /// Encodes the frame into a fresh buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf.freeze()
    }

    pub fn metadata(&self) -> Result<u16, CodecError> {
        get_u16(Field::Metadata, self.msg_type, self.code, &self.body)
    }

    pub fn cell_options(&self) -> Result<CellOptions, CodecError> {
        get_u8(Field::CellOptions, self.msg_type, self.code, &self.body).map(CellOptions)
    }

    pub fn num_cells(&self) -> Result<u8, CodecError> {
        get_u8(Field::NumCells, self.msg_type, self.code, &self.body)
    }

    pub fn reserved(&self) -> Result<u8, CodecError> {
        get_u8(Field::Reserved, self.msg_type, self.code, &self.body)
    }

    pub fn offset(&self) -> Result<u16, CodecError> {
        get_u16(Field::Offset, self.msg_type, self.code, &self.body)
    }

    pub fn max_num_cells(&self) -> Result<u16, CodecError> {
        get_u16(Field::MaxNumCells, self.msg_type, self.code, &self.body)
    }

    pub fn cell_list(&self) -> Result<&[u8], CodecError> {
        get_cell_list(self.msg_type, self.code, &self.body)
    }

    /// Decoded CellList
    pub fn cells(&self) -> Result<Vec<Cell>, CodecError> {
        self.cell_list().map(Cell::parse_list)
    }
}

/// Enforces the body length rules of each (type, code) combination
pub fn validate_body_len(msg_type: MessageType, code: Code, len: usize) -> Result<(), CodecError> {
    let valid = match (msg_type, code) {
        (MessageType::Request, Code::Command(cmd)) => match cmd {
            Command::Add | Command::Delete => len >= 4 && len % CELL_SIZE == 0,
            Command::Status => len == 3,
            Command::List => len == 8,
            Command::Clear => len == 2,
        },
        (_, Code::Return(ReturnCode::Success)) => len == 0 || len == 1 || len % CELL_SIZE == 0,
        (_, Code::Return(_)) => len == 0,
        (_, Code::Command(_)) => false,
    };

    if valid {
        Ok(())
    } else {
        trace!(code = code.value(), len, "6P body length rejected");
        Err(CodecError::InvalidLength {
            code: code.value(),
            len,
        })
    }
}
