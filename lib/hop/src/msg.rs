use byteorder::{ByteOrder, LittleEndian};

/// Tag carried by frames that have not been assigned a real tag yet.
/// Never allocated to a request in flight.
pub const NOTAG: u16 = 0xFFFF;

/// Every frame starts with `size[4] type[2] tag[2]`.
pub const HDR_SIZE: usize = 8;

/// Version sentinels. All other values are linear version numbers
/// assigned by the server; a value's version strictly increases on
/// every mutation.
pub mod version {
    /// Any version.
    pub const ANY: u64 = 0;
    /// Lowest entry version.
    pub const LOWEST: u64 = 1;
    /// Highest entry version.
    pub const HIGHEST: u64 = 0x7FFF_FFFF_FFFF_FFFE;
    /// Newest value, bypassing any caching.
    pub const NEWEST: u64 = 0x7FFF_FFFF_FFFF_FFFF;
    /// Internal use.
    pub const REMOVED: u64 = 0x8000_0000_0000_0000;
    /// Wait until the entry is updated.
    pub const PAST_NEWEST: u64 = 0xFFFF_FFFF_FFFF_FFFF;
}

/// Wire message types. The numeric values are fixed for compatibility;
/// `T*` messages travel client to server, `R*` the other way.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u16)]
pub enum MsgType {
    Rerror = 100,
    Tget = 101,
    Rget = 102,
    Tset = 103,
    Rset = 104,
    Tcreate = 105,
    Rcreate = 106,
    Tremove = 107,
    Rremove = 108,
    Ttestset = 109,
    Rtestset = 110,
    Tatomic = 111,
    Ratomic = 112,
}

impl MsgType {
    pub fn from_wire(t: u16) -> Option<MsgType> {
        Some(match t {
            100 => MsgType::Rerror,
            101 => MsgType::Tget,
            102 => MsgType::Rget,
            103 => MsgType::Tset,
            104 => MsgType::Rset,
            105 => MsgType::Tcreate,
            106 => MsgType::Rcreate,
            107 => MsgType::Tremove,
            108 => MsgType::Rremove,
            109 => MsgType::Ttestset,
            110 => MsgType::Rtestset,
            111 => MsgType::Tatomic,
            112 => MsgType::Ratomic,
            _ => return None,
        })
    }
}

/// Atomic update operations carried by `Tatomic`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u16)]
pub enum AtomicOp {
    /// Add the operand to the current value. Both are little-endian
    /// unsigned integers of matching length in {1, 2, 4, 8}.
    Add = 0,
    /// Subtract the operand from the current value. Same requirements
    /// as `Add`.
    Sub,
    /// With an empty operand, set one bit that was clear and return the
    /// new value plus the bit index as a 4-byte little-endian integer.
    BitSet,
    /// With an empty operand, clear one bit that was set; outputs as
    /// for `BitSet`.
    BitClear,
    /// Append the operand to the current value.
    Append,
    /// Erase all occurrences of the operand. Without a match, neither
    /// value nor version changes.
    Remove,
    /// Substitute all occurrences of the first operand with the second.
    /// Without a match, neither value nor version changes.
    Replace,
}

impl AtomicOp {
    pub fn from_wire(op: u16) -> Option<AtomicOp> {
        Some(match op {
            0 => AtomicOp::Add,
            1 => AtomicOp::Sub,
            2 => AtomicOp::BitSet,
            3 => AtomicOp::BitClear,
            4 => AtomicOp::Append,
            5 => AtomicOp::Remove,
            6 => AtomicOp::Replace,
            _ => return None,
        })
    }
}

/// A byte range into the packed frame.
#[derive(Debug, Default, Copy, Clone)]
pub(crate) struct Span {
    off: u32,
    len: u32,
}

impl Span {
    pub(crate) fn new(off: usize, len: usize) -> Span {
        Span {
            off: off as u32,
            len: len as u32,
        }
    }

    pub(crate) fn slice<'a>(&self, pkt: &'a [u8]) -> &'a [u8] {
        &pkt[self.off as usize..self.off as usize + self.len as usize]
    }
}

/// A single Hop frame, packed or parsed. The frame bytes live in `pkt`;
/// the structured fields are views into them, so which accessors are
/// meaningful depends on the message type.
#[derive(Debug)]
pub struct Msg {
    pub(crate) mtype: MsgType,
    pub(crate) tag: u16,
    pub(crate) version: u64,
    pub(crate) ecode: u32,
    pub(crate) atmop: u16,
    pub(crate) valsnum: u16,
    pub(crate) key: Span,
    pub(crate) flags: Span,
    pub(crate) edescr: Span,
    pub(crate) value: Span,
    pub(crate) oldval: Span,
    pub(crate) vals: Vec<Span>,
    pub(crate) pkt: Vec<u8>,
}

impl Msg {
    pub fn mtype(&self) -> MsgType {
        self.mtype
    }

    pub fn tag(&self) -> u16 {
        self.tag
    }

    /// Total frame length, header included.
    pub fn size(&self) -> u32 {
        self.pkt.len() as u32
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn ecode(&self) -> u32 {
        self.ecode
    }

    /// Raw atomic opcode as found on the wire.
    pub fn atmop(&self) -> u16 {
        self.atmop
    }

    pub fn atomic_op(&self) -> Option<AtomicOp> {
        AtomicOp::from_wire(self.atmop)
    }

    pub fn key(&self) -> &[u8] {
        self.key.slice(&self.pkt)
    }

    pub fn flags(&self) -> &[u8] {
        self.flags.slice(&self.pkt)
    }

    pub fn edescr(&self) -> &[u8] {
        self.edescr.slice(&self.pkt)
    }

    pub fn value(&self) -> &[u8] {
        self.value.slice(&self.pkt)
    }

    pub fn oldval(&self) -> &[u8] {
        self.oldval.slice(&self.pkt)
    }

    pub fn valsnum(&self) -> u16 {
        self.valsnum
    }

    /// Value `i` of a `Tatomic`/`Ratomic` frame. A single value reuses
    /// the inline `value` slot; only multi-value messages keep a
    /// separate span list.
    pub fn val(&self, i: u16) -> &[u8] {
        if self.valsnum == 1 && i == 0 {
            self.value.slice(&self.pkt)
        } else {
            self.vals[i as usize].slice(&self.pkt)
        }
    }

    pub fn vals(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.valsnum).map(move |i| self.val(i))
    }

    /// The serialized frame.
    pub fn pkt(&self) -> &[u8] {
        &self.pkt
    }

    /// Stamps `tag` on the structured field and in the serialized
    /// header.
    pub fn set_tag(&mut self, tag: u16) {
        self.tag = tag;
        LittleEndian::write_u16(&mut self.pkt[6..8], tag);
    }

    pub(crate) fn blank(mtype: MsgType, pkt: Vec<u8>) -> Msg {
        Msg {
            mtype,
            tag: NOTAG,
            version: 0,
            ecode: 0,
            atmop: 0,
            valsnum: 0,
            key: Span::default(),
            flags: Span::default(),
            edescr: Span::default(),
            value: Span::default(),
            oldval: Span::default(),
            vals: Vec::new(),
            pkt,
        }
    }
}
