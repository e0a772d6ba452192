use crate::error::{HopError, Result};
use crate::msg::{AtomicOp, Msg, MsgType, Span, HDR_SIZE, NOTAG};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

// Minimum frame size per message type, starting at Rerror (100). All
// frames begin with size[4] type[2] tag[2].
const MIN_SIZE: [u32; 13] = [
    14, // Rerror ecode[4] edescr[s]
    18, // Tget key[s] version[8]
    20, // Rget version[8] value[n]
    14, // Tset key[s] value[n]
    16, // Rset version[8]
    16, // Tcreate key[s] flags[s] value[n]
    16, // Rcreate version[8]
    10, // Tremove key[s]
    8,  // Rremove
    26, // Ttestset key[s] version[8] oldval[n] value[n]
    20, // Rtestset version[8] value[n]
    14, // Tatomic op[2] key[s] valsnum[2] value[n]...
    18, // Ratomic version[8] valsnum[2] value[n]...
];

fn size_error() -> HopError {
    HopError::new(libc::EINVAL, "invalid size")
}

fn str_arg(s: &[u8]) -> Result<usize> {
    if s.len() > u16::MAX as usize {
        return Err(HopError::new(libc::EINVAL, "string field too long"));
    }
    Ok(s.len())
}

fn val_arg(v: &[u8]) -> Result<usize> {
    if v.len() > u32::MAX as usize {
        return Err(HopError::new(libc::EINVAL, "value too long"));
    }
    Ok(v.len())
}

fn put16(pkt: &mut Vec<u8>, v: u16) {
    pkt.write_u16::<LittleEndian>(v).expect("write to vec");
}

fn put32(pkt: &mut Vec<u8>, v: u32) {
    pkt.write_u32::<LittleEndian>(v).expect("write to vec");
}

fn put64(pkt: &mut Vec<u8>, v: u64) {
    pkt.write_u64::<LittleEndian>(v).expect("write to vec");
}

fn put_str(pkt: &mut Vec<u8>, s: &[u8]) -> Span {
    put16(pkt, s.len() as u16);
    let off = pkt.len();
    pkt.extend_from_slice(s);
    Span::new(off, s.len())
}

fn put_val(pkt: &mut Vec<u8>, v: &[u8]) -> Span {
    put32(pkt, v.len() as u32);
    let off = pkt.len();
    pkt.extend_from_slice(v);
    Span::new(off, v.len())
}

fn pack_common(payload: usize, mtype: MsgType) -> Result<Msg> {
    let size = HDR_SIZE + payload;
    if size > u32::MAX as usize {
        return Err(HopError::new(libc::EINVAL, "message too large"));
    }

    let mut pkt = Vec::with_capacity(size);
    put32(&mut pkt, size as u32);
    put16(&mut pkt, mtype as u16);
    put16(&mut pkt, NOTAG);

    Ok(Msg::blank(mtype, pkt))
}

fn write_vals(m: &mut Msg, vals: &[&[u8]]) {
    if vals.len() == 1 {
        m.value = put_val(&mut m.pkt, vals[0]);
    } else {
        for v in vals {
            let span = put_val(&mut m.pkt, v);
            m.vals.push(span);
        }
    }
}

impl Msg {
    /// Packs a get request for `key` at `version` (a linear version or
    /// one of the sentinels).
    pub fn tget(key: &[u8], version: u64) -> Result<Msg> {
        let klen = str_arg(key)?;
        let mut m = pack_common(2 + klen + 8, MsgType::Tget)?;
        m.key = put_str(&mut m.pkt, key);
        m.version = version;
        put64(&mut m.pkt, version);
        Ok(m)
    }

    pub fn tset(key: &[u8], val: &[u8]) -> Result<Msg> {
        let klen = str_arg(key)?;
        let vlen = val_arg(val)?;
        let mut m = pack_common(2 + klen + 4 + vlen, MsgType::Tset)?;
        m.key = put_str(&mut m.pkt, key);
        m.value = put_val(&mut m.pkt, val);
        Ok(m)
    }

    pub fn tcreate(key: &[u8], flags: &[u8], val: &[u8]) -> Result<Msg> {
        let klen = str_arg(key)?;
        let flen = str_arg(flags)?;
        let vlen = val_arg(val)?;
        let mut m = pack_common(2 + klen + 2 + flen + 4 + vlen, MsgType::Tcreate)?;
        m.key = put_str(&mut m.pkt, key);
        m.flags = put_str(&mut m.pkt, flags);
        m.value = put_val(&mut m.pkt, val);
        Ok(m)
    }

    pub fn tremove(key: &[u8]) -> Result<Msg> {
        let klen = str_arg(key)?;
        let mut m = pack_common(2 + klen, MsgType::Tremove)?;
        m.key = put_str(&mut m.pkt, key);
        Ok(m)
    }

    pub fn ttestset(key: &[u8], version: u64, oldval: &[u8], val: &[u8]) -> Result<Msg> {
        let klen = str_arg(key)?;
        let olen = val_arg(oldval)?;
        let vlen = val_arg(val)?;
        let mut m = pack_common(2 + klen + 8 + 4 + olen + 4 + vlen, MsgType::Ttestset)?;
        m.key = put_str(&mut m.pkt, key);
        m.version = version;
        put64(&mut m.pkt, version);
        m.oldval = put_val(&mut m.pkt, oldval);
        m.value = put_val(&mut m.pkt, val);
        Ok(m)
    }

    pub fn tatomic(key: &[u8], op: AtomicOp, vals: &[&[u8]]) -> Result<Msg> {
        let klen = str_arg(key)?;
        if vals.len() > u16::MAX as usize {
            return Err(HopError::new(libc::EINVAL, "too many values"));
        }
        let mut payload = 2 + 2 + klen + 2;
        for v in vals {
            payload += 4 + val_arg(v)?;
        }

        let mut m = pack_common(payload, MsgType::Tatomic)?;
        m.atmop = op as u16;
        put16(&mut m.pkt, op as u16);
        m.key = put_str(&mut m.pkt, key);
        m.valsnum = vals.len() as u16;
        put16(&mut m.pkt, m.valsnum);
        write_vals(&mut m, vals);
        Ok(m)
    }

    pub fn rerror(ecode: u32, edescr: &str) -> Result<Msg> {
        let elen = str_arg(edescr.as_bytes())?;
        let mut m = pack_common(4 + 2 + elen, MsgType::Rerror)?;
        m.ecode = ecode;
        put32(&mut m.pkt, ecode);
        m.edescr = put_str(&mut m.pkt, edescr.as_bytes());
        Ok(m)
    }

    pub fn rget(version: u64, val: &[u8]) -> Result<Msg> {
        let vlen = val_arg(val)?;
        let mut m = pack_common(8 + 4 + vlen, MsgType::Rget)?;
        m.version = version;
        put64(&mut m.pkt, version);
        m.value = put_val(&mut m.pkt, val);
        Ok(m)
    }

    pub fn rset(version: u64) -> Result<Msg> {
        let mut m = pack_common(8, MsgType::Rset)?;
        m.version = version;
        put64(&mut m.pkt, version);
        Ok(m)
    }

    pub fn rcreate(version: u64) -> Result<Msg> {
        let mut m = pack_common(8, MsgType::Rcreate)?;
        m.version = version;
        put64(&mut m.pkt, version);
        Ok(m)
    }

    pub fn rremove() -> Result<Msg> {
        pack_common(0, MsgType::Rremove)
    }

    pub fn rtestset(version: u64, val: &[u8]) -> Result<Msg> {
        let vlen = val_arg(val)?;
        let mut m = pack_common(8 + 4 + vlen, MsgType::Rtestset)?;
        m.version = version;
        put64(&mut m.pkt, version);
        m.value = put_val(&mut m.pkt, val);
        Ok(m)
    }

    pub fn ratomic(version: u64, vals: &[&[u8]]) -> Result<Msg> {
        if vals.len() > u16::MAX as usize {
            return Err(HopError::new(libc::EINVAL, "too many values"));
        }
        let mut payload = 8 + 2;
        for v in vals {
            payload += 4 + val_arg(v)?;
        }

        let mut m = pack_common(payload, MsgType::Ratomic)?;
        m.version = version;
        put64(&mut m.pkt, version);
        m.valsnum = vals.len() as u16;
        put16(&mut m.pkt, m.valsnum);
        write_vals(&mut m, vals);
        Ok(m)
    }

    /// Parses a complete frame. On success the message owns `data` and
    /// every field accessor views into it. Only per-field length checks
    /// are performed here; semantic validation is the server's job.
    pub fn unpack(data: Vec<u8>) -> Result<Msg> {
        let datalen = data.len();
        if datalen < HDR_SIZE {
            return Err(HopError::new(
                libc::EINVAL,
                format!("buffer too short: {}", datalen),
            ));
        }

        let size = LittleEndian::read_u32(&data[0..4]);
        let wtype = LittleEndian::read_u16(&data[4..6]);
        let tag = LittleEndian::read_u16(&data[6..8]);

        if (size as usize) > datalen {
            return Err(HopError::new(
                libc::EINVAL,
                format!("buffer too short: {} expected {}", datalen, size),
            ));
        }
        if (size as usize) < datalen {
            return Err(size_error());
        }

        let mtype = MsgType::from_wire(wtype).ok_or_else(|| {
            HopError::new(libc::EINVAL, format!("invalid message type: {}", wtype))
        })?;

        if size < MIN_SIZE[(wtype - 100) as usize] {
            return Err(size_error());
        }

        let mut m = Msg::blank(mtype, Vec::new());
        m.tag = tag;
        {
            let mut up = Unpacker {
                data: &data,
                pos: HDR_SIZE,
            };

            match mtype {
                MsgType::Rerror => {
                    m.ecode = up.u32()?;
                    m.edescr = up.str_span()?;
                }
                MsgType::Tget => {
                    m.key = up.str_span()?;
                    m.version = up.u64()?;
                }
                MsgType::Rget => {
                    m.version = up.u64()?;
                    m.value = up.val_span()?;
                }
                MsgType::Tset => {
                    m.key = up.str_span()?;
                    m.value = up.val_span()?;
                }
                MsgType::Rset | MsgType::Rcreate => {
                    m.version = up.u64()?;
                }
                MsgType::Tcreate => {
                    m.key = up.str_span()?;
                    m.flags = up.str_span()?;
                    m.value = up.val_span()?;
                }
                MsgType::Tremove => {
                    m.key = up.str_span()?;
                }
                MsgType::Rremove => {}
                MsgType::Ttestset => {
                    m.key = up.str_span()?;
                    m.version = up.u64()?;
                    m.oldval = up.val_span()?;
                    m.value = up.val_span()?;
                }
                MsgType::Rtestset => {
                    m.version = up.u64()?;
                    m.value = up.val_span()?;
                }
                MsgType::Tatomic => {
                    m.atmop = up.u16()?;
                    m.key = up.str_span()?;
                    read_vals(&mut up, &mut m)?;
                }
                MsgType::Ratomic => {
                    m.version = up.u64()?;
                    read_vals(&mut up, &mut m)?;
                }
            }
        }

        m.pkt = data;
        Ok(m)
    }
}

fn read_vals(up: &mut Unpacker, m: &mut Msg) -> Result<()> {
    m.valsnum = up.u16()?;
    if m.valsnum == 1 {
        m.value = up.val_span()?;
    } else if m.valsnum > 1 {
        let mut vals = Vec::with_capacity(m.valsnum as usize);
        for _ in 0..m.valsnum {
            vals.push(up.val_span()?);
        }
        m.vals = vals;
    }
    Ok(())
}

struct Unpacker<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Unpacker<'a> {
    fn u16(&mut self) -> Result<u16> {
        if self.data.len() - self.pos < 2 {
            return Err(size_error());
        }
        let v = LittleEndian::read_u16(&self.data[self.pos..]);
        self.pos += 2;
        Ok(v)
    }

    fn u32(&mut self) -> Result<u32> {
        if self.data.len() - self.pos < 4 {
            return Err(size_error());
        }
        let v = LittleEndian::read_u32(&self.data[self.pos..]);
        self.pos += 4;
        Ok(v)
    }

    fn u64(&mut self) -> Result<u64> {
        if self.data.len() - self.pos < 8 {
            return Err(size_error());
        }
        let v = LittleEndian::read_u64(&self.data[self.pos..]);
        self.pos += 8;
        Ok(v)
    }

    fn span(&mut self, len: usize) -> Result<Span> {
        if self.data.len() - self.pos < len {
            return Err(size_error());
        }
        let span = Span::new(self.pos, len);
        self.pos += len;
        Ok(span)
    }

    fn str_span(&mut self) -> Result<Span> {
        let len = self.u16()? as usize;
        self.span(len)
    }

    fn val_span(&mut self) -> Result<Span> {
        let len = self.u32()? as usize;
        self.span(len)
    }
}
