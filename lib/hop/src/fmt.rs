use crate::msg::{AtomicOp, Msg, MsgType};
use std::fmt;

impl fmt::Display for AtomicOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            AtomicOp::Add => "add",
            AtomicOp::Sub => "sub",
            AtomicOp::BitSet => "bitset",
            AtomicOp::BitClear => "bitclear",
            AtomicOp::Append => "append",
            AtomicOp::Remove => "remove",
            AtomicOp::Replace => "replace",
        };
        f.write_str(name)
    }
}

fn quoted(field: &[u8]) -> String {
    format!("'{}'", String::from_utf8_lossy(field))
}

/// Single-line rendering used by the wire traces. Values are shown as
/// lengths, keys and descriptions as lossy strings.
impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tag = self.tag();
        match self.mtype() {
            MsgType::Rerror => write!(
                f,
                "Rerror tag {} ecode {} ename {}",
                tag,
                self.ecode(),
                quoted(self.edescr())
            ),
            MsgType::Tget => write!(
                f,
                "Tget tag {} key {} version {}",
                tag,
                quoted(self.key()),
                self.version()
            ),
            MsgType::Rget => write!(
                f,
                "Rget tag {} version {} datalen {}",
                tag,
                self.version(),
                self.value().len()
            ),
            MsgType::Tset => write!(
                f,
                "Tset tag {} key {} datalen {}",
                tag,
                quoted(self.key()),
                self.value().len()
            ),
            MsgType::Rset => write!(f, "Rset tag {} version {}", tag, self.version()),
            MsgType::Tcreate => write!(
                f,
                "Tcreate tag {} key {} flags {}",
                tag,
                quoted(self.key()),
                quoted(self.flags())
            ),
            MsgType::Rcreate => write!(f, "Rcreate tag {} version {}", tag, self.version()),
            MsgType::Tremove => write!(f, "Tremove tag {} key {}", tag, quoted(self.key())),
            MsgType::Rremove => write!(f, "Rremove tag {}", tag),
            MsgType::Ttestset => write!(
                f,
                "Ttestset tag {} key {} oldlen {} version {} datalen {}",
                tag,
                quoted(self.key()),
                self.oldval().len(),
                self.version(),
                self.value().len()
            ),
            MsgType::Rtestset => write!(
                f,
                "Rtestset tag {} version {} datalen {}",
                tag,
                self.version(),
                self.value().len()
            ),
            MsgType::Tatomic => {
                match self.atomic_op() {
                    Some(op) => write!(f, "Tatomic tag {} op {}", tag, op)?,
                    None => write!(f, "Tatomic tag {} op {}", tag, self.atmop())?,
                }
                write!(f, " key {} valslen [", quoted(self.key()))?;
                for v in self.vals() {
                    write!(f, " {}", v.len())?;
                }
                write!(f, "]")
            }
            MsgType::Ratomic => {
                write!(f, "Ratomic tag {} version {} valslen [", tag, self.version())?;
                for v in self.vals() {
                    write!(f, " {}", v.len())?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::msg::{AtomicOp, Msg};

    #[test]
    fn renders_requests() {
        let mut m = Msg::tget(b"foo", 3).unwrap();
        m.set_tag(7);
        assert_eq!(m.to_string(), "Tget tag 7 key 'foo' version 3");

        let m = Msg::tatomic(b"ctr", AtomicOp::Add, &[&1u32.to_le_bytes()]).unwrap();
        assert_eq!(m.to_string(), "Tatomic tag 65535 op add key 'ctr' valslen [ 4]");
    }

    #[test]
    fn renders_responses() {
        let m = Msg::rerror(22, "invalid size").unwrap();
        assert_eq!(m.to_string(), "Rerror tag 65535 ecode 22 ename 'invalid size'");

        let m = Msg::rget(12, b"abcde").unwrap();
        assert_eq!(m.to_string(), "Rget tag 65535 version 12 datalen 5");
    }
}
