use crate::srv::Hop;
use hop::error::{HopError, Result};
use hop::msg::version;
use hop::AtomicOp;
use hashbrown::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard};

/// In-memory versioned key-value store implementing the server's
/// capability set. Versions come from a single monotonic counter, so a
/// key's version strictly increases on every mutation.
pub struct MemStore {
    state: Mutex<StoreState>,
    updated: Condvar,
}

struct StoreState {
    map: HashMap<Vec<u8>, Entry>,
    nextver: u64,
}

struct Entry {
    version: u64,
    data: Vec<u8>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore {
            state: Mutex::new(StoreState {
                map: HashMap::new(),
                nextver: 0,
            }),
            updated: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<StoreState> {
        self.state.lock().expect("store lock poisoned")
    }
}

impl Default for MemStore {
    fn default() -> MemStore {
        MemStore::new()
    }
}

impl StoreState {
    fn bump(&mut self) -> u64 {
        self.nextver += 1;
        self.nextver
    }
}

fn enoent() -> HopError {
    HopError::new(libc::ENOENT, "no such key")
}

impl Hop for MemStore {
    fn create(&self, key: &[u8], _flags: &[u8], val: &[u8]) -> Result<u64> {
        let mut state = self.lock();
        if state.map.contains_key(key) {
            return Err(HopError::new(libc::EEXIST, "key exists"));
        }

        let ver = state.bump();
        state.map.insert(
            key.to_vec(),
            Entry {
                version: ver,
                data: val.to_vec(),
            },
        );
        self.updated.notify_all();
        Ok(ver)
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if state.map.remove(key).is_none() {
            return Err(enoent());
        }
        self.updated.notify_all();
        Ok(())
    }

    fn get(&self, key: &[u8], ver: u64) -> Result<(u64, Vec<u8>)> {
        let mut state = self.lock();

        // Reads return the current value whatever version was asked
        // for; only PastNewest changes behavior and parks the caller
        // until the entry is mutated.
        if ver == version::PAST_NEWEST {
            let last = state.map.get(key).map(|e| e.version);
            loop {
                state = self.updated.wait(state).expect("store lock poisoned");
                match state.map.get(key) {
                    Some(e) if Some(e.version) != last => {
                        return Ok((e.version, e.data.clone()));
                    }
                    Some(_) => {}
                    None if last.is_some() => return Err(enoent()),
                    None => {}
                }
            }
        }

        state
            .map
            .get(key)
            .map(|e| (e.version, e.data.clone()))
            .ok_or_else(enoent)
    }

    fn set(&self, key: &[u8], val: &[u8]) -> Result<u64> {
        let mut state = self.lock();
        let ver = state.bump();
        match state.map.get_mut(key) {
            Some(e) => {
                e.version = ver;
                e.data = val.to_vec();
            }
            None => {
                state.map.insert(
                    key.to_vec(),
                    Entry {
                        version: ver,
                        data: val.to_vec(),
                    },
                );
            }
        }
        self.updated.notify_all();
        Ok(ver)
    }

    fn testset(
        &self,
        key: &[u8],
        oldver: u64,
        oldval: &[u8],
        val: &[u8],
    ) -> Result<(u64, Vec<u8>)> {
        let mut state = self.lock();
        {
            let e = state.map.get(key).ok_or_else(enoent)?;
            let ver_ok = oldver == version::ANY || e.version == oldver;
            if !ver_ok || e.data != oldval {
                return Err(HopError::new(libc::EAGAIN, "testset conflict"));
            }
        }

        let ver = state.bump();
        let e = state.map.get_mut(key).expect("entry checked above");
        e.version = ver;
        e.data = val.to_vec();
        let data = e.data.clone();
        self.updated.notify_all();
        Ok((ver, data))
    }

    fn atomic(&self, key: &[u8], op: AtomicOp, vals: &[&[u8]]) -> Result<(u64, Vec<Vec<u8>>)> {
        let expected = if op == AtomicOp::Replace { 2 } else { 1 };
        if vals.len() != expected {
            return Err(HopError::new(libc::EINVAL, "wrong value count"));
        }

        let mut state = self.lock();
        let (old_version, changed, new_data, extra) = {
            let e = state.map.get(key).ok_or_else(enoent)?;
            let (new_data, extra) = apply_atomic(op, &e.data, vals)?;
            (e.version, new_data != e.data, new_data, extra)
        };

        let ver = if changed {
            let ver = state.bump();
            let e = state.map.get_mut(key).expect("entry checked above");
            e.version = ver;
            e.data = new_data.clone();
            self.updated.notify_all();
            ver
        } else {
            old_version
        };

        let mut outs = vec![new_data];
        if let Some(extra) = extra {
            outs.push(extra);
        }
        Ok((ver, outs))
    }
}

// Computes the new value for an atomic op; the optional second output
// is the bit index produced by the find-a-bit forms.
fn apply_atomic(
    op: AtomicOp,
    data: &[u8],
    vals: &[&[u8]],
) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
    let operand = vals[0];
    match op {
        AtomicOp::Add | AtomicOp::Sub => {
            let cur = int_value(data)?;
            let arg = int_value(operand)?;
            if operand.len() != data.len() {
                return Err(HopError::new(libc::EINVAL, "operand length mismatch"));
            }
            let new = match op {
                AtomicOp::Add => cur.wrapping_add(arg),
                _ => cur.wrapping_sub(arg),
            };
            Ok((int_bytes(new, data.len()), None))
        }

        AtomicOp::BitSet | AtomicOp::BitClear => {
            let want_set = op == AtomicOp::BitSet;
            if operand.is_empty() {
                let (new, index) = flip_bit(data, want_set)?;
                Ok((new, Some((index as u32).to_le_bytes().to_vec())))
            } else {
                if operand.len() != data.len() {
                    return Err(HopError::new(libc::EINVAL, "operand length mismatch"));
                }
                let new = data
                    .iter()
                    .zip(operand.iter())
                    .map(|(&b, &m)| if want_set { b | m } else { b & !m })
                    .collect();
                Ok((new, None))
            }
        }

        AtomicOp::Append => {
            let mut new = data.to_vec();
            new.extend_from_slice(operand);
            Ok((new, None))
        }

        AtomicOp::Remove => Ok((replace_all(data, operand, &[]), None)),

        AtomicOp::Replace => Ok((replace_all(data, operand, vals[1]), None)),
    }
}

// Add/Sub operands are little-endian unsigned integers of length 1, 2,
// 4 or 8.
fn int_value(bytes: &[u8]) -> Result<u64> {
    match bytes.len() {
        1 | 2 | 4 | 8 => {
            let mut buf = [0u8; 8];
            buf[..bytes.len()].copy_from_slice(bytes);
            Ok(u64::from_le_bytes(buf))
        }
        _ => Err(HopError::new(libc::EINVAL, "bad integer length")),
    }
}

fn int_bytes(v: u64, len: usize) -> Vec<u8> {
    v.to_le_bytes()[..len].to_vec()
}

// Finds the lowest clear (resp. set) bit, flips it and returns the new
// value plus the bit index. Bit order follows the little-endian integer
// view: lowest byte first, LSB first.
fn flip_bit(data: &[u8], set: bool) -> Result<(Vec<u8>, usize)> {
    let mut new = data.to_vec();
    for (i, b) in data.iter().enumerate() {
        for bit in 0..8 {
            let is_set = b & (1 << bit) != 0;
            if is_set != set {
                if set {
                    new[i] |= 1 << bit;
                } else {
                    new[i] &= !(1u8 << bit);
                }
                return Ok((new, i * 8 + bit));
            }
        }
    }
    Err(HopError::new(libc::ENOSPC, "no matching bit"))
}

fn replace_all(data: &[u8], pat: &[u8], rep: &[u8]) -> Vec<u8> {
    if pat.is_empty() {
        return data.to_vec();
    }

    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if i + pat.len() <= data.len() && &data[i..i + pat.len()] == pat {
            out.extend_from_slice(rep);
            i += pat.len();
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}
