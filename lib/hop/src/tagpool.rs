use std::sync::{Condvar, Mutex, MutexGuard};

/// Largest tag the pool may ever hand out; 0xFFFF is NOTAG.
pub const TAG_LIMIT: u16 = 0xFFFE;

// 256 tags per growth step.
const GROW_BYTES: usize = 32;

// Lowest clear bit for every byte value. 0xFF never gets looked up
// because full bytes are skipped.
const FIRST_ZERO: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut byte = 0usize;
    while byte < 256 {
        let mut bit = 0u8;
        while bit < 8 && byte & (1usize << bit) != 0 {
            bit += 1;
        }
        table[byte] = bit;
        byte += 1;
    }
    table
};

/// Allocator for 16-bit request tags.
///
/// The allocated set is exactly the set of tags owned by requests that
/// have not completed yet. When every tag up to `maxid` is in use,
/// `acquire` blocks until a `release`, which makes the pool double as
/// backpressure on the number of in-flight requests per connection.
pub struct TagPool {
    maxid: u16,
    map: Mutex<Vec<u8>>,
    cond: Condvar,
}

impl TagPool {
    /// Creates a pool handing out tags in `0..=maxid`. `maxid` is
    /// clamped to the protocol limit so NOTAG stays unreachable.
    pub fn new(maxid: u16) -> TagPool {
        let maxid = maxid.min(TAG_LIMIT);
        let mut map = vec![0u8; GROW_BYTES.min(maxid as usize / 8 + 1)];
        mask_tail(&mut map, maxid);

        TagPool {
            maxid,
            map: Mutex::new(map),
            cond: Condvar::new(),
        }
    }

    /// Returns a free tag, blocking while the pool is exhausted and
    /// cannot grow any further.
    pub fn acquire(&self) -> u16 {
        let mut map = self.lock();
        loop {
            let mut slot = map.iter().position(|&b| b != 0xFF);

            if slot.is_none() && map.len() * 8 < self.maxid as usize + 1 {
                let grown = (map.len() + GROW_BYTES).min(self.maxid as usize / 8 + 1);
                slot = Some(map.len());
                map.resize(grown, 0);
                mask_tail(&mut map, self.maxid);
            }

            let slot = match slot {
                Some(slot) => slot,
                None => {
                    map = self.cond.wait(map).expect("tag pool lock poisoned");
                    continue;
                }
            };

            let bit = FIRST_ZERO[map[slot] as usize];
            map[slot] |= 1 << bit;
            return (slot * 8) as u16 + bit as u16;
        }
    }

    /// Returns `id` to the pool and wakes one blocked `acquire`. Ids
    /// beyond the current capacity are ignored.
    pub fn release(&self, id: u16) {
        let mut map = self.lock();
        if (id as usize) < map.len() * 8 {
            map[id as usize / 8] &= !(1u8 << (id % 8));
        }
        drop(map);
        self.cond.notify_one();
    }

    fn lock(&self) -> MutexGuard<Vec<u8>> {
        self.map.lock().expect("tag pool lock poisoned")
    }
}

// Pre-marks the bits past maxid in the final byte so they can never be
// handed out.
fn mask_tail(map: &mut [u8], maxid: u16) {
    let cap = map.len() * 8;
    for id in (maxid as usize + 1)..cap {
        map[id / 8] |= 1 << (id % 8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn hands_out_lowest_free_tag() {
        let pool = TagPool::new(255);
        assert_eq!(pool.acquire(), 0);
        assert_eq!(pool.acquire(), 1);
        assert_eq!(pool.acquire(), 2);

        pool.release(1);
        assert_eq!(pool.acquire(), 1);
        assert_eq!(pool.acquire(), 3);
    }

    #[test]
    fn never_exceeds_maxid() {
        let pool = TagPool::new(9);
        let mut tags: Vec<u16> = (0..10).map(|_| pool.acquire()).collect();
        tags.sort_unstable();
        assert_eq!(tags, (0..10).collect::<Vec<u16>>());
    }

    #[test]
    fn grows_beyond_initial_chunk() {
        let pool = TagPool::new(600);
        let tags: Vec<u16> = (0..=600).map(|_| pool.acquire()).collect();
        assert_eq!(tags.len(), 601);
        assert_eq!(*tags.last().unwrap(), 600);
    }

    #[test]
    fn blocks_when_exhausted_until_release() {
        let pool = Arc::new(TagPool::new(3));
        for _ in 0..4 {
            pool.acquire();
        }

        let (tx, rx) = mpsc::channel();
        let p = Arc::clone(&pool);
        let waiter = thread::spawn(move || {
            let tag = p.acquire();
            tx.send(tag).unwrap();
        });

        // The pool is full, so the waiter must still be parked.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        pool.release(2);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        waiter.join().unwrap();
    }

    #[test]
    fn concurrent_acquires_stay_unique() {
        let pool = Arc::new(TagPool::new(31));
        let held: Arc<Vec<AtomicBool>> =
            Arc::new((0..32).map(|_| AtomicBool::new(false)).collect());

        let mut threads = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            let held = Arc::clone(&held);
            threads.push(thread::spawn(move || {
                for _ in 0..200 {
                    let tag = pool.acquire();
                    assert!(!held[tag as usize].swap(true, Ordering::SeqCst));
                    thread::yield_now();
                    assert!(held[tag as usize].swap(false, Ordering::SeqCst));
                    pool.release(tag);
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
    }
}
