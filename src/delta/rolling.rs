/// Weak rolling checksum over a fixed-size window.
///
/// Adler-style but not Adler-32: sums are taken modulo 2^16 (not the Adler
/// prime 65521), and the window is always treated as length `B` for the `b`
/// update even when fewer bytes remain at the tail of a file — this matches
/// both sides' full-block computation so rolling and from-scratch checksums
/// agree bit-for-bit. See the module invariant: `a`/`b` each wrap at 2^16
/// independently; mixing signed and unsigned arithmetic here would silently
/// break match detection between sender and receiver.
#[derive(Debug, Clone)]
pub struct RollingChecksum {
    a: u32,
    b: u32,
    window: std::collections::VecDeque<u8>,
    block_size: usize,
}

const MOD_16: u32 = 1 << 16;

impl RollingChecksum {
    pub fn new(block_size: usize) -> Self {
        Self {
            a: 0,
            b: 0,
            window: std::collections::VecDeque::with_capacity(block_size),
            block_size,
        }
    }

    /// Compute `(a, b)` for `data` from scratch: `a = sum(d) mod 2^16`,
    /// `b = sum((L-i)*d[i]) mod 2^16` for `i` in `0..L`.
    fn compute(data: &[u8]) -> (u32, u32) {
        let len = data.len() as u32;
        let mut a: u32 = 0;
        let mut b: u32 = 0;
        for (i, &byte) in data.iter().enumerate() {
            a = a.wrapping_add(byte as u32) % MOD_16;
            let weight = len - i as u32;
            b = b.wrapping_add(weight.wrapping_mul(byte as u32)) % MOD_16;
        }
        (a, b)
    }

    /// Non-rolling checksum of a standalone buffer, combining `a`/`b` into
    /// the 32-bit word `(b << 16) | a`.
    pub fn hash(data: &[u8]) -> u32 {
        let (a, b) = Self::compute(data);
        (b << 16) | a
    }

    /// (Re)initialize the window to `block`, recomputing `a`/`b` from
    /// scratch. `block` may be shorter than `block_size` (the file's final
    /// block).
    pub fn reset_to(&mut self, block: &[u8]) {
        self.window.clear();
        self.window.extend(block.iter().copied());
        let (a, b) = Self::compute(block);
        self.a = a;
        self.b = b;
    }

    /// Roll the window by one byte: `old_byte` leaves, `new_byte` enters.
    /// The `b` update always treats the window length as `block_size` for
    /// O(1) updates, even for a shrinking tail window — see the patch
    /// generator's handling of end-of-source.
    pub fn roll(&mut self, old_byte: u8, new_byte: u8) {
        self.a = (self.a + MOD_16 - (old_byte as u32 % MOD_16) + new_byte as u32) % MOD_16;
        let old_term = (old_byte as u32 * self.block_size as u32) % MOD_16;
        self.b = (self.b + MOD_16 - old_term + self.a) % MOD_16;
    }

    /// Drop the oldest byte from the window and either append `new_byte` (the
    /// source had more data) or let the window shrink by one (the source is
    /// exhausted), per spec step 3 of the patch generator's main loop.
    /// Returns the dropped byte, which the caller appends to the pending
    /// literal buffer.
    pub fn advance(&mut self, new_byte: Option<u8>) -> u8 {
        let old_byte = self
            .window
            .pop_front()
            .expect("advance called on an empty window");
        match new_byte {
            Some(b) => {
                self.window.push_back(b);
                self.roll(old_byte, b);
            }
            None => self.roll(old_byte, 0),
        }
        old_byte
    }

    pub fn window_bytes(&self) -> Vec<u8> {
        self.window.iter().copied().collect()
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn digest(&self) -> u32 {
        (self.b << 16) | self.a
    }
}
