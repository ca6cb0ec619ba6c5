//! Fixed-capacity bit vector keyed by validator index.
//!
//! The gossip layer tracks "which votes / block parts does this peer
//! already have" as one bit per validator (or per block part). Capacity is
//! fixed at allocation; all binary operations are sized by the left-hand
//! side.

use {
    rand::Rng,
    serde::{Deserialize, Serialize},
    std::fmt,
};

const WORD_BITS: usize = 64;

/// A fixed-size array of bits.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitArray {
    bits: usize,
    elems: Vec<u64>,
}

impl BitArray {
    /// Allocate an all-zero bit array with capacity for `bits` bits.
    pub fn new(bits: usize) -> Self {
        Self {
            bits,
            elems: vec![0u64; bits.div_ceil(WORD_BITS)],
        }
    }

    /// Number of bits this array can hold.
    pub fn len(&self) -> usize {
        self.bits
    }

    /// True when the capacity is zero.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// True when the backing storage matches the declared capacity.
    /// Deserialized arrays must be checked before use.
    pub fn is_well_formed(&self) -> bool {
        self.elems.len() == self.bits.div_ceil(WORD_BITS)
            && match (self.bits % WORD_BITS, self.elems.last()) {
                // No stray bits past the capacity in the last word.
                (rem, Some(last)) if rem != 0 => last >> rem == 0,
                _ => true,
            }
    }

    /// Set or clear bit `index`. Returns false when out of range.
    pub fn set_index(&mut self, index: usize, value: bool) -> bool {
        if index >= self.bits {
            return false;
        }
        let (word, bit) = (index / WORD_BITS, index % WORD_BITS);
        if value {
            self.elems[word] |= 1 << bit;
        } else {
            self.elems[word] &= !(1 << bit);
        }
        true
    }

    /// Returns bit `index`, or false when out of range.
    pub fn get_index(&self, index: usize) -> bool {
        if index >= self.bits {
            return false;
        }
        self.elems[index / WORD_BITS] >> (index % WORD_BITS) & 1 == 1
    }

    /// Bitwise AND-NOT: the bits set in `self` but not in `other`.
    /// The result is sized like `self`.
    pub fn sub(&self, other: &BitArray) -> BitArray {
        let mut out = self.clone();
        for (word, w) in out.elems.iter_mut().enumerate() {
            if let Some(o) = other.elems.get(word) {
                *w &= !o;
            }
        }
        out.mask_tail();
        out
    }

    /// Bitwise OR, sized to the larger of the two.
    pub fn or(&self, other: &BitArray) -> BitArray {
        let (mut out, smaller) = if self.bits >= other.bits {
            (self.clone(), other)
        } else {
            (other.clone(), self)
        };
        for (word, w) in out.elems.iter_mut().enumerate() {
            if let Some(o) = smaller.elems.get(word) {
                *w |= o;
            }
        }
        out
    }

    /// Bitwise complement within capacity.
    pub fn not(&self) -> BitArray {
        let mut out = self.clone();
        for w in out.elems.iter_mut() {
            *w = !*w;
        }
        out.mask_tail();
        out
    }

    /// Copy the bits of `other` into `self`. Capacity is unchanged; bits
    /// past `self`'s capacity are dropped.
    pub fn update(&mut self, other: &BitArray) {
        for (word, w) in self.elems.iter_mut().enumerate() {
            *w = other.elems.get(word).copied().unwrap_or(0);
        }
        self.mask_tail();
    }

    /// True when at least one bit is set.
    pub fn has_any(&self) -> bool {
        self.elems.iter().any(|w| *w != 0)
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.elems.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Pick a uniformly random set bit. Returns None when no bit is set.
    pub fn pick_random(&self) -> Option<usize> {
        let set: Vec<usize> = (0..self.bits).filter(|i| self.get_index(*i)).collect();
        if set.is_empty() {
            return None;
        }
        let choice = rand::thread_rng().gen_range(0..set.len());
        Some(set[choice])
    }

    // Clear any bits past the declared capacity in the last word.
    fn mask_tail(&mut self) {
        let rem = self.bits % WORD_BITS;
        if rem != 0 {
            if let Some(last) = self.elems.last_mut() {
                *last &= (1u64 << rem) - 1;
            }
        }
    }
}

impl fmt::Display for BitArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BA{{")?;
        for i in 0..self.bits {
            write!(f, "{}", if self.get_index(i) { 'x' } else { '_' })?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for BitArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
