//! # Bloom Filter
//!
//! Approximate-membership structure stored as the Filter block of every table
//! file. It answers "definitely absent" or "maybe present": there are no false
//! negatives, and false positives occur at roughly the configured rate.
//!
//! Bit positions come from double hashing, `h(i) = h1 + i * h2`, where `h1`
//! and `h2` are two seeded xxh3 hashes of the key.
//!
//! ## Encoded form
//!
//! ```text
//! [num_bits: u64 LE][num_hashes: u32 LE][bits_len: u64 LE][bits ...]
//! ```
//!
//! ## Example
//!
//! ```rust
//! use bloom::BloomFilter;
//!
//! let mut bf = BloomFilter::new(1000, 0.01);
//! bf.insert(b"hello");
//! assert!(bf.may_contain(b"hello"));
//!
//! let bytes = bf.encode();
//! let back = BloomFilter::decode(&bytes).unwrap();
//! assert!(back.may_contain(b"hello"));
//! ```
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use xxhash_rust::xxh3::xxh3_64_with_seed;

const SEED_PRIMARY: u64 = 0x9E37_79B9_7F4A_7C15;
const SEED_SECONDARY: u64 = 0xC2B2_AE3D_27D4_EB4F;

/// Upper bound on the bit array accepted when decoding (128 MiB).
const MAX_FILTER_BYTES: u64 = 128 * 1024 * 1024;

/// Header size of the encoded form: num_bits + num_hashes + bits_len.
const HEADER_BYTES: usize = 8 + 4 + 8;

/// A bloom filter backed by a byte-packed bit array and `k` hash probes.
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_items` keys at the target
    /// `false_positive_rate`.
    ///
    /// `expected_items == 0` is treated as 1 so that an empty table still
    /// gets a valid (if tiny) filter.
    ///
    /// # Panics
    ///
    /// Panics if `false_positive_rate` is not in `(0, 1)`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );

        let n = expected_items.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;

        // m = -n ln(p) / ln(2)^2, k = (m / n) ln(2)
        let num_bits = ((-n * false_positive_rate.ln()) / (ln2 * ln2)).ceil() as u64;
        let num_bits = num_bits.max(64);
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;

        Self {
            bits: vec![0u8; num_bits.div_ceil(8) as usize],
            num_bits,
            num_hashes,
        }
    }

    /// Adds a key to the set.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let bit = self.probe(h1, h2, i);
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }

    /// Returns `false` only if `key` was never inserted.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_pair(key);
        (0..self.num_hashes).all(|i| {
            let bit = self.probe(h1, h2, i);
            self.bits[(bit / 8) as usize] & (1 << (bit % 8)) != 0
        })
    }

    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Size of [`encode`](Self::encode)'s output in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_BYTES + self.bits.len()
    }

    /// Serializes the filter into a fresh buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut buf);
        buf
    }

    /// Writes the encoded filter to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.num_bits)?;
        w.write_u32::<LittleEndian>(self.num_hashes)?;
        w.write_u64::<LittleEndian>(self.bits.len() as u64)?;
        w.write_all(&self.bits)
    }

    /// Decodes a filter previously produced by [`encode`](Self::encode).
    pub fn decode(mut bytes: &[u8]) -> io::Result<Self> {
        Self::read_from(&mut bytes)
    }

    /// Reads an encoded filter from `r`, validating its header.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let num_bits = r.read_u64::<LittleEndian>()?;
        let num_hashes = r.read_u32::<LittleEndian>()?;
        let bits_len = r.read_u64::<LittleEndian>()?;

        if bits_len > MAX_FILTER_BYTES {
            return Err(invalid(format!("filter too large: {} bytes", bits_len)));
        }
        if num_bits == 0 || num_hashes == 0 || num_bits.div_ceil(8) != bits_len {
            return Err(invalid(format!(
                "inconsistent filter header: num_bits={} num_hashes={} bits_len={}",
                num_bits, num_hashes, bits_len
            )));
        }

        let mut bits = vec![0u8; bits_len as usize];
        r.read_exact(&mut bits)?;
        Ok(Self {
            bits,
            num_bits,
            num_hashes,
        })
    }

    fn probe(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add(u64::from(i).wrapping_mul(h2)) % self.num_bits
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("bytes", &self.bits.len())
            .finish()
    }
}

fn hash_pair(key: &[u8]) -> (u64, u64) {
    // h2 must be odd so successive probes do not collapse onto one bit
    // when num_bits is even.
    (
        xxh3_64_with_seed(key, SEED_PRIMARY),
        xxh3_64_with_seed(key, SEED_SECONDARY) | 1,
    )
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
