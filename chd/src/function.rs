use std::cmp::Ordering;
use std::io;

use binout::{AsIs, Serializer};
use bitm::{ceiling_div, BitAccess, BitVec};
use dyn_size_of::GetSize;
use thiserror::Error;

use crate::displacements::Displacements;
use crate::hash::{f_hash, g_hash, PhfKey};
use crate::stats::BuildStatsCollector;
use crate::utils::{bits_to_store, powerup};

/// Build configuration that is accepted by [`Function`] constructors.
///
/// See field descriptions for details.
#[derive(Clone, Copy)]
pub struct BuildConf {
    /// Target mean number of keys per displacement bucket, *λ*. (default: `4`)
    ///
    /// Smaller values produce more buckets and therefore smaller displacements,
    /// at the cost of a larger displacement table. Coerced to at least `1`.
    pub lambda: usize,

    /// Load factor of the output table, in percent. (default: `80`)
    ///
    /// `100` makes the function minimal. Values closer to `100` shrink the
    /// output range but make the displacement search harder. Clamped to `1..=100`.
    pub alpha: usize,

    /// Seed of the hash function family committed into the built function. (default: `0`)
    pub seed: u32,

    /// Round the bucket count and the output range up to powers of two,
    /// so that modular reduction becomes a bit mask. (default: `false`)
    pub nodiv: bool,

    /// Per-bucket limit on displacement trials; `None` searches indefinitely. (default: `None`)
    ///
    /// The greedy search has no proven termination bound. With a limit set,
    /// construction returns [`BuildError::SearchExhausted`] once some bucket
    /// exceeds it instead of searching on.
    pub d_limit: Option<u32>,
}

impl Default for BuildConf {
    fn default() -> Self {
        Self {
            lambda: 4,
            alpha: 80,
            seed: 0,
            nodiv: false,
            d_limit: None,
        }
    }
}

impl BuildConf {
    /// Returns configuration that uses the custom [`seed`](BuildConf::seed).
    pub fn seed(seed: u32) -> Self {
        Self { seed, ..Default::default() }
    }

    /// Returns configuration that uses custom [`lambda`](BuildConf::lambda)
    /// and [`alpha`](BuildConf::alpha).
    pub fn la(lambda: usize, alpha: usize) -> Self {
        Self { lambda, alpha, ..Default::default() }
    }

    /// Returns configuration that uses custom [`lambda`](BuildConf::lambda),
    /// [`alpha`](BuildConf::alpha) and [`seed`](BuildConf::seed).
    pub fn la_seed(lambda: usize, alpha: usize, seed: u32) -> Self {
        Self { lambda, alpha, seed, ..Default::default() }
    }
}

/// Error returned by the fallible [`Function`] constructors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    /// A bucket found no conflict-free displacement within the configured trial budget.
    #[error("displacement search for a bucket of {bucket_size} keys exhausted its budget of {d_limit} trials")]
    SearchExhausted {
        /// Size of the bucket whose search failed.
        bucket_size: usize,
        /// The configured per-bucket trial budget.
        d_limit: u32,
    },
}

/// Reduces the hash `hash` to `0..len`.
#[inline(always)]
fn mod_reduce(hash: u32, len: usize, nodiv: bool) -> usize {
    if nodiv {
        hash as usize & (len - 1)
    } else {
        hash as usize % len
    }
}

/// Per-key construction record: the key and the bucket selected for it by *g*.
struct Record<'k, K> {
    key: &'k K,
    bucket: u32,
}

/// Perfect hash function built by compress, hash, and displace (CHD).
///
/// Maps each key of the construction input to a distinct index below
/// [`range`](Self::range). Keys outside the input map to an arbitrary index
/// of the same interval. The function is read-only after construction
/// ([`compact`](Self::compact) only re-encodes its displacement table)
/// and evaluation from multiple threads needs no synchronization.
///
/// See: D. Belazzougui, F. C. Botelho, M. Dietzfelbinger,
/// *Hash, displace, and compress*, ESA 2009.
#[derive(Clone)]
pub struct Function {
    displacements: Displacements,
    seed: u32,
    /// Number of displacement buckets.
    r: usize,
    /// Size of the output range.
    m: usize,
    d_max: u32,
    nodiv: bool,
}

impl GetSize for Function {
    fn size_bytes_dyn(&self) -> usize {
        self.displacements.size_bytes_dyn()
    }
    fn size_bytes_content_dyn(&self) -> usize {
        self.displacements.size_bytes_content_dyn()
    }
    const USES_DYN_MEM: bool = true;
}

impl Function {
    /// Returns the index assigned to the given `key`.
    ///
    /// The returned value is in the range from `0` (inclusive) to
    /// [`range`](Self::range) (exclusive). Indices of the keys given during
    /// construction are distinct; any other key gets an arbitrary index
    /// of the same interval.
    #[inline]
    pub fn get<K: PhfKey + ?Sized>(&self, key: &K) -> u32 {
        let bucket = mod_reduce(g_hash(key, self.seed), self.r, self.nodiv);
        let d = self.displacements.get(bucket);
        mod_reduce(f_hash(d, key, self.seed), self.m, self.nodiv) as u32
    }

    /// Returns the number of displacement buckets, *r*.
    #[inline]
    pub fn buckets(&self) -> usize {
        self.r
    }

    /// Returns the size of the output range, *m*.
    #[inline]
    pub fn range(&self) -> usize {
        self.m
    }

    /// Returns the largest displacement committed during construction.
    #[inline]
    pub fn d_max(&self) -> u32 {
        self.d_max
    }

    /// Returns the number of bits needed to store any committed displacement.
    #[inline]
    pub fn d_bits(&self) -> u8 {
        bits_to_store(self.d_max)
    }

    /// Returns the seed committed during construction.
    #[inline]
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Returns whether modular reduction is performed by bit masking.
    #[inline]
    pub fn nodiv(&self) -> bool {
        self.nodiv
    }

    /// Returns the current width in bits of a single displacement table entry.
    #[inline]
    pub fn entry_bits(&self) -> u8 {
        self.displacements.entry_bits()
    }

    /// Narrows the displacement table entries to the smallest of 8, 16 or 32 bits
    /// that stores [`d_max`](Self::d_max).
    ///
    /// Does not change any value returned by [`get`](Self::get). Idempotent.
    /// Callers must not evaluate the function concurrently with this method.
    pub fn compact(&mut self) {
        self.displacements.compact(self.d_max);
    }

    /// Builds [`Function`] for the given `keys`, using the build configuration `conf`
    /// and reporting construction events to `stats`.
    ///
    /// The keys must be distinct; equal keys detected during construction cause a panic.
    /// Returns [`BuildError::SearchExhausted`] only if `conf` sets a
    /// [trial budget](BuildConf::d_limit) and some bucket exceeds it.
    pub fn try_from_slice_with_conf_stats<K, BS>(
        keys: &[K],
        conf: BuildConf,
        stats: &mut BS,
    ) -> Result<Self, BuildError>
    where
        K: PhfKey + PartialEq,
        BS: BuildStatsCollector,
    {
        let n1 = keys.len().max(1);
        let l1 = conf.lambda.max(1);
        let a1 = conf.alpha.clamp(1, 100);
        let (r, m) = if conf.nodiv {
            (powerup(n1 / l1.min(n1)), powerup(n1 * 100 / a1))
        } else {
            (ceiling_div(n1, l1), n1 * 100 / a1)
        };

        let mut bucket_sizes = vec![0usize; r].into_boxed_slice();
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let bucket = mod_reduce(g_hash(key, conf.seed), r, conf.nodiv) as u32;
            bucket_sizes[bucket as usize] += 1;
            records.push(Record { key, bucket });
        }

        // Largest buckets first; ties inside a bucket are irrelevant, but two
        // equal keys can never be placed and have to be rejected here.
        records.sort_unstable_by(|a, b| {
            bucket_sizes[b.bucket as usize]
                .cmp(&bucket_sizes[a.bucket as usize])
                .then_with(|| b.bucket.cmp(&a.bucket))
                .then_with(|| {
                    assert!(a.key != b.key, "duplicate key in the constructor input");
                    Ordering::Equal
                })
        });

        let mut taken = Box::<[u64]>::with_zeroed_bits(m);
        let mut trial = Box::<[u64]>::with_zeroed_bits(m);
        let mut displacements = vec![0u32; r].into_boxed_slice();
        let mut d_max = 0;

        let mut begin = 0;
        while begin < records.len() {
            let bucket = records[begin].bucket;
            let end = begin + bucket_sizes[bucket as usize];
            let bucket_records = &records[begin..end];

            let mut d = 0u32;
            'search: loop {
                d += 1;
                if let Some(d_limit) = conf.d_limit {
                    if d > d_limit {
                        return Err(BuildError::SearchExhausted {
                            bucket_size: bucket_records.len(),
                            d_limit,
                        });
                    }
                }
                for (already_set, record) in bucket_records.iter().enumerate() {
                    let slot = mod_reduce(f_hash(d, record.key, conf.seed), m, conf.nodiv);
                    if taken.get_bit(slot) || trial.get_bit(slot) {
                        // the trial failed: undo exactly the bits it has set so far
                        for record in &bucket_records[..already_set] {
                            trial.clear_bit(mod_reduce(
                                f_hash(d, record.key, conf.seed),
                                m,
                                conf.nodiv,
                            ));
                        }
                        continue 'search;
                    }
                    trial.set_bit(slot);
                }
                break;
            }

            for record in bucket_records {
                let slot = mod_reduce(f_hash(d, record.key, conf.seed), m, conf.nodiv);
                trial.clear_bit(slot);
                taken.set_bit(slot);
            }
            displacements[bucket as usize] = d;
            if d > d_max {
                d_max = d;
            }
            stats.bucket_placed(bucket_records.len(), d);
            begin = end;
        }
        stats.end(d_max);

        Ok(Self {
            displacements: Displacements::U32(displacements),
            seed: conf.seed,
            r,
            m,
            d_max,
            nodiv: conf.nodiv,
        })
    }

    /// Builds [`Function`] for the given `keys`, using the build configuration `conf`.
    ///
    /// The keys must be distinct; equal keys detected during construction cause a panic.
    #[inline]
    pub fn try_from_slice_with_conf<K: PhfKey + PartialEq>(
        keys: &[K],
        conf: BuildConf,
    ) -> Result<Self, BuildError> {
        Self::try_from_slice_with_conf_stats(keys, conf, &mut ())
    }

    /// Builds [`Function`] for the given `keys`, using the build configuration `conf`.
    ///
    /// The keys must be distinct; equal keys detected during construction cause a panic.
    /// Panics also if `conf` sets a [trial budget](BuildConf::d_limit) and some bucket exceeds it.
    #[inline]
    pub fn from_slice_with_conf<K: PhfKey + PartialEq>(keys: &[K], conf: BuildConf) -> Self {
        Self::try_from_slice_with_conf(keys, conf)
            .expect("Constructing chd::Function failed.")
    }

    /// Builds [`Function`] for the given `keys`, using the default configuration.
    ///
    /// The keys must be distinct; equal keys detected during construction cause a panic.
    #[inline]
    pub fn from_slice<K: PhfKey + PartialEq>(keys: &[K]) -> Self {
        Self::from_slice_with_conf(keys, Default::default())
    }

    /// Returns the number of bytes which `write` will write.
    pub fn write_bytes(&self) -> usize {
        size_of::<u32>() + size_of::<u8>() + 2 * size_of::<u64>() + size_of::<u32>()
            + self.displacements.write_bytes()
    }

    /// Writes `self` to the `output`.
    pub fn write(&self, output: &mut dyn io::Write) -> io::Result<()> {
        AsIs::write(output, self.seed)?;
        AsIs::write(output, self.nodiv as u8)?;
        AsIs::write(output, self.r as u64)?;
        AsIs::write(output, self.m as u64)?;
        AsIs::write(output, self.d_max)?;
        self.displacements.write(output)
    }

    /// Reads `Self` from the `input`.
    pub fn read(input: &mut dyn io::Read) -> io::Result<Self> {
        let seed: u32 = AsIs::read(input)?;
        let nodiv: u8 = AsIs::read(input)?;
        let r: u64 = AsIs::read(input)?;
        let m: u64 = AsIs::read(input)?;
        let d_max: u32 = AsIs::read(input)?;
        let displacements = Displacements::read(input, r as usize)?;
        Ok(Self {
            displacements,
            seed,
            r: r as usize,
            m: m as usize,
            d_max,
            nodiv: nodiv != 0,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::stats::BuildStatsSummary;
    use crate::utils::uniq;
    use butils::XorShift64;

    /// Checks that `h` maps every given key to a distinct index below its range.
    pub(crate) fn test_phf<'k, K, I>(keys: I, h: &Function)
    where
        K: PhfKey + ?Sized + 'k,
        I: IntoIterator<Item = &'k K>,
    {
        let mut seen = Box::<[u64]>::with_zeroed_bits(h.range());
        for key in keys {
            let index = h.get(key) as usize;
            assert!(index < h.range(), "index {} out of range {}", index, h.range());
            assert!(!seen.get_bit(index), "two keys mapped to index {}", index);
            seen.set_bit(index);
        }
    }

    #[test]
    fn minimal_for_full_alpha() {
        let keys = [0u32, 1, 2, 3];
        let h = Function::from_slice_with_conf(
            &keys,
            BuildConf { alpha: 100, nodiv: true, seed: 0xdeadbeef, ..Default::default() },
        );
        assert_eq!(h.buckets(), 1);
        assert_eq!(h.range(), 4);
        test_phf(keys.iter(), &h);
    }

    #[test]
    fn near_minimal_for_default_alpha() {
        let keys = [0u32, 1, 2, 3];
        let h = Function::from_slice_with_conf(
            &keys,
            BuildConf { nodiv: true, seed: 0xdeadbeef, ..Default::default() },
        );
        assert_eq!(h.buckets(), 1);
        assert_eq!(h.range(), 8);
        test_phf(keys.iter(), &h);
    }

    #[test]
    fn empty_input() {
        let h = Function::from_slice(&[] as &[u32]);
        assert_eq!(h.buckets(), 1);
        assert_eq!(h.range(), 1);
        assert_eq!(h.d_max(), 0);
        assert_eq!(h.get(&0u32), 0);
    }

    #[test]
    fn random_u64_keys() {
        let keys: Vec<u64> = XorShift64(0x12345678).take(1000).collect();
        let h = Function::from_slice_with_conf(&keys, BuildConf::default());
        assert!(h.range() >= keys.len());
        assert!(h.d_max() < 1 << 16);
        test_phf(keys.iter(), &h);
    }

    #[test]
    fn string_keys() {
        let keys = ["apple", "banana", "cherry", "date"];
        let h = Function::from_slice_with_conf(
            &keys,
            BuildConf { nodiv: true, seed: 0xdeadbeef, ..Default::default() },
        );
        assert_eq!(h.range(), 8);
        test_phf(keys.iter().copied(), &h);

        let minimal = Function::from_slice_with_conf(
            &keys,
            BuildConf { alpha: 100, nodiv: true, seed: 0xdeadbeef, ..Default::default() },
        );
        assert_eq!(minimal.range(), 4);
        test_phf(keys.iter().copied(), &minimal);
    }

    #[test]
    #[should_panic(expected = "duplicate key")]
    fn duplicate_keys_panic() {
        let _ = Function::from_slice(&[0u32, 0]);
    }

    #[test]
    fn deduped_input_builds() {
        let mut keys = [0u32, 0];
        let len = uniq(&mut keys);
        assert_eq!(len, 1);
        let h = Function::from_slice(&keys[..len]);
        test_phf(keys[..len].iter(), &h);
    }

    #[test]
    fn repeated_builds_are_identical() {
        let keys: Vec<u64> = XorShift64(99).take(500).collect();
        let first = Function::from_slice_with_conf(&keys, BuildConf::seed(7));
        let second = Function::from_slice_with_conf(&keys, BuildConf::seed(7));
        assert_eq!(first.buckets(), second.buckets());
        assert_eq!(first.range(), second.range());
        assert_eq!(first.d_max(), second.d_max());
        assert!(keys.iter().all(|key| first.get(key) == second.get(key)));
    }

    #[test]
    fn nodiv_changes_only_rounding() {
        let keys: Vec<u32> = (0..100).map(|i| i * 7 + 1).collect();
        for nodiv in [false, true] {
            let h = Function::from_slice_with_conf(
                &keys,
                BuildConf { nodiv, seed: 3, ..Default::default() },
            );
            test_phf(keys.iter(), &h);
        }
    }

    #[test]
    fn compact_preserves_values() {
        let keys: Vec<u64> = XorShift64(0xabcdef).take(2000).collect();
        let mut h = Function::from_slice_with_conf(&keys, BuildConf::default());
        assert_eq!(h.entry_bits(), 32);
        let before: Vec<u32> = keys.iter().map(|key| h.get(key)).collect();
        h.compact();
        assert!(h.entry_bits() >= h.d_bits());
        assert!(h.entry_bits() < 32);
        assert!(keys.iter().map(|key| h.get(key)).eq(before.iter().copied()));
        h.compact();
        assert!(keys.iter().map(|key| h.get(key)).eq(before.iter().copied()));
    }

    #[test]
    fn search_exhausted() {
        let keys: Vec<u32> = (0..64).collect();
        let result = Function::try_from_slice_with_conf(
            &keys,
            BuildConf { lambda: 64, alpha: 100, d_limit: Some(1), ..Default::default() },
        );
        assert_eq!(
            result.err(),
            Some(BuildError::SearchExhausted { bucket_size: 64, d_limit: 1 })
        );
    }

    #[test]
    fn stats_summarize_placement() {
        let keys: Vec<u32> = (0..40).collect();
        let mut stats = BuildStatsSummary::default();
        let h = Function::try_from_slice_with_conf_stats(&keys, BuildConf::default(), &mut stats)
            .unwrap();
        assert_eq!(stats.d_max, h.d_max());
        assert!(stats.buckets_placed >= 1 && stats.buckets_placed <= h.buckets());
        assert!(stats.trials >= stats.buckets_placed as u64);
    }

    #[test]
    fn read_write() {
        let keys: Vec<u64> = XorShift64(5).take(300).collect();
        let mut h = Function::from_slice_with_conf(&keys, BuildConf::seed(11));
        h.compact();
        let mut buff = Vec::new();
        h.write(&mut buff).unwrap();
        assert_eq!(buff.len(), h.write_bytes());
        let read = Function::read(&mut &buff[..]).unwrap();
        assert_eq!(read.buckets(), h.buckets());
        assert_eq!(read.range(), h.range());
        assert_eq!(read.d_max(), h.d_max());
        assert_eq!(read.entry_bits(), h.entry_bits());
        assert!(keys.iter().all(|key| read.get(key) == h.get(key)));
    }
}
