/// Width of a simulated physical address
pub const ADDRESS_BITS: u32 = u64::BITS;

/// Bit layout of one cache: how an address splits into line offset, set index and tag
///
/// The masks for the full (non-partitioned) cache are computed once. Enclave accesses to a
/// set-partitioned cache see fewer set bits, since a partition only spans part of the sets, so
/// those masks are derived on demand from the partition's current width
///
/// All counts are assumed to be powers of two, which configuration validation guarantees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub sets: usize,
    pub ways: usize,
    pub line_size: u64,
    pub offset_bits: u32,
    pub set_bits: u32,
    set_mask: u64,
    tag_mask: u64,
}

impl Geometry {
    pub fn new(sets: usize, ways: usize, line_size: u64) -> Self {
        let offset_bits = line_size.trailing_zeros();
        let set_bits = sets.trailing_zeros();
        Self {
            sets,
            ways,
            line_size,
            offset_bits,
            set_bits,
            set_mask: set_mask(set_bits, offset_bits),
            tag_mask: tag_mask(set_bits + offset_bits),
        }
    }

    /// Splits an address into (set, tag) for the whole cache
    ///
    /// The tag is not re-aligned, it keeps the address bits in place
    ///
    /// # Examples
    ///
    /// ```
    /// use enclavelib::address::Geometry;
    /// let geometry = Geometry::new(4, 4, 16);
    /// assert_eq!(geometry.decode(0x1234), (3, 0x1200));
    /// ```
    pub fn decode(&self, address: u64) -> (usize, u64) {
        (((address & self.set_mask) >> self.offset_bits) as usize, address & self.tag_mask)
    }

    /// The tag of an address when the set index is `set_bits` wide
    pub fn tag(&self, address: u64, set_bits: u32) -> u64 {
        address & tag_mask(set_bits + self.offset_bits)
    }

    /// Splits an address for a tenant confined to a partition of `2^set_bits` sets starting at
    /// `base`. The returned set index is absolute
    pub fn decode_partitioned(&self, address: u64, set_bits: u32, base: usize) -> (usize, u64) {
        let local = (address & set_mask(set_bits, self.offset_bits)) >> self.offset_bits;
        (base + local as usize, self.tag(address, set_bits))
    }

    /// Number of sets covered by `num_cachelets` cachelets when each one is a `max_partition`th of
    /// the cache
    pub fn cachelet_sets(&self, max_partition: usize, num_cachelets: usize) -> usize {
        (self.sets / max_partition * num_cachelets).min(self.sets)
    }

    /// Splits an address for a tenant holding `num_cachelets` dynamically sized cachelets. The
    /// set range always starts at set 0 and widens as the tenant is granted more cachelets
    pub fn decode_cachelets(&self, address: u64, max_partition: usize, num_cachelets: usize) -> (usize, u64) {
        let set_bits = self.cachelet_sets(max_partition, num_cachelets).trailing_zeros();
        self.decode_partitioned(address, set_bits, 0)
    }

    /// Rebuilds the line address from a stored tag and the set index it was decoded to, relative
    /// to the start of its partition
    pub fn address_of(&self, tag: u64, local_set: usize) -> u64 {
        tag | ((local_set as u64) << self.offset_bits)
    }
}

fn set_mask(set_bits: u32, offset_bits: u32) -> u64 {
    ((1u64 << set_bits) - 1) << offset_bits
}

fn tag_mask(low_bits: u32) -> u64 {
    if low_bits >= ADDRESS_BITS {
        0
    } else {
        u64::MAX << low_bits
    }
}
