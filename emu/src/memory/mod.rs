pub mod internal_memory;

/// Strip the mirror index out of `address` and fold it back in modulo the
/// region size, yielding the canonical backing-store offset.
pub const fn mirrored_offset(address: u32, region_size: u32) -> usize {
    debug_assert!(region_size.is_power_of_two());

    (address & (region_size - 1)) as usize
}
