//! Hardware capacity constants for the DMA engine.
//!
//! Everything the validator checks a client program against lives here so
//! that limits are not scattered as magic numbers through the stages.

// ============================================================================
// Channels
// ============================================================================

/// Number of hardware DMA channels.
pub const MAX_CHANNELS: u32 = 16;

/// Channel 0 is owned by firmware and can never be handed to a client.
pub const RESERVED_CHANNEL: u8 = 0;

/// VDB (line buffer) entries shared by all channels.
pub const MAX_VDB: u32 = 128;

/// ADB (address buffer) entries shared by all channels.
pub const MAX_ADB: u32 = 256;

/// Raw replication factor meaning "no replication".
pub const REP_FACTOR_NONE: u8 = 0;

/// Raw replication factor meaning "replicate to every lane".
pub const REP_FACTOR_FULL: u8 = 7;

/// Number of output-enable trigger lanes.
pub const NUM_TRIGGER_LANES: u32 = 8;

// ============================================================================
// Descriptors
// ============================================================================

/// Hardware descriptor ids run from 1 to this value. Id 0 means "none".
pub const MAX_DESCRIPTORS: u32 = 96;

/// First descriptor id owned by firmware.
pub const RESERVED_DESC_START: u32 = 61;

/// Last descriptor id owned by firmware (inclusive).
pub const RESERVED_DESC_END: u32 = 64;

/// Largest supported `log2_elem_size` (4-byte elements).
pub const MAX_LOG2_ELEM_SIZE: u8 = 2;

/// Width of a descriptor address field in bits.
pub const ADDRESS_BITS: u32 = 40;

/// Largest address a descriptor can encode (exclusive).
pub const ADDRESS_LIMIT: u64 = 1 << ADDRESS_BITS;

// ============================================================================
// Hardware sequencer
// ============================================================================

/// Size of the sequencer RAM in 32-bit words.
pub const MAX_HWSEQ_WORDS: u32 = 256;

/// Column limit for rectangular-region (RRA) programs.
pub const MAX_RRA_COLUMNS: u32 = 8;

/// Frame-repeat limit for RRA programs.
pub const MAX_RRA_FRAME_REPEAT: u32 = 8;

/// Upper bound on the number of tiles one frame-mode program may replay.
pub const MAX_HWSEQ_TILES: u64 = 65536;

// ============================================================================
// Slots
// ============================================================================

/// Maximum number of statically bound slots per program.
pub const MAX_STATIC_SLOTS: u32 = 64;

/// Maximum number of firmware-bound slots per program.
pub const MAX_DYNAMIC_SLOTS: u32 = 64;

/// Every variable-length section of the raw buffer starts on this boundary.
pub const SECTION_ALIGN: u64 = 8;

/// Returns true if `id` (1-based hardware descriptor id) belongs to firmware.
#[inline]
pub fn is_reserved_descriptor(id: u32) -> bool {
    (RESERVED_DESC_START..=RESERVED_DESC_END).contains(&id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_range() {
        assert!(!is_reserved_descriptor(60));
        assert!(is_reserved_descriptor(61));
        assert!(is_reserved_descriptor(64));
        assert!(!is_reserved_descriptor(65));
        assert!(RESERVED_DESC_END <= MAX_DESCRIPTORS);
    }

    #[test]
    fn test_descriptor_set_fits_u128() {
        // DescriptorSet stores one bit per descriptor index.
        assert!(MAX_DESCRIPTORS <= 128);
    }
}
