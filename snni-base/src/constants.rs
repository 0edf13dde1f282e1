/// Number of parties taking part in one secure inference run.
pub const PARTIES: usize = 3;

/// Default number of fractional bits of the fixed-point encoding.
pub const DEFAULT_FRACTIONAL_BITS: u32 = 13;

/// Buffer size handed to the start-of-run barrier.
pub const DEFAULT_SYNC_BUFFER_SIZE: u64 = 2_000_000;

/// Filters with height or width at least this large go to the
/// communication-optimized 2-D convolution when that variant is enabled.
pub const CONV_OPTI_FILTER_THRESHOLD: usize = 5;

/// Width of one ring element on the wire.
pub const SHARE_BYTES: u64 = 8;

pub const BYTES_PER_MIB: f64 = (1u64 << 20) as f64;
