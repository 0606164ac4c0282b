//! Buffer size ladders.

/// Bytes per mebibyte; user-supplied sizes are given in MiB.
pub const MIB: usize = 1024 * 1024;

/// Default bandwidth sweep: 1 KiB … 512 MiB, powers of two.
pub const SIZE_LADDER: [usize; 20] = [
    1024,
    2 * 1024,
    4 * 1024,
    8 * 1024,
    16 * 1024,
    32 * 1024,
    64 * 1024,
    128 * 1024,
    256 * 1024,
    512 * 1024,
    MIB,
    2 * MIB,
    4 * MIB,
    8 * MIB,
    16 * MIB,
    32 * MIB,
    64 * MIB,
    128 * MIB,
    256 * MIB,
    512 * MIB,
];

/// Latency sweep: 1 B … 512 KiB, powers of two.
pub const LATENCY_LADDER: [usize; 20] = [
    1,
    2,
    4,
    8,
    16,
    32,
    64,
    128,
    256,
    512,
    1024,
    2 * 1024,
    4 * 1024,
    8 * 1024,
    16 * 1024,
    32 * 1024,
    64 * 1024,
    128 * 1024,
    256 * 1024,
    512 * 1024,
];

/// Single size used by all-pairs sweeps and validation runs (64 MiB).
pub const SWEEP_SIZE: usize = SIZE_LADDER[16];

/// Single size used by an all-pairs latency sweep (8 B).
pub const LATENCY_SWEEP_SIZE: usize = LATENCY_LADDER[3];

/// Convert a MiB count to bytes, saturating on overflow.
#[must_use]
pub const fn mib_to_bytes(mib: usize) -> usize {
    mib.saturating_mul(MIB)
}
