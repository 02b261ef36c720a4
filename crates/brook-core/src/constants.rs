//! Policy constants. All amounts in minor units, all sizes in virtual bytes.

/// Default number of unused addresses kept derived ahead of activity.
pub const DEFAULT_GAP_LIMIT: u32 = 20;

/// Largest accepted gap limit.
pub const MAX_GAP_LIMIT: u32 = 1_000;

/// Default minimum relay fee rate, in minor units per 1000 virtual bytes.
pub const DEFAULT_MIN_FEE_RATE: u64 = 1_000;

/// Default dust threshold: outputs below this are not relayed.
pub const DEFAULT_DUST_THRESHOLD: u64 = 546;

/// Confirmations before a coinbase output may be spent.
pub const COINBASE_MATURITY: u64 = 100;

/// Default depth of block hashes tracked for reorg detection.
pub const DEFAULT_MAX_REORG_DEPTH: u64 = 100;

/// Fixed transaction overhead: version, lock time, counts, marker.
pub const TX_OVERHEAD_VSIZE: u64 = 11;

/// Allowance per explicit output on the plain ledger.
pub const OUTPUT_VSIZE: u64 = 34;

/// Allowance per explicit output on the asset-extended ledger
/// (asset tag, explicit value, empty nonce).
pub const EXPLICIT_ELEMENTS_OUTPUT_VSIZE: u64 = 76;

/// Allowance per blinded output on the asset-extended ledger: commitments,
/// nonce, range proof and surjection proof.
pub const BLINDED_OUTPUT_VSIZE: u64 = 1_180;

/// Allowance for the explicit fee output (empty script).
pub const FEE_OUTPUT_VSIZE: u64 = 43;

/// Sequence number for final inputs.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// Sequence number signalling replaceability and enabling lock time.
pub const SEQUENCE_RBF: u32 = 0xffff_fffd;
