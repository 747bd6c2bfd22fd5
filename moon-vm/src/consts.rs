//! VM parameters and layout constants.

use moon_asm::{BIAS_SBX, BIAS_SC, BIAS_SJ};

/// Default number of value-stack slots per thread.
pub const DEFAULT_STACK_SIZE: usize = 4096;

/// Default maximum call nesting depth.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 128;

/// Default `__index`/`__newindex` chain limit.
pub const DEFAULT_META_CHAIN_DEPTH: usize = 100;

/// Default allocation count that triggers a collection cycle.
pub const DEFAULT_GC_THRESHOLD: usize = 2048;

/// Default post-cycle growth of the collection threshold, in percent of the
/// surviving object count.
pub const DEFAULT_GC_GROWTH_PERCENT: usize = 200;

/// Maximum nesting of prototypes accepted by the bytecode loader.
pub const MAX_PROTO_DEPTH: usize = 64;

/// Highest register index a TBC bitmap can mark.
pub const MAX_TBC_REGISTER: usize = 255;

// The codec biases are exactly half the field ranges.
static_assertions::const_assert_eq!(BIAS_SBX, 1 << 16);
static_assertions::const_assert_eq!(BIAS_SJ, 1 << 24);
static_assertions::const_assert_eq!(BIAS_SC, 1 << 7);

// A frame's register window always fits a default-sized stack.
static_assertions::const_assert!(DEFAULT_STACK_SIZE > u8::MAX as usize * 2);
