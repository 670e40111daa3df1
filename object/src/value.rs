/// Tag constants.
const FIXNUM_MASK: u64 = 0b1;
const TAG_MASK: u64 = 0b11;
const REF_TAG: u64 = 0b01;

const INDEX_SHIFT: u32 = 2;
const INDEX_BITS: u32 = 32;
const EPOCH_SHIFT: u32 = INDEX_SHIFT + INDEX_BITS;
const EPOCH_MASK: u64 = 0xFFFF;

/// Smallest integer that fits inline.
pub const FIXNUM_MIN: i64 = -(1i64 << 62);
/// Largest integer that fits inline.
pub const FIXNUM_MAX: i64 = (1i64 << 62) - 1;

/// A tagged 64-bit value.
///
/// Encoding:
/// - **Fixnum**:    `...XXXXX0`: 63-bit signed integer (low bit 0).
/// - **Reference**: `...XXXX01`: heap reference. Bits `2..34` hold the arena
///   index of the object, bits `34..50` the collection epoch the reference was
///   produced in. A moving collection rewrites every reachable reference, so a
///   reference whose epoch differs from the heap's current epoch is stale.
///
/// A fixnum has no fields: code that reads through a value must check
/// [`Value::is_ref`] first, the heap refuses to resolve anything else.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    // ── Fixnum ─────────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_fixnum(self) -> bool {
        self.0 & FIXNUM_MASK == 0
    }

    #[inline(always)]
    pub const fn fits_fixnum(n: i64) -> bool {
        n >= FIXNUM_MIN && n <= FIXNUM_MAX
    }

    /// Tag `n`, which must lie in `FIXNUM_MIN..=FIXNUM_MAX`.
    ///
    /// The range is checked in debug builds only; a release build wraps the
    /// value. Integers that come from the running program must
    /// go through [`try_from_i64`](Self::try_from_i64) or `VM::new_integer`,
    /// which boxes them when they do not fit.
    #[inline(always)]
    pub fn from_i64(n: i64) -> Self {
        debug_assert!(Self::fits_fixnum(n), "fixnum overflow: {n}");
        Self((n << 1) as u64)
    }

    /// Tag `n` inline, or `None` when it needs a boxed representation.
    #[inline(always)]
    pub fn try_from_i64(n: i64) -> Option<Self> {
        Self::fits_fixnum(n).then(|| Self((n << 1) as u64))
    }

    /// Extract the integer of a fixnum.
    ///
    /// The value must be a fixnum; this is checked in debug builds only.
    #[inline(always)]
    pub fn to_i64(self) -> i64 {
        debug_assert!(self.is_fixnum());
        (self.0 as i64) >> 1
    }

    #[inline(always)]
    pub fn as_fixnum(self) -> Option<i64> {
        self.is_fixnum().then(|| self.to_i64())
    }

    // ── Reference ──────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_ref(self) -> bool {
        self.0 & TAG_MASK == REF_TAG
    }

    #[inline(always)]
    pub const fn from_index(index: u32, epoch: u16) -> Self {
        Self(((epoch as u64) << EPOCH_SHIFT) | ((index as u64) << INDEX_SHIFT) | REF_TAG)
    }

    /// Arena index of a reference.
    #[inline(always)]
    pub const fn index(self) -> usize {
        debug_assert!(self.is_ref());
        ((self.0 >> INDEX_SHIFT) & u32::MAX as u64) as usize
    }

    /// Collection epoch a reference was produced in.
    #[inline(always)]
    pub const fn epoch(self) -> u16 {
        ((self.0 >> EPOCH_SHIFT) & EPOCH_MASK) as u16
    }

    /// Identity comparison. Both values must come from the same epoch.
    #[inline(always)]
    pub fn is(self, other: Value) -> bool {
        self.0 == other.0
    }
}

impl core::fmt::Debug for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_fixnum() {
            write!(f, "Fixnum({})", self.to_i64())
        } else if self.is_ref() {
            write!(f, "Ref({}@{})", self.index(), self.epoch())
        } else {
            write!(f, "Invalid(0x{:016x})", self.0)
        }
    }
}
