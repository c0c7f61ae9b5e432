//! Fixed-point decimal cells backing amount quantities
//!
//! A [`BigDecimal`] pairs an arbitrary precision signed magnitude with a
//! decimal scale, denoting exactly `magnitude / 10^scale`. Cells are shared
//! between amounts through reference-counted handles and copied on write, so
//! bulk-loaded journals can reference one cell from many places.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, Zero};

/// Precision type for tracking decimal places
pub type Precision = u16;

/// Number of extra digits of precision to extend calculations by to avoid
/// losing precision during division and multiplication operations
pub const EXTEND_BY_DIGITS: Precision = 6;

bitflags! {
    /// Lifecycle flags attached to a quantity cell.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct BigintFlags: u16 {
        /// Storage is owned by a binary cache arena, not the heap.
        const BULK_ALLOC = 0x0001;
    }
}

/// Reference-counted handle to a quantity cell.
///
/// The strong count is the cell's refcount; mutation goes through
/// [`Rc::make_mut`], which detaches a private copy when the cell is shared.
pub type QuantityRef = Rc<BigDecimal>;

/// An arbitrary precision signed integer paired with a decimal scale.
///
/// Normalization is deliberately not enforced: trailing zero digits after the
/// point are kept, because the scale carries the precision the user wrote.
/// Two cells denoting the same mathematical value may differ in scale.
#[derive(Debug)]
pub struct BigDecimal {
    mag: BigInt,
    scale: Precision,
    flags: Cell<BigintFlags>,
    index: Cell<u32>,
}

impl BigDecimal {
    /// Create a cell from a magnitude and scale.
    pub fn new(mag: BigInt, scale: Precision) -> Self {
        Self { mag, scale, flags: Cell::new(BigintFlags::empty()), index: Cell::new(0) }
    }

    /// The signed integer magnitude.
    pub fn mag(&self) -> &BigInt {
        &self.mag
    }

    /// Digits after the decimal point.
    pub fn scale(&self) -> Precision {
        self.scale
    }

    /// Whether the magnitude is exactly zero, regardless of scale.
    pub fn is_zero(&self) -> bool {
        self.mag.is_zero()
    }

    /// Whether this cell's storage belongs to a cache arena.
    pub fn is_bulk(&self) -> bool {
        self.flags.get().contains(BigintFlags::BULK_ALLOC)
    }

    /// Serialization identifier: 0 until first written, then the 1-based
    /// index assigned by the writer, used to deduplicate shared cells.
    pub fn index(&self) -> u32 {
        self.index.get()
    }

    pub(crate) fn mark_bulk(&self) {
        self.flags.set(self.flags.get() | BigintFlags::BULK_ALLOC);
    }

    pub(crate) fn set_index(&self, index: u32) {
        self.index.set(index);
    }

    /// Drop per-cell identity after a copy-on-write detach: the cell no
    /// longer lives in an arena and no longer matches anything written.
    pub(crate) fn clear_cell_marks(&self) {
        self.flags.set(BigintFlags::empty());
        self.index.set(0);
    }

    pub(crate) fn mag_mut(&mut self) -> &mut BigInt {
        &mut self.mag
    }

    pub(crate) fn set_scale(&mut self, scale: Precision) {
        self.scale = scale;
    }

    pub(crate) fn negate(&mut self) {
        self.mag = -std::mem::take(&mut self.mag);
    }

    /// Change the scale without rounding: downscaling truncates, upscaling
    /// multiplies. Rounding is a separate, explicit operation.
    pub(crate) fn rescale(&mut self, scale: Precision) {
        debug_assert!(scale < 256);
        if scale == self.scale {
            return;
        }
        if scale < self.scale {
            self.mag = &self.mag / pow10((self.scale - scale) as u32);
        } else {
            self.mag = &self.mag * pow10((scale - self.scale) as u32);
        }
        self.scale = scale;
    }

    /// Round half away from zero down to `scale` fractional digits.
    pub(crate) fn round_to(&mut self, scale: Precision) {
        debug_assert!(self.scale > scale);
        self.mag = round_magnitude(&self.mag, self.scale, scale);
        self.scale = scale;
    }
}

impl Clone for BigDecimal {
    /// Copies carry the magnitude and scale only; bulk status and the
    /// serialization index stay with the original cell.
    fn clone(&self) -> Self {
        Self::new(self.mag.clone(), self.scale)
    }
}

impl fmt::Display for BigDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mag);
        }
        let (quotient, remainder) = self.mag.div_rem(&pow10(self.scale as u32));
        let sign = if self.mag.is_negative() && quotient.is_zero() { "-" } else { "" };
        write!(
            f,
            "{}{}.{:0width$}",
            sign,
            quotient,
            remainder.abs(),
            width = self.scale as usize
        )
    }
}

/// 10 raised to the given power, as a big integer.
pub(crate) fn pow10(exp: u32) -> BigInt {
    BigInt::from(10).pow(exp)
}

/// Round `value`, encoded with `value_scale` fractional digits, to a value
/// with `round_scale` fractional digits (`round_scale < value_scale`).
///
/// Ties round half away from zero for both signs: with `q, r` the truncated
/// quotient and remainder by `10^(value_scale - round_scale)` and `half`
/// that divisor over two, `|r| >= half` moves the value to the next multiple
/// away from zero and anything smaller truncates toward zero.
pub(crate) fn round_magnitude(
    value: &BigInt,
    value_scale: Precision,
    round_scale: Precision,
) -> BigInt {
    debug_assert!(value_scale > round_scale);

    let divisor = pow10((value_scale - round_scale) as u32);
    let (_, remainder) = value.div_rem(&divisor);
    let half: BigInt = (&divisor / 10) * 5;

    let adjusted = if remainder.is_negative() {
        if remainder <= -&half {
            value - (&divisor + &remainder)
        } else {
            value - &remainder
        }
    } else if remainder >= half {
        value + (&divisor - &remainder)
    } else {
        value - &remainder
    };

    adjusted / divisor
}
