//! Binary cache persistence for amount quantities
//!
//! The cache protocol is a length-prefixed, deduplicated stream of quantity
//! cells. Each record starts with a tag byte: `0` for an absent quantity,
//! `1` for an inline cell (magnitude exported big-endian in 16-bit limbs,
//! then sign and scale), and `2` for a reference to a cell already written,
//! so quantities shared in memory stay shared on disk and after reload.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::rc::{Rc, Weak};

use log::trace;
use num_bigint::{BigInt, Sign};
use num_traits::{Signed, Zero};
use thiserror::Error;

use crate::amount::Amount;
use crate::bigdecimal::{BigDecimal, Precision, QuantityRef};
use crate::commodity::CommodityRef;

/// Errors produced while reading or writing the binary cache format.
#[derive(Error, Debug)]
pub enum BinaryError {
    /// A record began with a byte other than the three known tags.
    #[error("invalid quantity tag byte {0:#04x}")]
    InvalidTag(u8),
    /// A reference record named a cell the arena does not hold.
    #[error("quantity reference index {0} out of range")]
    IndexOutOfRange(u32),
    /// A magnitude too wide for the 16-bit length prefix.
    #[error("quantity magnitude too large to serialize ({0} bytes)")]
    MagnitudeTooLarge(usize),
    /// An underlying stream failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

const TAG_ABSENT: u8 = 0;
const TAG_INLINE: u8 = 1;
const TAG_REFERENCE: u8 = 2;

/// Writer state for one serialization pass.
///
/// The writer owns the index counter: the first time a cell is written it is
/// stamped with the next 1-based index and emitted inline; any later write of
/// the same cell emits a 5-byte reference record instead.
#[derive(Debug, Default)]
pub struct QuantityWriter {
    next_index: u32,
    count: u32,
}

impl QuantityWriter {
    /// Create a writer with no cells written yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct cells written inline so far.
    pub fn written(&self) -> u32 {
        self.count
    }

    /// Write one amount's quantity record to `out`.
    pub fn write_quantity<W: Write>(
        &mut self,
        amount: &Amount,
        out: &mut W,
    ) -> Result<(), BinaryError> {
        let Some(quantity) = amount.quantity() else {
            out.write_all(&[TAG_ABSENT])?;
            return Ok(());
        };

        if quantity.index() == 0 {
            self.next_index += 1;
            self.count += 1;
            quantity.set_index(self.next_index);

            out.write_all(&[TAG_INLINE])?;

            let bytes = export_magnitude(quantity.mag());
            if bytes.len() > u16::MAX as usize {
                return Err(BinaryError::MagnitudeTooLarge(bytes.len()));
            }
            let len = bytes.len() as u16;
            out.write_all(&len.to_le_bytes())?;

            if len > 0 {
                out.write_all(&bytes)?;
                let sign = u8::from(quantity.mag().is_negative());
                out.write_all(&[sign])?;
                out.write_all(&quantity.scale().to_le_bytes())?;
            }
            trace!("wrote quantity cell {}", quantity.index());
        } else {
            out.write_all(&[TAG_REFERENCE])?;
            out.write_all(&quantity.index().to_le_bytes())?;
        }
        Ok(())
    }
}

/// Export a magnitude as unsigned big-endian bytes padded to 16-bit limbs.
fn export_magnitude(mag: &BigInt) -> Vec<u8> {
    if mag.is_zero() {
        return Vec::new();
    }
    let (_, mut bytes) = mag.to_bytes_be();
    if bytes.len() % 2 == 1 {
        bytes.insert(0, 0);
    }
    bytes
}

/// Arena of bulk-allocated quantity cells read from a binary cache.
///
/// The arena bump-allocates a cell per inline record and resolves reference
/// records back to them by index. It holds only weak handles: a cell's value
/// is dropped when the last amount referencing it goes away, while the
/// allocation itself lives until the arena does — destruction decoupled from
/// storage release, as for cells inside a mapped cache region.
#[derive(Debug, Default)]
pub struct BigintArena {
    cells: Vec<Weak<BigDecimal>>,
    owned: HashSet<*const BigDecimal>,
}

impl BigintArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cells allocated from this arena.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether no cells have been allocated yet.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether `cell` was allocated from this arena.
    pub fn owns(&self, cell: &QuantityRef) -> bool {
        self.owned.contains(&Rc::as_ptr(cell))
    }

    /// Read one quantity record from `input`, producing an amount in the
    /// given commodity (or the null amount for an absent-quantity record).
    ///
    /// Inline records allocate a fresh bulk cell; reference records resolve
    /// to the previously read cell, sharing it.
    pub fn read_quantity<R: Read>(
        &mut self,
        input: &mut R,
        commodity: &CommodityRef,
    ) -> Result<Amount, BinaryError> {
        let mut tag = [0u8; 1];
        input.read_exact(&mut tag)?;

        match tag[0] {
            TAG_ABSENT => Ok(Amount::null()),
            TAG_INLINE => {
                let mut len_buf = [0u8; 2];
                input.read_exact(&mut len_buf)?;
                let len = u16::from_le_bytes(len_buf) as usize;

                let (mag, scale) = if len > 0 {
                    let mut bytes = vec![0u8; len];
                    input.read_exact(&mut bytes)?;
                    let mut sign = [0u8; 1];
                    input.read_exact(&mut sign)?;
                    let mut scale_buf = [0u8; 2];
                    input.read_exact(&mut scale_buf)?;

                    let mut mag = BigInt::from_bytes_be(Sign::Plus, &bytes);
                    if sign[0] != 0 {
                        mag = -mag;
                    }
                    (mag, u16::from_le_bytes(scale_buf) as Precision)
                } else {
                    (BigInt::zero(), 0)
                };

                let cell = BigDecimal::new(mag, scale);
                cell.mark_bulk();
                let handle = Rc::new(cell);
                self.cells.push(Rc::downgrade(&handle));
                self.owned.insert(Rc::as_ptr(&handle));
                Ok(Amount::from_parts(handle, commodity.clone()))
            }
            TAG_REFERENCE => {
                let mut index_buf = [0u8; 4];
                input.read_exact(&mut index_buf)?;
                let index = u32::from_le_bytes(index_buf);

                let handle = index
                    .checked_sub(1)
                    .and_then(|i| self.cells.get(i as usize))
                    .and_then(Weak::upgrade)
                    .ok_or(BinaryError::IndexOutOfRange(index))?;
                Ok(Amount::from_parts(handle, commodity.clone()))
            }
            tag => Err(BinaryError::InvalidTag(tag)),
        }
    }
}
