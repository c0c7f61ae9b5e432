//! Formatting utilities for amounts
//!
//! Output mirrors the style recorded on the amount's commodity: symbol
//! placement, separation, quoting, digit grouping and the European
//! separator convention. The rendering is built into its own buffer so a
//! caller's width and fill apply to the whole string.

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, Zero};
use smallvec::SmallVec;

use crate::amount::Amount;
use crate::bigdecimal::{pow10, round_magnitude};
use crate::commodity::{CommodityFlags, CommodityStyle};

/// Render an amount under its commodity's display style.
///
/// The quantity is rounded half away from zero to the commodity's display
/// precision first; a null amount renders as the empty string.
pub fn format_amount(amount: &Amount) -> String {
    let (Some(quantity), Some(commodity)) = (amount.quantity(), amount.commodity()) else {
        return String::new();
    };
    let commodity = commodity.borrow();
    let style = commodity.style();
    let precision = style.precision;
    let european = style.flags.contains(CommodityFlags::STYLE_EUROPEAN);

    // Align the magnitude to the display precision, rounding at most once.
    let scale = quantity.scale();
    let aligned: BigInt = if precision < scale {
        round_magnitude(quantity.mag(), scale, precision)
    } else if precision > scale {
        quantity.mag() * pow10((precision - scale) as u32)
    } else {
        quantity.mag().clone()
    };

    let (quotient, remainder) = if precision > 0 {
        aligned.div_rem(&pow10(precision as u32))
    } else {
        (aligned, BigInt::zero())
    };

    let negative = quotient.is_negative() || remainder.is_negative();
    let quotient = quotient.abs();
    let remainder = remainder.abs();

    let mut out = String::new();

    if !style.flags.contains(CommodityFlags::STYLE_SUFFIXED) && !style.symbol.is_empty() {
        push_symbol(&mut out, style);
        if style.flags.contains(CommodityFlags::STYLE_SEPARATED) {
            out.push(' ');
        }
    }

    if negative {
        out.push('-');
    }

    let integer_digits = quotient.to_string();
    if style.flags.contains(CommodityFlags::STYLE_THOUSANDS) {
        push_grouped(&mut out, &integer_digits, european);
    } else {
        out.push_str(&integer_digits);
    }

    if precision > 0 {
        out.push(if european { ',' } else { '.' });
        let fraction = remainder.to_string();
        for _ in fraction.len()..precision as usize {
            out.push('0');
        }
        out.push_str(&fraction);
    }

    if style.flags.contains(CommodityFlags::STYLE_SUFFIXED) && !style.symbol.is_empty() {
        if style.flags.contains(CommodityFlags::STYLE_SEPARATED) {
            out.push(' ');
        }
        push_symbol(&mut out, style);
    }

    out
}

fn push_symbol(out: &mut String, style: &CommodityStyle) {
    if style.quoted {
        out.push('"');
        out.push_str(&style.symbol);
        out.push('"');
    } else {
        out.push_str(&style.symbol);
    }
}

/// Group integer digits in threes from the right; non-leading groups keep
/// their leading zeros.
fn push_grouped(out: &mut String, digits: &str, european: bool) {
    let separator = if european { '.' } else { ',' };

    let mut groups: SmallVec<[&str; 8]> = SmallVec::new();
    let mut rest = digits;
    while rest.len() > 3 {
        let (head, tail) = rest.split_at(rest.len() - 3);
        groups.push(tail);
        rest = head;
    }
    groups.push(rest);

    for (i, group) in groups.iter().rev().enumerate() {
        if i > 0 {
            out.push(separator);
        }
        out.push_str(group);
    }
}
