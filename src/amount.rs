//! Amount module providing arbitrary precision arithmetic with commodity support
//!
//! This module implements the Amount type: an optional shared quantity cell
//! paired with an interned commodity. All arithmetic is exact fixed-point
//! decimal arithmetic on the underlying magnitude; lossy steps (rounding,
//! display) happen only where explicitly requested.

use std::cmp::Ordering;
use std::fmt;
use std::iter::Peekable;
use std::rc::Rc;
use std::str::Chars;

use chrono::NaiveDateTime;
use num_bigint::{BigInt, Sign};
use num_traits::Signed;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::bigdecimal::{pow10, BigDecimal, Precision, QuantityRef, EXTEND_BY_DIGITS};
use crate::binary::BigintArena;
use crate::commodity::{Commodity, CommodityFlags, CommodityPool, CommodityRef};
use crate::formatting::format_amount;

/// Errors that can occur during amount operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    /// The input text is not a well-formed amount.
    #[error("Cannot parse amount from string: {0}")]
    ParseError(String),
    /// Adding or subtracting amounts whose commodities are not the same
    /// interned instance.
    #[error("Cannot perform operation on amounts with different commodities")]
    CommodityMismatch,
    /// The divisor has no quantity, or a zero magnitude.
    #[error("Division by zero")]
    DivisionByZero,
    /// The quantity/commodity pairing invariant is broken; reported by the
    /// [`Amount::validate`] audit.
    #[error("Invalid amount state: {0}")]
    InvalidState(&'static str),
}

/// Result type for amount operations
pub type AmountResult<T> = Result<T, AmountError>;

/// An amount is an exact decimal quantity in a currency-like unit.
///
/// Both fields are present for a real amount and both absent for the
/// "uninitialized" amount, which every operation treats as the additive
/// identity. Quantity cells are shared between clones and detached on write.
#[derive(Clone)]
pub struct Amount {
    quantity: Option<QuantityRef>,
    commodity: Option<CommodityRef>,
}

impl Amount {
    /// Create a null amount (uninitialized)
    pub fn null() -> Self {
        Self { quantity: None, commodity: None }
    }

    pub(crate) fn from_parts(quantity: QuantityRef, commodity: CommodityRef) -> Self {
        Self { quantity: Some(quantity), commodity: Some(commodity) }
    }

    /// Create a dimensionless amount from an integer.
    ///
    /// Zero yields the null amount.
    pub fn from_i64(value: i64, pool: &CommodityPool) -> Self {
        if value == 0 {
            return Self::null();
        }
        Self::from_parts(
            Rc::new(BigDecimal::new(BigInt::from(value), 0)),
            pool.null_commodity().clone(),
        )
    }

    /// Create a boolean amount.
    ///
    /// `true` shares the pool's pinned unit cell; `false` is the null amount.
    pub fn from_bool(value: bool, pool: &CommodityPool) -> Self {
        if value {
            Self::from_parts(pool.true_value().clone(), pool.null_commodity().clone())
        } else {
            Self::null()
        }
    }

    /// Create a dimensionless amount from a `Decimal`, carrying its scale.
    ///
    /// This is the only constructor accepting machine floating-point-adjacent
    /// values: a `Decimal` states its scale explicitly, where an `f64` would
    /// leave it undetermined.
    pub fn from_decimal(value: Decimal, pool: &CommodityPool) -> Self {
        Self::from_parts(
            Rc::new(BigDecimal::new(BigInt::from(value.mantissa()), value.scale() as Precision)),
            pool.null_commodity().clone(),
        )
    }

    /// Check if this amount is null (uninitialized)
    pub fn is_null(&self) -> bool {
        self.quantity.is_none()
    }

    /// Check if this amount is exactly zero; null amounts are zero.
    pub fn is_realzero(&self) -> bool {
        match &self.quantity {
            None => true,
            Some(q) => q.is_zero(),
        }
    }

    /// Check if this amount is zero once truncated to the commodity's
    /// display precision.
    pub fn is_zero(&self) -> bool {
        let Some(q) = &self.quantity else { return true };
        let precision = self.display_precision();
        if q.scale() <= precision {
            q.is_zero()
        } else {
            use num_traits::Zero;
            (q.mag() / pow10((q.scale() - precision) as u32)).is_zero()
        }
    }

    /// Check if this amount is non-zero at display precision.
    pub fn is_nonzero(&self) -> bool {
        !self.is_zero()
    }

    /// Get the sign of this amount: -1, 0, or 1.
    pub fn sign(&self) -> i32 {
        match &self.quantity {
            None => 0,
            Some(q) => match q.mag().sign() {
                Sign::Plus => 1,
                Sign::NoSign => 0,
                Sign::Minus => -1,
            },
        }
    }

    /// Get the absolute value of this amount
    pub fn abs(&self) -> Self {
        match &self.quantity {
            Some(q) if q.mag().is_negative() => self.negated(),
            _ => self.clone(),
        }
    }

    /// Negate this amount in place
    pub fn in_place_negate(&mut self) {
        if let Some(q) = self.quantity.as_mut() {
            make_cell_mut(q).negate();
        }
    }

    /// Get the negated value of this amount
    pub fn negated(&self) -> Self {
        let mut result = self.clone();
        result.in_place_negate();
        result
    }

    /// The scale of the underlying quantity cell, 0 when null.
    pub fn scale(&self) -> Precision {
        self.quantity.as_ref().map(|q| q.scale()).unwrap_or(0)
    }

    /// The display precision of this amount's commodity.
    pub fn display_precision(&self) -> Precision {
        self.commodity.as_ref().map(|c| c.borrow().precision()).unwrap_or(0)
    }

    /// The shared quantity cell, if any.
    pub fn quantity(&self) -> Option<&QuantityRef> {
        self.quantity.as_ref()
    }

    /// Get the commodity reference
    pub fn commodity(&self) -> Option<&CommodityRef> {
        self.commodity.as_ref()
    }

    /// Check if this amount has a commodity
    pub fn has_commodity(&self) -> bool {
        self.commodity.is_some()
    }

    /// Set the commodity for this amount, seeding a zero quantity if absent
    /// so the quantity/commodity pairing stays intact.
    pub fn set_commodity(&mut self, commodity: CommodityRef) {
        if self.quantity.is_none() {
            self.quantity = Some(Rc::new(BigDecimal::new(BigInt::from(0), 0)));
        }
        self.commodity = Some(commodity);
    }

    /// Audit the quantity/commodity pairing without mutating anything.
    pub fn validate(&self) -> AmountResult<()> {
        match (&self.quantity, &self.commodity) {
            (Some(_), None) => Err(AmountError::InvalidState("quantity without commodity")),
            (None, Some(_)) => Err(AmountError::InvalidState("commodity without quantity")),
            _ => Ok(()),
        }
    }

    /// Check if this amount is valid
    pub fn valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Add another amount to this amount (in-place)
    ///
    /// Commodities must be the same interned instance; an absent operand acts
    /// as the additive identity. The result's scale is the larger of the two.
    pub fn add_amount(&mut self, other: &Amount) -> AmountResult<()> {
        let Some(rhs) = &other.quantity else { return Ok(()) };
        if self.quantity.is_none() {
            *self = other.clone();
            return Ok(());
        }
        if !commodity_identity_eq(self.commodity.as_ref(), other.commodity.as_ref()) {
            return Err(AmountError::CommodityMismatch);
        }

        let Some(lhs) = self.quantity.as_mut() else { return Ok(()) };
        let cell = make_cell_mut(lhs);
        if cell.scale() < rhs.scale() {
            cell.rescale(rhs.scale());
        }
        if cell.scale() == rhs.scale() {
            *cell.mag_mut() += rhs.mag();
        } else {
            let mut temp = BigDecimal::clone(rhs);
            temp.rescale(cell.scale());
            *cell.mag_mut() += temp.mag();
        }
        Ok(())
    }

    /// Subtract another amount from this amount (in-place)
    pub fn sub_amount(&mut self, other: &Amount) -> AmountResult<()> {
        let Some(rhs) = &other.quantity else { return Ok(()) };
        if self.quantity.is_none() {
            *self = other.negated();
            return Ok(());
        }
        if !commodity_identity_eq(self.commodity.as_ref(), other.commodity.as_ref()) {
            return Err(AmountError::CommodityMismatch);
        }

        let Some(lhs) = self.quantity.as_mut() else { return Ok(()) };
        let cell = make_cell_mut(lhs);
        if cell.scale() < rhs.scale() {
            cell.rescale(rhs.scale());
        }
        if cell.scale() == rhs.scale() {
            *cell.mag_mut() -= rhs.mag();
        } else {
            let mut temp = BigDecimal::clone(rhs);
            temp.rescale(cell.scale());
            *cell.mag_mut() -= temp.mag();
        }
        Ok(())
    }

    /// Multiply this amount by another amount (in-place)
    ///
    /// The result keeps this amount's commodity; scales add, and anything
    /// past the commodity's precision plus the internal headroom is rounded
    /// off. An absent operand leaves this amount unchanged.
    pub fn mul_amount(&mut self, other: &Amount) {
        let precision = self.display_precision();
        let Some(rhs) = &other.quantity else { return };
        let Some(lhs) = self.quantity.as_mut() else { return };

        let cell = make_cell_mut(lhs);
        *cell.mag_mut() *= rhs.mag();
        cell.set_scale(cell.scale() + rhs.scale());
        if cell.scale() > precision + EXTEND_BY_DIGITS {
            cell.round_to(precision + EXTEND_BY_DIGITS);
        }
    }

    /// Divide this amount by another amount (in-place)
    ///
    /// The quotient keeps this amount's commodity and gains the internal
    /// headroom digits to capture the fractional part. Fails when the
    /// divisor's quantity is absent or zero; a null dividend stays null.
    pub fn div_amount(&mut self, other: &Amount) -> AmountResult<()> {
        if self.quantity.is_none() {
            return Ok(());
        }
        let Some(rhs) = &other.quantity else { return Err(AmountError::DivisionByZero) };
        if rhs.is_zero() {
            return Err(AmountError::DivisionByZero);
        }

        let precision = self.display_precision();
        let Some(lhs) = self.quantity.as_mut() else { return Ok(()) };
        let cell = make_cell_mut(lhs);
        *cell.mag_mut() *= pow10((rhs.scale() + EXTEND_BY_DIGITS) as u32);
        *cell.mag_mut() /= rhs.mag();
        cell.set_scale(cell.scale() + EXTEND_BY_DIGITS);
        if cell.scale() > precision + EXTEND_BY_DIGITS {
            cell.round_to(precision + EXTEND_BY_DIGITS);
        }
        Ok(())
    }

    /// Round half away from zero to the given number of fractional digits.
    ///
    /// Amounts already at or below the requested scale are returned
    /// unchanged, still sharing their quantity cell.
    pub fn round(&self, precision: Precision) -> Amount {
        match &self.quantity {
            Some(q) if q.scale() > precision => {
                let mut result = self.clone();
                if let Some(q) = result.quantity.as_mut() {
                    make_cell_mut(q).round_to(precision);
                }
                result
            }
            _ => self.clone(),
        }
    }

    /// Convert this amount via its commodity's price history.
    ///
    /// `None` asks for the latest known price. Amounts with no quantity, a
    /// no-market commodity, or no usable price are returned unchanged;
    /// otherwise the result is `price * self` rounded to this commodity's
    /// display precision.
    pub fn value(&self, moment: Option<NaiveDateTime>) -> Amount {
        let Some(commodity) = &self.commodity else { return self.clone() };
        if self.quantity.is_none() || commodity.borrow().has_flags(CommodityFlags::NOMARKET) {
            return self.clone();
        }

        let price = Commodity::value(commodity, moment);
        if price.is_zero() {
            return self.clone();
        }

        let precision = commodity.borrow().precision();
        let mut converted = price;
        converted.mul_amount(self);
        converted.round(precision)
    }

    pub(crate) fn evacuate(&mut self, arena: &BigintArena) -> bool {
        match &self.quantity {
            Some(q) if q.is_bulk() && arena.owns(q) => {
                self.quantity = Some(Rc::new(BigDecimal::clone(q)));
                true
            }
            _ => false,
        }
    }

    /// Parse an amount from a string, interning its commodity in `pool`.
    ///
    /// The accepted syntax is `[-]NUM[ ]SYM` or `SYM[ ][-]NUM`, where the
    /// symbol may be double-quoted. The style flags observed (suffix
    /// placement, separation, thousands grouping, European separators) are
    /// merged into the commodity, and its display precision is raised to
    /// cover the fractional digits seen.
    pub fn parse(pool: &mut CommodityPool, input: &str) -> AmountResult<Amount> {
        let mut chars = input.chars().peekable();
        let mut flags = CommodityFlags::STYLE_DEFAULTS;
        let mut quoted = false;
        let symbol;
        let quant;

        match peek_next_nonws(&mut chars) {
            None => {
                return Err(AmountError::ParseError(format!("no amount in input {:?}", input)))
            }
            Some(c) if c.is_ascii_digit() || c == '.' || c == '-' => {
                quant = parse_quantity_token(&mut chars);
                match chars.peek() {
                    Some(&next) if next != '\n' => {
                        if next.is_whitespace() {
                            flags |= CommodityFlags::STYLE_SEPARATED;
                        }
                        let (sym, quo) = parse_commodity_token(&mut chars)?;
                        symbol = sym;
                        quoted = quo;
                        flags |= CommodityFlags::STYLE_SUFFIXED;
                    }
                    _ => symbol = String::new(),
                }
            }
            Some(_) => {
                let (sym, quo) = parse_commodity_token(&mut chars)?;
                symbol = sym;
                quoted = quo;
                if chars.peek().is_some_and(|c| c.is_whitespace()) {
                    flags |= CommodityFlags::STYLE_SEPARATED;
                }
                quant = parse_quantity_token(&mut chars);
            }
        }

        if quant.is_empty() {
            return Err(AmountError::ParseError(format!("no quantity in amount {:?}", input)));
        }

        // Classify the separators: the rightmost comma or period decides the
        // decimal point, and both present means thousands grouping. A token
        // with a single comma reads as European, so "1,234" is 1.234.
        let last_comma = quant.rfind(',');
        let last_period = quant.rfind('.');
        let fraction_len = |pos: usize| quant.len() - pos - 1;
        let scale = match (last_comma, last_period) {
            (Some(comma), Some(period)) => {
                flags |= CommodityFlags::STYLE_THOUSANDS;
                if comma > period {
                    flags |= CommodityFlags::STYLE_EUROPEAN;
                    fraction_len(comma)
                } else {
                    fraction_len(period)
                }
            }
            (Some(comma), None) => {
                flags |= CommodityFlags::STYLE_EUROPEAN;
                fraction_len(comma)
            }
            (None, Some(period)) => fraction_len(period),
            (None, None) => 0,
        };
        if scale > 255 {
            return Err(AmountError::ParseError(format!(
                "quantity {:?} has more than 255 fractional digits",
                quant
            )));
        }
        let scale = scale as Precision;

        let digits: String = quant.chars().filter(|&c| c != ',' && c != '.').collect();
        let mag = digits
            .parse::<BigInt>()
            .map_err(|_| AmountError::ParseError(format!("malformed quantity {:?}", quant)))?;

        let commodity = pool.find_or_create(&symbol);
        {
            let mut commodity = commodity.borrow_mut();
            commodity.add_flags(flags);
            if quoted {
                commodity.set_quoted(true);
            }
            if scale > commodity.precision() {
                commodity.set_precision(scale);
            }
        }

        Ok(Amount::from_parts(Rc::new(BigDecimal::new(mag, scale)), commodity))
    }
}

/// Detach a privately owned quantity cell before mutating it.
///
/// Shared cells are cloned; a cell pulled out of an arena loses its bulk
/// mark and serialization index either way, since the mutated value is a new
/// heap cell as far as caches are concerned.
fn make_cell_mut(quantity: &mut QuantityRef) -> &mut BigDecimal {
    let cell = Rc::make_mut(quantity);
    cell.clear_cell_marks();
    cell
}

/// Strict commodity identity: same interned instance, or both absent.
fn commodity_identity_eq(a: Option<&CommodityRef>, b: Option<&CommodityRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

fn peek_next_nonws(chars: &mut Peekable<Chars<'_>>) -> Option<char> {
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else {
            return Some(c);
        }
    }
    None
}

fn parse_quantity_token(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut token = String::new();
    if peek_next_nonws(chars).is_none() {
        return token;
    }
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() || c == '-' || c == '.' || c == ',' {
            token.push(c);
            chars.next();
        } else {
            break;
        }
    }
    token
}

fn parse_commodity_token(chars: &mut Peekable<Chars<'_>>) -> AmountResult<(String, bool)> {
    let mut symbol = String::new();
    let Some(c) = peek_next_nonws(chars) else { return Ok((symbol, false)) };

    if c == '"' {
        chars.next();
        loop {
            match chars.next() {
                Some('"') => return Ok((symbol, true)),
                Some(c) => symbol.push(c),
                None => {
                    return Err(AmountError::ParseError(
                        "quoted commodity symbol lacks closing quote".to_string(),
                    ))
                }
            }
        }
    }

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || c.is_ascii_digit() || c == '-' || c == '.' {
            break;
        }
        symbol.push(c);
        chars.next();
    }
    Ok((symbol, false))
}

fn cmp_cells(a: &BigDecimal, b: &BigDecimal) -> Ordering {
    match a.scale().cmp(&b.scale()) {
        Ordering::Equal => a.mag().cmp(b.mag()),
        Ordering::Less => (a.mag() * pow10((b.scale() - a.scale()) as u32)).cmp(b.mag()),
        Ordering::Greater => a.mag().cmp(&(b.mag() * pow10((a.scale() - b.scale()) as u32))),
    }
}

fn cmp_cell_to_zero(cell: &BigDecimal) -> Ordering {
    match cell.mag().sign() {
        Sign::Plus => Ordering::Greater,
        Sign::NoSign => Ordering::Equal,
        Sign::Minus => Ordering::Less,
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialOrd for Amount {
    /// Absent quantities compare as the additive identity. Amounts in
    /// different real commodities are incomparable: every ordering and
    /// equality predicate on them is false.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (&self.commodity, &other.commodity) {
            if !Rc::ptr_eq(a, b)
                && !a.borrow().is_null_commodity()
                && !b.borrow().is_null_commodity()
            {
                return None;
            }
        }

        match (&self.quantity, &other.quantity) {
            (None, None) => Some(Ordering::Equal),
            (None, Some(b)) => Some(cmp_cell_to_zero(b).reverse()),
            (Some(a), None) => Some(cmp_cell_to_zero(a)),
            (Some(a), Some(b)) => Some(cmp_cells(a, b)),
        }
    }
}

impl PartialEq for Amount {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

// Note: Amount is neither Eq nor Ord, because comparison is undefined for
// amounts in different real commodities.

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&format_amount(self))
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "AMOUNT(<null>)")
        } else {
            write!(f, "AMOUNT({})", self)?;
            if f.alternate() {
                if let Some(q) = &self.quantity {
                    write!(f, " [raw:{}, scale:{}]", q.mag(), q.scale())?;
                }
            }
            Ok(())
        }
    }
}

// Arithmetic operator implementations

impl std::ops::Add for Amount {
    type Output = AmountResult<Amount>;

    fn add(self, other: Amount) -> Self::Output {
        let mut result = self;
        result.add_amount(&other)?;
        Ok(result)
    }
}

impl std::ops::Add<&Amount> for Amount {
    type Output = AmountResult<Amount>;

    fn add(self, other: &Amount) -> Self::Output {
        let mut result = self;
        result.add_amount(other)?;
        Ok(result)
    }
}

impl std::ops::Add<&Amount> for &Amount {
    type Output = AmountResult<Amount>;

    fn add(self, other: &Amount) -> Self::Output {
        let mut result = self.clone();
        result.add_amount(other)?;
        Ok(result)
    }
}

impl std::ops::Sub for Amount {
    type Output = AmountResult<Amount>;

    fn sub(self, other: Amount) -> Self::Output {
        let mut result = self;
        result.sub_amount(&other)?;
        Ok(result)
    }
}

impl std::ops::Sub<&Amount> for Amount {
    type Output = AmountResult<Amount>;

    fn sub(self, other: &Amount) -> Self::Output {
        let mut result = self;
        result.sub_amount(other)?;
        Ok(result)
    }
}

impl std::ops::Sub<&Amount> for &Amount {
    type Output = AmountResult<Amount>;

    fn sub(self, other: &Amount) -> Self::Output {
        let mut result = self.clone();
        result.sub_amount(other)?;
        Ok(result)
    }
}

impl std::ops::Mul for Amount {
    type Output = Amount;

    fn mul(self, other: Amount) -> Self::Output {
        let mut result = self;
        result.mul_amount(&other);
        result
    }
}

impl std::ops::Mul<&Amount> for Amount {
    type Output = Amount;

    fn mul(self, other: &Amount) -> Self::Output {
        let mut result = self;
        result.mul_amount(other);
        result
    }
}

impl std::ops::Mul<&Amount> for &Amount {
    type Output = Amount;

    fn mul(self, other: &Amount) -> Self::Output {
        let mut result = self.clone();
        result.mul_amount(other);
        result
    }
}

impl std::ops::Div for Amount {
    type Output = AmountResult<Amount>;

    fn div(self, other: Amount) -> Self::Output {
        let mut result = self;
        result.div_amount(&other)?;
        Ok(result)
    }
}

impl std::ops::Div<&Amount> for Amount {
    type Output = AmountResult<Amount>;

    fn div(self, other: &Amount) -> Self::Output {
        let mut result = self;
        result.div_amount(other)?;
        Ok(result)
    }
}

impl std::ops::Div<&Amount> for &Amount {
    type Output = AmountResult<Amount>;

    fn div(self, other: &Amount) -> Self::Output {
        let mut result = self.clone();
        result.div_amount(other)?;
        Ok(result)
    }
}

impl std::ops::Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Self::Output {
        self.negated()
    }
}

impl std::ops::Neg for &Amount {
    type Output = Amount;

    fn neg(self) -> Self::Output {
        self.negated()
    }
}
