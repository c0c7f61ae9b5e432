//! Fixed-point arbitrary precision amounts with commodity support for Ledger
//!
//! This crate is the numerical kernel of the accounting tool: exact decimal
//! arithmetic at user-controlled precision, a pool interning commodities with
//! their display styles and price histories, valuation at historical prices,
//! and a compact deduplicated binary cache format for quantities.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod amount;
pub mod bigdecimal;
pub mod binary;
pub mod commodity;
pub mod formatting;

// Re-export main types
pub use amount::{Amount, AmountError, AmountResult};
pub use bigdecimal::{BigDecimal, Precision, QuantityRef, EXTEND_BY_DIGITS};
pub use binary::{BigintArena, BinaryError, QuantityWriter};
pub use commodity::{
    symbol_needs_quoting, Commodity, CommodityFlags, CommodityPool, CommodityRef, CommodityStyle,
    PriceUpdater,
};
pub use formatting::format_amount;

// Re-export for convenience
pub use num_bigint::BigInt;
pub use rust_decimal::Decimal;
