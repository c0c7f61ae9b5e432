// Arithmetic and comparison behavior of Amount across commodities.

use ledger_math::{Amount, AmountError, CommodityPool, EXTEND_BY_DIGITS};
use num_bigint::BigInt;

#[test]
fn test_absent_operand_is_additive_identity() {
    let mut pool = CommodityPool::new();
    let a = Amount::parse(&mut pool, "$12.34").unwrap();
    let null = Amount::null();

    assert_eq!((&a + &null).unwrap(), a);
    assert_eq!((&null + &a).unwrap(), a);
    assert_eq!((&a - &null).unwrap(), a);
    assert_eq!((&null - &a).unwrap(), -&a);
}

#[test]
fn test_addition_commutes_and_associates() {
    let mut pool = CommodityPool::new();
    let a = Amount::parse(&mut pool, "$1.10").unwrap();
    let b = Amount::parse(&mut pool, "$2.25").unwrap();
    let c = Amount::parse(&mut pool, "$3.003").unwrap();

    assert_eq!((&a + &b).unwrap(), (&b + &a).unwrap());

    let left = (&(&a + &b).unwrap() + &c).unwrap();
    let right = (&a + &(&b + &c).unwrap()).unwrap();
    assert_eq!(left, right);
}

#[test]
fn test_double_negation_is_identity() {
    let mut pool = CommodityPool::new();
    let a = Amount::parse(&mut pool, "$5.67").unwrap();
    assert_eq!(-&(-&a), a);

    let sum = (&a + &(-&a)).unwrap();
    assert!(sum.is_zero());
    assert!(sum.is_realzero());
}

#[test]
fn test_rounding_is_idempotent() {
    let mut pool = CommodityPool::new();
    let a = Amount::parse(&mut pool, "$9.87654").unwrap();
    assert_eq!(a.round(2).round(2), a.round(2));
}

#[test]
fn test_division_keeps_headroom_then_displays_rounded() {
    let mut pool = CommodityPool::new();
    let a = Amount::parse(&mut pool, "$10.00").unwrap();
    let b = Amount::parse(&mut pool, "$3.00").unwrap();

    let quotient = (&a / &b).unwrap();
    assert_eq!(quotient.scale(), 2 + EXTEND_BY_DIGITS);
    assert_eq!(quotient.quantity().unwrap().mag(), &BigInt::from(333333333i64));
    assert_eq!(format!("{}", quotient), "$3.33");
}

#[test]
fn test_mixed_commodities_fail_addition_and_all_comparisons() {
    let mut pool = CommodityPool::new();
    let a = Amount::parse(&mut pool, "$1.00").unwrap();
    let b = Amount::parse(&mut pool, "EUR 1.00").unwrap();

    assert_eq!(&a + &b, Err(AmountError::CommodityMismatch));
    assert_eq!(&a - &b, Err(AmountError::CommodityMismatch));

    assert!(!(a < b));
    assert!(!(a > b));
    assert!(!(a <= b));
    assert!(!(a >= b));
    assert!(!(a == b));
}

#[test]
fn test_multiplication_ignores_commodity_of_multiplier() {
    // Valuation multiplies a price in one commodity by an amount in another;
    // the product keeps the receiver's commodity.
    let mut pool = CommodityPool::new();
    let price = Amount::parse(&mut pool, "EUR 0.90").unwrap();
    let amount = Amount::parse(&mut pool, "$100.00").unwrap();

    let product = &price * &amount;
    let commodity = product.commodity().unwrap();
    assert_eq!(commodity.borrow().symbol(), "EUR");
    assert_eq!(format!("{}", product.round(2)), "EUR 90.00");
}

#[test]
fn test_subtraction_across_scales() {
    let mut pool = CommodityPool::new();
    let a = Amount::parse(&mut pool, "$10").unwrap();
    let b = Amount::parse(&mut pool, "$0.75").unwrap();
    let difference = (&a - &b).unwrap();
    assert_eq!(difference.scale(), 2);
    assert_eq!(difference.quantity().unwrap().mag(), &BigInt::from(925));
}

#[test]
fn test_comparison_against_null_uses_sign() {
    let mut pool = CommodityPool::new();
    let credit = Amount::parse(&mut pool, "$3.00").unwrap();
    let debit = Amount::parse(&mut pool, "$-3.00").unwrap();
    let null = Amount::null();

    assert!(credit > null);
    assert!(debit < null);
    assert!(null >= debit);
    assert!(null <= credit);
}

#[test]
fn test_amounts_stay_valid_through_arithmetic() {
    let mut pool = CommodityPool::new();
    let mut a = Amount::parse(&mut pool, "$1.00").unwrap();
    let b = Amount::parse(&mut pool, "$2.00").unwrap();

    a.add_amount(&b).unwrap();
    assert!(a.valid());
    a.mul_amount(&b);
    assert!(a.valid());
    a.div_amount(&b).unwrap();
    assert!(a.valid());
    assert!(Amount::null().valid());
}

#[test]
fn test_signs_and_abs() {
    let mut pool = CommodityPool::new();
    let a = Amount::parse(&mut pool, "$-4.20").unwrap();
    assert_eq!(a.sign(), -1);
    let magnitude = a.abs();
    assert_eq!(magnitude.sign(), 1);
    assert_eq!(format!("{}", magnitude), "$4.20");

    assert_eq!(Amount::null().abs(), Amount::null());
}
