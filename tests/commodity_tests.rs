// Registry interning, style accumulation, and valuation against price
// histories.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{NaiveDate, NaiveDateTime};
use ledger_math::{Amount, CommodityFlags, CommodityPool, CommodityRef, PriceUpdater};

fn moment(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

#[test]
fn test_parse_interns_one_commodity_per_symbol() {
    let mut pool = CommodityPool::new();
    let a = Amount::parse(&mut pool, "$1.00").unwrap();
    let b = Amount::parse(&mut pool, "$2.00").unwrap();
    assert!(Rc::ptr_eq(a.commodity().unwrap(), b.commodity().unwrap()));
}

#[test]
fn test_precision_only_ratchets_upward() {
    let mut pool = CommodityPool::new();
    Amount::parse(&mut pool, "$1").unwrap();
    let usd = pool.find("$").unwrap();
    assert_eq!(usd.borrow().precision(), 0);

    Amount::parse(&mut pool, "$1.2345").unwrap();
    assert_eq!(usd.borrow().precision(), 4);

    Amount::parse(&mut pool, "$1.5").unwrap();
    assert_eq!(usd.borrow().precision(), 4);
}

#[test]
fn test_style_flags_accumulate_across_parses() {
    let mut pool = CommodityPool::new();
    Amount::parse(&mut pool, "1,50 EUR").unwrap();
    let eur = pool.find("EUR").unwrap();
    assert!(eur.borrow().has_flags(
        CommodityFlags::STYLE_EUROPEAN
            | CommodityFlags::STYLE_SUFFIXED
            | CommodityFlags::STYLE_SEPARATED
    ));
    assert!(!eur.borrow().has_flags(CommodityFlags::STYLE_THOUSANDS));

    Amount::parse(&mut pool, "1.234,50 EUR").unwrap();
    assert!(eur.borrow().has_flags(CommodityFlags::STYLE_THOUSANDS));
}

#[test]
fn test_historical_valuation_picks_governing_row() {
    let mut pool = CommodityPool::new();
    let dollars = Amount::parse(&mut pool, "$100.00").unwrap();
    let usd = dollars.commodity().unwrap().clone();

    let january = Amount::parse(&mut pool, "EUR 0.90").unwrap();
    let june = Amount::parse(&mut pool, "EUR 0.95").unwrap();
    usd.borrow_mut().add_price(moment(2024, 1, 1), january);
    usd.borrow_mut().add_price(moment(2024, 6, 1), june);

    assert_eq!(format!("{}", dollars.value(Some(moment(2024, 3, 15)))), "EUR 90.00");
    assert_eq!(format!("{}", dollars.value(Some(moment(2024, 7, 1)))), "EUR 95.00");
    // None means "now": the newest price governs.
    assert_eq!(format!("{}", dollars.value(None)), "EUR 95.00");
    // Before any recorded price the amount is returned unchanged.
    assert_eq!(dollars.value(Some(moment(2023, 12, 1))), dollars);
}

#[test]
fn test_valuation_is_monotone_in_the_moment() {
    let mut pool = CommodityPool::new();
    let dollars = Amount::parse(&mut pool, "$10.00").unwrap();
    let usd = dollars.commodity().unwrap().clone();

    for (day, rate) in [(1, "EUR 0.80"), (10, "EUR 0.85"), (20, "EUR 0.90")] {
        let price = Amount::parse(&mut pool, rate).unwrap();
        usd.borrow_mut().add_price(moment(2024, 5, day), price);
    }

    let mut last = dollars.value(Some(moment(2024, 5, 1)));
    for day in 2..=25 {
        let current = dollars.value(Some(moment(2024, 5, day)));
        assert!(current >= last, "valuation regressed on day {}", day);
        last = current;
    }
}

#[test]
fn test_no_market_commodity_skips_price_lookup() {
    let mut pool = CommodityPool::new();
    let hours = Amount::parse(&mut pool, "5.00h").unwrap();
    let commodity = hours.commodity().unwrap().clone();
    let price = Amount::parse(&mut pool, "$40.00").unwrap();
    commodity.borrow_mut().add_price(moment(2024, 1, 1), price);
    commodity.borrow_mut().add_flags(CommodityFlags::NOMARKET);

    assert_eq!(hours.value(None), hours);
}

struct RecordingUpdater {
    calls: Rc<RefCell<Vec<(Option<NaiveDateTime>, Option<NaiveDateTime>, Option<NaiveDateTime>)>>>,
    replacement: Option<Amount>,
}

impl PriceUpdater for RecordingUpdater {
    fn update(
        &mut self,
        _commodity: &CommodityRef,
        moment: Option<NaiveDateTime>,
        matched: Option<NaiveDateTime>,
        newest: Option<NaiveDateTime>,
        price: &mut Amount,
    ) {
        self.calls.borrow_mut().push((moment, matched, newest));
        if let Some(replacement) = &self.replacement {
            *price = replacement.clone();
        }
    }
}

#[test]
fn test_updater_sees_matched_and_newest_dates() {
    let mut pool = CommodityPool::new();
    let dollars = Amount::parse(&mut pool, "$100.00").unwrap();
    let usd = dollars.commodity().unwrap().clone();

    let january = Amount::parse(&mut pool, "EUR 0.90").unwrap();
    let june = Amount::parse(&mut pool, "EUR 0.95").unwrap();
    usd.borrow_mut().add_price(moment(2024, 1, 1), january);
    usd.borrow_mut().add_price(moment(2024, 6, 1), june);

    let calls = Rc::new(RefCell::new(Vec::new()));
    usd.borrow_mut()
        .set_updater(Box::new(RecordingUpdater { calls: Rc::clone(&calls), replacement: None }));

    dollars.value(Some(moment(2024, 3, 15)));
    dollars.value(Some(moment(2023, 1, 1)));

    let calls = calls.borrow();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0],
        (
            Some(moment(2024, 3, 15)),
            Some(moment(2024, 1, 1)),
            Some(moment(2024, 6, 1))
        )
    );
    // No history row matched: the updater still runs, with no matched date.
    assert_eq!(calls[1].1, None);
    assert_eq!(calls[1].2, Some(moment(2024, 6, 1)));
}

#[test]
fn test_updater_can_override_the_price() {
    let mut pool = CommodityPool::new();
    let dollars = Amount::parse(&mut pool, "$100.00").unwrap();
    let usd = dollars.commodity().unwrap().clone();

    let stale = Amount::parse(&mut pool, "EUR 0.50").unwrap();
    usd.borrow_mut().add_price(moment(2024, 1, 1), stale);

    let fresh = Amount::parse(&mut pool, "EUR 0.91").unwrap();
    usd.borrow_mut().set_updater(Box::new(RecordingUpdater {
        calls: Rc::new(RefCell::new(Vec::new())),
        replacement: Some(fresh),
    }));

    assert_eq!(format!("{}", dollars.value(Some(moment(2024, 2, 1)))), "EUR 91.00");
}

struct HistoryWritingUpdater {
    price: Amount,
    when: NaiveDateTime,
}

impl PriceUpdater for HistoryWritingUpdater {
    fn update(
        &mut self,
        commodity: &CommodityRef,
        _moment: Option<NaiveDateTime>,
        _matched: Option<NaiveDateTime>,
        _newest: Option<NaiveDateTime>,
        price: &mut Amount,
    ) {
        commodity.borrow_mut().add_price(self.when, self.price.clone());
        *price = self.price.clone();
    }
}

#[test]
fn test_updater_may_mutate_the_history() {
    let mut pool = CommodityPool::new();
    let dollars = Amount::parse(&mut pool, "$100.00").unwrap();
    let usd = dollars.commodity().unwrap().clone();

    let fetched = Amount::parse(&mut pool, "EUR 0.88").unwrap();
    usd.borrow_mut().set_updater(Box::new(HistoryWritingUpdater {
        price: fetched,
        when: moment(2024, 4, 1),
    }));

    assert_eq!(format!("{}", dollars.value(Some(moment(2024, 4, 2)))), "EUR 88.00");
    assert_eq!(usd.borrow().history().len(), 1);

    // The hook is restored after the call and the new row now matches.
    assert_eq!(format!("{}", dollars.value(Some(moment(2024, 4, 2)))), "EUR 88.00");
}

#[test]
fn test_pool_clear_drops_histories() {
    let mut pool = CommodityPool::new();
    let dollars = Amount::parse(&mut pool, "$1.00").unwrap();
    let usd = dollars.commodity().unwrap().clone();
    let price = Amount::parse(&mut pool, "EUR 0.90").unwrap();
    usd.borrow_mut().add_price(moment(2024, 1, 1), price);

    pool.clear();
    assert!(usd.borrow().history().is_empty());
    // The null commodity survives a clear with its identity intact.
    let null = pool.null_commodity().clone();
    assert!(Rc::ptr_eq(&null, &pool.find("").unwrap()));
}
