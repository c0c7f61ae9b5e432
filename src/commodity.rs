//! Commodity module providing currency and commodity type support
//!
//! Commodities are interned by the [`CommodityPool`]: two amounts carry the
//! same commodity exactly when they hold the same pooled instance, never
//! merely the same symbol text. Each commodity records the display style
//! observed while parsing and a time-indexed price history used for
//! valuation.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use chrono::NaiveDateTime;
use log::{debug, trace};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::bigdecimal::{BigDecimal, Precision, QuantityRef};
use crate::binary::BigintArena;

bitflags! {
    /// Commodity display-style and behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommodityFlags: u32 {
        /// No style information observed yet.
        const STYLE_DEFAULTS = 0x000;
        /// The symbol is printed after the number.
        const STYLE_SUFFIXED = 0x001;
        /// Whitespace separates the symbol from the number.
        const STYLE_SEPARATED = 0x002;
        /// The `.`/`,` roles are swapped (decimal comma, thousands period).
        const STYLE_EUROPEAN = 0x004;
        /// Integer digits are grouped in threes.
        const STYLE_THOUSANDS = 0x008;
        /// Valuation never consults the price history.
        const NOMARKET = 0x010;
    }
}

impl Serialize for CommodityFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for CommodityFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bits = u32::deserialize(deserializer)?;
        Ok(CommodityFlags::from_bits_truncate(bits))
    }
}

/// How a commodity prints and parses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommodityStyle {
    /// The symbol or name of this commodity (e.g., "$", "USD", "AAPL")
    pub symbol: String,

    /// The symbol contains characters the parser cannot read bare, so it is
    /// re-emitted in double quotes.
    pub quoted: bool,

    /// Display scale used when rounding on output and on value conversion.
    pub precision: Precision,

    /// Style flags accumulated from every appearance of the symbol.
    pub flags: CommodityFlags,
}

impl CommodityStyle {
    /// Create a default style for the given symbol.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quoted: false,
            precision: 0,
            flags: CommodityFlags::STYLE_DEFAULTS,
        }
    }
}

/// Whether a symbol must be quoted to survive a parse round trip.
///
/// The bare-symbol scanner stops at whitespace, digits, `-` and `.`; a symbol
/// containing any of those can only be re-read inside double quotes.
pub fn symbol_needs_quoting(symbol: &str) -> bool {
    symbol.chars().any(|c| c.is_whitespace() || c.is_ascii_digit() || c == '-' || c == '.')
}

/// Hook consulted during valuation so an external price source can refresh
/// the history or adjust the price about to be used.
///
/// The hook runs synchronously. While it runs the commodity has no updater
/// installed, and it must not call valuation on the same commodity.
pub trait PriceUpdater {
    /// Called with the valuation moment, the timestamp of the matched
    /// history row (if any), the newest timestamp in the history, and the
    /// matched price, which may be overwritten in place.
    fn update(
        &mut self,
        commodity: &CommodityRef,
        moment: Option<NaiveDateTime>,
        matched: Option<NaiveDateTime>,
        newest: Option<NaiveDateTime>,
        price: &mut Amount,
    );
}

/// Shared handle to a pooled commodity; equality is handle identity.
pub type CommodityRef = Rc<RefCell<Commodity>>;

/// An interned commodity: display style, price history, and update hook.
pub struct Commodity {
    style: CommodityStyle,
    history: BTreeMap<NaiveDateTime, Amount>,
    updater: Option<Box<dyn PriceUpdater>>,
    ident: u32,
    name: Option<String>,
    note: Option<String>,
}

impl Commodity {
    pub(crate) fn new(symbol: &str, ident: u32) -> Self {
        Self {
            style: CommodityStyle::new(symbol),
            history: BTreeMap::new(),
            updater: None,
            ident,
            name: None,
            note: None,
        }
    }

    /// Get the symbol of this commodity
    pub fn symbol(&self) -> &str {
        &self.style.symbol
    }

    /// Get the display style of this commodity
    pub fn style(&self) -> &CommodityStyle {
        &self.style
    }

    /// Get the display precision of this commodity
    pub fn precision(&self) -> Precision {
        self.style.precision
    }

    /// Set the display precision of this commodity
    pub fn set_precision(&mut self, precision: Precision) {
        self.style.precision = precision;
    }

    /// Whether the symbol is re-emitted in double quotes.
    pub fn quoted(&self) -> bool {
        self.style.quoted
    }

    /// Mark the symbol as requiring quotes on output.
    pub fn set_quoted(&mut self, quoted: bool) {
        self.style.quoted = quoted;
    }

    /// Get the flags of this commodity
    pub fn flags(&self) -> CommodityFlags {
        self.style.flags
    }

    /// Check if this commodity has specific flags set
    pub fn has_flags(&self, flags: CommodityFlags) -> bool {
        self.style.flags.contains(flags)
    }

    /// Add flags to this commodity
    pub fn add_flags(&mut self, flags: CommodityFlags) {
        self.style.flags |= flags;
    }

    /// Remove flags from this commodity
    pub fn drop_flags(&mut self, flags: CommodityFlags) {
        self.style.flags &= !flags;
    }

    /// Stable ordinal assigned by the pool, used for serialization.
    pub fn ident(&self) -> u32 {
        self.ident
    }

    /// Descriptive name, if one has been recorded.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Set the descriptive name.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Free-form note, if one has been recorded.
    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    /// Set the free-form note.
    pub fn set_note(&mut self, note: impl Into<String>) {
        self.note = Some(note.into());
    }

    /// Whether this is the dimensionless null commodity.
    pub fn is_null_commodity(&self) -> bool {
        self.style.symbol.is_empty()
    }

    /// Record a price for one unit of this commodity at the given moment,
    /// replacing any price already recorded for that moment.
    pub fn add_price(&mut self, when: NaiveDateTime, price: Amount) {
        trace!("adding price for {:?} at {}", self.style.symbol, when);
        self.history.insert(when, price);
    }

    /// Remove the price recorded at the given moment.
    pub fn remove_price(&mut self, when: &NaiveDateTime) -> Option<Amount> {
        self.history.remove(when)
    }

    /// The recorded price history, oldest first.
    pub fn history(&self) -> &BTreeMap<NaiveDateTime, Amount> {
        &self.history
    }

    /// Install the update hook consulted during valuation.
    pub fn set_updater(&mut self, updater: Box<dyn PriceUpdater>) {
        self.updater = Some(updater);
    }

    /// Remove and return the update hook.
    pub fn take_updater(&mut self) -> Option<Box<dyn PriceUpdater>> {
        self.updater.take()
    }

    /// Find the price row governing `moment`: the most recent entry not
    /// newer than it, or the newest entry when `moment` is `None`.
    fn find_price(
        &self,
        moment: Option<NaiveDateTime>,
    ) -> (Option<NaiveDateTime>, Option<NaiveDateTime>, Amount) {
        let newest = self.history.keys().next_back().copied();
        let matched = match moment {
            None => self.history.iter().next_back(),
            Some(m) => self.history.range(..=m).next_back(),
        };
        match matched {
            Some((when, price)) => (Some(*when), newest, price.clone()),
            None => (None, newest, Amount::null()),
        }
    }

    /// Look up the market price of one unit of this commodity at `moment`
    /// (`None` means the latest known price), consulting the update hook.
    ///
    /// Returns the null amount when no price is known.
    pub fn value(commodity: &CommodityRef, moment: Option<NaiveDateTime>) -> Amount {
        let (matched, newest, mut price) = commodity.borrow().find_price(moment);

        let updater = commodity.borrow_mut().updater.take();
        if let Some(mut updater) = updater {
            updater.update(commodity, moment, matched, newest, &mut price);
            commodity.borrow_mut().updater = Some(updater);
        }

        price
    }
}

impl fmt::Display for Commodity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.style.quoted {
            write!(f, "\"{}\"", self.style.symbol)
        } else {
            write!(f, "{}", self.style.symbol)
        }
    }
}

impl fmt::Debug for Commodity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commodity")
            .field("symbol", &self.style.symbol)
            .field("precision", &self.style.precision)
            .field("flags", &self.style.flags)
            .field("prices", &self.history.len())
            .field("ident", &self.ident)
            .finish()
    }
}

/// Pool interning every commodity seen by the engine.
///
/// The pool is the explicit context threaded through amount construction and
/// parsing: it owns the distinguished null commodity used by dimensionless
/// amounts and the pinned `true` quantity cell shared by boolean amounts.
pub struct CommodityPool {
    commodities: HashMap<String, CommodityRef>,
    null_commodity: CommodityRef,
    true_value: QuantityRef,
    next_ident: u32,
}

impl CommodityPool {
    /// Create a pool containing only the null commodity.
    pub fn new() -> Self {
        let null_commodity = Rc::new(RefCell::new(Commodity::new("", 0)));
        let mut commodities = HashMap::new();
        commodities.insert(String::new(), Rc::clone(&null_commodity));
        Self {
            commodities,
            null_commodity,
            true_value: Rc::new(BigDecimal::new(BigInt::from(1), 0)),
            next_ident: 1,
        }
    }

    /// Find an existing commodity by exact symbol.
    pub fn find(&self, symbol: &str) -> Option<CommodityRef> {
        self.commodities.get(symbol).cloned()
    }

    /// Find or create a commodity by symbol.
    ///
    /// A freshly created commodity gets a default style, the next ident, and
    /// the quoted bit when its symbol cannot be re-read bare.
    pub fn find_or_create(&mut self, symbol: &str) -> CommodityRef {
        if let Some(commodity) = self.commodities.get(symbol) {
            return Rc::clone(commodity);
        }

        debug!("interning commodity {:?}", symbol);
        let mut commodity = Commodity::new(symbol, self.next_ident);
        self.next_ident += 1;
        if symbol_needs_quoting(symbol) {
            commodity.style.quoted = true;
        }

        let handle = Rc::new(RefCell::new(commodity));
        self.commodities.insert(symbol.to_string(), Rc::clone(&handle));
        handle
    }

    /// The interned empty-symbol commodity used for dimensionless amounts.
    pub fn null_commodity(&self) -> &CommodityRef {
        &self.null_commodity
    }

    /// The pinned quantity cell shared by boolean `true` amounts.
    pub(crate) fn true_value(&self) -> &QuantityRef {
        &self.true_value
    }

    /// Number of interned commodities, including the null commodity.
    pub fn commodity_count(&self) -> usize {
        self.commodities.len()
    }

    /// Iterate over all interned commodities.
    pub fn commodities(&self) -> impl Iterator<Item = &CommodityRef> {
        self.commodities.values()
    }

    /// Replace every bulk-allocated price cell owned by `arena` with a fresh
    /// heap copy.
    ///
    /// Must run before an arena whose cells may still be referenced from
    /// price histories is dropped; afterwards no history entry references
    /// arena storage.
    pub fn evacuate_arena(&mut self, arena: &BigintArena) {
        let mut moved = 0usize;
        for commodity in self.commodities.values() {
            let mut commodity = commodity.borrow_mut();
            for price in commodity.history.values_mut() {
                if price.evacuate(arena) {
                    moved += 1;
                }
            }
        }
        if moved > 0 {
            debug!("evacuated {} bulk quantities from cache arena", moved);
        }
    }

    /// Tear the pool down to its initial state: every price history and
    /// updater is dropped (breaking reference cycles between mutually priced
    /// commodities), the intern map is emptied, and the null commodity is
    /// re-seeded.
    pub fn clear(&mut self) {
        for commodity in self.commodities.values() {
            let mut commodity = commodity.borrow_mut();
            commodity.history.clear();
            commodity.updater = None;
        }
        self.commodities.clear();
        self.commodities.insert(String::new(), Rc::clone(&self.null_commodity));
    }
}

impl Default for CommodityPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CommodityPool {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for CommodityPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommodityPool")
            .field("commodities", &self.commodities.len())
            .field("next_ident", &self.next_ident)
            .finish()
    }
}
