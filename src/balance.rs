use crate::chart_of_accounts::{classify_record, normal_side};
use crate::schema::{AccountClass, Amounts, BalanceRecord, NormalSide};
use serde::{Deserialize, Serialize};

/// Signed net of a pair on the given side: positive when the side dominates.
pub fn net(pair: Amounts, side: NormalSide) -> f64 {
    match side {
        NormalSide::Debit => pair.debit - pair.credit,
        NormalSide::Credit => pair.credit - pair.debit,
    }
}

/// Splits a signed net back into a pair. Exactly one side is non-zero.
pub fn to_pair(net: f64, side: NormalSide) -> Amounts {
    let (normal, other) = if net >= 0.0 { (net, 0.0) } else { (0.0, -net) };
    match side {
        NormalSide::Debit => Amounts::new(normal, other),
        NormalSide::Credit => Amounts::new(other, normal),
    }
}

/// Signed opening, period and closing nets of one row, all on the same side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RowNets {
    pub class: AccountClass,
    pub side: NormalSide,
    pub opening: f64,
    pub period: f64,
    pub closing: f64,
}

impl RowNets {
    pub fn compute(class: AccountClass, opening: Amounts, period: Amounts, closing: Amounts) -> Self {
        let side = normal_side(class);
        Self {
            class,
            side,
            opening: net(opening, side),
            period: net(period, side),
            closing: net(closing, side),
        }
    }

    pub fn for_record(record: &BalanceRecord) -> Self {
        Self::for_record_as(record, classify_record(record))
    }

    pub fn for_record_as(record: &BalanceRecord, class: AccountClass) -> Self {
        Self::compute(class, record.opening, record.cumulative, record.closing)
    }

    pub fn expected_closing(&self) -> f64 {
        self.opening + self.period
    }

    /// `closing - (opening + period)`.
    pub fn difference(&self) -> f64 {
        self.closing - self.expected_closing()
    }

    /// Opening net implied by the closing balance and the year's movement.
    pub fn derived_opening(&self) -> f64 {
        self.closing - self.period
    }
}
