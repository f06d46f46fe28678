use serde::{Deserialize, Serialize};

/// One ledger row. `qty` is the item's cumulative quantity after the change,
/// never a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerLine {
    pub item: String,
    pub qty: u32,
    pub unit_price: f64,
    pub total_line: f64,
}

impl LedgerLine {
    pub fn new(item: impl Into<String>, qty: u32, unit_price: f64) -> Self {
        Self {
            item: item.into(),
            qty,
            unit_price,
            total_line: f64::from(qty) * unit_price,
        }
    }

    pub fn to_record(&self) -> [String; 4] {
        [
            self.item.clone(),
            self.qty.to_string(),
            format_amount(self.unit_price),
            format_amount(self.total_line),
        ]
    }
}

/// Whole amounts are written without a fractional part (`10`, not `10.0`).
pub fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        value.to_string()
    }
}
