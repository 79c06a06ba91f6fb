//! One function per CLI subcommand.

use rust_decimal::Decimal;
use tabled::{Table, Tabled, settings::Style};

pub mod accounts;
pub mod balances;
pub mod fetch;
pub mod history;
pub mod prices;
pub mod report;

pub fn print_table<T: Tabled>(rows: impl IntoIterator<Item = T>) {
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{table}");
}

/// Crypto amounts: up to 8 decimals, no trailing zeros.
pub fn fmt_amount(d: Decimal) -> String {
    d.round_dp(8).normalize().to_string()
}

/// Fiat values: two decimals.
pub fn fmt_value(d: Decimal) -> String {
    format!("{:.2}", d.round_dp(2))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn formats_numbers() {
        assert_eq!(fmt_amount(dec!(1.500000000001)), "1.5");
        assert_eq!(fmt_amount(dec!(100)), "100");
        assert_eq!(fmt_value(dec!(1234.5)), "1234.50");
    }
}
