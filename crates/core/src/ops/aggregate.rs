/// Sum one area per branch; no branches total zero
pub fn totalise(areas: &[f64]) -> f64 {
    areas.iter().sum()
}

/// Totals are reported with three decimals
pub fn format_total(total: f64) -> String {
    format!("{:.3}", total)
}
