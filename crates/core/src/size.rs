const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
const OVERFLOW_UNIT: &str = "PB";

/// Renders a byte count with two decimals in the largest unit that keeps the
/// magnitude below 1024. Anything past TB is reported in PB.
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{value:.2} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.2} {OVERFLOW_UNIT}")
}
