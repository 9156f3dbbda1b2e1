//! Human-readable byte counts for board file limits.

const SIZE_ORDERS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Format a byte count using 1024-based steps and two decimals, e.g. `10.00 MB`.
pub fn format_file_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut order = 0;

    while order < SIZE_ORDERS.len() - 1 && value > 1023.0 {
        value /= 1024.0;
        order += 1;
    }

    format!("{value:.2} {}", SIZE_ORDERS[order])
}

/// Bytes in `megabytes` binary megabytes.
pub const fn megabytes(megabytes: u64) -> u64 {
    megabytes * 1_048_576
}
