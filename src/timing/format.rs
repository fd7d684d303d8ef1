//! Human-readable time formatting for marker events.

/// Format seconds as `m:ss.ffff`
///
/// # Example
/// ```
/// use tactus::timing::format_time;
/// assert_eq!(format_time(2.8), "0:02.8000");
/// assert_eq!(format_time(75.25), "1:15.2500");
/// ```
pub fn format_time(seconds: f64) -> String {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    // ten-thousandths, rounded before the minute split so 59.99999 carries over
    let total = (seconds * 10_000.0).round() as u64;
    let (minutes, rest) = (total / 600_000, total % 600_000);
    format!("{}:{:02}.{:04}", minutes, rest / 10_000, rest % 10_000)
}
