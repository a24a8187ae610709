use std::time::Duration;

/// Compact duration for log lines.
pub fn fmt_ms(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        "<1ms".into()
    } else if ms < 10_000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}
