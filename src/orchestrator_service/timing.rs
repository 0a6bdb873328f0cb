use std::time::Instant;

pub fn elapsed_ms(start: Instant) -> u64 {
    let duration = start.elapsed();
    let ms = duration.as_millis();
    u64::try_from(ms).map_or(u64::MAX, |value| value)
}

#[cfg(test)]
mod tests {
    use super::elapsed_ms;
    use std::time::Instant;

    #[test]
    fn fresh_instant_reports_small_elapsed_time() {
        assert!(elapsed_ms(Instant::now()) < 1_000);
    }
}
