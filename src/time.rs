use chrono::Utc;

/// Current UTC time as epoch milliseconds, the unit every stored timestamp uses.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_reasonable() {
        let a = now_ms();
        assert!(a > 1_500_000_000_000); // after 2017
        assert!(a < 4_100_000_000_000); // before year ~2100
        assert!(now_ms() >= a);
    }
}
