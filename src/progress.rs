//! Progress reporting for long-running pipeline stages.

/// Receives `(percent, label)` updates from the fetch and confirm stages.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, pct: u8, label: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(u8, &str) + Send + Sync,
{
    fn on_progress(&self, pct: u8, label: &str) {
        self(pct, label)
    }
}

/// Discards all updates.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _pct: u8, _label: &str) {}
}

/// Maps a stage's 0–100 progress into `[base, base + span]` of an outer bar,
/// prefixing labels with the stage name.
pub struct Scaled<'a> {
    inner: &'a dyn ProgressSink,
    base: u8,
    span: u8,
    prefix: &'a str,
}

impl<'a> Scaled<'a> {
    pub fn new(inner: &'a dyn ProgressSink, base: u8, span: u8, prefix: &'a str) -> Self {
        Self {
            inner,
            base,
            span,
            prefix,
        }
    }
}

impl ProgressSink for Scaled<'_> {
    fn on_progress(&self, pct: u8, label: &str) {
        let scaled = (pct.min(100) as u32 * self.span as u32 / 100) as u8;
        let pct = self.base.saturating_add(scaled.min(self.span)).min(100);
        if self.prefix.is_empty() {
            self.inner.on_progress(pct, label);
        } else {
            self.inner
                .on_progress(pct, &format!("{} • {}", self.prefix, label));
        }
    }
}

/// Integer percentage of `done` over `total`, clamped to 100.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) as u128 * 100) / total as u128) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_scaled_maps_into_slice() {
        let seen = Mutex::new(Vec::new());
        let sink = |pct: u8, label: &str| seen.lock().unwrap().push((pct, label.to_string()));
        let scaled = Scaled::new(&sink, 60, 20, "Operators");

        scaled.on_progress(0, "a");
        scaled.on_progress(50, "b");
        scaled.on_progress(100, "c");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (60, "Operators • a".to_string()));
        assert_eq!(seen[1].0, 70);
        assert_eq!(seen[2].0, 80);
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 10), 0);
        assert_eq!(percent(5, 10), 50);
        assert_eq!(percent(15, 10), 100);
        assert_eq!(percent(0, 0), 100);
    }
}
