use serde::Deserialize;

/// Default distance from the end of the content, in pixels, that always
/// counts as "near the end".
pub const DEFAULT_END_PADDING: f64 = 20.0;

/// Viewport geometry reported by a scroll event.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScrollMetrics {
    pub viewport_height: f64,
    pub scroll_offset: f64,
    pub content_height: f64,
}

impl ScrollMetrics {
    pub fn new(viewport_height: f64, scroll_offset: f64, content_height: f64) -> Self {
        Self {
            viewport_height,
            scroll_offset,
            content_height,
        }
    }

    /// Content left below the bottom edge of the viewport, never negative.
    pub fn remaining(&self) -> f64 {
        (self.content_height - (self.viewport_height + self.scroll_offset)).max(0.0)
    }
}

/// Decides when a scroll position is close enough to the end to fetch the
/// next page.
///
/// `scroll_threshold` is measured in viewport lengths: `0.5` fires once less
/// than half a screen of content is left. The pixel threshold never drops
/// below `end_padding`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollTrigger {
    pub scroll_threshold: f64,
    pub end_padding: f64,
}

impl Default for ScrollTrigger {
    fn default() -> Self {
        Self {
            scroll_threshold: 0.8,
            end_padding: DEFAULT_END_PADDING,
        }
    }
}

impl ScrollTrigger {
    pub fn new(scroll_threshold: f64) -> Self {
        Self {
            scroll_threshold,
            ..Default::default()
        }
    }

    pub fn pixel_threshold(&self, metrics: &ScrollMetrics) -> f64 {
        (self.scroll_threshold * metrics.viewport_height).max(self.end_padding)
    }

    pub fn should_load(&self, metrics: &ScrollMetrics) -> bool {
        metrics.remaining() <= self.pixel_threshold(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_never_negative() {
        let metrics = ScrollMetrics::new(800.0, 1500.0, 2000.0);
        assert_eq!(metrics.remaining(), 0.0);
    }

    #[test]
    fn test_far_from_end_does_not_load() {
        let trigger = ScrollTrigger::new(0.5);
        let metrics = ScrollMetrics::new(800.0, 0.0, 5000.0);
        assert!(!trigger.should_load(&metrics));
    }

    #[test]
    fn test_within_threshold_loads() {
        let trigger = ScrollTrigger::new(0.5);
        // 400px left, threshold is half of an 800px viewport
        let metrics = ScrollMetrics::new(800.0, 3800.0, 5000.0);
        assert!(trigger.should_load(&metrics));

        let metrics = ScrollMetrics::new(800.0, 3799.0, 5000.0);
        assert!(!trigger.should_load(&metrics));
    }

    #[test]
    fn test_end_padding_floor() {
        let trigger = ScrollTrigger {
            scroll_threshold: 0.01,
            end_padding: 20.0,
        };
        let metrics = ScrollMetrics::new(100.0, 880.0, 1000.0);
        assert_eq!(trigger.pixel_threshold(&metrics), 20.0);
        assert!(trigger.should_load(&metrics));
    }

    #[test]
    fn test_content_shorter_than_viewport_loads() {
        let trigger = ScrollTrigger::default();
        let metrics = ScrollMetrics::new(800.0, 0.0, 300.0);
        assert!(trigger.should_load(&metrics));
    }
}
