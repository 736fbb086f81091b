//! Zoomable price window over a liquidation dataset
//!
//! The window is a `[min_price, max_price]` slice of the dataset's full price
//! bounds. Every accepted change keeps these invariants:
//!
//! - `full.min <= min_price < max_price <= full.max`
//! - span is at least [`MIN_SPAN_FRACTION`] of the full span
//! - the reference price stays inside the window
//!
//! Changes that would break one are rejected and the window is left as it was.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WindowError;

pub const ZOOM_IN_FACTOR: f64 = 0.8;
pub const ZOOM_OUT_FACTOR: f64 = 1.25;
/// Smallest window span, as a fraction of the full span
pub const MIN_SPAN_FRACTION: f64 = 0.1;
pub const MIN_DISPLAY_SCALE: f64 = 5.0;
pub const MAX_DISPLAY_SCALE: f64 = 20.0;

/// Tolerance used to find the level sitting at the reference price
const REFERENCE_TOLERANCE: f64 = 0.01;

/// Liquidation volume at one price, split per exchange
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LiquidationLevel {
    pub price: f64,
    #[serde(default)]
    pub binance: f64,
    #[serde(default)]
    pub bybit: f64,
    #[serde(default)]
    pub okx: f64,
    #[serde(default)]
    pub total: f64,
}

impl LiquidationLevel {
    /// Sum of the per-exchange volumes
    pub fn exchange_total(&self) -> f64 {
        self.binance + self.bybit + self.okx
    }
}

/// Liquidation levels plus the price they were captured around
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LiquidationSnapshot {
    pub current_price: f64,
    pub levels: Vec<LiquidationLevel>,
}

impl LiquidationSnapshot {
    /// Evenly spaced empty levels spanning `reference ± spread`
    ///
    /// The middle level sits exactly on the reference price.
    pub fn price_grid(reference: f64, spread: f64, points: usize) -> Self {
        // odd count so one level lands on the reference
        let points = (points.max(3) / 2) * 2 + 1;
        let min = reference * (1.0 - spread);
        let step = (reference * 2.0 * spread) / (points - 1) as f64;
        let middle = points / 2;

        let levels = (0..points)
            .map(|index| {
                let price = if index == middle {
                    reference
                } else {
                    min + index as f64 * step
                };
                LiquidationLevel {
                    price: (price * 100.0).round() / 100.0,
                    binance: 0.0,
                    bybit: 0.0,
                    okx: 0.0,
                    total: 0.0,
                }
            })
            .collect();

        Self {
            current_price: reference,
            levels,
        }
    }
}

/// Full price bounds of a dataset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceBounds {
    pub min: f64,
    pub max: f64,
}

impl PriceBounds {
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn contains(&self, price: f64) -> bool {
        self.min <= price && price <= self.max
    }

    /// Bounds over the finite prices of `levels`
    pub fn of(levels: &[LiquidationLevel]) -> Result<Self, WindowError> {
        let (min, max) = levels
            .iter()
            .map(|level| level.price)
            .filter(|price| price.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), price| {
                (min.min(price), max.max(price))
            });

        if min > max {
            return Err(WindowError::EmptyDataset);
        }
        if min == max {
            return Err(WindowError::DegenerateBounds(min));
        }
        Ok(Self { min, max })
    }
}

/// Visible price window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomRange {
    pub min_price: f64,
    pub max_price: f64,
}

impl ZoomRange {
    pub fn span(&self) -> f64 {
        self.max_price - self.min_price
    }

    pub fn contains(&self, price: f64) -> bool {
        self.min_price <= price && price <= self.max_price
    }
}

impl From<PriceBounds> for ZoomRange {
    fn from(bounds: PriceBounds) -> Self {
        Self {
            min_price: bounds.min,
            max_price: bounds.max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelDirection {
    In,
    Out,
}

impl WheelDirection {
    /// Scrolling up (negative delta) zooms in; a zero delta does nothing
    pub fn from_delta_y(delta_y: f64) -> Option<Self> {
        if delta_y < 0.0 {
            Some(WheelDirection::In)
        } else if delta_y > 0.0 {
            Some(WheelDirection::Out)
        } else {
            None
        }
    }

    pub fn factor(&self) -> f64 {
        match self {
            WheelDirection::In => ZOOM_IN_FACTOR,
            WheelDirection::Out => ZOOM_OUT_FACTOR,
        }
    }
}

/// Initial window: the dataset's full price bounds
pub fn init_range(levels: &[LiquidationLevel]) -> Result<ZoomRange, WindowError> {
    PriceBounds::of(levels).map(ZoomRange::from)
}

/// Zoom around the pointer, or `None` when the result would break an invariant
///
/// The price under the pointer (at `pointer_fraction` of the current window)
/// stays under the pointer after zooming.
pub fn apply_zoom(
    pointer_fraction: f64,
    direction: WheelDirection,
    current: ZoomRange,
    full: PriceBounds,
    reference: f64,
) -> Option<ZoomRange> {
    let fraction = pointer_fraction.clamp(0.0, 1.0);
    let span = current.span();
    let new_span = span * direction.factor();
    let new_min = current.min_price + fraction * (span - new_span);

    accept(
        ZoomRange {
            min_price: new_min.max(full.min),
            max_price: (new_min + new_span).min(full.max),
        },
        full,
        reference,
    )
}

/// Shift the window by `fraction` of its span (positive moves up in price)
///
/// The shift stops at the dataset bounds without changing the span.
pub fn apply_pan(
    fraction: f64,
    current: ZoomRange,
    full: PriceBounds,
    reference: f64,
) -> Option<ZoomRange> {
    let span = current.span();
    let shift = (span * fraction)
        .max(full.min - current.min_price)
        .min(full.max - current.max_price);

    if shift == 0.0 {
        return None;
    }

    accept(
        ZoomRange {
            min_price: current.min_price + shift,
            max_price: current.max_price + shift,
        },
        full,
        reference,
    )
}

fn accept(candidate: ZoomRange, full: PriceBounds, reference: f64) -> Option<ZoomRange> {
    let floor = full.span() * MIN_SPAN_FRACTION;
    let valid = candidate.min_price < candidate.max_price
        && candidate.span() >= floor
        && candidate.contains(reference)
        && full.contains(candidate.min_price)
        && full.contains(candidate.max_price);

    if valid {
        Some(candidate)
    } else {
        debug!(
            min = candidate.min_price,
            max = candidate.max_price,
            floor,
            reference,
            "window change rejected"
        );
        None
    }
}

/// Bar width hint: `clamp(5, 20, 10 × full / current)`
pub fn derive_display_scale(full_span: f64, current_span: f64) -> f64 {
    if current_span <= 0.0 || !current_span.is_finite() {
        return MAX_DISPLAY_SCALE;
    }
    (10.0 * full_span / current_span).clamp(MIN_DISPLAY_SCALE, MAX_DISPLAY_SCALE)
}

/// Position of `column` across a widget `width` cells wide, in `[0, 1]`
pub fn pointer_fraction(column: u16, width: u16) -> f64 {
    if width <= 1 {
        return 0.5;
    }
    (f64::from(column) / f64::from(width - 1)).clamp(0.0, 1.0)
}

/// Window state over one liquidation dataset
#[derive(Debug, Clone, PartialEq)]
pub struct PriceWindow {
    levels: Vec<LiquidationLevel>,
    bounds: PriceBounds,
    range: ZoomRange,
    reference: f64,
}

impl PriceWindow {
    /// Window over `levels`, initially showing the full bounds
    pub fn new(mut levels: Vec<LiquidationLevel>, reference: f64) -> Result<Self, WindowError> {
        let bounds = PriceBounds::of(&levels)?;
        if !bounds.contains(reference) {
            return Err(WindowError::ReferenceOutOfBounds {
                reference,
                min: bounds.min,
                max: bounds.max,
            });
        }

        levels.retain(|level| level.price.is_finite());
        levels.sort_by(|a, b| a.price.total_cmp(&b.price));

        Ok(Self {
            levels,
            bounds,
            range: bounds.into(),
            reference,
        })
    }

    pub fn from_snapshot(snapshot: LiquidationSnapshot) -> Result<Self, WindowError> {
        Self::new(snapshot.levels, snapshot.current_price)
    }

    /// Replace the dataset; the window goes back to the full bounds
    pub fn reset(&mut self, levels: Vec<LiquidationLevel>, reference: f64) -> Result<(), WindowError> {
        *self = Self::new(levels, reference)?;
        Ok(())
    }

    /// Apply a wheel event; returns whether the window changed
    pub fn wheel(&mut self, pointer_fraction: f64, delta_y: f64) -> bool {
        let Some(direction) = WheelDirection::from_delta_y(delta_y) else {
            return false;
        };
        self.update(apply_zoom(
            pointer_fraction,
            direction,
            self.range,
            self.bounds,
            self.reference,
        ))
    }

    /// Shift the window by a fraction of its span; returns whether it moved
    pub fn pan(&mut self, fraction_of_span: f64) -> bool {
        self.update(apply_pan(
            fraction_of_span,
            self.range,
            self.bounds,
            self.reference,
        ))
    }

    fn update(&mut self, next: Option<ZoomRange>) -> bool {
        match next {
            Some(range) => {
                self.range = range;
                true
            }
            None => false,
        }
    }

    pub fn range(&self) -> ZoomRange {
        self.range
    }

    pub fn bounds(&self) -> PriceBounds {
        self.bounds
    }

    pub fn reference(&self) -> f64 {
        self.reference
    }

    pub fn display_scale(&self) -> f64 {
        derive_display_scale(self.bounds.span(), self.range.span())
    }

    /// Levels inside the current window, ascending by price
    pub fn visible_levels(&self) -> &[LiquidationLevel] {
        let start = self
            .levels
            .partition_point(|level| level.price < self.range.min_price);
        let end = self
            .levels
            .partition_point(|level| level.price <= self.range.max_price);
        &self.levels[start..end.max(start)]
    }

    /// The level priced at the reference, if the dataset has one
    pub fn level_at_reference(&self) -> Option<&LiquidationLevel> {
        self.levels
            .iter()
            .find(|level| (level.price - self.reference).abs() < REFERENCE_TOLERANCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(prices: impl IntoIterator<Item = f64>) -> Vec<LiquidationLevel> {
        prices
            .into_iter()
            .map(|price| LiquidationLevel {
                price,
                binance: 1.0,
                bybit: 2.0,
                okx: 3.0,
                total: 6.0,
            })
            .collect()
    }

    fn full() -> PriceBounds {
        PriceBounds {
            min: 90_000.0,
            max: 110_000.0,
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-6, "{actual} != {expected}");
    }

    fn assert_invariants(range: ZoomRange, full: PriceBounds, reference: f64) {
        assert!(full.min <= range.min_price, "{range:?}");
        assert!(range.min_price < range.max_price, "{range:?}");
        assert!(range.max_price <= full.max, "{range:?}");
        assert!(range.span() >= full.span() * MIN_SPAN_FRACTION - 1e-9, "{range:?}");
        assert!(range.contains(reference), "{range:?}");
    }

    #[test]
    fn test_init_range() {
        struct TestCase {
            input: Vec<f64>,
            expected: Result<ZoomRange, WindowError>,
        }

        let tests = vec![
            TestCase {
                // TC0: unsorted dataset
                input: vec![100.0, 90.0, 110.0],
                expected: Ok(ZoomRange {
                    min_price: 90.0,
                    max_price: 110.0,
                }),
            },
            TestCase {
                // TC1: empty dataset
                input: vec![],
                expected: Err(WindowError::EmptyDataset),
            },
            TestCase {
                // TC2: single price
                input: vec![5.0, 5.0],
                expected: Err(WindowError::DegenerateBounds(5.0)),
            },
            TestCase {
                // TC3: non-finite prices ignored
                input: vec![f64::NAN, 1.0, 2.0],
                expected: Ok(ZoomRange {
                    min_price: 1.0,
                    max_price: 2.0,
                }),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(init_range(&levels(test.input)), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_zoom_in_around_pointer() {
        let current = ZoomRange::from(full());
        let next = apply_zoom(0.5, WheelDirection::In, current, full(), 100_000.0).unwrap();
        assert_close(next.min_price, 92_000.0);
        assert_close(next.max_price, 108_000.0);

        // pointer at the left edge keeps the minimum fixed
        let next = apply_zoom(0.0, WheelDirection::In, current, full(), 100_000.0).unwrap();
        assert_close(next.min_price, 90_000.0);
        assert_close(next.max_price, 106_000.0);
    }

    #[test]
    fn test_zoom_in_stops_at_span_floor() {
        let mut range = ZoomRange::from(full());
        let mut accepted = 0;

        for _ in 0..31 {
            if let Some(next) = apply_zoom(0.5, WheelDirection::In, range, full(), 100_000.0) {
                range = next;
                accepted += 1;
            }
            assert_invariants(range, full(), 100_000.0);
        }

        // 20000 * 0.8^10 = 2147.48; one more step would be 1717.99
        assert_eq!(accepted, 10);
        assert!(range.span() >= 2_000.0);
        assert_eq!(apply_zoom(0.5, WheelDirection::In, range, full(), 100_000.0), None);
    }

    #[test]
    fn test_zoom_out_is_clamped_to_bounds() {
        let current = ZoomRange {
            min_price: 95_000.0,
            max_price: 105_000.0,
        };
        let next = apply_zoom(0.5, WheelDirection::Out, current, full(), 100_000.0).unwrap();
        assert_close(next.min_price, 93_750.0);
        assert_close(next.max_price, 106_250.0);

        let at_full = ZoomRange::from(full());
        let next = apply_zoom(0.5, WheelDirection::Out, at_full, full(), 100_000.0).unwrap();
        assert_eq!(next, at_full);
    }

    #[test]
    fn test_zoom_rejected_when_reference_leaves_window() {
        let current = ZoomRange::from(full());
        // zooming in at the far left pushes 109000 out of view
        assert_eq!(apply_zoom(0.0, WheelDirection::In, current, full(), 109_000.0), None);
    }

    #[test]
    fn test_pan() {
        struct TestCase {
            fraction: f64,
            reference: f64,
            expected: Option<(f64, f64)>,
        }

        let current = ZoomRange {
            min_price: 95_000.0,
            max_price: 105_000.0,
        };

        let tests = vec![
            TestCase {
                // TC0: small shift up
                fraction: 0.1,
                reference: 100_000.0,
                expected: Some((96_000.0, 106_000.0)),
            },
            TestCase {
                // TC1: large shift down stops at the lower bound
                fraction: -2.0,
                reference: 97_000.0,
                expected: Some((90_000.0, 100_000.0)),
            },
            TestCase {
                // TC2: shift that would drop the reference is rejected
                fraction: 0.6,
                reference: 97_000.0,
                expected: None,
            },
            TestCase {
                // TC3: zero shift
                fraction: 0.0,
                reference: 100_000.0,
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = apply_pan(test.fraction, current, full(), test.reference)
                .map(|range| (range.min_price, range.max_price));
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_derive_display_scale() {
        struct TestCase {
            full: f64,
            current: f64,
            expected: f64,
        }

        let tests = vec![
            TestCase {
                // TC0: full view
                full: 20_000.0,
                current: 20_000.0,
                expected: 10.0,
            },
            TestCase {
                // TC1: zoomed past the ceiling
                full: 20_000.0,
                current: 2_000.0,
                expected: 20.0,
            },
            TestCase {
                // TC2: wider than full clamps to the minimum
                full: 20_000.0,
                current: 80_000.0,
                expected: 5.0,
            },
            TestCase {
                // TC3: zero span
                full: 20_000.0,
                current: 0.0,
                expected: 20.0,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(
                derive_display_scale(test.full, test.current),
                test.expected,
                "TC{} failed",
                index
            );
        }
    }

    #[test]
    fn test_wheel_direction_and_pointer_fraction() {
        assert_eq!(WheelDirection::from_delta_y(-3.0), Some(WheelDirection::In));
        assert_eq!(WheelDirection::from_delta_y(3.0), Some(WheelDirection::Out));
        assert_eq!(WheelDirection::from_delta_y(0.0), None);

        assert_eq!(pointer_fraction(0, 101), 0.0);
        assert_eq!(pointer_fraction(50, 101), 0.5);
        assert_eq!(pointer_fraction(200, 101), 1.0);
        assert_eq!(pointer_fraction(0, 1), 0.5);
    }

    #[test]
    fn test_price_window_mixed_sequence_keeps_invariants() {
        let prices = (0..=200).map(|i| 90_000.0 + f64::from(i) * 100.0);
        let mut window = PriceWindow::new(levels(prices), 100_000.0).unwrap();
        let full = window.bounds();

        // deterministic pseudo-random walk over wheel and pan events
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let fraction = (seed % 1_000) as f64 / 999.0;
            match seed % 3 {
                0 => window.wheel(fraction, -1.0),
                1 => window.wheel(fraction, 1.0),
                _ => window.pan(fraction - 0.5),
            };
            assert_invariants(window.range(), full, window.reference());

            let visible = window.visible_levels();
            assert!(visible.iter().all(|level| window.range().contains(level.price)));
            let scale = window.display_scale();
            assert!((MIN_DISPLAY_SCALE..=MAX_DISPLAY_SCALE).contains(&scale));
        }
    }

    #[test]
    fn test_price_window_levels() {
        let mut window = PriceWindow::new(levels([110.0, 90.0, 100.0, 95.0, 105.0]), 100.0).unwrap();
        assert_eq!(window.visible_levels().len(), 5);
        assert_eq!(window.level_at_reference().map(|l| l.exchange_total()), Some(6.0));

        assert!(window.wheel(0.5, -1.0));
        let prices: Vec<f64> = window.visible_levels().iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![95.0, 100.0, 105.0]);

        window.reset(levels([1.0, 2.0, 3.0]), 2.5).unwrap();
        assert_eq!(window.range(), ZoomRange { min_price: 1.0, max_price: 3.0 });
        assert!(window.level_at_reference().is_none());
    }

    #[test]
    fn test_price_window_rejects_reference_outside_dataset() {
        let result = PriceWindow::new(levels([1.0, 2.0]), 5.0);
        assert_eq!(
            result,
            Err(WindowError::ReferenceOutOfBounds {
                reference: 5.0,
                min: 1.0,
                max: 2.0
            })
        );
    }

    #[test]
    fn test_price_grid() {
        let snapshot = LiquidationSnapshot::price_grid(50_000.0, 0.1, 151);
        assert_eq!(snapshot.levels.len(), 151);
        assert_eq!(snapshot.levels[75].price, 50_000.0);
        assert_close(snapshot.levels[0].price, 45_000.0);
        assert_close(snapshot.levels[150].price, 55_000.0);

        let window = PriceWindow::from_snapshot(snapshot).unwrap();
        assert!(window.level_at_reference().is_some());
    }
}
