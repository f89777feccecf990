/// Bollinger bands: SMA(period) ± `std_devs` × population standard deviation.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    pub period: usize,
    pub std_devs: f64,
}

/// Band values for one bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    pub fn new(period: usize, std_devs: f64) -> Self {
        assert!(period >= 2, "Bollinger period must be >= 2");
        Self { period, std_devs }
    }

    /// Bands aligned one-to-one with `closes`; `None` until `period` values exist.
    pub fn series(&self, closes: &[f64]) -> Vec<Option<Band>> {
        let mut out = vec![None; closes.len()];
        for (i, window) in closes.windows(self.period).enumerate() {
            out[i + self.period - 1] = Some(self.band(window));
        }
        out
    }

    /// Bands over the last `period` values.
    pub fn compute(&self, closes: &[f64]) -> Option<Band> {
        if closes.len() < self.period {
            return None;
        }
        Some(self.band(&closes[closes.len() - self.period..]))
    }

    fn band(&self, window: &[f64]) -> Band {
        let n = window.len() as f64;
        let middle = window.iter().sum::<f64>() / n;
        let variance = window.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / n;
        let width = variance.sqrt() * self.std_devs;
        Band {
            upper: middle + width,
            middle,
            lower: middle - width,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_prices_collapse_the_bands() {
        let bb = BollingerBands::new(5, 2.0);
        let band = bb.compute(&[10.0; 8]).unwrap();
        assert_eq!(band.upper, 10.0);
        assert_eq!(band.lower, 10.0);
    }

    #[test]
    fn bands_are_symmetric_around_the_mean() {
        let bb = BollingerBands::new(4, 2.0);
        let band = bb.compute(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((band.middle - 2.5).abs() < 1e-12);
        assert!(((band.upper - band.middle) - (band.middle - band.lower)).abs() < 1e-12);
        // population std of 1..4 is sqrt(1.25)
        assert!((band.upper - (2.5 + 2.0 * 1.25f64.sqrt())).abs() < 1e-12);
    }

    #[test]
    fn series_warmup_is_period_minus_one() {
        let bb = BollingerBands::new(3, 2.0);
        let series = bb.series(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(series.len(), 4);
        assert!(series[1].is_none());
        assert!(series[2].is_some());
        assert_eq!(series[3], bb.compute(&[1.0, 2.0, 3.0, 4.0]));
    }
}
