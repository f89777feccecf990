/// MACD (Moving Average Convergence/Divergence) indicator.
///
/// Computes: MACD line = EMA(fast) − EMA(slow), Signal = EMA(macd_line, signal_period).
#[derive(Debug, Clone)]
pub struct MacdIndicator {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

/// MACD values aligned one-to-one with the input prices.
#[derive(Debug, Clone, Default)]
pub struct MacdSeries {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

impl MacdSeries {
    /// Latest `(macd, signal)` pair, if both are warmed up.
    pub fn latest(&self) -> Option<(f64, f64)> {
        let macd = self.macd.last().copied().flatten()?;
        let signal = self.signal.last().copied().flatten()?;
        Some((macd, signal))
    }
}

impl MacdIndicator {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast >= 1 && signal >= 1, "MACD periods must be positive");
        assert!(fast < slow, "MACD fast period must be less than slow period");
        Self { fast, slow, signal }
    }

    /// Number of prices before the signal line has a value.
    pub fn warmup(&self) -> usize {
        self.slow + self.signal - 1
    }

    /// Full MACD, signal and histogram series.
    pub fn series(&self, closes: &[f64]) -> MacdSeries {
        let len = closes.len();
        let fast = ema_series(closes, self.fast);
        let slow = ema_series(closes, self.slow);

        let macd: Vec<Option<f64>> = fast
            .iter()
            .zip(&slow)
            .map(|(f, s)| Some((*f)? - (*s)?))
            .collect();

        let mut signal = vec![None; len];
        if len >= self.slow {
            let defined: Vec<f64> = macd.iter().flatten().copied().collect();
            let offset = len - defined.len();
            for (i, value) in ema_series(&defined, self.signal).into_iter().enumerate() {
                signal[offset + i] = value;
            }
        }

        let histogram = macd
            .iter()
            .zip(&signal)
            .map(|(m, s)| Some((*m)? - (*s)?))
            .collect();

        MacdSeries { macd, signal, histogram }
    }
}

/// EMA aligned with `data`, seeded with the SMA of the first `period` values.
pub fn ema_series(data: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; data.len()];
    if period == 0 || data.len() < period {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = data[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(ema);
    for (i, &price) in data.iter().enumerate().skip(period) {
        ema = price * k + ema * (1.0 - k);
        out[i] = Some(ema);
    }
    out
}
