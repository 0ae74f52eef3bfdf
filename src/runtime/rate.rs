//! Rate relationships between a block's inputs and outputs
//!
//! All rate math is a pure function of the [`Rate`] tag, the requested counts
//! and the block's history. `history` follows the usual convention: a history
//! of `H` means each window carries `H - 1` look-back items, so `H = 1` is
//! "no look-back".

/// How many input items a block needs per output item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rate {
    /// One input item per output item on every port
    Sync,
    /// `n` input items per output item
    Decimate(usize),
    /// `n` output items per input item
    Interpolate(usize),
    /// No fixed ratio; the block's `forecast()` is the only contract
    General,
}

impl Rate {
    /// Whether the ratio is fixed (anything but `General`)
    pub fn is_fixed(&self) -> bool {
        !matches!(self, Rate::General)
    }

    /// Granularity of output counts implied by the rate
    pub fn output_multiple(&self) -> usize {
        match self {
            Rate::Interpolate(i) => (*i).max(1),
            _ => 1,
        }
    }

    /// Input items (look-back included) needed to produce `noutput_items`
    ///
    /// `None` for `General`, which must be asked through its forecast.
    pub fn required_input(&self, noutput_items: usize, history: usize) -> Option<usize> {
        let look_back = history.saturating_sub(1);
        let new_items = match self {
            Rate::Sync => noutput_items,
            Rate::Decimate(d) => noutput_items.saturating_mul(*d),
            Rate::Interpolate(i) => noutput_items.div_ceil((*i).max(1)),
            Rate::General => return None,
        };
        Some(new_items.saturating_add(look_back))
    }

    /// Output items that `ninput_items` available items (look-back included) allow
    pub fn output_for_input(&self, ninput_items: usize, history: usize) -> Option<usize> {
        let new_items = ninput_items.saturating_sub(history.saturating_sub(1));
        match self {
            Rate::Sync => Some(new_items),
            Rate::Decimate(d) => Some(new_items / (*d).max(1)),
            Rate::Interpolate(i) => Some(new_items.saturating_mul(*i)),
            Rate::General => None,
        }
    }

    /// New input items consumed when `produced` output items are committed
    pub fn consumed_for(&self, produced: usize) -> Option<usize> {
        match self {
            Rate::Sync => Some(produced),
            Rate::Decimate(d) => Some(produced.saturating_mul(*d)),
            Rate::Interpolate(i) => Some(produced / (*i).max(1)),
            Rate::General => None,
        }
    }

    /// Default forecast: new items needed per input (look-back excluded)
    ///
    /// For `General` this assumes one-to-one, which blocks are expected to override.
    pub fn forecast(&self, noutput_items: usize, ninputs: usize) -> Vec<usize> {
        let per_input = self.required_input(noutput_items, 1).unwrap_or(noutput_items);
        vec![per_input; ninputs]
    }

    /// Output items per input item, if fixed
    pub fn relative_rate(&self) -> Option<f64> {
        match self {
            Rate::Sync => Some(1.0),
            Rate::Decimate(d) => Some(1.0 / *d as f64),
            Rate::Interpolate(i) => Some(*i as f64),
            Rate::General => None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            Rate::Decimate(0) => Err("decimation factor must be at least 1".to_string()),
            Rate::Interpolate(0) => Err("interpolation factor must be at least 1".to_string()),
            _ => Ok(()),
        }
    }
}

/// Round `n` down to a multiple of `multiple`
pub(crate) fn round_down(n: usize, multiple: usize) -> usize {
    let multiple = multiple.max(1);
    n - n % multiple
}

/// Least common multiple, used to combine output multiples
pub(crate) fn lcm(a: usize, b: usize) -> usize {
    fn gcd(mut a: usize, mut b: usize) -> usize {
        while b != 0 {
            (a, b) = (b, a % b);
        }
        a
    }
    let (a, b) = (a.max(1), b.max(1));
    a / gcd(a, b) * b
}
