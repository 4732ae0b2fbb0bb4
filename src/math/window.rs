//! Analysis/synthesis window curves.

use std::{f64::consts::PI, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// # Description
/// The closed set of window shapes.
/// ## Comments
/// - the discriminant is the id stored in encoded image headers
/// - unknown ids and names fall back to `Rectangular` instead of failing
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", from = "u32")]
pub enum WindowShape {
    Rectangular = 0,
    Triangular = 1,
    Hann = 2,
    Hamming = 3,
    Blackman = 4,
    BlackmanHarris = 5,
}

impl WindowShape {
    pub const ALL: [WindowShape; 6] = [
        WindowShape::Rectangular,
        WindowShape::Triangular,
        WindowShape::Hann,
        WindowShape::Hamming,
        WindowShape::Blackman,
        WindowShape::BlackmanHarris,
    ];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            WindowShape::Rectangular => "rectangular",
            WindowShape::Triangular => "triangular",
            WindowShape::Hann => "hann",
            WindowShape::Hamming => "hamming",
            WindowShape::Blackman => "blackman",
            WindowShape::BlackmanHarris => "blackmanharris",
        }
    }

    /// evaluates the window at `x` in `[0,1]`
    pub fn evaluate(self, x: f64) -> f64 {
        match self {
            WindowShape::Rectangular => 1.0,
            WindowShape::Triangular => 1.0 - (2.0 * x - 1.0).abs(),
            WindowShape::Hann => {
                let s = (PI * x).sin();
                s * s
            }
            WindowShape::Hamming => {
                let a0 = 25.0 / 46.0;
                a0 - (1.0 - a0) * (2.0 * PI * x).cos()
            }
            WindowShape::Blackman => {
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            }
            WindowShape::BlackmanHarris => {
                0.35875 - 0.48829 * (2.0 * PI * x).cos() + 0.14128 * (4.0 * PI * x).cos()
                    - 0.01168 * (6.0 * PI * x).cos()
            }
        }
    }

    /// # Description
    /// Samples the window at `x = i/(len-1)` for `i` in `0..len`
    pub fn make(self, len: usize) -> Vec<f32> {
        let denom = len.saturating_sub(1).max(1) as f64;
        (0..len)
            .map(|i| self.evaluate(i as f64 / denom) as f32)
            .collect()
    }
}

impl Default for WindowShape {
    fn default() -> Self {
        WindowShape::Rectangular
    }
}

impl From<u32> for WindowShape {
    fn from(id: u32) -> Self {
        WindowShape::ALL
            .into_iter()
            .find(|w| w.id() == id)
            .unwrap_or_default()
    }
}

impl From<WindowShape> for u32 {
    fn from(shape: WindowShape) -> u32 {
        shape.id()
    }
}

impl FromStr for WindowShape {
    type Err = std::convert::Infallible;
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let shape = match name.to_ascii_lowercase().as_str() {
            "none" => WindowShape::Rectangular,
            name => WindowShape::ALL
                .into_iter()
                .find(|w| w.name() == name)
                .unwrap_or_default(),
        };
        Ok(shape)
    }
}

impl fmt::Display for WindowShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// # Description
/// Builds the synthesis normalization curve for 50% overlap-add:
/// `1 / (w[i]^2 + w[(i + len/2) % len]^2)`
/// ## Comments
/// - the synthesis pass applies `window` twice in total (analysis and synthesis), so the
/// squared contributions of two neighbouring frames are what has to be divided out
pub fn overlap_add_normalization(window: &[f32]) -> Vec<f32> {
    let len = window.len();
    let hop = len / 2;
    (0..len)
        .map(|i| {
            let a = window[i];
            let b = window[(i + hop) % len];
            1.0 / (a * a + b * b)
        })
        .collect()
}
