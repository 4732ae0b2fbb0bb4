//! 16-bit companding curves.
//!
//! A compander squeezes a continuous value in `[0,1]` through a nonlinear curve and
//! quantizes the result to a `u16` (compression), and maps a `u16` back to the continuous
//! domain (expansion). Expansion sits on the hot path of the backward pipeline, so the
//! curves that need transcendental or sqrt work are tabulated once over all 65536 codes.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// number of distinct 16-bit codes, which is also the size of an expansion table
pub const CODE_COUNT: usize = 1 << 16;

const CODE_MAX: f32 = u16::MAX as f32;

/// # Description
/// Scales `value` from `[0,1]` to `[0,65535]`, clamps and truncates
/// ## Comments
/// - NaN quantizes to 0
pub fn quantize(value: f32) -> u16 {
    (value * CODE_MAX).clamp(0.0, CODE_MAX) as u16
}

/// inverse of [`quantize`], maps a code back to `[0,1]`
pub fn dequantize(code: u16) -> f32 {
    code as f32 / CODE_MAX
}

/// # Description
/// The closed set of companding curves.
/// ## Comments
/// - the discriminant is the id stored in encoded image headers, so it must never change
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum CompandingMethod {
    /// `N-1` nested square roots, `N = params[0]`
    MonotoneSqrt = 1,
    /// `y = ln(1+ux)/ln(1+u)`, `u = params[0]`
    MuLaw = 2,
    /// rational curve with slope `u` at 0 and slope `v` at 1
    UvLaw = 3,
}

impl CompandingMethod {
    pub const ALL: [CompandingMethod; 3] = [
        CompandingMethod::MonotoneSqrt,
        CompandingMethod::MuLaw,
        CompandingMethod::UvLaw,
    ];

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            CompandingMethod::MonotoneSqrt => "sqrt",
            CompandingMethod::MuLaw => "mulaw",
            CompandingMethod::UvLaw => "uvlaw",
        }
    }

    pub fn default_params(self) -> [f32; 2] {
        match self {
            CompandingMethod::MonotoneSqrt => [1.0, 0.0],
            CompandingMethod::MuLaw => [64.0, 0.0],
            CompandingMethod::UvLaw => [256.0, 0.25],
        }
    }

    /// table-backed methods evaluate their expansion curve once for every code
    pub fn is_table_backed(self) -> bool {
        match self {
            CompandingMethod::MonotoneSqrt => false,
            CompandingMethod::MuLaw | CompandingMethod::UvLaw => true,
        }
    }
}

impl From<CompandingMethod> for u32 {
    fn from(method: CompandingMethod) -> u32 {
        method.id()
    }
}

impl TryFrom<u32> for CompandingMethod {
    type Error = Error;
    fn try_from(id: u32) -> Result<Self> {
        CompandingMethod::ALL
            .into_iter()
            .find(|m| m.id() == id)
            .ok_or(Error::UnknownCompandingMethod(id))
    }
}

impl FromStr for CompandingMethod {
    type Err = Error;
    fn from_str(name: &str) -> Result<Self> {
        CompandingMethod::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::UnknownCompandingName(name.to_string()))
    }
}

impl fmt::Display for CompandingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// constants derived once from the two raw parameters
#[derive(Copy, Clone, Debug)]
enum CurveParams {
    MonotoneSqrt { iterations: u32 },
    MuLaw { mu: f32, inv_log: f32 },
    UvLaw { alpha: f32, beta: f32, gamma: f32 },
}

impl CurveParams {
    fn derive(method: CompandingMethod, params: [f32; 2]) -> Self {
        match method {
            CompandingMethod::MonotoneSqrt => CurveParams::MonotoneSqrt {
                iterations: (params[0] as i64 - 1).max(0) as u32,
            },
            CompandingMethod::MuLaw => CurveParams::MuLaw {
                mu: params[0],
                inv_log: 1.0 / (1.0 + params[0]).ln(),
            },
            CompandingMethod::UvLaw => {
                let [u, v] = params;
                if !(u > 1.0 && v > 0.0 && v < 1.0) || u * v == 1.0 {
                    log::warn!(
                        "uv-law parameters ({}, {}) are outside 1 < u, 0 < v < 1, uv != 1; \
                         expansion may not invert compression",
                        u,
                        v
                    );
                }
                let gamma = (u * v - 1.0) / (u + v - 2.0);
                CurveParams::UvLaw {
                    alpha: 1.0 / (u - gamma),
                    beta: 1.0 / (1.0 - gamma),
                    gamma,
                }
            }
        }
    }

    fn compress(&self, x: f32) -> f32 {
        match *self {
            CurveParams::MonotoneSqrt { iterations } => {
                (0..iterations).fold(x, |acc, _| acc.sqrt())
            }
            CurveParams::MuLaw { mu, inv_log } => (1.0 + mu * x).ln() * inv_log,
            CurveParams::UvLaw { alpha, beta, gamma } => {
                x / ((beta - alpha) * x + alpha) + gamma * x
            }
        }
    }

    fn expand(&self, y: f32) -> f32 {
        match *self {
            CurveParams::MonotoneSqrt { iterations } => (0..iterations).fold(y, |acc, _| acc * acc),
            CurveParams::MuLaw { mu, .. } => ((1.0 + mu).powf(y) - 1.0) / mu,
            CurveParams::UvLaw { alpha, beta, gamma } => {
                // x/((b-a)x+a) + gx = y, rearranged as a quadratic in x.
                // The negative root is the in-range one for u > 1 > v > 0.
                let a = gamma * (alpha - beta);
                let b = y * (beta - alpha) - gamma * alpha - 1.0;
                let c = y * alpha;
                (-b - (b * b - 4.0 * a * c).sqrt()) / (2.0 * a)
            }
        }
    }
}

/// # Description
/// A companding method bound to its parameters.
/// ## Comments
/// - immutable once built, share it between workers with an `Arc`
/// - table-backed methods carry a 65536 entry expansion table (256 KiB)
pub struct Compander {
    method: CompandingMethod,
    params: [f32; 2],
    curve: CurveParams,
    expansion_table: Option<Box<[f32]>>,
}

impl Compander {
    pub fn new(method: CompandingMethod, params: [f32; 2]) -> Self {
        let curve = CurveParams::derive(method, params);
        let expansion_table = method.is_table_backed().then(|| {
            (0..CODE_COUNT)
                .map(|code| curve.expand(dequantize(code as u16)))
                .collect::<Vec<_>>()
                .into_boxed_slice()
        });
        Self {
            method,
            params,
            curve,
            expansion_table,
        }
    }

    pub fn with_default_params(method: CompandingMethod) -> Self {
        Self::new(method, method.default_params())
    }

    pub fn method(&self) -> CompandingMethod {
        self.method
    }

    pub fn params(&self) -> [f32; 2] {
        self.params
    }

    pub fn compress_sample(&self, x: f32) -> u16 {
        quantize(self.curve.compress(x))
    }

    pub fn expand_sample(&self, code: u16) -> f32 {
        match &self.expansion_table {
            Some(table) => table[code as usize],
            None => self.curve.expand(dequantize(code)),
        }
    }

    /// compresses `input` into `output`, element by element
    pub fn compress(&self, input: &[f32], output: &mut [u16]) {
        for (code, &x) in output.iter_mut().zip(input) {
            *code = self.compress_sample(x);
        }
    }

    /// expands `input` into `output`, element by element
    pub fn expand(&self, input: &[u16], output: &mut [f32]) {
        match &self.expansion_table {
            Some(table) => {
                for (x, &code) in output.iter_mut().zip(input) {
                    *x = table[code as usize];
                }
            }
            None => {
                for (x, &code) in output.iter_mut().zip(input) {
                    *x = self.curve.expand(dequantize(code));
                }
            }
        }
    }
}

impl fmt::Debug for Compander {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compander")
            .field("method", &self.method)
            .field("params", &self.params)
            .field("table_backed", &self.expansion_table.is_some())
            .finish()
    }
}
