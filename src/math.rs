pub mod compander;
pub mod window;

pub use compander::*;
pub use window::*;

/// # Description
/// root-mean-square of the difference between two signals, over their common length
pub fn rms_error(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let sum = a
        .iter()
        .zip(b.iter())
        .fold(0.0f64, |acc, (&y, &y_est)| acc + ((y - y_est) as f64).powi(2));
    (sum / n as f64).sqrt() as f32
}

/// root-mean-square level of a signal
pub fn rms(a: &[f32]) -> f32 {
    if a.is_empty() {
        return 0.0;
    }
    let sum = a.iter().fold(0.0f64, |acc, &y| acc + (y as f64).powi(2));
    (sum / a.len() as f64).sqrt() as f32
}
