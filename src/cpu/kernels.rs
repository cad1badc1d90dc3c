// 3D SPH smoothing kernels, all zero outside the support radius h
use std::f32::consts::PI;

use glam::Vec3;

#[inline]
pub fn w_poly6(r2: f32, h: f32) -> f32 {
    let h2 = h * h;
    if r2 >= 0.0 && r2 < h2 {
        let k = 315.0 / (64.0 * PI * h.powi(9));
        k * (h2 - r2).powi(3)
    } else { 0.0 }
}

#[inline]
pub fn grad_spiky_kernel(r: Vec3, h: f32) -> Vec3 {
    let r_len = r.length();
    if r_len <= 1e-6 || r_len >= h {
        Vec3::ZERO
    } else {
        let k = -45.0 / (PI * h.powi(6));
        k * (h - r_len).powi(2) * (r / r_len)
    }
}

/// Tensile instability term: -k * (W(r) / W(dq))^n, with dq given as a fraction of h.
#[derive(Clone, Copy, Debug)]
pub struct TensileCorrection {
    pub k: f32,
    pub n: i32,
    inv_w_dq: f32,
}

impl TensileCorrection {
    pub fn new(k: f32, n: i32, delta_q: f32, h: f32) -> Self {
        let dq = delta_q * h;
        let w_dq = w_poly6(dq * dq, h);
        let inv_w_dq = if w_dq > 0.0 { 1.0 / w_dq } else { 0.0 };
        Self { k, n, inv_w_dq }
    }

    #[inline]
    pub fn s_corr(&self, r2: f32, h: f32) -> f32 {
        -self.k * (w_poly6(r2, h) * self.inv_w_dq).powi(self.n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poly6_vanishes_at_support() {
        let h = 0.1;
        assert_eq!(w_poly6(h * h, h), 0.0);
        assert_eq!(w_poly6(4.0 * h * h, h), 0.0);
        assert!(w_poly6(0.0, h) > w_poly6(0.25 * h * h, h));
    }

    #[test]
    fn spiky_gradient_points_towards_the_neighbor() {
        let h = 0.1;
        // r = p_i - p_j, gradient pulls p_i back towards p_j
        let g = grad_spiky_kernel(Vec3::new(0.05, 0.0, 0.0), h);
        assert!(g.x < 0.0);
        assert_eq!(g.y, 0.0);
        assert_eq!(grad_spiky_kernel(Vec3::ZERO, h), Vec3::ZERO);
        assert_eq!(grad_spiky_kernel(Vec3::new(0.2, 0.0, 0.0), h), Vec3::ZERO);
    }

    #[test]
    fn s_corr_is_minus_k_at_reference_spacing() {
        let h = 0.1;
        let t = TensileCorrection::new(0.1, 4, 0.2, h);
        let dq = 0.2 * h;
        assert!((t.s_corr(dq * dq, h) + 0.1).abs() < 1e-5);
        assert!(t.s_corr(0.0, h) < t.s_corr(dq * dq, h));
        assert_eq!(t.s_corr(h * h, h), 0.0);
    }
}
