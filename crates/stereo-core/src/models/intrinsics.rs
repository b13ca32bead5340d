use nalgebra::{Matrix3, RealField, Vector2};
use serde::{Deserialize, Serialize};

/// Intrinsics that map normalized (distorted) coordinates to pixels.
pub trait IntrinsicsModel<S: RealField + Copy> {
    /// Convert normalized image-plane coordinates into pixel coordinates.
    fn to_pixel(&self, n: &Vector2<S>) -> Vector2<S>;
    /// Convert pixel coordinates into normalized image-plane coordinates.
    fn from_pixel(&self, pixel: &Vector2<S>) -> Vector2<S>;
}

/// Standard pinhole intrinsics with optional skew.
///
/// The corresponding calibration matrix `K` has the form:
///
/// ```text
/// [ fx  skew  cx ]
/// [  0   fy   cy ]
/// [  0    0    1 ]
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FxFyCxCySkew<S: RealField + Copy> {
    /// Focal length in pixels along X.
    pub fx: S,
    /// Focal length in pixels along Y.
    pub fy: S,
    /// Principal point X coordinate in pixels.
    pub cx: S,
    /// Principal point Y coordinate in pixels.
    pub cy: S,
    /// Skew term (typically 0).
    pub skew: S,
}

impl<S: RealField + Copy> FxFyCxCySkew<S> {
    /// Return the 3x3 camera intrinsics matrix K.
    pub fn k_matrix(&self) -> Matrix3<S> {
        Matrix3::new(
            self.fx,
            self.skew,
            self.cx,
            S::zero(),
            self.fy,
            self.cy,
            S::zero(),
            S::zero(),
            S::one(),
        )
    }

    /// Attempt to construct intrinsics from a 3×3 calibration matrix `K`.
    ///
    /// The matrix is first normalised so that `K[2, 2] == 1`, then checked
    /// against the upper-triangular form above. Returns `None` when the
    /// structure does not match within `eps` or a focal length is not
    /// positive.
    pub fn try_from_k_matrix(k: &Matrix3<S>, eps: S) -> Option<Self> {
        let k33 = k[(2, 2)];
        if k33.abs() < eps {
            return None;
        }
        let k_norm = k / k33;

        if k_norm[(1, 0)].abs() > eps || k_norm[(2, 0)].abs() > eps || k_norm[(2, 1)].abs() > eps {
            return None;
        }
        if k_norm[(0, 0)] <= S::zero() || k_norm[(1, 1)] <= S::zero() {
            return None;
        }

        Some(Self {
            fx: k_norm[(0, 0)],
            skew: k_norm[(0, 1)],
            cx: k_norm[(0, 2)],
            fy: k_norm[(1, 1)],
            cy: k_norm[(1, 2)],
        })
    }
}

impl<S: RealField + Copy> IntrinsicsModel<S> for FxFyCxCySkew<S> {
    fn to_pixel(&self, n: &Vector2<S>) -> Vector2<S> {
        let u = self.fx * n.x + self.skew * n.y + self.cx;
        let v = self.fy * n.y + self.cy;
        Vector2::new(u, v)
    }

    fn from_pixel(&self, pixel: &Vector2<S>) -> Vector2<S> {
        let ny = (pixel.y - self.cy) / self.fy;
        let nx = (pixel.x - self.cx - self.skew * ny) / self.fx;
        Vector2::new(nx, ny)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn k_matrix_roundtrip() {
        let k = FxFyCxCySkew {
            fx: 900.0,
            fy: 880.0,
            cx: 640.0,
            cy: 360.0,
            skew: 0.5,
        };
        let back = FxFyCxCySkew::try_from_k_matrix(&(k.k_matrix() * 3.0), 1e-9).unwrap();
        assert_eq!(back, k);
    }

    #[test]
    fn non_triangular_matrix_is_rejected() {
        let mut m = Matrix3::<f64>::identity();
        m[(1, 0)] = 0.3;
        assert!(FxFyCxCySkew::try_from_k_matrix(&m, 1e-9).is_none());
    }
}
