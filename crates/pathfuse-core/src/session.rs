//! Per-session anchor shared by every component that needs ENU coordinates.

use crate::coords::{enu_to_geodetic, geodetic_to_enu, Geodetic, ReferenceFrame};
use crate::error::{FusionError, Result};
use nalgebra::{Vector2, Vector3};
use std::sync::OnceLock;
use tracing::info;

/// Holds the session reference frame. It is set at most once and is
/// read-only afterwards, so it can be shared behind an `Arc` without locks.
#[derive(Debug, Default)]
pub struct SessionContext {
    reference: OnceLock<ReferenceFrame>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reference(lat_deg: f64, lon_deg: f64, alt_m: f64) -> Self {
        let ctx = Self::new();
        // A fresh context has no reference yet.
        let _ = ctx.reference.set(ReferenceFrame::new(lat_deg, lon_deg, alt_m));
        ctx
    }

    pub fn establish_reference(&self, lat_deg: f64, lon_deg: f64, alt_m: f64) -> Result<()> {
        self.reference
            .set(ReferenceFrame::new(lat_deg, lon_deg, alt_m))
            .map_err(|_| FusionError::ReferenceAlreadyEstablished)?;
        info!(lat_deg, lon_deg, alt_m, "session reference established");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.reference.get().is_some()
    }

    pub fn reference(&self) -> Result<&ReferenceFrame> {
        self.reference.get().ok_or(FusionError::NotInitialized)
    }

    /// Horizontal ENU offset of a fix at the reference altitude.
    pub fn to_enu(&self, lat_deg: f64, lon_deg: f64) -> Result<Vector2<f64>> {
        let reference = self.reference()?;
        let enu = geodetic_to_enu(lat_deg, lon_deg, reference.ref_altitude, reference);
        Ok(Vector2::new(enu.x, enu.y))
    }

    pub fn to_geodetic(&self, enu: Vector2<f64>) -> Result<Geodetic> {
        let reference = self.reference()?;
        Ok(enu_to_geodetic(Vector3::new(enu.x, enu.y, 0.0), reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_missing_reference_fails_fast() {
        let ctx = SessionContext::new();
        assert!(!ctx.is_initialized());
        assert_eq!(ctx.reference().err(), Some(FusionError::NotInitialized));
        assert_eq!(ctx.to_enu(1.0, 2.0).err(), Some(FusionError::NotInitialized));
        assert_eq!(
            ctx.to_geodetic(Vector2::zeros()).err(),
            Some(FusionError::NotInitialized)
        );
    }

    #[test]
    fn test_reference_is_set_once() {
        let ctx = SessionContext::new();
        ctx.establish_reference(47.0, 8.0, 400.0).unwrap();
        assert_eq!(
            ctx.establish_reference(0.0, 0.0, 0.0),
            Err(FusionError::ReferenceAlreadyEstablished)
        );
        assert_relative_eq!(ctx.reference().unwrap().ref_latitude, 47.0);
    }

    #[test]
    fn test_anchor_maps_to_origin_and_back() {
        let ctx = SessionContext::with_reference(47.0, 8.0, 400.0);
        let enu = ctx.to_enu(47.0, 8.0).unwrap();
        assert!(enu.norm() < 1e-6);

        let geo = ctx.to_geodetic(Vector2::new(10.0, -5.0)).unwrap();
        let back = ctx.to_enu(geo.latitude, geo.longitude).unwrap();
        assert_relative_eq!(back.x, 10.0, epsilon = 1e-3);
        assert_relative_eq!(back.y, -5.0, epsilon = 1e-3);
    }
}
