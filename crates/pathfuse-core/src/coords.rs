//! Geodetic / ECEF / local East-North-Up conversions on the WGS84 ellipsoid.
//!
//! Geodetic latitude and longitude are always degrees; ECEF and ENU are
//! meters. All functions are pure. Points at the poles are not treated
//! specially.

use core::f64::consts::{FRAC_PI_2, PI, TAU};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// WGS84
// ---------------------------------------------------------------------------
type Scalar = f64;
type Vector3r = Vector3<Scalar>;

pub const WGS84_A: Scalar = 6_378_137.0;
pub const WGS84_B: Scalar = 6_356_752.314_245;

const E2: Scalar = 1.0 - (WGS84_B * WGS84_B) / (WGS84_A * WGS84_A);
const EP2: Scalar = (WGS84_A * WGS84_A) / (WGS84_B * WGS84_B) - 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geodetic {
    pub latitude: Scalar,
    pub longitude: Scalar,
    pub altitude: Scalar,
}

/// Session anchor for every ENU computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceFrame {
    pub ref_latitude: Scalar,
    pub ref_longitude: Scalar,
    pub ref_altitude: Scalar,
    pub ecef_ref: Vector3r,
}

impl ReferenceFrame {
    pub fn new(lat_deg: Scalar, lon_deg: Scalar, alt_m: Scalar) -> Self {
        Self {
            ref_latitude: lat_deg,
            ref_longitude: lon_deg,
            ref_altitude: alt_m,
            ecef_ref: geodetic_to_ecef(lat_deg, lon_deg, alt_m),
        }
    }
}

// ---------------------------------------------------------------------------
// CONVERSIONS
// ---------------------------------------------------------------------------
pub fn geodetic_to_ecef(lat_deg: Scalar, lon_deg: Scalar, alt_m: Scalar) -> Vector3r {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();

    // Prime vertical radius a² / sqrt(a² cos² + b² sin²)
    let n = WGS84_A * WGS84_A / (WGS84_A * cos_lat).hypot(WGS84_B * sin_lat);

    Vector3r::new(
        (n + alt_m) * cos_lat * lon.cos(),
        (n + alt_m) * cos_lat * lon.sin(),
        ((WGS84_B * WGS84_B) / (WGS84_A * WGS84_A) * n + alt_m) * sin_lat,
    )
}

/// Rotates a local ENU offset into ECEF and adds the reference origin.
pub fn enu_to_ecef(enu: Vector3r, reference: &ReferenceFrame) -> Vector3r {
    reference.ecef_ref + enu_rotation(reference).transpose() * enu
}

pub fn ecef_to_enu(ecef: Vector3r, reference: &ReferenceFrame) -> Vector3r {
    enu_rotation(reference) * (ecef - reference.ecef_ref)
}

/// Closed-form (Bowring) ECEF to geodetic conversion.
///
/// The returned longitude lies in `[0, 360)`.
pub fn ecef_to_geodetic(ecef: Vector3r) -> Geodetic {
    let (x, y, z) = (ecef.x, ecef.y, ecef.z);
    let p = x.hypot(y);

    let theta = (z * WGS84_A).atan2(p * WGS84_B);
    let (sin_t, cos_t) = theta.sin_cos();
    let lat = (z + EP2 * WGS84_B * sin_t.powi(3)).atan2(p - E2 * WGS84_A * cos_t.powi(3));

    let mut lon = y.atan2(x);
    if lon < 0.0 {
        lon += TAU;
    }
    if lon >= TAU {
        lon -= TAU;
    }

    let (sin_lat, cos_lat) = lat.sin_cos();
    let altitude = p * cos_lat + z * sin_lat - WGS84_A * (1.0 - E2 * sin_lat * sin_lat).sqrt();

    Geodetic {
        latitude: lat.to_degrees(),
        longitude: lon.to_degrees(),
        altitude,
    }
}

pub fn enu_to_geodetic(enu: Vector3r, reference: &ReferenceFrame) -> Geodetic {
    ecef_to_geodetic(enu_to_ecef(enu, reference))
}

pub fn geodetic_to_enu(
    lat_deg: Scalar,
    lon_deg: Scalar,
    alt_m: Scalar,
    reference: &ReferenceFrame,
) -> Vector3r {
    ecef_to_enu(geodetic_to_ecef(lat_deg, lon_deg, alt_m), reference)
}

// ECEF -> ENU rotation for the reference latitude/longitude.
fn enu_rotation(reference: &ReferenceFrame) -> nalgebra::Matrix3<Scalar> {
    let (sin_lat, cos_lat) = reference.ref_latitude.to_radians().sin_cos();
    let (sin_lon, cos_lon) = reference.ref_longitude.to_radians().sin_cos();
    nalgebra::Matrix3::new(
        -sin_lon,
        cos_lon,
        0.0,
        -sin_lat * cos_lon,
        -sin_lat * sin_lon,
        cos_lat,
        cos_lat * cos_lon,
        cos_lat * sin_lon,
        sin_lat,
    )
}

// ---------------------------------------------------------------------------
// ANGLES
// ---------------------------------------------------------------------------

/// Wraps an angle into `(-π, π]`.
pub fn wrap_to_pi(angle: Scalar) -> Scalar {
    if !angle.is_finite() {
        return angle;
    }
    let mut a = angle % TAU;
    if a > PI {
        a -= TAU;
    } else if a <= -PI {
        a += TAU;
    }
    a
}

/// Converts a compass heading (north = 0, clockwise) to a math bearing
/// (east = 0, counter-clockwise) in `(-π, π]`.
pub fn compass_to_east_zero(heading: Scalar) -> Scalar {
    wrap_to_pi(FRAC_PI_2 - heading)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn lon_diff_deg(a: f64, b: f64) -> f64 {
        wrap_to_pi((a - b).to_radians()).to_degrees().abs()
    }

    #[test]
    fn test_geodetic_round_trip() {
        let cases = [
            (55.9228, -3.1746, 80.0),
            (0.0, 0.0, 0.0),
            (-33.8688, 151.2093, 58.0),
            (88.5, 45.0, 1200.0),
            (-88.9, -179.9, -30.0),
            (37.7749, -122.4194, 16.0),
        ];
        for (lat, lon, alt) in cases {
            let back = ecef_to_geodetic(geodetic_to_ecef(lat, lon, alt));
            assert!((back.latitude - lat).abs() < 1e-6, "lat {lat} -> {}", back.latitude);
            assert!(lon_diff_deg(back.longitude, lon) < 1e-6, "lon {lon} -> {}", back.longitude);
            assert!((back.altitude - alt).abs() < 1e-3);
        }
    }

    #[test]
    fn test_longitude_is_wrapped_positive() {
        let g = ecef_to_geodetic(geodetic_to_ecef(10.0, -90.0, 0.0));
        assert!(g.longitude >= 0.0 && g.longitude < 360.0);
        assert_relative_eq!(g.longitude, 270.0, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_enu_returns_anchor() {
        let frame = ReferenceFrame::new(55.9228, 3.1746, 80.0);
        let g = enu_to_geodetic(Vector3::zeros(), &frame);
        assert_relative_eq!(g.latitude, 55.9228, epsilon = 1e-9);
        assert_relative_eq!(g.longitude, 3.1746, epsilon = 1e-9);
        assert_relative_eq!(g.altitude, 80.0, epsilon = 1e-6);
    }

    #[test]
    fn test_enu_axes() {
        let frame = ReferenceFrame::new(45.0, 7.0, 200.0);
        let north = enu_to_geodetic(Vector3::new(0.0, 100.0, 0.0), &frame);
        let east = enu_to_geodetic(Vector3::new(100.0, 0.0, 0.0), &frame);
        assert!(north.latitude > 45.0);
        assert_relative_eq!(north.longitude, 7.0, epsilon = 1e-9);
        assert!(east.longitude > 7.0);
        assert_relative_eq!(east.latitude, 45.0, epsilon = 1e-5);

        let enu = geodetic_to_enu(east.latitude, east.longitude, east.altitude, &frame);
        assert_relative_eq!(enu.x, 100.0, epsilon = 1e-6);
        assert_relative_eq!(enu.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(enu.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_wrap_to_pi() {
        assert_relative_eq!(wrap_to_pi(3.0 * PI - 0.1), PI - 0.1, epsilon = 1e-12);
        assert_relative_eq!(wrap_to_pi(-PI), PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_to_pi(-3.0 * PI / 2.0), PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(wrap_to_pi(0.25), 0.25);
        for k in -20..20 {
            let a = wrap_to_pi(k as f64 * 0.77);
            assert!(a > -PI && a <= PI);
        }
    }

    #[test]
    fn test_compass_to_east_zero() {
        assert_relative_eq!(compass_to_east_zero(0.0), FRAC_PI_2, epsilon = 1e-12);
        assert_relative_eq!(compass_to_east_zero(FRAC_PI_2), 0.0, epsilon = 1e-12);
        assert_relative_eq!(compass_to_east_zero(PI), -FRAC_PI_2, epsilon = 1e-12);
    }
}
