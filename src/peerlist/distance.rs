// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Great-circle distance via the spherical law of cosines, scaled by
//! 111 320 m/degree.

const METERS_PER_DEGREE: f64 = 111_320.0;

/// Distance in meters between `(lat1, lon1)` and `(lat2, lon2)`, both in
/// degrees.
pub fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    if (lat1 - lat2).abs() < f64::EPSILON && (lon1 - lon2).abs() < f64::EPSILON {
        return 0.0;
    }

    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();
    let dlon_r = (lon1 - lon2).to_radians();

    let cos_angle = lat1_r.sin() * lat2_r.sin() + lat1_r.cos() * lat2_r.cos() * dlon_r.cos();
    let angle_deg = cos_angle.clamp(-1.0, 1.0).acos().to_degrees();
    angle_deg * METERS_PER_DEGREE
}
