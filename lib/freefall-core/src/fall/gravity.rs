use std::collections::BTreeMap;

use snafu::Snafu;

/// Conversion factor from meters per second to miles per hour.
pub const MPS_TO_MPH: f64 = 2.23693629;

/// Errors for requests outside of the computable domain.
#[derive(Debug, Snafu, PartialEq)]
#[snafu(context(suffix(false)))]
pub enum DropError {
    /// The body has no known gravitational acceleration.
    #[snafu(display("Unknown body '{}'.", body))]
    UnknownBody {
        /// The requested body.
        body: String,
    },

    /// The distance is negative.
    #[snafu(display("Distance must not be negative, got {}.", distance))]
    NegativeDistance {
        /// The requested distance, in meters.
        distance: f64,
    },

    /// The distance is NaN or infinite.
    #[snafu(display("Distance must be a finite number, got {}.", distance))]
    NonFiniteDistance {
        /// The requested distance, in meters.
        distance: f64,
    },

    /// A gravity table entry has an unusable acceleration.
    #[snafu(display("Acceleration for '{}' must be finite and positive, got {}.", body, acceleration))]
    InvalidAcceleration {
        /// The body being added to the table.
        body: String,

        /// The rejected acceleration, in m/s².
        acceleration: f64,
    },
}

/// Gravitational accelerations, in m/s², keyed by body symbol.
///
/// The default table knows about `earth`, `moon` and `mars`. Body symbols are matched exactly.
#[derive(Clone, Debug, PartialEq)]
pub struct GravityTable {
    bodies: BTreeMap<String, f64>,
}

impl GravityTable {
    /// Creates a table with no bodies.
    pub fn empty() -> Self {
        Self {
            bodies: BTreeMap::new(),
        }
    }

    /// Adds or replaces a body.
    ///
    /// # Errors
    ///
    /// If `acceleration` is not a finite, positive number, an error is returned.
    pub fn insert<S: Into<String>>(&mut self, body: S, acceleration: f64) -> Result<Option<f64>, DropError> {
        let body = body.into();
        if !acceleration.is_finite() || acceleration <= 0.0 {
            return Err(DropError::InvalidAcceleration { body, acceleration });
        }

        Ok(self.bodies.insert(body, acceleration))
    }

    /// Builder-style variant of [`insert`][Self::insert].
    ///
    /// # Errors
    ///
    /// If `acceleration` is not a finite, positive number, an error is returned.
    pub fn with_body<S: Into<String>>(mut self, body: S, acceleration: f64) -> Result<Self, DropError> {
        self.insert(body, acceleration)?;
        Ok(self)
    }

    /// Returns the acceleration for `body`, if known.
    pub fn acceleration(&self, body: &str) -> Option<f64> {
        self.bodies.get(body).copied()
    }

    /// Iterates over all bodies and their accelerations, in symbol order.
    pub fn bodies(&self) -> impl Iterator<Item = (&str, f64)> {
        self.bodies.iter().map(|(body, accel)| (body.as_str(), *accel))
    }

    /// Computes the velocity, in m/s, reached after falling `distance` meters on `body`.
    ///
    /// `velocity = sqrt(2 * g * distance)`.
    ///
    /// # Errors
    ///
    /// If `body` is unknown, or `distance` is negative or not finite, an error is returned.
    pub fn fall_velocity(&self, body: &str, distance: f64) -> Result<f64, DropError> {
        if !distance.is_finite() {
            return Err(DropError::NonFiniteDistance { distance });
        }
        if distance < 0.0 {
            return Err(DropError::NegativeDistance { distance });
        }
        // `-0.0` passes the sign check, and its square root is `-0.0`.
        let distance = distance.abs();

        let acceleration = self
            .acceleration(body)
            .ok_or_else(|| DropError::UnknownBody { body: body.to_string() })?;

        Ok((2.0 * acceleration * distance).sqrt())
    }
}

impl Default for GravityTable {
    fn default() -> Self {
        let bodies = [("earth", 9.8), ("moon", 1.6), ("mars", 3.71)]
            .into_iter()
            .map(|(body, accel)| (body.to_string(), accel))
            .collect();

        Self { bodies }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-3,
            "expected {} to be close to {}",
            actual,
            expected
        );
    }

    #[test]
    fn earth_twenty_meters() {
        let velocity = GravityTable::default().fall_velocity("earth", 20.0).unwrap();
        assert_close(velocity, 19.799);
        assert_close(velocity * MPS_TO_MPH, 44.289);
    }

    #[test]
    fn moon_twenty_meters() {
        let velocity = GravityTable::default().fall_velocity("moon", 20.0).unwrap();
        assert!((velocity - 8.0).abs() < 1e-12);
    }

    #[test]
    fn mars_ten_meters() {
        let velocity = GravityTable::default().fall_velocity("mars", 10.0).unwrap();
        assert_close(velocity, 8.614);
    }

    #[test]
    fn zero_distance_is_zero_velocity() {
        assert_eq!(GravityTable::default().fall_velocity("earth", 0.0), Ok(0.0));
    }

    #[test]
    fn negative_zero_distance_is_unsigned_zero() {
        let velocity = GravityTable::default().fall_velocity("earth", -0.0).unwrap();
        assert_eq!(velocity, 0.0);
        assert!(velocity.is_sign_positive());
    }

    #[test]
    fn unknown_body_is_rejected() {
        let result = GravityTable::default().fall_velocity("jupiter", 10.0);
        assert_eq!(
            result,
            Err(DropError::UnknownBody {
                body: "jupiter".to_string()
            })
        );
    }

    #[test]
    fn negative_distance_is_rejected_before_body_lookup() {
        let result = GravityTable::default().fall_velocity("jupiter", -5.0);
        assert_eq!(result, Err(DropError::NegativeDistance { distance: -5.0 }));
    }

    #[test]
    fn non_finite_distance_is_rejected() {
        let table = GravityTable::default();
        assert!(matches!(
            table.fall_velocity("earth", f64::INFINITY),
            Err(DropError::NonFiniteDistance { .. })
        ));
        assert!(matches!(
            table.fall_velocity("earth", f64::NAN),
            Err(DropError::NonFiniteDistance { .. })
        ));
    }

    #[test]
    fn custom_bodies_extend_and_override() {
        let table = GravityTable::default()
            .with_body("jupiter", 24.79)
            .unwrap()
            .with_body("earth", 9.81)
            .unwrap();

        assert_eq!(table.acceleration("jupiter"), Some(24.79));
        assert_eq!(table.acceleration("earth"), Some(9.81));
        assert_eq!(
            table.bodies().map(|(body, _)| body).collect::<Vec<_>>(),
            vec!["earth", "jupiter", "mars", "moon"]
        );
    }

    #[test]
    fn invalid_accelerations_are_rejected() {
        let mut table = GravityTable::empty();
        assert!(table.insert("void", 0.0).is_err());
        assert!(table.insert("antigravity", -1.0).is_err());
        assert!(table.insert("blackhole", f64::INFINITY).is_err());
        assert_eq!(table.bodies().count(), 0);
    }

    proptest! {
        #[test]
        fn velocity_matches_formula(
            body in prop::sample::select(vec!["earth", "moon", "mars"]),
            distance in 0.0f64..1.0e6,
        ) {
            let table = GravityTable::default();
            let g = table.acceleration(body).unwrap();
            let velocity = table.fall_velocity(body, distance).unwrap();
            let expected = (2.0 * g * distance).sqrt();

            prop_assert!((velocity - expected).abs() <= 1e-9 * expected.max(1.0));
        }

        #[test]
        fn negative_distances_always_fail(
            body in prop::sample::select(vec!["earth", "moon", "mars"]),
            distance in -1.0e6f64..-1.0e-9,
        ) {
            let result = GravityTable::default().fall_velocity(body, distance);
            prop_assert_eq!(result, Err(DropError::NegativeDistance { distance }));
        }
    }
}
