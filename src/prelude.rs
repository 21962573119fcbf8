use crate::error::ConfigError;
use core::ops::{Add, Div, Mul, Sub};

macro_rules! constrained_f64 {
    ( $name:ident, $closure:tt, $msg:expr ) => {
        #[derive(Debug, Copy, Clone, PartialEq)]
        pub struct $name(pub(crate) f64);

        impl $name {
            pub fn new(x: f64) -> Result<Self, ConfigError> {
                if ($closure)(x) {
                    Ok(Self(x))
                } else {
                    Err(ConfigError::Constraint {
                        name: stringify!($name),
                        value: x,
                        message: $msg,
                    })
                }
            }

            pub fn get(self) -> f64 {
                self.0
            }

            pub fn ln(self) -> f64 {
                self.0.ln()
            }

            pub fn sqrt(self) -> f64 {
                self.0.sqrt()
            }
        }

        impl Add<f64> for $name {
            type Output = f64;

            fn add(self, other: f64) -> f64 {
                self.0 + other
            }
        }

        impl Add<$name> for f64 {
            type Output = f64;

            fn add(self, other: $name) -> f64 {
                self + other.0
            }
        }

        impl Sub<f64> for $name {
            type Output = f64;

            fn sub(self, other: f64) -> f64 {
                self.0 - other
            }
        }

        impl Sub<$name> for f64 {
            type Output = f64;

            fn sub(self, other: $name) -> f64 {
                self - other.0
            }
        }

        impl Mul<f64> for $name {
            type Output = f64;

            fn mul(self, other: f64) -> f64 {
                self.0 * other
            }
        }

        impl Mul<$name> for f64 {
            type Output = f64;

            fn mul(self, other: $name) -> f64 {
                self * other.0
            }
        }

        impl Div<f64> for $name {
            type Output = f64;

            fn div(self, other: f64) -> f64 {
                self.0 / other
            }
        }

        impl Div<$name> for f64 {
            type Output = f64;

            fn div(self, other: $name) -> f64 {
                self / other.0
            }
        }
    };
}

// Concentration of the Dirichlet prior on the mixture weights.
constrained_f64!(
    Mass,
    (|x: f64| x > 0.0 && x.is_finite()),
    "must be finite and greater than zero"
);

constrained_f64!(
    Variance,
    (|x: f64| x > 0.0 && x.is_finite()),
    "must be finite and greater than zero"
);

// Beta shape for the fraction of at-risk cells.
constrained_f64!(
    Shape,
    (|x: f64| x > 0.0 && x.is_finite()),
    "must be finite and greater than zero"
);

// Prior odds weight for birth (split) versus death (merge) of a cluster.
constrained_f64!(
    Odds,
    (|x: f64| x > 0.0 && x.is_finite()),
    "must be finite and greater than zero"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraints() {
        assert!(Mass::new(1.0).is_ok());
        assert!(Mass::new(0.0).is_err());
        assert!(Variance::new(f64::INFINITY).is_err());
        assert!(Shape::new(f64::NAN).is_err());
        assert!(Odds::new(-2.0).is_err());
        let m = Mass::new(2.5).unwrap();
        assert_eq!(m + 1.0, 3.5);
        assert_eq!(4.0 * m, 10.0);
        assert_eq!(m.get(), 2.5);
    }

    #[test]
    fn test_error_message_names_the_type() {
        let err = Variance::new(-1.0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Variance must be finite and greater than zero (got -1)"
        );
    }
}
