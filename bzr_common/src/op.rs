/// Implements the standard arithmetic operator traits for single-field tuple
/// structs wrapping a numeric type.
///
/// `op!(binary Sats, Add, add)` expands to an `impl Add for Sats` that applies
/// the operator to the inner value, and similarly for `inplace` (the
/// `*Assign` traits) and `unary` (`Neg`). The caller must have the relevant
/// `std::ops` traits in scope.
#[macro_export]
macro_rules! op {
    (binary $type:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $type {
            type Output = Self;

            fn $method(self, rhs: Self) -> Self::Output {
                Self(self.0.$method(rhs.0))
            }
        }
    };
    (inplace $type:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $type {
            fn $method(&mut self, rhs: Self) {
                self.0.$method(rhs.0);
            }
        }
    };
    (unary $type:ty, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $type {
            type Output = Self;

            fn $method(self) -> Self::Output {
                Self(self.0.$method())
            }
        }
    };
}
