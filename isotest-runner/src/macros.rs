// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Assertion macros for test bodies.
//!
//! The `ensure` family is fatal: on failure it returns an [`AssertionFailure`] from the enclosing
//! function, which must return [`BodyResult`]. The `check` family records a condition failure on
//! a [`TestContext`] and lets the body continue.
//!
//! [`AssertionFailure`]: crate::context::AssertionFailure
//! [`BodyResult`]: crate::context::BodyResult
//! [`TestContext`]: crate::context::TestContext

/// Returns an assertion failure unless the condition holds.
#[macro_export]
macro_rules! ensure {
    ($cond:expr $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($crate::context::TestError::Assertion(
                $crate::context::AssertionFailure::new(
                    ::core::file!(),
                    ::core::line!(),
                    ::core::concat!("Expected: ", ::core::stringify!($cond)),
                ),
            ));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return ::core::result::Result::Err($crate::context::TestError::Assertion(
                $crate::context::AssertionFailure::new(
                    ::core::file!(),
                    ::core::line!(),
                    ::std::format!($($arg)+),
                ),
            ));
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __ensure_cmp {
    ($op:tt, $left:expr, $right:expr) => {
        match (&$left, &$right) {
            (left, right) => {
                if !(*left $op *right) {
                    return ::core::result::Result::Err($crate::context::TestError::Assertion(
                        $crate::context::AssertionFailure::comparison(
                            ::core::file!(),
                            ::core::line!(),
                            ::core::stringify!($op),
                            (::core::stringify!($left), left),
                            (::core::stringify!($right), right),
                        ),
                    ));
                }
            }
        }
    };
}

/// Returns an assertion failure unless both sides are equal.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {
        $crate::__ensure_cmp!(==, $left, $right)
    };
}

/// Returns an assertion failure if both sides are equal.
#[macro_export]
macro_rules! ensure_ne {
    ($left:expr, $right:expr $(,)?) => {
        $crate::__ensure_cmp!(!=, $left, $right)
    };
}

/// Records a condition failure on the context unless the condition holds.
#[macro_export]
macro_rules! check {
    ($cx:expr, $cond:expr $(,)?) => {
        if !$cond {
            $cx.record_failure(
                $crate::context::AssertionFailure::new(
                    ::core::file!(),
                    ::core::line!(),
                    ::core::concat!("Expected: ", ::core::stringify!($cond)),
                )
                .to_string(),
            );
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __check_cmp {
    ($cx:expr, $op:tt, $left:expr, $right:expr) => {
        match (&$left, &$right) {
            (left, right) => {
                if !(*left $op *right) {
                    $cx.record_failure(
                        $crate::context::AssertionFailure::comparison(
                            ::core::file!(),
                            ::core::line!(),
                            ::core::stringify!($op),
                            (::core::stringify!($left), left),
                            (::core::stringify!($right), right),
                        )
                        .to_string(),
                    );
                }
            }
        }
    };
}

/// Records a condition failure on the context unless both sides are equal.
#[macro_export]
macro_rules! check_eq {
    ($cx:expr, $left:expr, $right:expr $(,)?) => {
        $crate::__check_cmp!($cx, ==, $left, $right)
    };
}

/// Records a condition failure on the context if both sides are equal.
#[macro_export]
macro_rules! check_ne {
    ($cx:expr, $left:expr, $right:expr $(,)?) => {
        $crate::__check_cmp!($cx, !=, $left, $right)
    };
}

#[cfg(test)]
mod tests {
    use crate::context::{BodyResult, TestContext, TestError};
    use pretty_assertions::assert_eq;

    fn compare(left: u32, right: u32) -> BodyResult {
        ensure_eq!(left, right);
        ensure!(left < 100, "{left} is too large");
        Ok(())
    }

    #[test]
    fn ensure_returns_early_with_location() {
        compare(3, 3).expect("equal values pass");

        let Err(TestError::Assertion(failure)) = compare(3, 4) else {
            panic!("expected an assertion failure");
        };
        assert_eq!(failure.file, file!());
        assert_eq!(failure.message, "Expected: (left == right)\n    Actual: (3 == 4)");

        let Err(TestError::Assertion(failure)) = compare(100, 100) else {
            panic!("expected an assertion failure");
        };
        assert_eq!(failure.message, "100 is too large");
    }

    #[test]
    fn ensure_ne_rejects_equal_values() {
        fn body() -> BodyResult {
            ensure_ne!(1 + 1, 2);
            Ok(())
        }
        let Err(TestError::Assertion(failure)) = body() else {
            panic!("expected an assertion failure");
        };
        assert_eq!(failure.message, "Expected: (1 + 1 != 2)\n    Actual: (2 != 2)");
    }

    #[test]
    fn check_records_and_continues() {
        let cx = TestContext::standalone("Group", "test");
        check!(cx, 1 > 2);
        check_eq!(cx, "a", "b");
        check_ne!(cx, 5, 6);

        let conditions = cx.take_conditions();
        assert_eq!(conditions.len(), 2, "conditions: {conditions:?}");
        assert!(conditions[0].ends_with("Expected: 1 > 2"), "{}", conditions[0]);
        assert!(conditions[1].contains("Actual: (\"a\" == \"b\")"), "{}", conditions[1]);
    }
}
