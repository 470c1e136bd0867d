// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for isotest-runner.

use std::any::Any;

/// Utilities for pluralizing various words based on count or plurality.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "group" if `count` is 1, otherwise "groups".
    pub fn groups_str(count: usize) -> &'static str {
        if count == 1 { "group" } else { "groups" }
    }
}

/// Extracts the message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "(non-string panic payload)".to_owned()
    }
}

/// Joins non-empty message parts with newlines.
pub(crate) fn join_messages<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for part in parts {
        let part = part.trim_end();
        if part.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(part);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn panic_payloads_are_extracted() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 42)).expect_err("panicked");
        assert_eq!(panic_message(&*payload), "boom 42");

        let payload = std::panic::catch_unwind(|| panic!("static")).expect_err("panicked");
        assert_eq!(panic_message(&*payload), "static");

        let payload =
            std::panic::catch_unwind(|| std::panic::panic_any(7_u32)).expect_err("panicked");
        assert_eq!(panic_message(&*payload), "(non-string panic payload)");
    }

    #[test]
    fn messages_are_joined_without_blanks() {
        assert_eq!(join_messages(["first\n", "", "second"]), "first\nsecond");
        assert_eq!(join_messages([]), "");
    }
}
