// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test registration.
//!
//! Tests are registered explicitly through a [`TestRegistry`]. Groups are visited in the order
//! they were first registered, and tests within a group run in registration order.
//!
//! ```
//! use isotest_runner::{context::TestContext, ensure_eq, registry::{TestOpts, TestRegistry}};
//!
//! let mut registry = TestRegistry::new();
//! registry
//!     .group("Math")
//!     .before_each(|_cx: &TestContext| Ok(()))
//!     .test("addition", |_cx| {
//!         ensure_eq!(1 + 1, 2);
//!         Ok(())
//!     })?
//!     .test_with("slow", TestOpts::new().timeout_ms(5_000), |_cx| Ok(()))?;
//! assert_eq!(registry.test_count(), 2);
//! # Ok::<(), isotest_runner::errors::RegistryError>(())
//! ```

use crate::{
    context::{BodyResult, Done, TestContext},
    errors::RegistryError,
    test_filter::ExcludeRule,
};
use indexmap::IndexMap;
use std::{fmt, sync::Arc, time::Duration};

/// A run-to-completion body or hook.
pub type SyncFn = dyn Fn(&TestContext) -> BodyResult + Send + Sync + 'static;

/// An explicit-completion body: the test finishes once the [`Done`] handle is completed.
pub type AsyncFn = dyn Fn(&TestContext, Done) -> BodyResult + Send + Sync + 'static;

/// A suite-level or per-test hook.
pub type Hook = Arc<SyncFn>;

/// The body of a test.
#[derive(Clone)]
pub enum TestBody {
    /// Finishes when the function returns.
    RunToCompletion(Arc<SyncFn>),

    /// Finishes when the [`Done`] handle passed to the function is completed.
    ExplicitCompletion(Arc<AsyncFn>),
}

impl TestBody {
    /// Returns a short name for this kind of body.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::RunToCompletion(_) => "run-to-completion",
            Self::ExplicitCompletion(_) => "explicit-completion",
        }
    }
}

impl fmt::Debug for TestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TestBody::{}", self.kind_str())
    }
}

/// Per-test options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestOpts {
    timeout_ms: Option<u64>,
    isolated: bool,
    expect_failure: bool,
    inline: bool,
}

impl TestOpts {
    /// Creates options with every setting at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the run's default timeout for this test.
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Runs this test in its own child process.
    pub fn isolated(mut self) -> Self {
        self.isolated = true;
        self
    }

    /// Declares that this test is expected to fail.
    pub fn expect_failure(mut self) -> Self {
        self.expect_failure = true;
        self
    }

    fn inline(mut self) -> Self {
        self.inline = true;
        self
    }
}

/// A registered test.
#[derive(Clone, Debug)]
pub struct TestCase {
    name: String,
    body: TestBody,
    opts: TestOpts,
}

impl TestCase {
    /// The name of the test, unique within its group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The body of the test.
    pub fn body(&self) -> &TestBody {
        &self.body
    }

    /// The timeout override, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.opts.timeout_ms.map(Duration::from_millis)
    }

    /// Whether the test asked for process isolation.
    pub fn is_isolated(&self) -> bool {
        self.opts.isolated
    }

    /// Whether the test runs on the scheduler thread with no deadline.
    pub fn is_inline(&self) -> bool {
        self.opts.inline
    }

    /// Whether the test was registered as expected to fail.
    pub fn expects_failure(&self) -> bool {
        self.opts.expect_failure
    }
}

/// A named group of tests with optional hooks.
#[derive(Clone, Default)]
pub struct Group {
    name: String,
    tests: Vec<TestCase>,
    pub(crate) before_all: Option<Hook>,
    pub(crate) after_all: Option<Hook>,
    pub(crate) before_each: Option<Hook>,
    pub(crate) after_each: Option<Hook>,
}

impl Group {
    /// The name of the group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tests in registration order.
    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    /// Returns the test with the given name.
    pub fn test(&self, name: &str) -> Option<&TestCase> {
        self.tests.iter().find(|test| test.name == name)
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("tests", &self.tests)
            .field("before_all", &self.before_all.is_some())
            .field("after_all", &self.after_all.is_some())
            .field("before_each", &self.before_each.is_some())
            .field("after_each", &self.after_each.is_some())
            .finish()
    }
}

/// All registered groups and exclusion rules.
#[derive(Clone, Debug, Default)]
pub struct TestRegistry {
    groups: IndexMap<String, Group>,
    exclude_rules: Vec<ExcludeRule>,
}

impl TestRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a builder for the group called `name`, creating the group if needed.
    ///
    /// A group keeps the position it had when it was first registered.
    pub fn group(&mut self, name: impl Into<String>) -> GroupBuilder<'_> {
        let name = name.into();
        let slot = if name.is_empty() {
            // Registering a test through this builder fails.
            GroupSlot::Unnamed(Group::default())
        } else {
            GroupSlot::Registered(self.groups.entry(name.clone()).or_insert_with(|| Group {
                name,
                ..Group::default()
            }))
        };
        GroupBuilder { slot }
    }

    /// Excludes a group (`"Group"`) or a single test (`"Group:test"`) from every run.
    ///
    /// The rule is matched as a substring of `group:test`, so `"Foo"` also excludes tests in a
    /// group called `"BarFoo"`.
    pub fn exclude(&mut self, rule: impl AsRef<str>) -> &mut Self {
        self.exclude_rules.push(ExcludeRule::parse(rule.as_ref()));
        self
    }

    /// The exclusion rules in registration order.
    pub fn exclude_rules(&self) -> &[ExcludeRule] {
        &self.exclude_rules
    }

    /// Iterates over the groups in first-registration order.
    pub fn groups(&self) -> impl ExactSizeIterator<Item = &Group> + '_ {
        self.groups.values()
    }

    /// Returns the group with the given name.
    pub fn get_group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// The total number of registered tests.
    pub fn test_count(&self) -> usize {
        self.groups.values().map(|group| group.tests.len()).sum()
    }
}

/// Adds tests and hooks to one [`Group`].
pub struct GroupBuilder<'a> {
    slot: GroupSlot<'a>,
}

enum GroupSlot<'a> {
    Registered(&'a mut Group),
    // Never added to the registry.
    Unnamed(Group),
}

impl GroupBuilder<'_> {
    /// Sets the hook that runs once before any test in the group.
    ///
    /// If it skips, no test in the group runs and neither does `AfterAll`.
    pub fn before_all<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&TestContext) -> BodyResult + Send + Sync + 'static,
    {
        let group = self.group_mut();
        set_hook(&mut group.before_all, &group.name, "BeforeAll", hook);
        self
    }

    /// Sets the hook that runs once after every test in the group.
    pub fn after_all<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&TestContext) -> BodyResult + Send + Sync + 'static,
    {
        let group = self.group_mut();
        set_hook(&mut group.after_all, &group.name, "AfterAll", hook);
        self
    }

    /// Sets the hook that runs before each test.
    pub fn before_each<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&TestContext) -> BodyResult + Send + Sync + 'static,
    {
        let group = self.group_mut();
        set_hook(&mut group.before_each, &group.name, "BeforeEach", hook);
        self
    }

    /// Sets the hook that runs after each test, even if the test or `BeforeEach` failed.
    pub fn after_each<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&TestContext) -> BodyResult + Send + Sync + 'static,
    {
        let group = self.group_mut();
        set_hook(&mut group.after_each, &group.name, "AfterEach", hook);
        self
    }

    /// Registers a run-to-completion test with default options.
    pub fn test<F>(&mut self, name: impl Into<String>, body: F) -> Result<&mut Self, RegistryError>
    where
        F: Fn(&TestContext) -> BodyResult + Send + Sync + 'static,
    {
        self.test_with(name, TestOpts::default(), body)
    }

    /// Registers a run-to-completion test.
    pub fn test_with<F>(
        &mut self,
        name: impl Into<String>,
        opts: TestOpts,
        body: F,
    ) -> Result<&mut Self, RegistryError>
    where
        F: Fn(&TestContext) -> BodyResult + Send + Sync + 'static,
    {
        self.push(name.into(), TestBody::RunToCompletion(Arc::new(body)), opts)
    }

    /// Registers a test that runs in its own child process.
    pub fn test_isolated<F>(
        &mut self,
        name: impl Into<String>,
        body: F,
    ) -> Result<&mut Self, RegistryError>
    where
        F: Fn(&TestContext) -> BodyResult + Send + Sync + 'static,
    {
        self.test_with(name, TestOpts::new().isolated(), body)
    }

    /// Registers a test that runs on the scheduler thread with no deadline.
    ///
    /// Job isolation still moves inline tests into a child process.
    pub fn test_inline<F>(
        &mut self,
        name: impl Into<String>,
        body: F,
    ) -> Result<&mut Self, RegistryError>
    where
        F: Fn(&TestContext) -> BodyResult + Send + Sync + 'static,
    {
        self.test_with(name, TestOpts::new().inline(), body)
    }

    /// Registers an explicit-completion test with default options.
    pub fn test_async<F>(
        &mut self,
        name: impl Into<String>,
        body: F,
    ) -> Result<&mut Self, RegistryError>
    where
        F: Fn(&TestContext, Done) -> BodyResult + Send + Sync + 'static,
    {
        self.test_async_with(name, TestOpts::default(), body)
    }

    /// Registers an explicit-completion test.
    pub fn test_async_with<F>(
        &mut self,
        name: impl Into<String>,
        opts: TestOpts,
        body: F,
    ) -> Result<&mut Self, RegistryError>
    where
        F: Fn(&TestContext, Done) -> BodyResult + Send + Sync + 'static,
    {
        self.push(name.into(), TestBody::ExplicitCompletion(Arc::new(body)), opts)
    }

    fn push(
        &mut self,
        name: String,
        body: TestBody,
        opts: TestOpts,
    ) -> Result<&mut Self, RegistryError> {
        let group = self.group_mut();
        if group.name.is_empty() {
            return Err(RegistryError::EmptyName {
                group: String::new(),
                kind: "group",
            });
        }
        if name.is_empty() {
            return Err(RegistryError::EmptyName {
                group: group.name.clone(),
                kind: "test",
            });
        }
        if group.test(&name).is_some() {
            return Err(RegistryError::DuplicateTest {
                group: group.name.clone(),
                test: name,
            });
        }

        group.tests.push(TestCase { name, body, opts });
        Ok(self)
    }

    fn group(&self) -> &Group {
        match &self.slot {
            GroupSlot::Registered(group) => group,
            GroupSlot::Unnamed(group) => group,
        }
    }

    fn group_mut(&mut self) -> &mut Group {
        match &mut self.slot {
            GroupSlot::Registered(group) => group,
            GroupSlot::Unnamed(group) => group,
        }
    }
}

impl fmt::Debug for GroupBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupBuilder")
            .field("group", &self.group().name)
            .finish()
    }
}

fn set_hook<F>(slot: &mut Option<Hook>, group: &str, hook_name: &'static str, hook: F)
where
    F: Fn(&TestContext) -> BodyResult + Send + Sync + 'static,
{
    if slot.is_some() {
        tracing::warn!(group, hook = hook_name, "replacing previously registered hook");
    }
    *slot = Some(Arc::new(hook));
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ok(_cx: &TestContext) -> BodyResult {
        Ok(())
    }

    #[test]
    fn groups_keep_first_registration_order() {
        let mut registry = TestRegistry::new();
        registry.group("Zeta").test("one", ok).expect("registered");
        registry.group("Alpha").test("two", ok).expect("registered");
        registry.group("Zeta").test("three", ok).expect("registered");

        let order: Vec<_> = registry
            .groups()
            .map(|group| {
                let tests: Vec<_> = group.tests().iter().map(TestCase::name).collect();
                (group.name(), tests)
            })
            .collect();
        assert_eq!(
            order,
            vec![("Zeta", vec!["one", "three"]), ("Alpha", vec!["two"])]
        );
        assert_eq!(registry.test_count(), 3);
    }

    #[test]
    fn duplicate_tests_are_rejected() {
        let mut registry = TestRegistry::new();
        registry.group("Suite").test("same", ok).expect("registered");
        let error = registry
            .group("Suite")
            .test("same", ok)
            .expect_err("duplicate rejected");
        assert_eq!(
            error,
            RegistryError::DuplicateTest {
                group: "Suite".to_owned(),
                test: "same".to_owned(),
            }
        );

        // The same test name in a different group is fine.
        registry.group("Other").test("same", ok).expect("registered");
    }

    #[test]
    fn empty_names_are_rejected() {
        let mut registry = TestRegistry::new();
        let error = registry.group("Suite").test("", ok).expect_err("empty test name");
        assert!(matches!(error, RegistryError::EmptyName { kind: "test", .. }));

        let error = registry
            .group("")
            .before_each(ok)
            .test("name", ok)
            .expect_err("empty group name");
        assert!(matches!(error, RegistryError::EmptyName { kind: "group", .. }));

        // Neither attempt left a group behind.
        let names: Vec<_> = registry.groups().map(Group::name).collect();
        assert_eq!(names, vec!["Suite"]);
        assert!(registry.get_group("").is_none());
        assert_eq!(registry.test_count(), 0);
    }

    #[test]
    fn options_are_recorded() {
        let mut registry = TestRegistry::new();
        registry
            .group("Suite")
            .test_with(
                "custom",
                TestOpts::new().timeout_ms(250).isolated().expect_failure(),
                ok,
            )
            .expect("registered")
            .test_inline("inline", ok)
            .expect("registered")
            .test_async("async", |_cx, done| {
                done.complete();
                Ok(())
            })
            .expect("registered");

        let group = registry.get_group("Suite").expect("group exists");
        let custom = group.test("custom").expect("test exists");
        assert_eq!(custom.timeout(), Some(Duration::from_millis(250)));
        assert!(custom.is_isolated());
        assert!(custom.expects_failure());
        assert!(!custom.is_inline());

        let inline = group.test("inline").expect("test exists");
        assert!(inline.is_inline());
        assert_eq!(inline.timeout(), None);

        let async_test = group.test("async").expect("test exists");
        assert_eq!(async_test.body().kind_str(), "explicit-completion");
    }

    #[test]
    fn exclude_rules_are_parsed() {
        let mut registry = TestRegistry::new();
        registry.exclude("Suite").exclude("Suite:test");
        let rules: Vec<_> = registry.exclude_rules().iter().map(ToString::to_string).collect();
        assert_eq!(rules, vec!["Suite", "Suite:test"]);
    }
}
