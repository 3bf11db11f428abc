use std::str::FromStr;
use std::sync::{Arc, Mutex};

use indoc::indoc;

use pinion_cache::{CacheKey, DependencyCache, RequiresPythonCache};
use pinion_git::{GitReference, GitSha, RepositoryReference};
use pinion_normalize::PackageName;
use pinion_pep440::Version;
use pinion_resolver::{
    Identifier, Lock, LockError, LockMode, LockReporter, Manifest, Reporter, ResolutionError,
    ResolveError,
};
use pinion_types::Candidate;
use url::Url;

use crate::common::{Context, FakeRegistry, digest, pins, wheel};

fn name(name: &str) -> PackageName {
    PackageName::from_str(name).unwrap()
}

const A_ONLY: &str = indoc! {r#"
    [packages]
    a = "*"
"#};

#[tokio::test]
async fn lock_default_packages() {
    let registry = FakeRegistry::new()
        .release("a", "1.0", &["b", "c>=2"])
        .release("b", "1.0", &[])
        .release("c", "1.0", &[])
        .release("c", "2.1", &[]);
    let context = Context::new(registry);

    let lock = context.lock(A_ONLY, LockMode::Basic).await.unwrap();

    assert_eq!(pins(&lock.default), ["a==1.0", "b==1.0", "c==2.1"]);
    assert!(lock.develop.is_empty());
    for package in lock.default.values() {
        assert_eq!(package.markers, None);
    }
    assert_eq!(
        lock.default[&name("c")].hashes.iter().collect::<Vec<_>>(),
        [&digest(&wheel("c", "2.1"))]
    );
    assert_eq!(
        lock.meta.hash,
        Manifest::from_toml(A_ONLY)
            .unwrap()
            .content_hash()
            .unwrap()
    );
}

#[tokio::test]
async fn default_wins_over_develop() {
    let registry = FakeRegistry::new()
        .release("a", "1.0", &["b"])
        .release("b", "1.0", &[])
        .release("pytest", "8.0", &[]);
    let context = Context::new(registry);
    let manifest = indoc! {r#"
        [packages]
        a = "*"

        [dev-packages]
        b = "*"
        pytest = "*"
    "#};

    let lock = context.lock(manifest, LockMode::Basic).await.unwrap();

    assert_eq!(pins(&lock.default), ["a==1.0", "b==1.0"]);
    assert_eq!(pins(&lock.develop), ["pytest==8.0"]);
}

#[tokio::test]
async fn markers_follow_the_dependency_edge() {
    let registry = FakeRegistry::new()
        .release("a", "1.0", &["colorama; sys_platform == \"win32\""])
        .release("colorama", "0.4.6", &[]);
    let context = Context::new(registry);

    let lock = context.lock(A_ONLY, LockMode::Basic).await.unwrap();

    assert_eq!(pins(&lock.default), ["a==1.0", "colorama==0.4.6"]);
    assert_eq!(lock.default[&name("a")].markers, None);
    assert_eq!(
        lock.default[&name("colorama")].markers.as_deref(),
        Some("sys_platform == \"win32\"")
    );
}

#[tokio::test]
async fn extras_pull_in_their_dependencies() {
    let registry = FakeRegistry::new()
        .release(
            "requests",
            "2.31.0",
            &["idna", "PySocks; extra == \"socks\""],
        )
        .release("idna", "3.6", &[])
        .release("pysocks", "1.7.1", &[]);
    let context = Context::new(registry);
    let manifest = indoc! {r#"
        [packages]
        requests = { version = "*", extras = ["socks"] }
    "#};

    let lock = context.lock(manifest, LockMode::Basic).await.unwrap();

    assert_eq!(
        pins(&lock.default),
        ["idna==3.6", "pysocks==1.7.1", "requests==2.31.0"]
    );
    let requests = &lock.default[&name("requests")];
    assert_eq!(requests.extras.iter().collect::<Vec<_>>(), ["socks"]);
    assert_eq!(lock.default[&name("pysocks")].markers, None);
}

#[tokio::test]
async fn extras_share_the_version_of_the_bare_package() {
    let registry = FakeRegistry::new()
        .release("requests", "2.30.0", &["PySocks; extra == \"socks\""])
        .release("requests", "2.31.0", &["PySocks; extra == \"socks\""])
        .release("pysocks", "1.0", &[])
        .release("b", "1.0", &["requests<2.31"]);
    let context = Context::new(registry);
    let manifest = indoc! {r#"
        [packages]
        requests = { version = "*", extras = ["socks"] }
        b = "*"
    "#};

    let lock = context.lock(manifest, LockMode::Basic).await.unwrap();

    assert_eq!(
        pins(&lock.default),
        ["b==1.0", "pysocks==1.0", "requests==2.30.0"]
    );
}

#[tokio::test]
async fn requires_python_is_ignored_when_nothing_supports_the_target() {
    let registry = FakeRegistry::new()
        .release_for_python("a", "1.0", &[], Some(">=3.12"))
        .release_for_python("b", "1.0", &[], Some(">=3.6"))
        .release_for_python("b", "2.0", &[], Some(">=3.12"));
    let context = Context::new(registry);
    let manifest = indoc! {r#"
        [packages]
        a = "*"
        b = "*"

        [requires]
        python_version = "3.8"
    "#};

    let lock = context.lock(manifest, LockMode::Basic).await.unwrap();

    assert_eq!(pins(&lock.default), ["a==1.0", "b==1.0"]);
}

#[tokio::test]
async fn prereleases_when_nothing_stable_matches() {
    let registry = FakeRegistry::new()
        .release("a", "1.0", &["b>=2"])
        .release("b", "1.0", &[])
        .release("b", "2.0b1", &[])
        .release("c", "1.0", &[])
        .release("c", "1.1rc1", &[]);
    let context = Context::new(registry);
    let manifest = indoc! {r#"
        [packages]
        a = "*"
        c = "*"
    "#};

    let lock = context.lock(manifest, LockMode::Basic).await.unwrap();

    assert_eq!(pins(&lock.default), ["a==1.0", "b==2.0b1", "c==1.0"]);
}

#[tokio::test]
async fn metadata_builds_without_json_api() {
    let registry = FakeRegistry::new()
        .release("a", "1.0", &["b"])
        .release("b", "1.0", &[])
        .without_json_api();
    let context = Context::new(registry);

    let lock = context.lock(A_ONLY, LockMode::Basic).await.unwrap();

    assert_eq!(pins(&lock.default), ["a==1.0", "b==1.0"]);
}

#[tokio::test]
async fn hashes_of_unlisted_files_are_downloaded() {
    let registry = FakeRegistry::new()
        .release("a", "1.0", &[])
        .without_listed_hashes();
    let context = Context::new(registry);

    let lock = context.lock(A_ONLY, LockMode::Basic).await.unwrap();

    assert_eq!(
        lock.default[&name("a")].hashes.iter().collect::<Vec<_>>(),
        [&digest(&wheel("a", "1.0"))]
    );
}

#[tokio::test]
async fn broken_cache_entries_are_dropped() {
    let registry = FakeRegistry::new()
        .release("a", "1.0", &["b"])
        .release("b", "1.0", &[]);
    let context = Context::new(registry);

    let key = CacheKey::new(&name("a"), &Version::from_str("1.0").unwrap(), &[]);
    DependencyCache::open(&context.cache, "any")
        .insert(&key, vec!["a".to_string()])
        .unwrap();
    RequiresPythonCache::open(&context.cache, "any")
        .insert(&key, String::new())
        .unwrap();

    let lock = context.lock(A_ONLY, LockMode::Basic).await.unwrap();

    assert_eq!(pins(&lock.default), ["a==1.0", "b==1.0"]);
    assert_eq!(
        DependencyCache::open(&context.cache, "any").get(&key),
        Some(vec!["b".to_string()])
    );
}

#[tokio::test]
async fn conflicting_requirements() {
    let registry = FakeRegistry::new()
        .release("a", "1.0", &["b>=2"])
        .release("b", "1.0", &[])
        .release("b", "2.0", &[]);
    let context = Context::new(registry);
    let manifest = indoc! {r#"
        [packages]
        a = "*"
        b = "==1.0"
    "#};

    let err = context.lock(manifest, LockMode::Basic).await.unwrap_err();

    let err = match err {
        LockError::Resolution(err) => *err,
        err => panic!("Expected a resolution error, got: {err}"),
    };
    let causes = match err {
        ResolutionError::Impossible(causes) => causes,
        err => panic!("Expected an impossible resolution, got: {err}"),
    };
    assert!(!causes.is_empty());
}

const TOOL_SHA: &str = "4d5a2e8f1c9b7a6e3d0f2c1b8a9e7d6c5b4a3f21";

const TOOL_FROM_GIT: &str = indoc! {r#"
    [packages]
    tool = { git = "https://github.com/example/tool.git", ref = "v1.2" }
"#};

/// A context where `tool`'s `v1.2` tag is known but its metadata can't be built.
fn git_context() -> Context {
    let context = Context::new(FakeRegistry::new());
    context.git.insert(
        RepositoryReference::new(
            &Url::parse("https://github.com/example/tool.git").unwrap(),
            &GitReference::from_rev(Some("v1.2")),
        ),
        GitSha::from_str(TOOL_SHA).unwrap(),
    );
    context
}

/// Records failed locks and nothing else.
#[derive(Default)]
struct FailureRecorder {
    failures: Mutex<Vec<String>>,
}

impl Reporter<Identifier, Candidate> for FailureRecorder {}

impl LockReporter for FailureRecorder {
    fn lock_failed(&self, err: &LockError) {
        self.failures.lock().unwrap().push(err.to_string());
    }
}

#[tokio::test]
async fn failures_reach_the_lock_reporter() {
    let registry = FakeRegistry::new()
        .release("a", "1.0", &["b>=2"])
        .release("b", "1.0", &[]);
    let context = Context::new(registry);
    let recorder = Arc::new(FailureRecorder::default());
    let locker = context.locker().with_reporter(recorder.clone());

    let manifest = Manifest::from_toml(A_ONLY).unwrap();
    assert!(locker.lock(&manifest, LockMode::Basic).await.is_err());

    let failures = recorder.failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].starts_with("No versions satisfy"), "{}", failures[0]);
}

#[tokio::test]
async fn git_references_are_locked_to_a_commit() {
    let context = git_context();

    let lock = context.lock(TOOL_FROM_GIT, LockMode::Basic).await.unwrap();

    let tool = &lock.default[&name("tool")];
    assert_eq!(tool.git.as_deref(), Some("https://github.com/example/tool.git"));
    assert_eq!(tool.reference.as_deref(), Some(TOOL_SHA));
    assert_eq!(tool.version, None);
    assert!(tool.hashes.is_empty());
}

#[tokio::test]
async fn failed_builds_are_skipped_outside_strict_mode() {
    let context = git_context();
    assert!(!context.options.strict);

    let lock = context.lock(TOOL_FROM_GIT, LockMode::Basic).await.unwrap();

    assert_eq!(lock.default.keys().collect::<Vec<_>>(), [&name("tool")]);
}

#[tokio::test]
async fn strict_mode_aborts_on_failed_builds() {
    let mut context = git_context();
    context.options.strict = true;

    let err = context
        .lock(TOOL_FROM_GIT, LockMode::Basic)
        .await
        .unwrap_err();

    let err = match err {
        LockError::Resolution(err) => *err,
        err => panic!("Expected a resolution error, got: {err}"),
    };
    match err {
        ResolutionError::Provider(ResolveError::Build(err)) => {
            assert!(err.requirement.contains("tool"), "{}", err.requirement);
        }
        err => panic!("Expected a build failure, got: {err}"),
    }
}

/// Lock `a -> b` while only `b==1.0` exists, then publish `a==1.1` and `b==2.0`.
async fn lock_then_publish() -> (Context, Lock) {
    let registry = FakeRegistry::new()
        .release("a", "1.0", &["b"])
        .release("b", "1.0", &[]);
    let context = Context::new(registry);
    let lock = context.lock(A_ONLY, LockMode::Basic).await.unwrap();
    assert_eq!(pins(&lock.default), ["a==1.0", "b==1.0"]);

    let registry = FakeRegistry::new()
        .release("a", "1.0", &["b"])
        .release("a", "1.1", &["b"])
        .release("b", "1.0", &[])
        .release("b", "2.0", &[]);
    (context.with_registry(registry), lock)
}

#[tokio::test]
async fn fresh_locks_pick_the_latest() {
    let (context, _) = lock_then_publish().await;
    let lock = context.lock(A_ONLY, LockMode::Basic).await.unwrap();
    assert_eq!(pins(&lock.default), ["a==1.1", "b==2.0"]);
}

#[tokio::test]
async fn pins_are_reused() {
    let (context, previous) = lock_then_publish().await;
    let manifest = indoc! {r#"
        [packages]
        a = "*"
        c = "*"
    "#};
    let context = context.with_registry(
        FakeRegistry::new()
            .release("a", "1.0", &["b"])
            .release("a", "1.1", &["b"])
            .release("b", "1.0", &[])
            .release("b", "2.0", &[])
            .release("c", "3.0", &[]),
    );

    let lock = context
        .lock(manifest, LockMode::PinReuse(previous))
        .await
        .unwrap();

    assert_eq!(pins(&lock.default), ["a==1.0", "b==1.0", "c==3.0"]);
}

#[tokio::test]
async fn eager_upgrades_reach_dependencies() {
    let (context, previous) = lock_then_publish().await;

    let lock = context
        .lock(
            A_ONLY,
            LockMode::EagerUpgrade {
                lock: previous,
                tracked: vec![name("a")],
            },
        )
        .await
        .unwrap();

    assert_eq!(pins(&lock.default), ["a==1.1", "b==2.0"]);
}

#[tokio::test]
async fn eager_upgrades_keep_other_pins() {
    let (context, previous) = lock_then_publish().await;

    let lock = context
        .lock(
            A_ONLY,
            LockMode::EagerUpgrade {
                lock: previous,
                tracked: vec![name("b")],
            },
        )
        .await
        .unwrap();

    assert_eq!(pins(&lock.default), ["a==1.0", "b==2.0"]);
}

#[tokio::test]
async fn eager_upgrades_release_pins_with_extras() {
    let manifest = indoc! {r#"
        [packages]
        requests = { version = "*", extras = ["socks"] }
    "#};
    let context = Context::new(
        FakeRegistry::new()
            .release("requests", "2.30.0", &["PySocks; extra == \"socks\""])
            .release("pysocks", "1.0", &[]),
    );
    let previous = context.lock(manifest, LockMode::Basic).await.unwrap();
    assert_eq!(pins(&previous.default), ["pysocks==1.0", "requests==2.30.0"]);

    let context = context.with_registry(
        FakeRegistry::new()
            .release("requests", "2.30.0", &["PySocks; extra == \"socks\""])
            .release("requests", "2.31.0", &["PySocks; extra == \"socks\""])
            .release("pysocks", "1.0", &[]),
    );
    let lock = context
        .lock(
            manifest,
            LockMode::EagerUpgrade {
                lock: previous,
                tracked: vec![name("requests")],
            },
        )
        .await
        .unwrap();

    assert_eq!(pins(&lock.default), ["pysocks==1.0", "requests==2.31.0"]);
    let requests = &lock.default[&name("requests")];
    assert_eq!(requests.extras.iter().collect::<Vec<_>>(), ["socks"]);
}

#[tokio::test]
async fn locks_survive_a_round_trip() {
    let registry = FakeRegistry::new()
        .release("a", "1.0", &["b"])
        .release("b", "1.0", &[]);
    let context = Context::new(registry);

    let lock = context.lock(A_ONLY, LockMode::Basic).await.unwrap();
    let parsed = Lock::from_toml(&lock.to_toml()).unwrap();

    assert_eq!(pins(&parsed.default), pins(&lock.default));
    assert_eq!(parsed.meta.hash, lock.meta.hash);
    assert_eq!(parsed.default[&name("b")].hashes, lock.default[&name("b")].hashes);
    assert!(
        parsed
            .is_up_to_date(&Manifest::from_toml(A_ONLY).unwrap())
            .unwrap()
    );
}
