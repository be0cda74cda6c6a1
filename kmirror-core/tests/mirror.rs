// kmirror-core/tests/mirror.rs
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kmirror_common::error::{KmError, Result};
use kmirror_common::model::{BuildRequest, BuiltArtifact, DriverTarget, KernelPackage};
use kmirror_common::store::ReleaseStore;
use kmirror_core::mirror::{ArtifactBuilder, MirrorContext, OperatingSystem};
use kmirror_core::pipeline::{Engine, EngineOptions};
use kmirror_core::queue::{QueueOptions, ShutdownSignal};
use kmirror_core::repository::{MemoryReleaseStore, Publisher, ReleaseCache};

const DRIVER_A: &str = "2aa88dcf6243982697811df4c1b484bcbe9488a2";
const DRIVER_B: &str = "17f5df52a7d9ed6bb12d3b1768460def8439936d";

struct FakeOs {
    packages: HashMap<String, KernelPackage>,
}

impl FakeOs {
    fn with_packages(count: usize) -> Self {
        let packages = (0..count)
            .map(|i| {
                let package = KernelPackage {
                    name: format!("linux-image-5.4.0-{i}-generic"),
                    operating_system: String::new(),
                    kernel_release: format!("5.4.0-{i}-generic"),
                    kernel_version: format!("#{} SMP Mon Jan 1 00:00:00 UTC 2024", 100 + i),
                    kernel_machine: "x86_64".to_string(),
                };
                (package.name.clone(), package)
            })
            .collect();
        Self { packages }
    }
}

impl OperatingSystem for FakeOs {
    fn name(&self) -> &str {
        "ubuntu"
    }

    fn kernel_package_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.packages.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn kernel_package(&self, name: &str) -> Result<KernelPackage> {
        self.packages
            .get(name)
            .cloned()
            .ok_or_else(|| KmError::NotFound(name.to_string()))
    }
}

/// Writes a small file per build and fails for one chosen kernel release.
struct FakeBuilder {
    builds: AtomicUsize,
    failing_release: Option<String>,
}

impl FakeBuilder {
    fn new() -> Self {
        Self {
            builds: AtomicUsize::new(0),
            failing_release: None,
        }
    }
}

impl ArtifactBuilder for FakeBuilder {
    fn build(&self, request: &BuildRequest) -> Result<BuiltArtifact> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        // Builds are slow; make sure they overlap.
        thread::sleep(Duration::from_millis(5));
        if self.failing_release.as_deref() == Some(request.kernel_package.kernel_release.as_str()) {
            return Err(KmError::BuildError {
                target: request.target_id(),
                message: "unsupported kernel".to_string(),
            });
        }
        let path = request.output_path();
        fs::write(&path, request.target_id())?;
        Ok(BuiltArtifact {
            driver_version: request.driver.version.clone(),
            path,
        })
    }
}

fn engine() -> Engine {
    Engine::new(EngineOptions {
        workers: 4,
        queue: QueueOptions {
            buffer: 4,
            sentinel_interval: Duration::from_millis(10),
            ..Default::default()
        },
    })
}

fn context(
    store: &Arc<MemoryReleaseStore>,
    os: FakeOs,
    builder: &Arc<FakeBuilder>,
) -> Arc<MirrorContext> {
    let cache = Arc::new(ReleaseCache::new(Arc::clone(store) as Arc<dyn ReleaseStore>));
    Arc::new(MirrorContext {
        operating_system: Arc::new(os),
        builder: Arc::clone(builder) as Arc<dyn ArtifactBuilder>,
        publisher: Arc::new(Publisher::new(cache)),
        drivers: vec![
            DriverTarget::new(DRIVER_A).with_label("0.29.0"),
            DriverTarget::new(DRIVER_B).with_label("0.29.1"),
        ],
        artifact_prefix: "falco".to_string(),
    })
}

#[test]
fn mirror_publishes_every_combination_once() {
    let store = Arc::new(MemoryReleaseStore::with_page_size(2));
    let builder = Arc::new(FakeBuilder::new());
    let ctx = context(&store, FakeOs::with_packages(6), &builder);

    let report = engine()
        .run(vec![ctx.root_task()], ShutdownSignal::new())
        .unwrap();

    assert!(report.is_success(), "{}", report.summary());
    // One list task, six resolve tasks, twelve build tasks.
    assert_eq!(report.executed, 19);
    assert_eq!(builder.builds.load(Ordering::SeqCst), 12);

    let calls = store.calls();
    assert_eq!(calls.create_release, 2);
    assert_eq!(calls.upload_asset, 12);
    // Releases are listed once. Releases created by this run are known to be
    // empty, so their assets are never listed.
    assert_eq!(calls.list_releases, 1);
    assert_eq!(calls.list_assets, 0);
    assert_eq!(store.release_count(), 2);

    let release = ctx.publisher.find_release_for_version(DRIVER_A).unwrap();
    assert_eq!(release.tag_name, "2aa88dcf");
    let mut names = store.asset_names(release.id);
    names.sort();
    assert_eq!(names.len(), 6);
    assert_eq!(names[0], "falco_ubuntu_5.4.0-0-generic_100.o");
}

#[test]
fn rerun_against_the_same_store_builds_nothing() {
    let store = Arc::new(MemoryReleaseStore::with_page_size(2));

    let first_builder = Arc::new(FakeBuilder::new());
    let ctx = context(&store, FakeOs::with_packages(3), &first_builder);
    engine()
        .run_to_completion(vec![ctx.root_task()], ShutdownSignal::new())
        .unwrap();
    assert_eq!(first_builder.builds.load(Ordering::SeqCst), 6);

    // A fresh process: new cache, same remote.
    let second_builder = Arc::new(FakeBuilder::new());
    let ctx = context(&store, FakeOs::with_packages(3), &second_builder);
    let report = engine()
        .run_to_completion(vec![ctx.root_task()], ShutdownSignal::new())
        .unwrap();

    assert_eq!(second_builder.builds.load(Ordering::SeqCst), 0);
    assert_eq!(report.executed, 10);
    let calls = store.calls();
    assert_eq!(calls.create_release, 2);
    assert_eq!(calls.upload_asset, 6);
    // Only the second run lists assets: two pages for each release.
    assert_eq!(calls.list_assets, 4);
    assert_eq!(calls.list_releases, 2);
}

#[test]
fn failed_builds_are_reported_and_siblings_still_publish() {
    let store = Arc::new(MemoryReleaseStore::new());
    let builder = Arc::new(FakeBuilder {
        builds: AtomicUsize::new(0),
        failing_release: Some("5.4.0-1-generic".to_string()),
    });
    let ctx = context(&store, FakeOs::with_packages(3), &builder);

    let report = engine()
        .run(vec![ctx.root_task()], ShutdownSignal::new())
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 2);
    assert!(report
        .failures
        .iter()
        .all(|f| matches!(f.error, KmError::BuildError { .. })));
    assert_eq!(store.calls().upload_asset, 4);
    assert_eq!(report.acknowledged, report.enqueued);
}
