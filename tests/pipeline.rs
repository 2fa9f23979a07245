//! Download -> classify -> patch, end to end against a mock server.

mod common;

use common::{manifest_line, zip_bytes, PayloadIsNewFile};
use gsp::downloaders::{DownloadError, HttpClient, ResumableDownloader, RetryPolicy};
use gsp::game::catalog::RemotePackage;
use gsp::game::{Component, VersionTransition};
use gsp::patcher::{PatchEngine, PatchError, VerifyError};
use gsp::pipeline::{self, ComponentJob, PipelineError, PipelineReport, Producer};
use gsp::progress::{RecordingProgress, TaskState};
use semver::Version;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Fixture {
    _work: TempDir,
    game: PathBuf,
    temp: PathBuf,
    patches: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let work = TempDir::new().unwrap();
        let game = work.path().join("game");
        let temp = work.path().join("temp");
        let patches = work.path().join("patches");
        for dir in [&game, &temp, &patches] {
            fs::create_dir_all(dir).unwrap();
        }
        fs::create_dir_all(game.join("old")).unwrap();
        fs::write(game.join("old").join("a.txt"), b"stale").unwrap();
        fs::write(game.join("d.bin"), b"before").unwrap();
        Self {
            _work: work,
            game,
            temp,
            patches,
        }
    }

    fn producer(&self, exclude: BTreeSet<Component>) -> Producer {
        let downloader = ResumableDownloader::new(&HttpClient::new().unwrap(), CancellationToken::new())
            .with_retry(RetryPolicy {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(20),
            });
        Producer::new(Arc::new(downloader), &self.patches, &self.game, version(), exclude)
    }

    fn engine(&self) -> PatchEngine {
        PatchEngine::new(&self.game, &self.temp, Arc::new(PayloadIsNewFile))
    }
}

fn version() -> VersionTransition {
    VersionTransition {
        from: Some(Version::new(4, 0, 0)),
        to: Version::new(4, 1, 0),
    }
}

fn update_archive(c_hash_source: &[u8]) -> Vec<u8> {
    let manifest = format!(
        "{}\n{}\n",
        manifest_line("c.txt", c_hash_source),
        manifest_line("d.bin", b"after patch")
    );
    zip_bytes(&[
        ("deletefiles.txt", b"old/a.txt\n"),
        ("hdifffiles.txt", br#"{"remoteName": "d.bin"}"#),
        ("pkg_version", manifest.as_bytes()),
        ("c.txt", b"ccc"),
        ("d.bin.hdiff", b"after patch"),
        ("readme.txt", b"standalone"),
    ])
}

async fn serve(server: &MockServer, route: &str, body: Vec<u8>) -> RemotePackage {
    let size = body.len() as u64;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
    RemotePackage {
        component: Component::Game,
        url: format!("{}{}", server.uri(), route),
        size,
    }
}

fn job(component: Component, packages: Vec<RemotePackage>) -> (ComponentJob, Arc<RecordingProgress>) {
    let progress = Arc::new(RecordingProgress::new());
    let job = ComponentJob {
        component,
        packages,
        progress: progress.clone(),
    };
    (job, progress)
}

fn voice_package() -> RemotePackage {
    RemotePackage {
        component: Component::EnUs,
        url: "http://127.0.0.1:9/en-us.zip".to_string(),
        size: 42,
    }
}

#[tokio::test]
async fn test_update_is_downloaded_patched_and_verified() {
    let fx = Fixture::new();
    let server = MockServer::start().await;
    let package = serve(&server, "/game_4.0.0_4.1.0.zip", update_archive(b"ccc")).await;

    let (game_job, game_progress) = job(Component::Game, vec![package]);
    let (voice_job, voice_progress) = job(Component::EnUs, vec![voice_package()]);

    let report = pipeline::run(
        fx.producer(BTreeSet::from([Component::EnUs])),
        fx.engine(),
        vec![game_job, voice_job],
    )
    .await
    .unwrap();

    assert_eq!(report, PipelineReport { processed: 1, skipped: 1 });
    assert!(!fx.game.join("old").join("a.txt").exists());
    assert_eq!(fs::read(fx.game.join("c.txt")).unwrap(), b"ccc");
    assert_eq!(fs::read(fx.game.join("d.bin")).unwrap(), b"after patch");
    assert_eq!(fs::read(fx.game.join("readme.txt")).unwrap(), b"standalone");
    assert!(!fx.game.join("d.bin.hdiff").exists());
    assert!(fx.patches.join("game_4.0.0_4.1.0.zip").exists());

    assert_eq!(
        game_progress.states(),
        vec![
            TaskState::Downloading,
            TaskState::PatchWaiting,
            TaskState::Patching,
            TaskState::Patched
        ]
    );
    assert_eq!(game_progress.reported(), game_progress.total());
    assert_eq!(
        game_progress.steps(),
        vec!["Deleting", "Std extracting", "Pkg extracting", "Hdiff patching", "Verifying"]
    );

    assert_eq!(
        voice_progress.states(),
        vec![TaskState::Downloading, TaskState::Skipped]
    );
    assert_eq!(voice_progress.reported(), 42);
}

#[tokio::test]
async fn test_verification_failure_stops_the_run() {
    let fx = Fixture::new();
    let server = MockServer::start().await;
    let package = serve(&server, "/game.zip", update_archive(b"not ccc")).await;
    let (game_job, game_progress) = job(Component::Game, vec![package]);

    let result = pipeline::run(fx.producer(BTreeSet::new()), fx.engine(), vec![game_job]).await;

    match result {
        Err(PipelineError::Patch {
            component: Component::Game,
            source:
                PatchError::Verify(VerifyError::Integrity {
                    path,
                    expected_size,
                    actual_size,
                    ..
                }),
        }) => {
            assert_eq!(path, fx.game.join("c.txt"));
            assert_eq!((expected_size, actual_size), (7, 3));
        }
        other => panic!("expected verification failure, got {:?}", other),
    }
    assert_eq!(game_progress.last_state(), Some(TaskState::Patching));
}

#[tokio::test]
async fn test_patch_failure_cancels_pending_downloads() {
    let fx = Fixture::new();
    let server = MockServer::start().await;
    let package = serve(&server, "/game.zip", update_archive(b"not ccc")).await;

    let voice_body = vec![7u8; 4096];
    Mock::given(method("GET"))
        .and(path("/en-us.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(voice_body.clone())
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;
    let voice = RemotePackage {
        component: Component::EnUs,
        url: format!("{}/en-us.zip", server.uri()),
        size: voice_body.len() as u64,
    };

    let (game_job, _) = job(Component::Game, vec![package]);
    let (voice_job, voice_progress) = job(Component::EnUs, vec![voice]);

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        pipeline::run(fx.producer(BTreeSet::new()), fx.engine(), vec![game_job, voice_job]),
    )
    .await
    .expect("a failed patch must not wait for the next download");

    assert!(matches!(
        result,
        Err(PipelineError::Patch {
            component: Component::Game,
            source: PatchError::Verify(VerifyError::Integrity { .. }),
        })
    ));
    let voice_file = fx.patches.join("en-us.zip");
    let downloaded = fs::metadata(&voice_file).map(|m| m.len()).unwrap_or(0);
    assert!(downloaded < voice_body.len() as u64);
    assert_eq!(voice_progress.reported(), downloaded);
    assert_ne!(voice_progress.last_state(), Some(TaskState::PatchWaiting));
}

#[tokio::test]
async fn test_download_failure_is_reported() {
    let fx = Fixture::new();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let package = RemotePackage {
        component: Component::Game,
        url: format!("{}/missing.zip", server.uri()),
        size: 100,
    };
    let (game_job, _) = job(Component::Game, vec![package]);

    let result = pipeline::run(fx.producer(BTreeSet::new()), fx.engine(), vec![game_job]).await;

    assert!(matches!(
        result,
        Err(PipelineError::Download {
            component: Component::Game,
            source: DownloadError::Status { status: 404, .. }
        })
    ));
    assert_eq!(fs::read(fx.game.join("d.bin")).unwrap(), b"before");
}

#[tokio::test]
async fn test_segmented_full_package() {
    let fx = Fixture::new();
    let server = MockServer::start().await;
    let manifest = format!("{}\n", manifest_line("data/blob.bin", b"full game data"));
    let archive = zip_bytes(&[
        ("pkg_version", manifest.as_bytes()),
        ("data/blob.bin", b"full game data"),
    ]);
    let cut = archive.len() / 3;
    let mut packages = Vec::new();
    for (i, part) in [&archive[..cut], &archive[cut..2 * cut], &archive[2 * cut..]]
        .iter()
        .enumerate()
    {
        packages.push(serve(&server, &format!("/game.zip.{:03}", i + 1), part.to_vec()).await);
    }
    let (game_job, progress) = job(Component::Game, packages);

    pipeline::run(fx.producer(BTreeSet::new()), fx.engine(), vec![game_job])
        .await
        .unwrap();

    assert_eq!(
        fs::read(fx.game.join("data").join("blob.bin")).unwrap(),
        b"full game data"
    );
    assert_eq!(progress.last_state(), Some(TaskState::Patched));
}

#[tokio::test]
async fn test_download_only_leaves_installation_alone() {
    let fx = Fixture::new();
    let server = MockServer::start().await;
    let package = serve(&server, "/game.zip", update_archive(b"ccc")).await;
    let (game_job, progress) = job(Component::Game, vec![package]);

    let report = pipeline::download_only(fx.producer(BTreeSet::new()), vec![game_job])
        .await
        .unwrap();

    assert_eq!(report.processed, 1);
    assert!(fx.game.join("old").join("a.txt").exists());
    assert!(fx.patches.join("game.zip").exists());
    assert_eq!(
        progress.states(),
        vec![TaskState::Downloading, TaskState::Downloaded]
    );
    assert_eq!(file_len(&fx.patches.join("game.zip")), progress.reported());
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).unwrap().len()
}
