//! Update orchestrator
//!
//! Coordinates one run:
//! 1. Game check  - read the installed version and languages
//! 2. Catalog     - query (or load) the remote catalog and plan downloads
//! 3. Preliminary - move audio assets, delete deprecated files (updates only)
//! 4. Pipeline    - download and patch every component
//! 5. Conclude    - write the new config.ini

use crate::config::Config;
use crate::downloaders::{HttpClient, ResumableDownloader};
use crate::game::catalog::{self, ApiResponse, CatalogPlan, PlanMode, RemotePackage};
use crate::game::info::write_descriptor;
use crate::game::{Component, GameInfo, PreconditionError};
use crate::patcher::purge::{self, PurgeReport};
use crate::patcher::{prelim, HPatchz, PatchEngine};
use crate::pipeline::{self, ComponentJob, PipelineReport, Producer};
use crate::progress::{ProgressBoard, TaskState};
use anyhow::{bail, Context, Result};
use semver::Version;
use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How a run ended
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Installed version already matches the catalog
    UpToDate(Version),
    /// User declined the confirmation prompt
    Aborted,
    /// Pipeline ran to completion
    Finished {
        plan_mode: PlanMode,
        version: Version,
        report: PipelineReport,
        download_only: bool,
    },
}

/// Components to process for `plan`, in pipeline order: base game first,
/// then languages in catalog order restricted to `languages`.
pub fn select_components(
    plan: &CatalogPlan,
    languages: &BTreeSet<Component>,
) -> Vec<(Component, Vec<RemotePackage>)> {
    let mut selected = Vec::with_capacity(languages.len() + 1);
    if !plan.game.is_empty() {
        selected.push((Component::Game, plan.game.clone()));
    }
    for pkg in &plan.languages {
        if languages.contains(&pkg.component) {
            selected.push((pkg.component, vec![pkg.clone()]));
        }
    }
    for language in languages {
        if plan.language(*language).is_none() {
            warn!("Catalog has no package for language {}", language.name());
        }
    }
    selected
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

fn format_size(bytes: u64) -> String {
    format!("{:.2} GB", bytes as f64 / 1024.0 / 1024.0 / 1024.0)
}

/// One line of the pre-run summary.
fn summary_line(component: Component, bytes: u64, excluded: bool) -> String {
    let note = if excluded { " (skipped this run)" } else { "" };
    format!("{:>16}  {}{}", component.name(), format_size(bytes), note)
}

/// Main update orchestrator
pub struct Updater {
    config: Config,
    client: HttpClient,
}

impl Updater {
    /// Create an updater with the given configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let client = HttpClient::new().context("Failed to create HTTP client")?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Query the API, or read the saved response when one is configured.
    pub async fn load_catalog(&self) -> Result<ApiResponse> {
        let response = match &self.config.api_file {
            Some(path) => catalog::load_file(path)?,
            None => catalog::fetch(self.client.inner(), &self.config.api_url).await?,
        };
        Ok(response)
    }

    /// Installed state, or an error when nothing is installed and no
    /// language was requested for a fresh install.
    fn game_info(&self) -> Result<Option<GameInfo>> {
        let installed = GameInfo::load(&self.config.game_path)?;
        if installed.is_none() && self.config.languages.is_empty() {
            return Err(PreconditionError::NotInstalled(self.config.game_path.clone()).into());
        }
        Ok(installed)
    }

    /// Print the installed state and what a run would do.
    pub async fn info(&self) -> Result<()> {
        let installed = GameInfo::load(&self.config.game_path)?;
        let response = self.load_catalog().await?;

        println!("=== Installation ===");
        match &installed {
            Some(game) => {
                println!("Path:       {}", game.path.display());
                println!("Version:    {}", game.version);
                let names: Vec<_> = game.languages.iter().map(|l| l.name()).collect();
                println!("Languages:  {}", names.join(", "));
            }
            None => println!("Not installed at {}", self.config.game_path.display()),
        }

        println!("\n=== Catalog ===");
        println!("Latest:     {}", response.data.game.latest.version);
        if let Some(predl) = &response.data.pre_download_game {
            println!("Pre-download: {}", predl.latest.version);
        }

        let plan = response.plan(
            installed.as_ref().map(|g| &g.version),
            self.config.predownload_only,
        );
        match plan {
            Ok(plan) => {
                println!("\n=== Plan ({}) ===", plan.version);
                for (component, bytes) in plan.component_bytes() {
                    println!("{:>16}  {}", component.name(), format_size(bytes));
                }
                if !plan.deprecated_files.is_empty() {
                    println!("Deprecated files: {}", plan.deprecated_files.len());
                }
            }
            Err(e) => println!("\nNo plan: {}", e),
        }
        Ok(())
    }

    /// Delete files no installed manifest accounts for.
    pub fn purge(&self, dry_run: bool) -> Result<PurgeReport> {
        let installed = GameInfo::load(&self.config.game_path)?
            .ok_or_else(|| PreconditionError::NotInstalled(self.config.game_path.clone()))?;
        let mut components = installed.languages.clone();
        components.insert(Component::Game);
        Ok(purge::purge(&installed.path, &components, dry_run)?)
    }

    /// Run the whole update.
    pub async fn run(&self) -> Result<RunOutcome> {
        let started = Instant::now();
        let installed = self.game_info()?;
        self.config
            .create_dirs()
            .context("Failed to create working directories")?;
        let response = self.load_catalog().await?;

        if let Some(game) = &installed {
            let up_to_date = response.up_to_date(&game.version, self.config.predownload_only)?;
            if let Some(latest) = up_to_date {
                info!("Game is up to date at {}", latest);
                return Ok(RunOutcome::UpToDate(latest));
            }
        }

        let plan = response
            .plan(
                installed.as_ref().map(|g| &g.version),
                self.config.predownload_only,
            )
            .context("Failed to plan downloads")?;

        let languages = match &installed {
            Some(game) => game.languages.clone(),
            None => self.config.languages.clone(),
        };
        let selected = select_components(&plan, &languages);
        if selected.is_empty() {
            bail!("Catalog offers nothing to download for {}", plan.version);
        }

        println!("Update:     {}", plan.version);
        for (component, packages) in &selected {
            let bytes: u64 = packages.iter().map(|p| p.size).sum();
            let excluded = self.config.download_exclude.contains(component);
            println!("{}", summary_line(*component, bytes, excluded));
        }

        // Fail before downloading gigabytes when the diff tool is missing
        let patcher = if self.config.download_only {
            None
        } else {
            Some(HPatchz::locate(self.config.hpatchz_path.as_deref())?)
        };

        let prompt = match (plan.mode, self.config.download_only) {
            (PlanMode::FullInstall, true) => "Continue with downloading the full game?",
            (PlanMode::FullInstall, false) => "Continue with downloading and extracting the full game?",
            (PlanMode::Update, true) => "Continue with downloading the update without patching?",
            (PlanMode::Update, false) => "Continue with downloading the update and then patching?",
        };
        if !self.config.assume_yes && !confirm(prompt)? {
            println!("Aborted.");
            return Ok(RunOutcome::Aborted);
        }
        info!(
            "Run confirmed: {} {:?}, download only {}",
            plan.version, plan.mode, self.config.download_only
        );

        let board = ProgressBoard::new(selected.iter().map(|(c, _)| *c));
        if let (Some(_), PlanMode::Update, Some(game)) = (&patcher, plan.mode, &installed) {
            self.preliminary(game, &plan, &board)?;
        }

        let jobs: Vec<ComponentJob> = selected
            .into_iter()
            .map(|(component, packages)| {
                let progress = board.task(component);
                let job = ComponentJob {
                    component,
                    packages,
                    progress,
                };
                job.progress
                    .begin(TaskState::DownloadWaiting, job.download_bytes());
                job
            })
            .collect();

        let downloader = Arc::new(ResumableDownloader::new(&self.client, CancellationToken::new()));
        let producer = Producer::new(
            downloader,
            &self.config.patch_path,
            &self.config.game_path,
            plan.version.clone(),
            self.config.download_exclude.clone(),
        );

        let report = match patcher {
            None => pipeline::download_only(producer, jobs).await?,
            Some(patcher) => {
                let engine = PatchEngine::new(
                    &self.config.game_path,
                    &self.config.temp_path,
                    Arc::new(patcher),
                );
                let report = pipeline::run(producer, engine, jobs).await?;

                write_descriptor(&self.config.game_path, &plan.version.to)
                    .context("Failed to write config.ini")?;
                report
            }
        };

        board.finish("The age of miracles is past");
        info!(
            "Run finished: {} processed, {} skipped, elapsed {:?}",
            report.processed,
            report.skipped,
            started.elapsed()
        );
        Ok(RunOutcome::Finished {
            plan_mode: plan.mode,
            version: plan.version.to.clone(),
            report,
            download_only: self.config.download_only,
        })
    }

    /// Steps that run once before any update archive is patched.
    fn preliminary(&self, game: &GameInfo, plan: &CatalogPlan, board: &ProgressBoard) -> Result<()> {
        let from = game.persistent_audio();
        let to = game.streaming_audio();
        let budget = prelim::audio_move_bytes(&from, &to)
            + prelim::deprecated_bytes(&game.path, &plan.deprecated_files);

        let progress = board.task(Component::Game);
        progress.begin(TaskState::Patching, budget);

        progress.step("Moving audio");
        prelim::move_audio_assets(&from, &to, progress.as_ref())
            .context("Failed to move audio assets")?;

        progress.step("Deprecating");
        prelim::delete_deprecated(&game.path, &plan.deprecated_files, progress.as_ref())
            .context("Failed to delete deprecated files")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::VersionTransition;

    fn pkg(component: Component, url: &str) -> RemotePackage {
        RemotePackage {
            component,
            url: url.to_string(),
            size: 10,
        }
    }

    fn plan() -> CatalogPlan {
        CatalogPlan {
            version: VersionTransition {
                from: None,
                to: Version::new(4, 0, 0),
            },
            mode: PlanMode::FullInstall,
            game: vec![pkg(Component::Game, "a.zip.001"), pkg(Component::Game, "a.zip.002")],
            languages: vec![
                pkg(Component::ZhCn, "zh.zip"),
                pkg(Component::EnUs, "en.zip"),
                pkg(Component::JaJp, "ja.zip"),
            ],
            deprecated_files: Vec::new(),
        }
    }

    #[test]
    fn test_game_first_then_catalog_order() {
        let languages = BTreeSet::from([Component::JaJp, Component::ZhCn]);
        let selected = select_components(&plan(), &languages);
        let order: Vec<_> = selected.iter().map(|(c, _)| *c).collect();
        assert_eq!(order, vec![Component::Game, Component::ZhCn, Component::JaJp]);
        assert_eq!(selected[0].1.len(), 2);
    }

    #[test]
    fn test_summary_marks_skipped_component() {
        let line = summary_line(Component::EnUs, 1024 * 1024 * 1024, true);
        assert!(line.ends_with("1.00 GB (skipped this run)"), "{}", line);
        assert!(!summary_line(Component::Game, 0, false).contains("skipped"));
    }

    #[test]
    fn test_unknown_language_is_dropped() {
        let languages = BTreeSet::from([Component::KoKr]);
        let selected = select_components(&plan(), &languages);
        assert_eq!(selected.len(), 1);
    }
}
