//! Update command implementation.

use {
    crate::{
        Cli, CliError,
        archive::{Extractor, ImagePair, derive_password, is_rar, locate_images},
        commands::firmware::resolve_archive,
        config::Config,
        open_updater, use_fancy_output,
    },
    anyhow::{Context, Result},
    console::style,
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    log::{info, warn},
    rust_i18n::t,
    std::path::PathBuf,
    tempfile::TempDir,
    weflyup::{Target, UpdateEvent, UpdatePhase, spawn_update},
};

/// Where the images to install come from.
#[derive(Debug, Clone)]
pub(crate) enum ImageSource {
    /// A firmware archive, or one found in the working directory.
    Archive(Option<PathBuf>),
    /// Images given directly.
    Files {
        /// FPGA image.
        mcs: PathBuf,
        /// MCU image.
        hex: PathBuf,
    },
}

/// Images ready to be sent, with the directory they were extracted to.
struct PreparedImages {
    images: ImagePair,
    extracted: Option<TempDir>,
}

impl PreparedImages {
    /// Remove the extraction directory, or keep it and say where it is.
    fn finish(self, keep: bool, quiet: bool) {
        let Some(dir) = self.extracted else {
            return;
        };
        if keep {
            let path = dir.keep();
            if !quiet {
                eprintln!(
                    "{} {}",
                    style("📁").cyan(),
                    t!("update.kept_extracted", path = path.display())
                );
            }
        } else if let Err(e) = dir.close() {
            warn!("Failed to remove extracted images: {e}");
        } else {
            info!("Removed extracted images");
        }
    }
}

fn prepare_images(cli: &Cli, config: &Config, source: &ImageSource) -> Result<PreparedImages> {
    let archive = match source {
        ImageSource::Files { mcs, hex } => {
            return Ok(PreparedImages {
                images: ImagePair {
                    mcs: mcs.clone(),
                    hex: hex.clone(),
                },
                extracted: None,
            });
        },
        ImageSource::Archive(archive) => {
            let base = std::env::current_dir().context("failed to get current directory")?;
            resolve_archive(archive.as_ref(), &base, cli.non_interactive, cli.quiet)?
        },
    };

    if !is_rar(&archive) {
        return Err(
            CliError::Usage(t!("update.not_rar", path = archive.display()).to_string()).into(),
        );
    }
    if !archive.is_file() {
        anyhow::bail!("{}", t!("update.archive_missing", path = archive.display()));
    }

    let extractor = Extractor::find(config.update.extractor.as_deref())?;
    let password = derive_password(&archive);
    info!("Derived archive password from {}", archive.display());

    let dir = tempfile::Builder::new()
        .prefix("weflyup-")
        .tempdir()
        .context("failed to create extraction directory")?;

    if !cli.quiet {
        eprintln!(
            "{} {}",
            style("📦").cyan(),
            t!("update.extracting", path = archive.display())
        );
    }
    extractor.extract(&archive, password, dir.path())?;
    let images = locate_images(dir.path())?;

    Ok(PreparedImages {
        images,
        extracted: Some(dir),
    })
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

fn phase_message(phase: UpdatePhase) -> String {
    match phase {
        UpdatePhase::Handshake => t!("update.phase_start").to_string(),
        UpdatePhase::Fpga => t!("update.phase_image", image = Target::Fpga).to_string(),
        UpdatePhase::Mcu => t!("update.phase_image", image = Target::Mcu).to_string(),
        UpdatePhase::Finish => t!("update.phase_stop").to_string(),
    }
}

/// Update command implementation.
pub(crate) fn cmd_update(
    cli: &Cli,
    config: &mut Config,
    source: &ImageSource,
    keep_extracted: bool,
) -> Result<()> {
    let prepared = prepare_images(cli, config, source)?;
    let result = install(cli, config, prepared.images.clone());
    conclude(
        prepared,
        result,
        keep_extracted || config.update.keep_extracted,
        cli.quiet,
    )
}

/// Settle the extraction directory; it is always kept when the update failed.
fn conclude(prepared: PreparedImages, result: Result<()>, keep: bool, quiet: bool) -> Result<()> {
    prepared.finish(keep || result.is_err(), quiet);
    result
}

fn install(cli: &Cli, config: &mut Config, images: ImagePair) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} {}",
            style("ℹ").blue(),
            t!(
                "update.images",
                mcs = images.mcs.display(),
                hex = images.hex.display()
            )
        );
    }

    let mut updater = open_updater(cli, config)?;

    if !cli.quiet {
        eprintln!("{} {}", style("⏳").yellow(), t!("common.waiting_device"));
    }
    let session = match updater.identify() {
        Ok(session) => session,
        Err(e) => {
            if let Err(close_err) = updater.close() {
                warn!("Failed to close port: {close_err}");
            }
            return Err(e).context(t!("error.identify_failed").to_string());
        },
    };
    if !cli.quiet {
        eprintln!(
            "{} {}",
            style("✓").green(),
            t!(
                "common.identified",
                kind = session.kind,
                version = &session.version
            )
        );
    }

    let pb = progress_bar(cli.quiet);
    let handle = spawn_update(updater, images.mcs, images.hex);

    for event in &handle.events {
        match event {
            UpdateEvent::PhaseStarted(phase) => {
                pb.set_position(0);
                pb.set_message(phase_message(phase));
            },
            UpdateEvent::Progress { percent, .. } => pb.set_position(u64::from(percent)),
            UpdateEvent::FrameRetry {
                target,
                sequence,
                attempt,
                outcome,
            } => {
                pb.set_message(
                    t!(
                        "update.retrying",
                        image = target,
                        sequence = sequence,
                        attempt = attempt,
                        outcome = outcome
                    )
                    .to_string(),
                );
            },
            UpdateEvent::Finished => pb.set_position(100),
        }
    }

    let (updater, result) = handle.join()?;
    if let Err(e) = updater.close() {
        warn!("Failed to close port: {e}");
    }

    match result {
        Ok(()) => {
            pb.finish_with_message(t!("common.complete").to_string());
            if !cli.quiet {
                eprintln!("\n{} {}", style("🎉").green().bold(), t!("update.completed"));
            }
            Ok(())
        },
        Err(e) => {
            pb.abandon();
            Err(e.into())
        },
    }
}
