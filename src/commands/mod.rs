use anyhow::{Context, Result};
use log::{debug, warn};
use std::sync::Arc;

use crate::{
    installer::{AppDirInstaller, InstallOptions},
    manifest::{ManifestStore, PackageManifest, Platform},
    pipeline::{InstallAttempt, hand_off},
    receipt::ReceiptStore,
    resolve::resolve as resolve_variant,
    runtime::Runtime,
};

pub mod config;
pub mod services;

pub use config::{Config, ConfigOverrides};

use services::build_pipeline;

/// The platform to act for: the one given on the command line, or the host.
pub fn target_platform(os: Option<&str>, arch: Option<&str>) -> Result<Platform> {
    match (os, arch) {
        (Some(os), Some(arch)) => Ok(Platform::new(os, arch)?),
        (None, None) => Ok(Platform::detect()),
        _ => anyhow::bail!("--os and --arch must be given together"),
    }
}

/// List all casks in the casks directory
#[tracing::instrument(skip(runtime, overrides))]
pub fn list<R: Runtime>(runtime: R, overrides: ConfigOverrides) -> Result<()> {
    let config = Config::load(&runtime, overrides)?;
    let store = ManifestStore::new(&runtime, &config.casks_dir);

    let names = store.names()?;
    if names.is_empty() {
        println!("No casks found in {}", config.casks_dir.display());
        return Ok(());
    }

    debug!("Found {} cask(s)", names.len());
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

/// Show a cask's metadata and variants
#[tracing::instrument(skip(runtime, overrides))]
pub fn info<R: Runtime>(runtime: R, name: &str, overrides: ConfigOverrides) -> Result<()> {
    let config = Config::load(&runtime, overrides)?;
    let manifest = ManifestStore::new(&runtime, &config.casks_dir).load(name)?;
    print!("{}", describe(&manifest));
    Ok(())
}

fn describe(manifest: &PackageManifest) -> String {
    let mut out = format!("{}: {}\n", manifest.name(), manifest.display_name());
    out.push_str(&format!("{}\n", manifest.description()));
    out.push_str(&format!("Homepage: {}\n", manifest.homepage()));
    if let Some(app) = manifest.app() {
        out.push_str(&format!("App: {}\n", app));
    }
    if let Some(verified) = manifest.verified() {
        out.push_str(&format!("Verified: {}\n", verified));
    }
    out.push_str("Variants:\n");
    for (i, variant) in manifest.variants().iter().enumerate() {
        out.push_str(&format!(
            "  #{} {} [{}] {}\n      {}\n",
            i, variant.version, variant.platform, variant.integrity, variant.download_url
        ));
    }
    out
}

/// Print the variant selected for a platform
#[tracing::instrument(skip(runtime, overrides))]
pub fn resolve<R: Runtime>(
    runtime: R,
    name: &str,
    platform: &Platform,
    overrides: ConfigOverrides,
) -> Result<()> {
    let config = Config::load(&runtime, overrides)?;
    let manifest = ManifestStore::new(&runtime, &config.casks_dir).load(name)?;
    let variant = resolve_variant(&manifest, platform)?;

    println!("{} {} for {}", manifest.name(), variant.version, platform);
    println!("URL: {}", variant.download_url);
    println!("Integrity: {}", variant.integrity);
    Ok(())
}

/// Fetch and verify a cask's artifact into the cache
#[tracing::instrument(skip(runtime, overrides))]
pub async fn fetch<R: Runtime + 'static>(
    runtime: R,
    name: &str,
    platform: &Platform,
    overrides: ConfigOverrides,
) -> Result<()> {
    let runtime = Arc::new(runtime);
    let config = Config::load(&runtime, overrides)?;
    let manifest = ManifestStore::new(&runtime, &config.casks_dir).load(name)?;
    let shipped = ReceiptStore::new(&config.receipts_dir).load(&runtime, name)?;

    let pipeline = build_pipeline(runtime.clone(), &config)?;
    let mut attempt = InstallAttempt::new();
    let artifact = pipeline
        .prepare(&mut attempt, &manifest, platform, shipped.as_ref())
        .await
        .with_context(|| format!("Failed to fetch {}", name))?;

    if artifact.is_unverified() {
        warn!("{} was not verified: the manifest skips integrity checks", name);
    }
    println!("{}", artifact.path().display());
    Ok(())
}

/// Run the full pipeline and stage the artifact into the application directory
#[tracing::instrument(skip(runtime, overrides))]
pub async fn install<R: Runtime + 'static>(
    runtime: R,
    name: &str,
    platform: &Platform,
    quarantine: bool,
    overrides: ConfigOverrides,
) -> Result<()> {
    let runtime = Arc::new(runtime);
    let config = Config::load(&runtime, overrides)?;
    let manifest = ManifestStore::new(&runtime, &config.casks_dir).load(name)?;
    let receipts = ReceiptStore::new(&config.receipts_dir);
    let shipped = receipts.load(&runtime, name)?;

    let pipeline = build_pipeline(runtime.clone(), &config)?;
    let mut attempt = InstallAttempt::new();
    let artifact = pipeline
        .prepare(&mut attempt, &manifest, platform, shipped.as_ref())
        .await
        .with_context(|| format!("Failed to install {}", name))?;
    let notes = artifact.variant().post_install_notes.clone();

    let installer = AppDirInstaller::new(runtime, receipts);
    let options = InstallOptions {
        appdir: config.appdir.clone(),
        quarantine,
    };
    let report = hand_off(&mut attempt, &manifest, artifact, &installer, &options)
        .await
        .with_context(|| format!("Failed to install {}", name))?;

    println!(
        "Installed {} {} to {}",
        report.name,
        report.version,
        report.location.display()
    );
    if report.unverified {
        println!("Warning: {} was installed without checksum verification", name);
    }
    if let Some(notes) = notes {
        println!("==> Caveats");
        println!("{}", notes.trim_end());
    }
    Ok(())
}

/// Validate one manifest, or every manifest in the casks directory
#[tracing::instrument(skip(runtime, overrides))]
pub fn check<R: Runtime>(runtime: R, name: Option<&str>, overrides: ConfigOverrides) -> Result<()> {
    let config = Config::load(&runtime, overrides)?;
    let store = ManifestStore::new(&runtime, &config.casks_dir);

    let results = match name {
        Some(name) => vec![(name.to_string(), store.load(name))],
        None => store.load_all()?,
    };
    if results.is_empty() {
        println!("No casks found in {}", config.casks_dir.display());
        return Ok(());
    }

    let mut failed = 0;
    for (name, result) in &results {
        match result {
            Ok(manifest) => println!("{}: ok ({} variant(s))", name, manifest.variants().len()),
            Err(e) => {
                failed += 1;
                println!("{}: {}", name, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} manifest(s) failed validation", failed, results.len());
    }
    Ok(())
}
