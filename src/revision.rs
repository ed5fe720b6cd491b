//! Fingerprinting ("revisioning") and reference rewriting.
//!
//! Every built CSS and JS file gets a content hash embedded into its
//! filename, the unhashed original is removed, and the mapping is written to
//! `dist/rev-manifest.json`. Built HTML is then rewritten so that every
//! reference matching a manifest key points at the fingerprinted name.
//!
//! Hashing depends only on file content, never on timestamps or directory
//! order, so rebuilding unchanged input yields identical names and an
//! identical manifest.

use std::collections::BTreeMap;
use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};

use crate::Context;
use crate::error::RevisionError;
use crate::hash::Hash32;
use crate::io::as_overhead;

/// Mapping from original relative asset path to its fingerprinted path.
///
/// Created fresh on every full build and consumed once by the rewrite step;
/// never persisted across builds. A `BTreeMap` keeps the serialized manifest
/// byte-stable.
pub type Manifest = BTreeMap<String, String>;

pub const MANIFEST_NAME: &str = "rev-manifest.json";

/// Number of hash hex digits embedded into filenames.
const FINGERPRINT_LEN: usize = 10;

fn glob_relative(dist: &Utf8Path, pattern: &str) -> Result<Vec<Utf8PathBuf>, RevisionError> {
    let mut files = Vec::new();

    for entry in glob::glob(dist.join(pattern).as_str())? {
        let path = Utf8PathBuf::try_from(entry?)?;
        if path.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Rename every CSS and JS file under `dist` to its fingerprinted name,
/// removing the originals, and return the manifest.
pub fn revision_assets(dist: &Utf8Path) -> Result<Manifest, RevisionError> {
    let mut manifest = Manifest::new();

    for pattern in ["**/*.css", "**/*.js"] {
        for path in glob_relative(dist, pattern)? {
            let hash = Hash32::hash_file(&path)?.to_hex();
            let fingerprint = &hash[..FINGERPRINT_LEN];

            let stem = path.file_stem().unwrap_or_default();
            let ext = path.extension().unwrap_or_default();
            let dest = path.with_file_name(format!("{stem}-{fingerprint}.{ext}"));

            fs::rename(&path, &dest)?;

            let original = relative_to(dist, &path)?;
            let revisioned = relative_to(dist, &dest)?;
            manifest.insert(original, revisioned);
        }
    }

    Ok(manifest)
}

fn relative_to(dist: &Utf8Path, path: &Utf8Path) -> Result<String, RevisionError> {
    path.strip_prefix(dist)
        .map(|rel| rel.to_string())
        .map_err(|_| RevisionError::OutsideDist(path.to_string()))
}

/// Write the manifest as `dist/rev-manifest.json`.
pub fn write_manifest(dist: &Utf8Path, manifest: &Manifest) -> Result<(), RevisionError> {
    let json = serde_json::to_string_pretty(manifest)?;
    fs::write(dist.join(MANIFEST_NAME), json)?;
    Ok(())
}

/// Read back the manifest produced by the revision step.
pub fn read_manifest(dist: &Utf8Path) -> Result<Manifest, RevisionError> {
    let raw = fs::read_to_string(dist.join(MANIFEST_NAME))?;
    Ok(serde_json::from_str(&raw)?)
}

/// Rewrite references inside every built HTML file.
///
/// Each occurrence of a manifest key is replaced by its revisioned value;
/// references not present in the manifest are left untouched. Longest keys
/// are applied first so a key can never clobber a longer one it prefixes.
pub fn rewrite_references(dist: &Utf8Path, manifest: &Manifest) -> Result<(), RevisionError> {
    let mut entries: Vec<(&String, &String)> = manifest.iter().collect();
    entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

    for path in glob_relative(dist, "**/*.html")? {
        let mut html = fs::read_to_string(&path)?;

        for (original, revisioned) in &entries {
            if html.contains(original.as_str()) {
                html = html.replace(original.as_str(), revisioned);
            }
        }

        fs::write(&path, html)?;
    }

    Ok(())
}

/// Task action: fingerprint built assets and emit the manifest.
pub fn revision_task(ctx: &Context) -> anyhow::Result<()> {
    let s = Instant::now();
    let dist = &ctx.config.paths.dist;

    let manifest = revision_assets(dist)?;
    write_manifest(dist, &manifest)?;

    tracing::info!("Revisioned {} assets {}", manifest.len(), as_overhead(s));
    Ok(())
}

/// Task action: rewrite HTML references using the manifest on disk.
pub fn rewrite_task(ctx: &Context) -> anyhow::Result<()> {
    let s = Instant::now();
    let dist = &ctx.config.paths.dist;

    let manifest = read_manifest(dist)?;
    rewrite_references(dist, &manifest)?;

    tracing::info!("Rewrote asset references {}", as_overhead(s));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{transform_css, transform_html};
    use crate::{Config, Mode};

    fn dist_at(root: &std::path::Path) -> Utf8PathBuf {
        Utf8PathBuf::try_from(root.to_path_buf()).unwrap().join("dist")
    }

    fn seed(dist: &Utf8Path) {
        fs::create_dir_all(dist.join("css")).unwrap();
        fs::create_dir_all(dist.join("bundle")).unwrap();
        fs::write(dist.join("css/a.css"), "body{color:red}").unwrap();
        fs::write(dist.join("bundle/app.js"), "console.log(1);").unwrap();
    }

    #[test]
    fn test_originals_removed_and_manifest_complete() {
        let tmp = tempfile::tempdir().unwrap();
        let dist = dist_at(tmp.path());
        seed(&dist);

        let manifest = revision_assets(&dist).unwrap();

        assert_eq!(manifest.len(), 2);
        assert!(!dist.join("css/a.css").exists());
        assert!(!dist.join("bundle/app.js").exists());

        let revisioned = &manifest["css/a.css"];
        assert!(dist.join(revisioned).exists());
        assert!(revisioned.starts_with("css/a-"));
        assert!(revisioned.ends_with(".css"));
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let run = || {
            let tmp = tempfile::tempdir().unwrap();
            let dist = dist_at(tmp.path());
            seed(&dist);
            revision_assets(&dist).unwrap()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let tmp = tempfile::tempdir().unwrap();
        let dist = dist_at(tmp.path());
        seed(&dist);
        let before = revision_assets(&dist).unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let dist = dist_at(tmp.path());
        seed(&dist);
        fs::write(dist.join("css/a.css"), "body{color:blue}").unwrap();
        let after = revision_assets(&dist).unwrap();

        assert_ne!(before["css/a.css"], after["css/a.css"]);
        assert_eq!(before["bundle/app.js"], after["bundle/app.js"]);
    }

    #[test]
    fn test_rewrite_replaces_only_manifest_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let dist = dist_at(tmp.path());
        fs::create_dir_all(&dist).unwrap();
        fs::write(
            dist.join("index.html"),
            "<link href=\"css/a.css\"><link href=\"css/other.css\">",
        )
        .unwrap();

        let mut manifest = Manifest::new();
        manifest.insert("css/a.css".into(), "css/a-0123456789.css".into());

        rewrite_references(&dist, &manifest).unwrap();

        let html = fs::read_to_string(dist.join("index.html")).unwrap();
        assert_eq!(
            html,
            "<link href=\"css/a-0123456789.css\"><link href=\"css/other.css\">"
        );

        // Idempotent on unmatched references.
        rewrite_references(&dist, &manifest).unwrap();
        assert_eq!(fs::read_to_string(dist.join("index.html")).unwrap(), html);
    }

    #[test]
    fn test_manifest_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let dist = dist_at(tmp.path());
        fs::create_dir_all(&dist).unwrap();

        let mut manifest = Manifest::new();
        manifest.insert("css/a.css".into(), "css/a-0123456789.css".into());

        write_manifest(&dist, &manifest).unwrap();
        assert_eq!(read_manifest(&dist).unwrap(), manifest);
    }

    #[test]
    fn test_end_to_end_css_build() {
        let build = |root: &std::path::Path| -> (Utf8PathBuf, Manifest) {
            let root = Utf8PathBuf::try_from(root.to_path_buf()).unwrap();
            let mut config = Config::default();
            config.paths.source = root.join("src");
            config.paths.dist = root.join("dist");
            let ctx = Context::new(config, Mode::Build);

            let css = ctx.config.paths.source.join("css");
            fs::create_dir_all(&css).unwrap();
            fs::write(css.join("a.css"), "body{color:red}").unwrap();
            fs::write(
                ctx.config.paths.source.join("index.html"),
                "<link rel=\"stylesheet\" href=\"css/a.css\">",
            )
            .unwrap();

            transform_html(&ctx).unwrap();
            transform_css(&ctx).unwrap();
            revision_task(&ctx).unwrap();
            rewrite_task(&ctx).unwrap();

            let manifest = read_manifest(&ctx.config.paths.dist).unwrap();
            (ctx.config.paths.dist.clone(), manifest)
        };

        let tmp = tempfile::tempdir().unwrap();
        let (dist, manifest) = build(tmp.path());

        let revisioned = &manifest["css/a.css"];
        assert_eq!(
            fs::read_to_string(dist.join(revisioned)).unwrap(),
            "body{color:red}"
        );

        let html = fs::read_to_string(dist.join("index.html")).unwrap();
        assert!(html.contains(revisioned.as_str()));
        assert!(!html.contains("css/a.css\""));

        // Unchanged input produces the same fingerprint on a second build.
        let tmp = tempfile::tempdir().unwrap();
        let (_, manifest_again) = build(tmp.path());
        assert_eq!(manifest, manifest_again);
    }
}
