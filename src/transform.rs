//! Per-category asset transforms.
//!
//! Each category is an independent pure step: read every file matching a
//! source glob, apply the transformation, write the result under dist. Files
//! are processed on the rayon pool; the first failure aborts the owning task
//! and propagates through the graph.
//!
//! Images and misc files skip work when the destination is already fresh.
//! Freshness compares the source mtime against the destination file itself,
//! so deleting a destination file always forces a rebuild.

use std::fs;
use std::io::Cursor;
use std::time::Instant;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::Context;
use crate::io::{as_overhead, ensure_parent};
use crate::minify;

/// Collect files matching a glob pattern, sorted for deterministic order.
pub(crate) fn glob_files(pattern: &str) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();

    for entry in glob::glob(pattern)? {
        let path = Utf8PathBuf::try_from(entry?)?;
        if path.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Check whether `dest` exists and is at least as new as `src`.
///
/// Used when the destination is the only record of previous work; a missing
/// or older destination always triggers a rebuild.
fn is_fresh(dest: &Utf8Path, src: &Utf8Path) -> bool {
    let mtime = |path: &Utf8Path| path.metadata().and_then(|m| m.modified()).ok();

    match (mtime(dest), mtime(src)) {
        (Some(dest_time), Some(src_time)) => dest_time >= src_time,
        _ => false,
    }
}

/// Minify `<source>/*.html` into the dist root.
pub fn transform_html(ctx: &Context) -> anyhow::Result<()> {
    let s = Instant::now();
    let source = &ctx.config.paths.source;
    let dist = &ctx.config.paths.dist;

    let files = glob_files(source.join("*.html").as_str())?;

    files.par_iter().try_for_each(|path| -> anyhow::Result<()> {
        let html = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        let dest = dist.join(path.strip_prefix(source)?);

        ensure_parent(&dest)?;
        fs::write(&dest, minify::minify_html(&html)).with_context(|| format!("writing {dest}"))?;

        Ok(())
    })?;

    tracing::info!("Minified {} html files {}", files.len(), as_overhead(s));
    Ok(())
}

/// Minify and vendor-prefix `<source>/css/**/*.css` into `dist/css/`.
pub fn transform_css(ctx: &Context) -> anyhow::Result<()> {
    let s = Instant::now();
    let source = ctx.config.paths.source.join("css");
    let target = ctx.config.paths.dist.join("css");

    let files = glob_files(source.join("**/*.css").as_str())?;

    files.par_iter().try_for_each(|path| -> anyhow::Result<()> {
        let css = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        let minified = minify::minify_css(&css).with_context(|| format!("minifying {path}"))?;
        let dest = target.join(path.strip_prefix(&source)?);

        ensure_parent(&dest)?;
        fs::write(&dest, minified).with_context(|| format!("writing {dest}"))?;

        Ok(())
    })?;

    tracing::info!("Minified {} stylesheets {}", files.len(), as_overhead(s));
    Ok(())
}

/// Minify the bundled scripts `<source>/bundle/*.js` into `dist/bundle/`.
pub fn transform_scripts(ctx: &Context) -> anyhow::Result<()> {
    let s = Instant::now();
    let source = ctx.config.paths.source.join("bundle");
    let target = ctx.config.paths.dist.join("bundle");

    let files = glob_files(source.join("*.js").as_str())?;

    files.par_iter().try_for_each(|path| -> anyhow::Result<()> {
        let js = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        let minified = minify::minify_js(&js).with_context(|| format!("minifying {path}"))?;
        let dest = target.join(path.strip_prefix(&source)?);

        ensure_parent(&dest)?;
        fs::write(&dest, minified).with_context(|| format!("writing {dest}"))?;

        Ok(())
    })?;

    tracing::info!("Minified {} scripts {}", files.len(), as_overhead(s));
    Ok(())
}

/// Optimize `<source>/img/**` into `dist/img/`, skipping fresh destinations.
pub fn transform_images(ctx: &Context) -> anyhow::Result<()> {
    let s = Instant::now();
    let source = ctx.config.paths.source.join("img");
    let target = ctx.config.paths.dist.join("img");

    let files = glob_files(source.join("**/*").as_str())?;

    files.par_iter().try_for_each(|path| -> anyhow::Result<()> {
        let dest = target.join(path.strip_prefix(&source)?);
        if is_fresh(&dest, path) {
            tracing::debug!("Skipping fresh {dest}");
            return Ok(());
        }

        let buffer = fs::read(path).with_context(|| format!("reading {path}"))?;
        let optimized = optimize_image(&buffer).with_context(|| format!("optimizing {path}"))?;

        ensure_parent(&dest)?;
        fs::write(&dest, optimized).with_context(|| format!("writing {dest}"))?;

        Ok(())
    })?;

    tracing::info!("Optimized {} images {}", files.len(), as_overhead(s));
    Ok(())
}

/// Re-encode an image to squeeze out metadata and encoder slack.
///
/// GIFs and anything the codec does not recognize pass through unchanged.
/// The original bytes win whenever the re-encode comes out larger.
fn optimize_image(buffer: &[u8]) -> anyhow::Result<Vec<u8>> {
    let format = match image::guess_format(buffer) {
        Ok(format) => format,
        Err(_) => return Ok(buffer.to_vec()),
    };

    if !matches!(
        format,
        image::ImageFormat::Png | image::ImageFormat::Jpeg | image::ImageFormat::WebP
    ) {
        return Ok(buffer.to_vec());
    }

    let img = image::load_from_memory_with_format(buffer, format)?;
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format)?;

    let out = out.into_inner();
    if out.len() < buffer.len() {
        Ok(out)
    } else {
        Ok(buffer.to_vec())
    }
}

/// Copy `<source>/misc/**` into `dist/misc/`, skipping fresh destinations.
pub fn transform_misc(ctx: &Context) -> anyhow::Result<()> {
    let s = Instant::now();
    let source = ctx.config.paths.source.join("misc");
    let target = ctx.config.paths.dist.join("misc");

    let files = glob_files(source.join("**/*").as_str())?;

    files.par_iter().try_for_each(|path| -> anyhow::Result<()> {
        let dest = target.join(path.strip_prefix(&source)?);
        if is_fresh(&dest, path) {
            tracing::debug!("Skipping fresh {dest}");
            return Ok(());
        }

        ensure_parent(&dest)?;
        fs::copy(path, &dest).with_context(|| format!("copying {path} -> {dest}"))?;

        Ok(())
    })?;

    tracing::info!("Copied {} misc files {}", files.len(), as_overhead(s));
    Ok(())
}
