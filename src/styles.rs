//! The SCSS compiler task.
//!
//! Compiles `<source>/sass/**/*.scss` into plain CSS under `<source>/css/`,
//! mirroring the directory structure. Partials (files starting with `_`) are
//! only ever pulled in through `@use`/`@import` and are skipped here. The CSS
//! minify task later picks the output up and vendor-prefixes it on the way to
//! dist.

use std::fs;
use std::time::Instant;

use anyhow::{Context as _, anyhow};
use camino::Utf8PathBuf;

use crate::Context;
use crate::io::{as_overhead, ensure_parent};
use crate::transform::glob_files;

pub fn compile_styles(ctx: &Context) -> anyhow::Result<()> {
    let s = Instant::now();

    let source = ctx.config.paths.source.join("sass");
    let target = ctx.config.paths.source.join("css");

    let files: Vec<Utf8PathBuf> = glob_files(source.join("**/*.scss").as_str())?
        .into_iter()
        .filter(|path| {
            path.file_name()
                .is_none_or(|name| !name.starts_with('_'))
        })
        .collect();

    for path in &files {
        let css = grass::from_path(path, &grass::Options::default())
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("compiling {path}"))?;

        let rel = path.strip_prefix(&source)?;
        let dest = target.join(rel).with_extension("css");

        ensure_parent(&dest)?;
        fs::write(&dest, css).with_context(|| format!("writing {dest}"))?;

        tracing::debug!("Compiled {path} -> {dest}");
    }

    tracing::info!("Compiled {} stylesheets {}", files.len(), as_overhead(s));

    Ok(())
}
