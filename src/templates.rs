//! The template compiler task.
//!
//! Pages under `<source>/pages/**/*.jinja` are rendered against the shared
//! templates in `<source>/templates/` and written as `.html` files into the
//! source root, where the dev server and the html task pick them up. During
//! an interactive session the live-reload client is embedded into every
//! rendered page.

use std::fs;
use std::time::Instant;

use anyhow::Context as _;
use camino::Utf8PathBuf;

use crate::io::{as_overhead, ensure_parent};
use crate::transform::glob_files;
use crate::watch::inject_reload;
use crate::{Context, Mode};

pub fn compile_templates(ctx: &Context) -> anyhow::Result<()> {
    let s = Instant::now();

    let source = &ctx.config.paths.source;
    let pages = source.join("pages");

    let mut env = minijinja::Environment::new();
    env.set_loader(minijinja::path_loader(source.join("templates")));

    let files: Vec<Utf8PathBuf> = glob_files(pages.join("**/*.jinja").as_str())?;

    for path in &files {
        let raw = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        let html = env
            .render_str(&raw, minijinja::context! {})
            .with_context(|| format!("rendering {path}"))?;

        let html = match (ctx.mode, ctx.port) {
            (Mode::Watch, Some(ws_port)) => inject_reload(&html, ws_port),
            _ => html,
        };

        let rel = path.strip_prefix(&pages)?;
        let dest = source.join(rel).with_extension("html");

        ensure_parent(&dest)?;
        fs::write(&dest, html).with_context(|| format!("writing {dest}"))?;

        tracing::debug!("Rendered {path} -> {dest}");
    }

    tracing::info!("Rendered {} pages {}", files.len(), as_overhead(s));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Config, Mode};

    fn context_at(root: &std::path::Path) -> Context {
        let root = Utf8PathBuf::try_from(root.to_path_buf()).unwrap();
        let mut config = Config::default();
        config.paths.source = root.join("src");
        config.paths.dist = root.join("dist");
        Context::new(config, Mode::Build)
    }

    #[test]
    fn test_renders_page_against_template() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context_at(tmp.path());
        let source = &ctx.config.paths.source;

        fs::create_dir_all(source.join("templates")).unwrap();
        fs::create_dir_all(source.join("pages")).unwrap();
        fs::write(
            source.join("templates/base.jinja"),
            "<html><body>{% block content %}{% endblock %}</body></html>",
        )
        .unwrap();
        fs::write(
            source.join("pages/index.jinja"),
            "{% extends \"base.jinja\" %}{% block content %}Hello{% endblock %}",
        )
        .unwrap();

        compile_templates(&ctx).unwrap();

        let html = fs::read_to_string(source.join("index.html")).unwrap();
        assert_eq!(html, "<html><body>Hello</body></html>");
    }

    #[test]
    fn test_watch_mode_embeds_reload_client() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = context_at(tmp.path());
        ctx.mode = Mode::Watch;
        ctx.port = Some(1337);
        let source = &ctx.config.paths.source;

        fs::create_dir_all(source.join("templates")).unwrap();
        fs::create_dir_all(source.join("pages")).unwrap();
        fs::write(
            source.join("pages/index.jinja"),
            "<html><body>Hello</body></html>",
        )
        .unwrap();

        compile_templates(&ctx).unwrap();

        let html = fs::read_to_string(source.join("index.html")).unwrap();
        assert!(html.contains("ws://localhost:1337"));
        assert!(html.ends_with("</body></html>"));

        // A one-shot build stays clean.
        ctx.mode = Mode::Build;
        ctx.port = None;
        compile_templates(&ctx).unwrap();
        let html = fs::read_to_string(source.join("index.html")).unwrap();
        assert_eq!(html, "<html><body>Hello</body></html>");
    }

    #[test]
    fn test_missing_parent_template_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context_at(tmp.path());
        let source = &ctx.config.paths.source;

        fs::create_dir_all(source.join("templates")).unwrap();
        fs::create_dir_all(source.join("pages")).unwrap();
        fs::write(
            source.join("pages/index.jinja"),
            "{% extends \"nope.jinja\" %}",
        )
        .unwrap();

        assert!(compile_templates(&ctx).is_err());
    }
}
