//! Wires the concrete task set into a [`TaskGraph`].
//!
//! The full build is `clean` → the per-category transforms as a parallel
//! group → `revision` → `rewrite`; `build` is the aggregator entry point.
//! The style and template compilers are interactive tasks driven by the
//! watcher and are not part of the one-shot build.

use crate::config::Config;
use crate::error::{GraphError, GustoError, WatchError};
use crate::graph::TaskGraph;
use crate::watch::{ReloadKind, WatchSubscription};
use crate::{Context, io, publish, revision, styles, templates, transform, watch};

/// Construct the task graph, once, at startup.
pub fn task_graph() -> Result<TaskGraph, GraphError> {
    let mut graph = TaskGraph::new();

    graph.register("clean", &[], |ctx| Ok(io::clean(&ctx.config)?))?;

    graph.register("sass", &[], styles::compile_styles)?;
    graph.register("templates", &[], templates::compile_templates)?;

    // Interactive script build; no clean, so a dev session never wipes an
    // existing dist tree.
    graph.register("bundle", &[], transform::transform_scripts)?;

    graph.register("html", &["clean"], transform::transform_html)?;
    graph.register("css", &["clean"], transform::transform_css)?;
    graph.register("js", &["clean"], transform::transform_scripts)?;
    graph.register("img", &["clean"], transform::transform_images)?;
    graph.register("misc", &["clean"], transform::transform_misc)?;

    graph.register(
        "revision",
        &["html", "css", "js", "img", "misc"],
        revision::revision_task,
    )?;
    graph.register("rewrite", &["revision"], revision::rewrite_task)?;

    graph.register("build", &["rewrite"], |_| Ok(()))?;

    // Uploads whatever is in dist; a build is not implied.
    graph.register("publish", &[], |ctx| {
        publish::publish(ctx)?;
        Ok(())
    })?;

    Ok(graph)
}

/// One watch subscription per asset category.
pub fn watch_subscriptions(config: &Config) -> Result<Vec<WatchSubscription>, WatchError> {
    let source = &config.paths.source;

    Ok(vec![
        WatchSubscription::new(
            source.join("sass/**/*.scss").as_str(),
            "sass",
            ReloadKind::Styles,
        )?,
        WatchSubscription::new(
            source.join("pages/**/*.jinja").as_str(),
            "templates",
            ReloadKind::Full,
        )?,
        WatchSubscription::new(
            source.join("templates/**/*.jinja").as_str(),
            "templates",
            ReloadKind::Full,
        )?,
        WatchSubscription::new(
            source.join("bundle/*.js").as_str(),
            "bundle",
            ReloadKind::Full,
        )?,
    ])
}

/// The interactive entry point: build the scripts once, then serve and watch
/// until the process is terminated.
pub fn serve(graph: &TaskGraph, context: &Context) -> Result<(), GustoError> {
    graph.run("bundle", context)?;

    let subscriptions = watch_subscriptions(&context.config)?;
    watch::watch(graph, context, &subscriptions)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::Mode;

    #[test]
    fn test_graph_wiring_is_valid() {
        // An invalid graph (unknown dependency, cycle, duplicate) would
        // surface here as a registration or resolution error.
        task_graph().unwrap();
    }

    #[test]
    fn test_subscriptions_compile() {
        let subs = watch_subscriptions(&Config::default()).unwrap();
        assert_eq!(subs.len(), 4);
    }

    #[test]
    fn test_bundle_leaves_dist_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();

        let mut config = Config::default();
        config.paths.source = root.join("src");
        config.paths.dist = root.join("dist");

        fs::create_dir_all(config.paths.source.join("bundle")).unwrap();
        fs::write(
            config.paths.source.join("bundle/app.js"),
            "console.log(\"hi\");",
        )
        .unwrap();
        fs::create_dir_all(config.paths.dist.join("css")).unwrap();
        fs::write(config.paths.dist.join("css/a-0123456789.css"), "kept").unwrap();

        let graph = task_graph().unwrap();
        let ctx = Context::new(config, Mode::Watch);
        graph.run("bundle", &ctx).unwrap();

        assert!(ctx.config.paths.dist.join("css/a-0123456789.css").exists());
        assert!(ctx.config.paths.dist.join("bundle/app.js").exists());
    }

    #[test]
    fn test_full_build() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();

        let mut config = Config::default();
        config.paths.source = root.join("src");
        config.paths.dist = root.join("dist");

        let source = &config.paths.source;
        fs::create_dir_all(source.join("css")).unwrap();
        fs::create_dir_all(source.join("bundle")).unwrap();
        fs::create_dir_all(source.join("misc")).unwrap();
        fs::write(source.join("css/a.css"), "body{color:red}").unwrap();
        fs::write(source.join("bundle/app.js"), "console.log(\"hi\");").unwrap();
        fs::write(source.join("misc/robots.txt"), "User-agent: *").unwrap();
        fs::write(
            source.join("index.html"),
            "<link rel=\"stylesheet\" href=\"css/a.css\">\n<script src=\"bundle/app.js\"></script>",
        )
        .unwrap();

        // Stale revisioned output from a "previous run".
        let dist = config.paths.dist.clone();
        fs::create_dir_all(dist.join("css")).unwrap();
        fs::write(dist.join("css/a-deadbeef00.css"), "stale").unwrap();

        let graph = task_graph().unwrap();
        let ctx = Context::new(config, Mode::Build);
        graph.run("build", &ctx).unwrap();

        assert!(!dist.join("css/a-deadbeef00.css").exists());
        assert!(!dist.join("css/a.css").exists());

        let manifest = revision::read_manifest(&dist).unwrap();
        assert_eq!(manifest.len(), 2);

        let html = fs::read_to_string(dist.join("index.html")).unwrap();
        assert!(html.contains(manifest["css/a.css"].as_str()));
        assert!(html.contains(manifest["bundle/app.js"].as_str()));
        assert!(dist.join("misc/robots.txt").exists());
    }
}
