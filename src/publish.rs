//! Object-storage publisher.
//!
//! Uploads the dist tree to an S3 bucket. Objects are gzip-compressed and
//! carry a long-lived cache-control header; fingerprinted filenames make that
//! safe. A content cache keyed by object key remembers the hash of the last
//! uploaded bytes, so unchanged objects are skipped on subsequent publishes.
//! Credentials are requested from the SDK by profile name and never touched
//! here.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::time::Instant;

use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::Context;
use crate::config::Publish;
use crate::error::PublishError;
use crate::hash::Hash32;
use crate::io::{as_overhead, ensure_parent, walk_files};

const CACHE_PATH: &str = ".cache/publish.bin";
const CACHE_CONTROL: &str = "max-age=315360000, no-transform, public";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub uploaded: usize,
    pub skipped: usize,
}

/// Upload every file under dist, skipping objects whose content is unchanged
/// since the last publish. The first failed upload aborts the rest; hashes of
/// objects uploaded so far are persisted regardless, so a retry resumes where
/// it stopped.
pub fn publish(ctx: &Context) -> Result<PublishReport, PublishError> {
    let s = Instant::now();

    let settings = &ctx.config.publish;
    if settings.bucket.is_empty() {
        return Err(PublishError::MissingBucket);
    }

    let dist = &ctx.config.paths.dist;
    let files =
        walk_files(dist).map_err(|e| PublishError::FileSystem(dist.to_string(), e))?;

    let mut cache = PublishCache::load(Utf8Path::new(CACHE_PATH));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(PublishError::Runtime)?;

    let result = runtime.block_on(upload_all(settings, dist, &files, &mut cache));

    // Persist even after a failed upload so completed work is remembered.
    cache.store(Utf8Path::new(CACHE_PATH));

    let report = result?;
    tracing::info!(
        "Published {} objects, {} unchanged {}",
        report.uploaded,
        report.skipped,
        as_overhead(s)
    );

    Ok(report)
}

async fn upload_all(
    settings: &Publish,
    dist: &Utf8Path,
    files: &[Utf8PathBuf],
    cache: &mut PublishCache,
) -> Result<PublishReport, PublishError> {
    let aws = aws_config::defaults(BehaviorVersion::latest())
        .profile_name(&settings.profile)
        .load()
        .await;
    let client = aws_sdk_s3::Client::new(&aws);

    let mut report = PublishReport::default();

    for file in files {
        let rel = file.strip_prefix(dist).unwrap_or(file);
        let key = object_key(&settings.prefix, rel);

        let bytes =
            fs::read(file).map_err(|e| PublishError::FileSystem(file.to_string(), e))?;
        let hash = Hash32::hash(&bytes).to_hex();

        if cache.fresh(&key, &hash) {
            tracing::debug!("Skipping unchanged {key}");
            report.skipped += 1;
            continue;
        }

        let body = gzip(&bytes).map_err(|e| PublishError::Compress(file.to_string(), e))?;

        client
            .put_object()
            .bucket(&settings.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .content_encoding("gzip")
            .cache_control(CACHE_CONTROL)
            .content_type(content_type(rel))
            .send()
            .await
            .map_err(|e| PublishError::Upload {
                key: key.clone(),
                source: e.into(),
            })?;

        tracing::info!("Uploaded {key}");
        cache.insert(key, hash);
        report.uploaded += 1;
    }

    Ok(report)
}

fn object_key(prefix: &str, rel: &Utf8Path) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        rel.to_string()
    } else {
        format!("{prefix}/{rel}")
    }
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn content_type(path: &Utf8Path) -> &'static str {
    match path.extension().unwrap_or_default() {
        "html" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// On-disk map from object key to the hash of the last uploaded content.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PublishCache {
    entries: BTreeMap<String, String>,
}

impl PublishCache {
    /// Load the cache, starting empty when it is missing or unreadable; a
    /// lost cache only costs redundant uploads.
    fn load(path: &Utf8Path) -> Self {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(_) => return Self::default(),
        };

        match ciborium::from_reader(file) {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!("Discarding unreadable publish cache: {e}");
                Self::default()
            }
        }
    }

    fn store(&self, path: &Utf8Path) {
        let result = ensure_parent(path).and_then(|()| {
            let file = fs::File::create(path)?;
            ciborium::into_writer(self, file)
                .map_err(|e| std::io::Error::other(e.to_string()))
        });

        if let Err(e) = result {
            tracing::warn!("Couldn't persist publish cache: {e}");
        }
    }

    fn fresh(&self, key: &str, hash: &str) -> bool {
        self.entries.get(key).is_some_and(|entry| entry == hash)
    }

    fn insert(&mut self, key: String, hash: String) {
        self.entries.insert(key, hash);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::{Config, Mode};

    #[test]
    fn test_missing_bucket_rejected() {
        let ctx = Context::new(Config::default(), Mode::Build);
        assert!(matches!(publish(&ctx), Err(PublishError::MissingBucket)));
    }

    #[test]
    fn test_object_key_prefix() {
        let rel = Utf8Path::new("css/a.css");
        assert_eq!(object_key("", rel), "css/a.css");
        assert_eq!(object_key("site", rel), "site/css/a.css");
        assert_eq!(object_key("/site/", rel), "site/css/a.css");
    }

    #[test]
    fn test_gzip_roundtrip() {
        let compressed = gzip(b"hello hello hello").unwrap();

        let mut decoder = flate2::read::GzDecoder::new(compressed.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello hello hello");
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(Utf8Path::new("index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type(Utf8Path::new("css/a-0123.css")), "text/css");
        assert_eq!(content_type(Utf8Path::new("blob")), "application/octet-stream");
    }

    #[test]
    fn test_cache_roundtrip_and_freshness() {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(tmp.path().join("cache.bin")).unwrap();

        let mut cache = PublishCache::load(&path);
        assert!(!cache.fresh("css/a.css", "abc"));

        cache.insert("css/a.css".into(), "abc".into());
        assert!(cache.fresh("css/a.css", "abc"));
        assert!(!cache.fresh("css/a.css", "def"));

        cache.store(&path);
        let cache = PublishCache::load(&path);
        assert!(cache.fresh("css/a.css", "abc"));
    }
}
