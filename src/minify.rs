//! Per-format minification for JS, CSS and HTML.
//!
//! JavaScript goes through oxc (parse, compress, mangle, codegen) and CSS
//! through lightningcss, which also emits vendor prefixes for the configured
//! browser targets. HTML gets a whitespace-collapse pass that leaves
//! `<pre>`, `<textarea>`, `<script>` and `<style>` content untouched.

use anyhow::anyhow;
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::span::SourceType;

/// Browser targets used for vendor prefixing.
fn browser_targets() -> Targets {
    Targets {
        browsers: Some(Browsers {
            chrome: Some(90 << 16),
            edge: Some(90 << 16),
            firefox: Some(90 << 16),
            safari: Some(15 << 16),
            ios_saf: Some(15 << 16),
            ..Browsers::default()
        }),
        ..Targets::default()
    }
}

/// Minify JavaScript source code.
pub fn minify_js(source: &str) -> anyhow::Result<String> {
    let allocator = Allocator::default();
    let source_type = SourceType::mjs();
    let ret = Parser::new(&allocator, source, source_type).parse();
    if !ret.errors.is_empty() {
        let messages: Vec<String> = ret.errors.iter().map(|e| e.to_string()).collect();
        return Err(anyhow!("parse failed: {}", messages.join("; ")));
    }
    let mut program = ret.program;
    let options = MinifierOptions {
        mangle: Some(MangleOptions::default()),
        compress: Some(CompressOptions::smallest()),
    };
    let ret = Minifier::new(options).minify(&allocator, &mut program);
    let code = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            comments: CommentOptions::disabled(),
            ..CodegenOptions::default()
        })
        .with_scoping(ret.scoping)
        .build(&program)
        .code;
    Ok(code)
}

/// Minify CSS source code, emitting vendor prefixes for the browser targets.
pub fn minify_css(source: &str) -> anyhow::Result<String> {
    let stylesheet =
        StyleSheet::parse(source, ParserOptions::default()).map_err(|e| anyhow!("{e}"))?;
    let result = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            targets: browser_targets(),
            ..PrinterOptions::default()
        })
        .map_err(|e| anyhow!("{e}"))?;
    Ok(result.code)
}

const RAW_TEXT_TAGS: [&str; 4] = ["pre", "textarea", "script", "style"];

/// Collapse whitespace in HTML markup.
///
/// Runs of whitespace inside text nodes become a single space and
/// whitespace-only text nodes between tags are dropped. Content of raw-text
/// elements is copied verbatim. Tags themselves are never altered, so this is
/// safe on markup the parser-free approach cannot fully understand.
pub fn minify_html(source: &str) -> String {
    let lower = source.to_ascii_lowercase();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;

    while i < source.len() {
        if source.as_bytes()[i] == b'<' {
            if let Some(tag) = raw_tag_at(&lower, i) {
                // Copy through the closing tag without touching the content.
                let end = match lower[i + 1..].find(&format!("</{tag}")) {
                    Some(offset) => {
                        let close = i + 1 + offset;
                        match lower[close..].find('>') {
                            Some(gt) => close + gt + 1,
                            None => source.len(),
                        }
                    }
                    None => source.len(),
                };
                out.push_str(&source[i..end]);
                i = end;
            } else {
                let end = match lower[i..].find('>') {
                    Some(offset) => i + offset + 1,
                    None => source.len(),
                };
                out.push_str(&source[i..end]);
                i = end;
            }
        } else {
            let end = match lower[i..].find('<') {
                Some(offset) => i + offset,
                None => source.len(),
            };
            push_collapsed(&mut out, &source[i..end]);
            i = end;
        }
    }

    out
}

fn raw_tag_at(lower: &str, i: usize) -> Option<&'static str> {
    let rest = &lower[i + 1..];
    for tag in RAW_TEXT_TAGS {
        if rest.starts_with(tag) {
            // The tag name must end here, otherwise "style" would match
            // e.g. a hypothetical <styled> element.
            match rest.as_bytes().get(tag.len()) {
                Some(b'>' | b' ' | b'\t' | b'\n' | b'\r' | b'/') | None => return Some(tag),
                _ => {}
            }
        }
    }
    None
}

fn push_collapsed(out: &mut String, text: &str) {
    if text.trim().is_empty() {
        return;
    }

    let mut previous_whitespace = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !previous_whitespace {
                out.push(' ');
            }
            previous_whitespace = true;
        } else {
            out.push(ch);
            previous_whitespace = false;
        }
    }
}
