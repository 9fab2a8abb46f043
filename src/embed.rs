//! Inlines external assets into card templates so the SVGs render the same
//! when served from a sandboxed image proxy: web fonts from a CSS `@import`
//! and the PNG logo. Every failure leaves the template as it was.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::{NoExpand, Regex};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{ProfileError, Result};

const FONT_FAMILY: &str = "JetBrains Mono";

static IMPORT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@import url\(['"]([^'"]+)['"]\);"#).expect("import regex should be valid")
});

static FONT_FACE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@font-face\s*\{[^}]*\}").expect("font-face regex should be valid")
});

static WOFF2_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^)\s'"]+\.woff2"#).expect("woff2 regex should be valid")
});

static WEIGHT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"font-weight:\s*(\d+)").expect("weight regex should be valid")
});

static STYLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"font-style:\s*(\w+)").expect("style regex should be valid")
});

/// One `@font-face` rule worth inlining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontFace {
    pub url: String,
    pub weight: String,
    pub style: String,
}

/// Extract woff2 faces from a Google Fonts style stylesheet.
pub fn font_faces(css: &str) -> Vec<FontFace> {
    FONT_FACE_REGEX
        .find_iter(css)
        .filter_map(|block| {
            let block = block.as_str();
            let url = WOFF2_URL_REGEX.find(block)?.as_str().to_string();
            let weight = WEIGHT_REGEX
                .captures(block)
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| "400".to_string());
            let style = STYLE_REGEX
                .captures(block)
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| "normal".to_string());
            Some(FontFace { url, weight, style })
        })
        .collect()
}

pub struct FontEmbedder {
    http: Client,
    font_dir: PathBuf,
}

impl FontEmbedder {
    pub fn new(cache_dir: &Path) -> Result<Self> {
        let http = Client::builder()
            .user_agent("profile-card")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            font_dir: cache_dir.join("fonts"),
        })
    }

    /// Replace the first font `@import` with inline base64 `@font-face` rules.
    pub async fn embed(&self, svg: &str) -> String {
        let Some(caps) = IMPORT_REGEX.captures(svg) else {
            return svg.to_string();
        };
        let import_url = caps[1].replace("&amp;", "&");

        let css = match self.get_text(&import_url).await {
            Ok(css) => css,
            Err(e) => {
                warn!(url = %import_url, error = %e, "Failed to fetch font stylesheet");
                return svg.to_string();
            }
        };

        let mut rules = Vec::new();
        for face in font_faces(&css) {
            match self.font_bytes(&face.url).await {
                Ok(bytes) => rules.push(format!(
                    "@font-face{{font-family:'{FONT_FAMILY}';font-style:{};font-weight:{};src:url(data:font/woff2;base64,{}) format('woff2');font-display:swap;}}",
                    face.style,
                    face.weight,
                    STANDARD.encode(bytes)
                )),
                Err(e) => warn!(url = %face.url, error = %e, "Skipping font file"),
            }
        }

        if rules.is_empty() {
            return svg.to_string();
        }
        debug!(faces = rules.len(), "Embedded web fonts");

        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        let mut out = String::with_capacity(svg.len());
        out.push_str(&svg[..whole.start]);
        out.push_str(&rules.join("\n"));
        out.push_str(&svg[whole.end..]);
        out
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProfileError::Http {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        Ok(resp.text().await?)
    }

    /// Font files are immutable per URL, so they are cached on disk by URL hash.
    async fn font_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let path = self
            .font_dir
            .join(format!("{}.woff2", hex::encode(Sha256::digest(url.as_bytes()))));
        if let Ok(bytes) = fs::read(&path) {
            return Ok(bytes);
        }

        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProfileError::Http {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        let bytes = resp.bytes().await?.to_vec();

        if let Err(e) = fs::create_dir_all(&self.font_dir).and_then(|_| fs::write(&path, &bytes)) {
            warn!(path = %path.display(), error = %e, "Failed to cache font file");
        }
        Ok(bytes)
    }
}

/// Swap `href="logo.png"` (either quote style) for a PNG data URI.
pub fn embed_logo(svg: &str, logo_path: &Path) -> String {
    let Some(file_name) = logo_path.file_name().and_then(|n| n.to_str()) else {
        return svg.to_string();
    };
    if !logo_path.exists() {
        debug!(path = %logo_path.display(), "Logo file not found; skipping embed");
        return svg.to_string();
    }
    let bytes = match fs::read(logo_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %logo_path.display(), error = %e, "Failed to read logo");
            return svg.to_string();
        }
    };

    let name = regex::escape(file_name);
    let Ok(re) = Regex::new(&format!(r#"href=(?:"{name}"|'{name}')"#)) else {
        return svg.to_string();
    };
    let replacement = format!(r#"href="data:image/png;base64,{}""#, STANDARD.encode(bytes));
    re.replace_all(svg, NoExpand(&replacement)).into_owned()
}
