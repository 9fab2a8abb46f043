mod age;
mod cache;
mod config;
mod embed;
mod error;
mod github;
mod stats;
mod svg;

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use embed::FontEmbedder;
use github::GithubClient;
use svg::SlotValues;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "profile_card=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Profile update failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let started = Instant::now();
    let config = Config::from_env()?;

    info!(
        user = %config.user_name,
        heavy = config.do_heavy,
        force_cache = config.force_cache,
        "Collecting stats"
    );

    let client = GithubClient::new(&config)?;
    let stats = stats::collect(&client, &config, Utc::now().date_naive())
        .await
        .context("Failed to collect GitHub stats")?;
    debug!(?stats, "Collected stats");

    let values = SlotValues::from_stats(&stats);
    let fonts = if config.embed_font {
        Some(FontEmbedder::new(&config.cache_dir)?)
    } else {
        None
    };

    for path in &config.svg_files {
        update_card(path, &values, fonts.as_ref(), &config).await?;
    }

    info!(
        elapsed = ?started.elapsed(),
        queries = %client.query_counts(),
        "Done"
    );
    Ok(())
}

/// Refresh one card template in place. A missing template is skipped.
async fn update_card(
    path: &Path,
    values: &SlotValues,
    fonts: Option<&FontEmbedder>,
    config: &Config,
) -> Result<()> {
    let mut template = match fs::read_to_string(path) {
        Ok(template) => template,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "Card template not found; skipping");
            return Ok(());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    if let Some(fonts) = fonts {
        template = fonts.embed(&template).await;
    }
    template = embed::embed_logo(&template, &config.logo_path);

    let rendered = svg::render(&template, values);
    if !rendered.missing.is_empty() {
        let missing: Vec<&str> = rendered.missing.iter().map(|s| s.id()).collect();
        debug!(path = %path.display(), ?missing, "Slots not present in template");
    }

    svg::write_card(path, &rendered.svg)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Updated card");
    Ok(())
}
