// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use reposync::{
    action::{
        github::GithubClient,
        jenkins::JenkinsClient,
        job::{AssumeYes, PromptConfirm},
    },
    config::{Settings, ToolConfig, Writeback},
    credentials::Credentials,
    descriptor::JenkinsConfig,
    path::tool_config_file,
    registry::airtable::AirtableClient,
    sync::{sync, Clients, SyncReport},
};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::{collections::BTreeSet, path::PathBuf, process::exit, time::Duration};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "reposync [options] <reposync-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        match self.command {
            Command::Sync(opts) => run_sync(opts).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Sync dataset directories of a family with the registry.
    #[command(override_usage = "reposync sync [options]")]
    Sync(SyncOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SyncOptions {
    /// Family to sync, defaults to the one recorded in the family descriptor.
    #[arg(short, long, value_name = "family")]
    pub family: Option<String>,

    /// Create issues and sync labels and project cards on GitHub.
    #[arg(short, long)]
    pub github: bool,

    /// Create and reconfigure Jenkins jobs.
    #[arg(short, long)]
    pub jenkins: bool,

    /// Write issue numbers back into Airtable.
    #[arg(short, long)]
    pub airtable: bool,

    /// Path to the dataset store.
    #[arg(short, long, value_name = "path", default_value = "datasets")]
    pub datasets: PathBuf,

    /// Validate descriptors against their JSON schema.
    #[arg(long)]
    pub validate: bool,

    /// Reconfigure drifted jobs without asking.
    #[arg(short, long)]
    pub yes: bool,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

async fn run_sync(opts: SyncOptions) -> Result<()> {
    let config = ToolConfig::load(tool_config_file()?)?;
    let mut settings = Settings::new(opts.datasets, config);
    settings.family = opts.family;
    settings.writeback = Writeback {
        github: opts.github,
        jenkins: opts.jenkins,
        airtable: opts.airtable,
    };
    settings.validate = opts.validate;
    settings.assume_yes = opts.yes;

    let credentials = Credentials::load()?;

    let registry = AirtableClient::new(&settings.registry, credentials.airtable.as_str());
    let github = credentials.github.as_deref().map(GithubClient::new);
    let jenkins = credentials.jenkins.map(|credentials| {
        move |config: &JenkinsConfig| JenkinsClient::new(config.base.as_str(), credentials)
    });
    let clients = Clients {
        registry: &registry,
        issues: github.as_ref(),
        jobs: jenkins,
    };

    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}] {pos}/{len}",
    )?
    .progress_chars("-Cco.");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(100));

    let report = if settings.assume_yes {
        sync(&settings, clients, &AssumeYes, &bar).await
    } else {
        sync(&settings, clients, &PromptConfirm::new(bar.clone()), &bar).await
    };
    bar.finish_and_clear();

    summarize(&report?)
}

fn summarize(report: &SyncReport) -> Result<()> {
    for dir in &report.created {
        info!("new dataset {dir:?}");
    }
    for path in &report.assets {
        info!("copied asset {:?}", path.display());
    }

    if report.has_failures() {
        let dirs = report
            .failures
            .iter()
            .map(|failure| failure.dir.as_str())
            .collect::<BTreeSet<_>>();
        bail!(
            "{} failures across {} datasets of family {:?}",
            report.failures.len(),
            dirs.len(),
            report.family
        );
    }

    Ok(())
}
