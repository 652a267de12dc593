// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use kubestitch::{path::path_from_env, store::read_or_new, update, Settings};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::{fs, path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "kubestitch [options] <kubestitch-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to kubeconfig document instead of $KUBECONFIG or ~/.kube/config.
    #[arg(long, global = true, value_name = "path")]
    pub kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let kubeconfig = match self.kubeconfig {
            Some(path) => path,
            None => path_from_env()?,
        };

        match self.command {
            Command::Update(opts) => run_update(opts, kubeconfig),
            Command::View => run_view(kubeconfig),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Install cluster, user, and context entries sharing one name.
    #[command(override_usage = "kubestitch update [options] <cluster_name>")]
    Update(UpdateOptions),

    /// Show current context and entry names.
    #[command(override_usage = "kubestitch view [options]")]
    View,
}

#[derive(Args, Clone, Debug)]
struct UpdateOptions {
    /// Name of cluster, user, and context entries.
    #[arg(value_name = "cluster_name")]
    pub cluster_name: Option<String>,

    /// TOML profile to load settings from. Flags override profile values.
    #[arg(short, long, value_name = "file")]
    pub profile: Option<PathBuf>,

    /// Address of the API server.
    #[arg(short, long, value_name = "url")]
    pub server: Option<String>,

    /// Default namespace of the context.
    #[arg(short, long, value_name = "namespace")]
    pub namespace: Option<String>,

    /// Path to certificate authority file.
    #[arg(long, value_name = "path")]
    pub certificate_authority: Option<String>,

    /// Path to client certificate file.
    #[arg(long, value_name = "path")]
    pub client_certificate: Option<String>,

    /// Path to client key file.
    #[arg(long, value_name = "path")]
    pub client_key: Option<String>,

    /// Inline certificate content instead of referencing files.
    #[arg(long)]
    pub embed_certs: bool,

    /// Keep current context instead of selecting the new one.
    #[arg(long)]
    pub keep_context: bool,
}

fn main() {
    let layer = fmt::layer().compact();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry().with(layer).with(filter).init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn run_update(opts: UpdateOptions, kubeconfig: PathBuf) -> Result<()> {
    let mut settings = match &opts.profile {
        Some(profile) => fs::read_to_string(profile)
            .with_context(|| format!("failed to read profile {:?}", profile.display()))?
            .parse::<Settings>()
            .with_context(|| format!("failed to parse profile {:?}", profile.display()))?,
        None => Settings::default(),
    };

    if let Some(cluster_name) = opts.cluster_name {
        settings.cluster_name = cluster_name;
    }
    if let Some(server) = opts.server {
        settings.cluster_server_address = server;
    }
    if let Some(namespace) = opts.namespace {
        settings.namespace = namespace;
    }
    if let Some(path) = opts.certificate_authority {
        settings.certificate_authority = expand(path)?;
    }
    if let Some(path) = opts.client_certificate {
        settings.client_certificate = expand(path)?;
    }
    if let Some(path) = opts.client_key {
        settings.client_key = expand(path)?;
    }
    settings.embed_certs |= opts.embed_certs;
    settings.keep_context |= opts.keep_context;

    settings.set_path(&kubeconfig)?;
    update(&settings)?;
    info!(
        "installed {:?} into {:?}",
        settings.cluster_name,
        kubeconfig.display()
    );

    Ok(())
}

fn run_view(kubeconfig: PathBuf) -> Result<()> {
    let document = read_or_new(&kubeconfig)?;
    let current = match document.current_context.as_str() {
        "" => "<none>",
        name => name,
    };

    println!("current-context: {current}");
    for (name, context) in &document.contexts {
        let marker = if name == current { "*" } else { " " };
        println!(
            "{marker} {name}  cluster={} user={} namespace={}",
            context.cluster, context.auth_info, context.namespace
        );
    }

    Ok(())
}

fn expand(path: String) -> Result<String> {
    Ok(shellexpand::full(path.as_str())?.into_owned())
}
