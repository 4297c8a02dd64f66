//! # Command module
//!
//! This module provide command line interface structures and helpers
use std::{io, path::PathBuf, process::abort, sync::Arc};

use async_trait::async_trait;
use clap::Parser;
use tracing::{error, info};

use crate::{
    cmd::crd::CustomResourceDefinitionError,
    svc::{
        catalogue::{client::KubeCatalogueClient, CatalogueClient},
        cfg::Configuration,
        http,
        k8s::{client, Context, Watcher},
        reconcile::{IftReconciler, IftgReconciler},
    },
};

pub mod crd;

// -----------------------------------------------------------------------------
// Executor trait

#[async_trait]
pub trait Executor {
    type Error;

    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error>;
}

// -----------------------------------------------------------------------------
// CommandError enum

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("failed to execute command '{0}', {1}")]
    Execution(String, Arc<CommandError>),
    #[error("failed to execute command, {0}")]
    CustomResourceDefinition(CustomResourceDefinitionError),
}

// -----------------------------------------------------------------------------
// Command enum

#[derive(clap::Subcommand, Clone, Debug)]
pub enum Command {
    /// Interact with custom resource definitions
    #[clap(name = "custom-resource-definition", visible_alias = "crd")]
    CustomResourceDefinition,
}

#[async_trait]
impl Executor for Command {
    type Error = CommandError;

    #[cfg_attr(feature = "trace", tracing::instrument)]
    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error> {
        match self {
            Self::CustomResourceDefinition => crd::view(config)
                .await
                .map_err(CommandError::CustomResourceDefinition)
                .map_err(|err| {
                    CommandError::Execution("custom-resource-definition".into(), Arc::new(err))
                }),
        }
    }
}

// -----------------------------------------------------------------------------
// Args struct

#[derive(Parser, Clone, Debug)]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Args {
    /// Increase log verbosity
    #[arg(short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbosity: u8,
    /// Specify location of kubeconfig
    #[arg(short = 'k', long = "kubeconfig", global = true)]
    pub kubeconfig: Option<PathBuf>,
    /// Specify location of configuration
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Check if configuration is healthy
    #[arg(short = 't', long = "check", global = true)]
    pub check: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

// -----------------------------------------------------------------------------
// DaemonError enum

#[derive(thiserror::Error, Debug)]
pub enum DaemonError {
    #[error("failed to handle termintion signal, {0}")]
    SigTerm(io::Error),
    #[error("failed to create kubernetes client, {0}")]
    Client(#[from] client::Error),
}

// -----------------------------------------------------------------------------
// daemon function

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn daemon(
    kubeconfig: Option<PathBuf>,
    config: Arc<Configuration>,
) -> Result<(), DaemonError> {
    // -------------------------------------------------------------------------
    // Create a new kubernetes client from path if defined, or via the
    // environment or defaults locations
    let kube_client = client::try_new(kubeconfig).await?;

    // -------------------------------------------------------------------------
    // Create the catalogue client, keeping the receiving end of its
    // follow-up reconcile queue to wire into the feature controller
    let (catalogue, reconcile_trigger) = KubeCatalogueClient::new(kube_client.to_owned());
    let catalogue: Arc<dyn CatalogueClient> = Arc::new(catalogue);

    // -------------------------------------------------------------------------
    // Create context to give to each reconciler
    let ctx = Arc::new(Context::new(kube_client, config.to_owned(), catalogue));
    let ift_ctx = ctx.to_owned();
    let iftg_ctx = ctx.to_owned();

    // -------------------------------------------------------------------------
    // Create reconcilers
    let handles = vec![
        tokio::spawn(async move {
            let reconciler = IftReconciler::new(reconcile_trigger);

            info!("Start to listen for events of installed-feature custom resource");
            if let Err(err) = reconciler.watch(ift_ctx).await {
                error!(
                    error = err.to_string(),
                    "Could not reconcile installed-feature custom resource"
                );
            }

            abort();
        }),
        tokio::spawn(async move {
            let reconciler = IftgReconciler::default();

            info!("Start to listen for events of installed-feature-group custom resource");
            if let Err(err) = reconciler.watch(iftg_ctx).await {
                error!(
                    error = err.to_string(),
                    "Could not reconcile installed-feature-group custom resource"
                );
            }

            abort();
        }),
    ];

    // -------------------------------------------------------------------------
    // Create http server
    let server = tokio::spawn(async move {
        if let Err(err) = http::server::serve(config).await {
            error!(error = err.to_string(), "Could not serve http server");
        }

        abort()
    });

    // -------------------------------------------------------------------------
    // Wait for termination signal
    tokio::signal::ctrl_c()
        .await
        .map_err(DaemonError::SigTerm)?;

    // -------------------------------------------------------------------------
    // Cancel reconcilers
    handles.iter().for_each(|handle| handle.abort());

    for handle in handles {
        if let Err(err) = handle.await {
            if !err.is_cancelled() {
                error!(error = err.to_string(), "Could not wait for the task to complete");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Cancel http server
    server.abort();
    if let Err(err) = server.await {
        if !err.is_cancelled() {
            error!(
                error = err.to_string(),
                "Could not wait for the http server to gracefully close"
            );
        }
    }

    Ok(())
}
