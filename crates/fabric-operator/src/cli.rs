//! Command line handling of the operator binary.
//!
//! ```no_run
//! use clap::Parser;
//! use fabric_operator::cli::Command;
//!
//! #[derive(clap::Parser)]
//! struct Opts {
//!     #[clap(subcommand)]
//!     command: Command,
//! }
//!
//! let opts = Opts::parse();
//! match opts.command {
//!     Command::Crd => { /* print the CRDs */ }
//!     Command::Run(run) => {
//!         let config = run.controller_config();
//!     }
//! }
//! ```

use std::io::Write;

use clap::{Args, Parser};
use kube::CustomResourceExt;
use snafu::{ResultExt, Snafu};

use crate::{
    context::{
        ControllerConfig, DEFAULT_POD_LABEL_KEY, DEFAULT_RESTART_CONFIG_MAP,
        DEFAULT_STATUS_PATCH_RETRIES, DEFAULT_TRANSIENT_REQUEUE_DELAY,
    },
    crd::{IBPCA, IBPConsole, IBPOrderer, IBPPeer},
    logging::LogFormat,
    namespace::WatchNamespace,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize CRD"))]
    SerializeCrd { source: serde_yaml::Error },

    #[snafu(display("failed to write CRDs"))]
    WriteCrds { source: std::io::Error },
}

/// The commands of the operator.
///
/// Generic over the arguments of [`Command::Run`], so an extended argument
/// set can embed [`RunArguments`] via `#[clap(flatten)]`.
#[derive(Debug, PartialEq, Eq, Parser)]
pub enum Command<Run: Args = RunArguments> {
    /// Print CRD objects.
    Crd,

    /// Run the operator.
    Run(Run),
}

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(long_about = "")]
pub struct RunArguments {
    /// Provides a specific namespace to watch (instead of watching all namespaces)
    #[arg(long, env, default_value = "")]
    pub watch_namespace: WatchNamespace,

    /// How often a status update rejected because of a concurrent write is
    /// retried on a fresh copy of the resource.
    #[arg(long, env, default_value_t = DEFAULT_STATUS_PATCH_RETRIES)]
    pub status_patch_retries: usize,

    /// How long to wait before retrying a resource whose reconciliation
    /// failed with a transient error, e.g. `10s` or `1m`.
    #[arg(long, env, default_value_t = DEFAULT_TRANSIENT_REQUEUE_DELAY.into())]
    pub transient_requeue_delay: humantime::Duration,

    /// Name of the config map whose changes restart nodes.
    #[arg(long, env, default_value = DEFAULT_RESTART_CONFIG_MAP)]
    pub restart_config_map: String,

    /// Label key selecting the pods of a node. Its value is the node name.
    #[arg(long, env, default_value = DEFAULT_POD_LABEL_KEY)]
    pub pod_label_key: String,

    #[arg(long, env, value_enum, default_value_t)]
    pub log_format: LogFormat,
}

impl RunArguments {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            status_patch_retries: self.status_patch_retries,
            transient_requeue_delay: self.transient_requeue_delay.into(),
            restart_config_map: self.restart_config_map.clone(),
            pod_label_key: self.pod_label_key.clone(),
        }
    }
}

/// Writes the CRDs of all managed kinds as a multi document YAML stream.
pub fn write_crds(mut out: impl Write) -> Result<(), Error> {
    for crd in [IBPCA::crd(), IBPConsole::crd(), IBPOrderer::crd(), IBPPeer::crd()] {
        let yaml = serde_yaml::to_string(&crd).context(SerializeCrdSnafu)?;
        write!(out, "---\n{yaml}").context(WriteCrdsSnafu)?;
    }

    Ok(())
}
