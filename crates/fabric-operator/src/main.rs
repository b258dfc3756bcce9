use clap::Parser;
use fabric_operator::{
    cli::{self, Command},
    client, controller,
    logging,
};
use snafu::{ResultExt, Snafu};

const ENV_VAR_LOGGING: &str = "FABRIC_OPERATOR_LOG";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to print CRDs"))]
    PrintCrds { source: cli::Error },

    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to initialize the operator"))]
    InitializeOperator { source: client::Error },

    #[snafu(display("failed to run controllers"))]
    RunControllers { source: controller::Error },
}

#[derive(Parser)]
#[command(author, version, about = "Operator for Hyperledger Fabric nodes")]
struct Opts {
    #[clap(subcommand)]
    command: Command,
}

#[tokio::main]
#[snafu::report]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();

    match opts.command {
        Command::Crd => cli::write_crds(std::io::stdout().lock()).context(PrintCrdsSnafu)?,
        Command::Run(run) => {
            logging::initialize_logging(
                ENV_VAR_LOGGING,
                controller::OPERATOR_NAME,
                run.log_format,
            )
            .context(InitializeLoggingSnafu)?;

            let client = client::initialize_operator(controller::OPERATOR_NAME)
                .await
                .context(InitializeOperatorSnafu)?;

            controller::run_all(&client, &run)
                .await
                .context(RunControllersSnafu)?;
        }
    }

    Ok(())
}
