use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::StackArgs;

#[derive(Parser)]
#[command(
    name = "cvatctl",
    about = "Synthesize the CVAT deployment stack as a CloudFormation template",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize the stack template and asset manifest.
    ///
    /// Writes `<Stack>.template.json` and `<Stack>.assets.json` into --out,
    /// or prints the template to stdout.
    Synth {
        #[command(flatten)]
        stack: StackArgs,
        /// Output directory for the template and asset manifest
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Generate a cvat.toml scaffold
    Init {
        /// Directory to write cvat.toml into
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
        /// CVAT release the scaffold pins
        #[arg(long, default_value = "dev")]
        cvat_version: String,
        #[arg(long)]
        multi_az: bool,
        /// Overwrite an existing cvat.toml
        #[arg(long)]
        force: bool,
    },
    /// Print the load balancer routing table in evaluation order
    Routes {
        #[command(flatten)]
        stack: StackArgs,
        /// Show which rule a request path hits
        #[arg(short, long)]
        path: Option<String>,
    },
    /// Resolve stack outputs against deploy-time parameter values
    Outputs {
        #[command(flatten)]
        stack: StackArgs,
        /// Parameter value as Name=Value (repeatable)
        #[arg(long = "param", value_parser = commands::outputs::parse_param)]
        params: Vec<(String, String)>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cvat=info".parse()?)
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Synth { stack, out } => commands::synth::synth(&stack, out.as_deref()),
        Commands::Init {
            path,
            cvat_version,
            multi_az,
            force,
        } => commands::init::init(&path, &cvat_version, multi_az, force).map(|_| ()),
        Commands::Routes { stack, path } => commands::routes::routes(&stack, path.as_deref()),
        Commands::Outputs { stack, params } => commands::outputs::outputs(&stack, &params),
    }
}
