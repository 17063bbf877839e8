use crate::report::{run_analysis, run_interval_preview, IntervalArgs, RunArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use site_suitability::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Site Suitability",
    about = "Score candidate land against weighted distance criteria",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run one analysis and print the run report
    Run(RunArgs),
    /// Print the equal-interval class table for a distance criterion
    Intervals(IntervalArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Run(args) => run_analysis(args).await,
        Command::Intervals(args) => run_interval_preview(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["site-suitability-api"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn run_accepts_repeated_constraints_and_intervals() {
        let cli = Cli::try_parse_from([
            "site-suitability-api",
            "run",
            "--study-area",
            "/gis/area.shp",
            "--constraint",
            "/gis/water.shp",
            "--constraint",
            "/gis/roads.shp",
            "--criteria",
            "/gis/criteria.csv",
            "--output",
            "/gis/out",
            "--interval",
            "schools=/gis/schools_classes.csv",
        ])
        .expect("parses");

        let Some(Command::Run(args)) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.constraints.len(), 2);
        assert_eq!(
            args.intervals,
            vec![(
                "schools".to_string(),
                PathBuf::from("/gis/schools_classes.csv")
            )]
        );
    }

    #[test]
    fn run_requires_inputs_without_a_request_file() {
        let err = Cli::try_parse_from(["site-suitability-api", "run", "--output", "/gis/out"])
            .expect_err("study area and criteria are required");
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn intervals_accepts_negative_distances() {
        let cli = Cli::try_parse_from([
            "site-suitability-api",
            "intervals",
            "--distance",
            "-500",
            "--classes",
            "5",
        ])
        .expect("parses");

        let Some(Command::Intervals(args)) = cli.command else {
            panic!("expected intervals command");
        };
        assert_eq!(args.distance, -500);
        assert_eq!(args.classes, Some(5));
    }
}
