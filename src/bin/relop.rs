//! relop CLI
//!
//! Runs one relational operator over CSV files:
//!
//!   relop product <left> <right> <output> [left_skip] [right_skip]
//!   relop difference <left> <right> <output> [left_skip] [right_skip] [keep_order]
//!   relop left-join <left> <right> <output> <keys> [left_skip] [right_skip] [keep_order]
//!   relop sort <input> <output> <sort_spec> [skip]
//!
//! Engine settings come from flags, `RELOP_*` environment variables or a
//! `.env` file in the working directory.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};

use relop::config::{parse_keep_order, parse_skip_rows};
use relop::{
    CartesianProduct, Difference, EngineConfig, Encoding, LeftOuterJoin, OperatorReport, RelationInput,
    SortOperator,
};

#[derive(Parser)]
#[command(name = "relop")]
#[command(about = "Disk-backed relational operators over CSV files")]
#[command(version)]
struct Cli {
    /// Directory for spilled runs and intermediate files
    #[arg(long, global = true)]
    temp_dir: Option<PathBuf>,
    /// Rows per in-memory sorted run
    #[arg(long, global = true)]
    run_size: Option<usize>,
    /// Runs merged at once
    #[arg(long = "fan-in", global = true)]
    merge_fan_in: Option<usize>,
    /// Text encoding of inputs and outputs (utf-8, latin1)
    #[arg(long, global = true)]
    encoding: Option<String>,
    /// Write a JSON summary of the run to this file
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cartesian product: every left row concatenated with every right row
    Product {
        left: PathBuf,
        right: PathBuf,
        output: PathBuf,
        left_skip: Option<String>,
        right_skip: Option<String>,
    },
    /// Set difference: distinct left rows with no equal right row
    Difference {
        left: PathBuf,
        right: PathBuf,
        output: PathBuf,
        left_skip: Option<String>,
        right_skip: Option<String>,
        /// "true" restores left input order
        keep_order: Option<String>,
    },
    /// Left outer equi-join on key pairs like "1=2,3=1"
    LeftJoin {
        left: PathBuf,
        right: PathBuf,
        output: PathBuf,
        keys: String,
        left_skip: Option<String>,
        right_skip: Option<String>,
        /// "true" restores left input order
        keep_order: Option<String>,
    },
    /// Sort one file by a typed key list like "2:decimal,1:string"
    Sort {
        input: PathBuf,
        output: PathBuf,
        sort_spec: String,
        skip: Option<String>,
    },
}

fn skip_rows(value: Option<&str>) -> Result<usize> {
    Ok(parse_skip_rows(value.unwrap_or(""))?)
}

fn keep_order(value: Option<&str>) -> bool {
    value.is_some_and(parse_keep_order)
}

impl Cli {
    /// `RELOP_*` environment settings overridden by flags.
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig::from_env().context("Invalid RELOP_* environment setting")?;
        if let Some(dir) = &self.temp_dir {
            config = config.with_temp_dir(dir);
        }
        if let Some(run_size) = self.run_size {
            config = config.with_run_size(run_size);
        }
        if let Some(fan_in) = self.merge_fan_in {
            config = config.with_merge_fan_in(fan_in);
        }
        if let Some(encoding) = &self.encoding {
            config = config.with_encoding(encoding.parse::<Encoding>()?);
        }
        config.validate()?;
        Ok(config)
    }
}

fn run(command: &Commands, config: &EngineConfig) -> Result<(PathBuf, OperatorReport)> {
    let (output, report) = match command {
        Commands::Product {
            left,
            right,
            output,
            left_skip,
            right_skip,
        } => {
            let op = CartesianProduct::new(
                RelationInput::new(left, skip_rows(left_skip.as_deref())?),
                RelationInput::new(right, skip_rows(right_skip.as_deref())?),
            );
            (output, op.run(config, output))
        }
        Commands::Difference {
            left,
            right,
            output,
            left_skip,
            right_skip,
            keep_order: order,
        } => {
            let op = Difference::new(
                RelationInput::new(left, skip_rows(left_skip.as_deref())?),
                RelationInput::new(right, skip_rows(right_skip.as_deref())?),
                keep_order(order.as_deref()),
            );
            (output, op.run(config, output))
        }
        Commands::LeftJoin {
            left,
            right,
            output,
            keys,
            left_skip,
            right_skip,
            keep_order: order,
        } => {
            let op = LeftOuterJoin::new(
                RelationInput::new(left, skip_rows(left_skip.as_deref())?),
                RelationInput::new(right, skip_rows(right_skip.as_deref())?),
                keys,
                keep_order(order.as_deref()),
            )
            .context("Invalid key pair specification")?;
            (output, op.run(config, output))
        }
        Commands::Sort {
            input,
            output,
            sort_spec,
            skip,
        } => {
            let op = SortOperator::new(RelationInput::new(input, skip_rows(skip.as_deref())?), sort_spec)
                .context("Invalid sort specification")?;
            (output, op.run(config, output))
        }
    };
    let report = report.with_context(|| format!("Failed to write {}", output.display()))?;
    Ok((output.clone(), report))
}

fn write_report(path: &Path, report: &OperatorReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write report {}", path.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e)
            if matches!(
                e.kind(),
                ErrorKind::MissingRequiredArgument
                    | ErrorKind::MissingSubcommand
                    | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
            ) =>
        {
            eprintln!("{}", e.render());
            eprintln!("{}", Cli::command().render_usage());
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };
    let config = cli.engine_config()?;

    println!("\n{}", "═".repeat(60));
    println!("RELOP");
    println!("{}", "═".repeat(60));
    if let Some(dir) = &config.temp_dir {
        println!("Temp dir: {}", dir.display());
    }
    println!(
        "Run size: {}, fan-in: {}, encoding: {}",
        config.run_size, config.merge_fan_in, config.encoding
    );

    let start_time = Instant::now();
    let (output, report) = run(&cli.command, &config)?;

    println!("\n{}", "═".repeat(60));
    println!("{} COMPLETE", report.operator.to_uppercase());
    println!("{}", "═".repeat(60));
    println!("  Output: {}", output.display());
    println!("  Header rows: {}", report.header_rows);
    println!("  Data rows: {}", report.data_rows);
    println!("  Width: {}", report.output_width);
    if report.order_restored {
        println!("  Input order restored");
    }
    println!("  Time: {:.2}s", start_time.elapsed().as_secs_f64());

    if let Some(path) = &cli.report {
        write_report(path, &report)?;
        println!("  Report: {}", path.display());
    }
    Ok(())
}
