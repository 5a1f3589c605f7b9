use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use log::error;

use crate::config::JobConfig;

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Job file with the input columns and load options.
    #[arg(long, short = 'c')]
    pub config: PathBuf,
}

pub fn run(args: CheckArgs) -> ExitCode {
    match execute(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("[check] {e:#}");
            ExitCode::from(2)
        }
    }
}

fn execute(args: CheckArgs) -> Result<ExitCode> {
    let job = JobConfig::from_path(&args.config)?.validate()?;

    println!("{}", job.task.copy.sql());
    for (name, converter) in job.converters.iter() {
        println!(
            "  {name}: {} -> {}",
            converter.declared(),
            converter.requested()
        );
    }
    eprintln!(
        "[check] ok: {} columns, {} workers",
        job.schema.len(),
        job.task.pool_size
    );

    Ok(ExitCode::SUCCESS)
}
