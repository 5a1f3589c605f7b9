pub mod check;
pub mod load;

use clap::Subcommand;
pub use check::CheckArgs;
pub use load::LoadArgs;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load newline-delimited JSON records into a destination directory.
    ///
    /// Example:
    ///   sluice load -c job.json -i events.ndjson -o /var/lib/warehouse
    ///   zcat events.ndjson.gz | sluice load -c job.json -o out --format json
    Load(LoadArgs),

    /// Validate a job file and print the statement each worker will run.
    Check(CheckArgs),
}
