use clap::Parser;
use training::util::{run_search_cli, SearchArgs};

fn main() -> anyhow::Result<()> {
    let args = SearchArgs::parse();
    run_search_cli(args)?;
    Ok(())
}
