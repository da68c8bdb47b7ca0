mod catalog;
mod cli;
mod config;
mod database;
mod error;
mod ledger;
mod logging;
mod manifest;
mod menu;
mod plan;
mod project;
mod prompt;
mod reconcile;
mod status;
mod tool;

use cli::Cli;
use log::error;

fn main() {
    match Cli::handle_command_line() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("{:?}", err);
            eprintln!("{}", err);
            std::process::exit(1);
        }
    }
}
