use clap::{Command, CommandFactory};
use clap_complete::{generate, Shell};
use std::io;

use crate::cli::args::Cli;

pub fn write_registration(shell: Shell) -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd: Command = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
    Ok(())
}
