use std::ffi::{OsStr, OsString};

use clap::Parser;
use color_eyre::eyre::{self, Context};

use crate::utils::fsutils::read_optional_file;

/// Parses the command line. If no arguments at all were given, the arguments are
/// instead read from `rcfile` in the current directory, if it exists. This makes it
/// easy to run the binaries from cron without repeating every flag.
pub fn parse_with_rcfile<C: Parser>(rcfile: &str) -> eyre::Result<C> {
    let args = with_rcfile(std::env::args_os().collect(), rcfile)?;
    Ok(C::parse_from(args))
}

fn with_rcfile(mut args: Vec<OsString>, rcfile: &str) -> eyre::Result<Vec<OsString>> {
    if args.len() == 1 {
        if let Some(flags) = read_optional_file(rcfile)
            .wrap_err_with(|| format!("Could not read config file at: {rcfile}"))?
        {
            args.extend(flags.split_whitespace().map(|s| OsStr::new(s).to_owned()));
        }
    }
    Ok(args)
}
