use std::env;
use std::fs;
use std::io::{self, Read};

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let mut arguments = env::args().skip(1);
    let source = match (arguments.next(), arguments.next()) {
        (None, _) => read_program_from_stdin()?,
        (Some(script), None) => fs::read_to_string(&script)
            .with_context(|| format!("unable to read script '{}'", script))?,
        (Some(_), Some(_)) => {
            eprintln!("Usage: mython [script]");
            std::process::exit(64);
        }
    };

    let mut stdout = io::stdout().lock();
    mython::run(&source, &mut stdout)
}

// Without a script argument the whole program comes from stdin; an
// indentation-sensitive language has no useful line-at-a-time prompt.
fn read_program_from_stdin() -> Result<String> {
    let mut source = String::new();
    io::stdin()
        .read_to_string(&mut source)
        .context("unable to read program from stdin")?;
    Ok(source)
}
