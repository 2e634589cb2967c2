mod ast;
mod cli;
mod codegen;
mod error;
mod ir;
mod jit;
mod lexer;
mod parser;
mod passes;
mod token;
mod toplevel;
mod verify;

use clap::Parser;
use error::Error;
use failure::Fail;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::process;
use toplevel::{Config, Session};

fn main() {
    let args = cli::Args::parse();
    if let Err(e) = run(&args) {
        match e.cause() {
            Some(cause) => eprintln!("error: {}: {}", e, cause),
            None => eprintln!("error: {}", e),
        }
        process::exit(1);
    }
}

fn run(args: &cli::Args) -> Result<(), Error> {
    let config = args.config();
    let stdout = io::stdout();
    let out = stdout.lock();
    match &args.file {
        Some(path) => {
            let file = File::open(path)?;
            session(BufReader::new(file), out, config)
        }
        None => {
            let stdin = io::stdin();
            let input = stdin.lock();
            session(input, out, config)
        }
    }
}

fn session<R: BufRead, W: Write>(input: R, out: W, config: Config) -> Result<(), Error> {
    let verbose = config.verbose;
    let mut session = Session::new(input, out, jit::Jit::new(), config);
    if verbose {
        eprintln!("passes: [{}]", session.pass_names().join(", "));
    }
    session.run()
}
