use super::toplevel::Config;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tlang")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Interactive compiler for the tlang expression language", long_about = None)]
pub(crate) struct Args {
    /// Read the program from FILE instead of standard input
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    #[arg(long = "prompt", value_name = "TEXT", default_value = "tlang> ")]
    pub prompt: String,

    /// Do not print prompts
    #[arg(short, long)]
    pub quiet: bool,

    /// Print generated code after each definition and the whole module at exit
    #[arg(long = "dump-ir")]
    pub dump_ir: bool,

    /// Disable the optimization passes
    #[arg(long = "no-opt")]
    pub no_opt: bool,

    /// Echo parsed trees to stderr
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Args {
    pub fn config(&self) -> Config {
        Config {
            prompt: if self.quiet {
                None
            } else {
                Some(self.prompt.clone())
            },
            dump_ir: self.dump_ir,
            optimize: !self.no_opt,
            verbose: self.verbose,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(&["tlang"]).unwrap();
        assert!(args.file.is_none());
        let config = args.config();
        assert_eq!(config.prompt.as_deref(), Some("tlang> "));
        assert!(config.optimize);
        assert!(!config.dump_ir);
        assert!(!config.verbose);
    }

    #[test]
    fn test_flags() {
        let args = Args::try_parse_from(&[
            "tlang", "-q", "--dump-ir", "--no-opt", "-v", "prog.tl",
        ])
        .unwrap();
        assert_eq!(args.file, Some(PathBuf::from("prog.tl")));
        let config = args.config();
        assert_eq!(config.prompt, None);
        assert!(!config.optimize);
        assert!(config.dump_ir);
        assert!(config.verbose);
    }

    #[test]
    fn test_custom_prompt() {
        let args = Args::try_parse_from(&["tlang", "--prompt", "> "]).unwrap();
        assert_eq!(args.config().prompt.as_deref(), Some("> "));
    }
}
