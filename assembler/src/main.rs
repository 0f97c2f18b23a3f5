use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser};
use log::LevelFilter;

use relasm::{assemble, AssemblerError};

#[derive(Parser, Debug)]
#[command(
    name = "relasm",
    version,
    about = "Two-pass assembler producing relocatable object files"
)]
struct Cli {
    /// Assembly source file.
    input: PathBuf,
    /// Object file to write. Defaults to the input name with a `.o` extension.
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,
    /// Address of the first section, decimal or 0x-prefixed hex.
    #[arg(short = 's', long = "start", value_name = "ADDRESS", default_value = "0")]
    start: String,
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn parse_start_address(text: &str) -> Result<u32, AssemblerError> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse::<u32>(),
    };
    parsed.map_err(|_| AssemblerError::InvalidArgument(format!("bad start address '{text}'")))
}

fn init_logger(verbose: u8) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Warn);
    builder.parse_default_env();
    match verbose {
        0 => {}
        1 => {
            builder.filter_level(LevelFilter::Debug);
        }
        _ => {
            builder.filter_level(LevelFilter::Trace);
        }
    }
    builder.init();
}

fn run(cli: &Cli) -> Result<(), AssemblerError> {
    let start_address = parse_start_address(&cli.start)?;
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.input.with_extension("o"));
    assemble(&cli.input, &output, start_address)
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_address() {
        assert_eq!(parse_start_address("0").unwrap(), 0);
        assert_eq!(parse_start_address("256").unwrap(), 256);
        assert_eq!(parse_start_address("0x100").unwrap(), 0x100);
        assert_eq!(parse_start_address("0XfF").unwrap(), 0xFF);
        let err = parse_start_address("12ab").unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(parse_start_address("-1").is_err());
    }

    #[test]
    fn test_default_output_name() {
        let cli = Cli::parse_from(["relasm", "dir/prog.s"]);
        assert_eq!(cli.output, None);
        assert_eq!(cli.input.with_extension("o"), PathBuf::from("dir/prog.o"));
        assert_eq!(cli.start, "0");
    }

    #[test]
    fn test_verbose_count() {
        let cli = Cli::parse_from(["relasm", "-vv", "-s", "0x10", "a.s", "-o", "a.out"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.output, Some(PathBuf::from("a.out")));
    }
}
