pub mod actions;
pub mod config;

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Build the command-line interface.
pub fn command() -> Command {
    Command::new("powerqa")
        .about("Serial-driven validation bench for JT2302 power boards")
        .arg(
            Arg::new("list-ports")
                .long("list-ports")
                .short('l')
                .help("List all available serial ports and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Print results in JSON format (one event per line while testing)")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .help("Serial port of the board (default: config file, then last used)")
                .value_name("PORT"),
        )
        .arg(
            Arg::new("baud-rate")
                .long("baud-rate")
                .help("Serial port baud rate (default: config file, then 115200)")
                .value_name("BAUD")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("serial-number")
                .long("serial-number")
                .short('s')
                .help("Serial number to program into the board")
                .value_name("SERIAL"),
        )
        .arg(
            Arg::new("operator")
                .long("operator")
                .short('o')
                .help("Operator name recorded with the session (default: current user)")
                .value_name("NAME"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("TOML config file (default: ./powerqa.toml if present)")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("archive")
                .long("archive")
                .help("JSON Lines file receiving finished sessions")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("no-config-cache")
                .long("no-config-cache")
                .help("Neither load nor save the last used port")
                .action(clap::ArgAction::SetTrue),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    command().get_matches()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_session_run() {
        let matches = command()
            .try_get_matches_from([
                "powerqa",
                "--port",
                "/dev/ttyUSB0",
                "--baud-rate",
                "57600",
                "-s",
                "0000000000001",
                "--no-config-cache",
            ])
            .unwrap();
        assert_eq!(
            matches.get_one::<String>("port").map(String::as_str),
            Some("/dev/ttyUSB0")
        );
        assert_eq!(matches.get_one::<u32>("baud-rate"), Some(&57600));
        assert!(matches.get_flag("no-config-cache"));
        assert!(!matches.get_flag("json"));
    }

    #[test]
    fn rejects_bad_baud_rate() {
        assert!(command()
            .try_get_matches_from(["powerqa", "--baud-rate", "fast"])
            .is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        command().debug_assert();
    }
}
