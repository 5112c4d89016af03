use std::path::PathBuf;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};

pub enum Command {
    Serve,
    Import { input_path: PathBuf, user_id: String },
    Report { output_path: PathBuf, user_id: String },
}

pub struct Cli {
    conf_path: PathBuf,
    command: Command,
}

fn user_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("user")
        .short("u")
        .long("user")
        .takes_value(true)
        .required(true)
        .help("User the transactions belong to")
}

fn value(matches: &ArgMatches, name: &str, default: &str) -> String {
    matches.value_of(name).unwrap_or(default).to_string()
}

impl Cli {
    pub fn new() -> Cli {
        let matches = App::new("stock-ledger")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Records stock transactions and computes FIFO cost basis")
            .setting(AppSettings::SubcommandRequiredElseHelp)
            .arg(Arg::with_name("config_path")
                .short("c")
                .long("config")
                .takes_value(true)
                .help("Config file"))
            .subcommand(SubCommand::with_name("serve")
                .about("Serves the HTTP API"))
            .subcommand(SubCommand::with_name("import")
                .about("Records every row of a transaction sheet")
                .arg(Arg::with_name("input_path")
                    .short("i")
                    .long("input")
                    .takes_value(true)
                    .help("Transaction file to process"))
                .arg(user_arg()))
            .subcommand(SubCommand::with_name("report")
                .about("Writes the realized gains of a user")
                .arg(Arg::with_name("output_path")
                    .short("o")
                    .long("output")
                    .takes_value(true)
                    .help("Realized gains statement to write"))
                .arg(user_arg()))
            .get_matches();

        let command = match matches.subcommand() {
            ("import", Some(sub)) => Command::Import {
                input_path: PathBuf::from(value(sub, "input_path", "transactions.csv")),
                user_id: value(sub, "user", ""),
            },
            ("report", Some(sub)) => Command::Report {
                output_path: PathBuf::from(value(sub, "output_path", "realized_gains.csv")),
                user_id: value(sub, "user", ""),
            },
            _ => Command::Serve,
        };

        Cli {
            conf_path: PathBuf::from(value(&matches, "config_path", "config.yaml")),
            command,
        }
    }

    pub fn config_path(&self) -> &PathBuf { &self.conf_path }
    pub fn command(&self) -> &Command { &self.command }
}
