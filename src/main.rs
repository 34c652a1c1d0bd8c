use clap::{Arg, ArgAction, Command};
use log::LevelFilter;

use v9disk::cli;
use v9disk::creator::CreateFormat;
use v9disk::output::Formatter;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let matches = Command::new("v9disk")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Victor 9000 disk image utility (floppy and hard disk)")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Show detailed output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Suppress non-essential output"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Output in JSON format"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("info")
                .about("Show disk image information")
                .arg(path_arg("Disk image path (image.img or image.img:N for partition)")),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify disk image integrity")
                .arg(path_arg("Disk image path to verify")),
        )
        .subcommand(
            Command::new("create")
                .about("Create a new blank disk image")
                .arg(
                    Arg::new("output")
                        .required(true)
                        .help("Output file path for the new disk image"),
                )
                .arg(
                    Arg::new("type")
                        .short('t')
                        .long("type")
                        .required(true)
                        .value_parser(CreateFormat::names())
                        .help("Disk type"),
                )
                .arg(
                    Arg::new("label")
                        .short('l')
                        .long("label")
                        .help("Volume label (optional)"),
                )
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite an existing file"),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List files or partitions")
                .arg(path_arg("Disk image path (image.img or image.img:N:\\path)"))
                .arg(recursive_arg("List subdirectories recursively")),
        )
        .subcommand(
            Command::new("copy")
                .about("Copy files to/from a disk image")
                .arg(
                    Arg::new("source")
                        .required(true)
                        .help("Source path (supports wildcards: *.COM, *.*)"),
                )
                .arg(
                    Arg::new("dest")
                        .required(true)
                        .help("Destination path (use a directory for wildcards)"),
                )
                .arg(recursive_arg("Copy subdirectories recursively")),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete a file or directory from a disk image")
                .arg(path_arg("Path to delete (image.img:\\FILE or image.img:N:\\FILE)"))
                .arg(recursive_arg("Delete directory contents recursively")),
        )
        .subcommand(
            Command::new("mkdir")
                .about("Create a directory on a disk image")
                .arg(path_arg("Directory path (image.img:\\DIRNAME)")),
        )
        .subcommand(
            Command::new("rmdir")
                .about("Remove a directory from a disk image")
                .arg(path_arg("Directory path (image.img:\\DIRNAME)"))
                .arg(recursive_arg("Remove directory contents recursively")),
        )
        .subcommand(
            Command::new("attr")
                .about("View or modify file attributes (R, H, S, A; the D bit is never altered)")
                .arg(path_arg("File path (image.img:\\FILE or image.img:N:\\FILE)"))
                .arg(
                    Arg::new("modifications")
                        .num_args(0..)
                        .allow_hyphen_values(true)
                        .help("Attribute changes: +R +H +S +A to set, -R -H -S -A to clear"),
                ),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    init_logging(verbose, matches.get_flag("quiet"));
    let fmt = Formatter::new(matches.get_flag("json"));

    match matches.subcommand() {
        Some(("info", sub)) => cli::cmd_info(arg(sub, "path"), verbose, &fmt),
        Some(("verify", sub)) => cli::cmd_verify(arg(sub, "path"), verbose, &fmt),
        Some(("create", sub)) => cli::cmd_create(
            arg(sub, "output"),
            arg(sub, "type"),
            sub.get_one::<String>("label").map(String::as_str),
            sub.get_flag("force"),
            &fmt,
        ),
        Some(("list", sub)) => cli::cmd_list(arg(sub, "path"), sub.get_flag("recursive"), &fmt),
        Some(("copy", sub)) => cli::cmd_copy(
            arg(sub, "source"),
            arg(sub, "dest"),
            sub.get_flag("recursive"),
            &fmt,
        ),
        Some(("delete", sub)) => cli::cmd_delete(arg(sub, "path"), sub.get_flag("recursive"), &fmt),
        Some(("mkdir", sub)) => cli::cmd_mkdir(arg(sub, "path"), &fmt),
        Some(("rmdir", sub)) => cli::cmd_rmdir(arg(sub, "path"), sub.get_flag("recursive"), &fmt),
        Some(("attr", sub)) => {
            let mods: Vec<String> = sub
                .get_many::<String>("modifications")
                .map(|vals| vals.cloned().collect())
                .unwrap_or_default();
            cli::cmd_attr(arg(sub, "path"), &mods, &fmt)
        }
        _ => unreachable!("subcommand is required"),
    }
}

fn path_arg(help: &str) -> Arg {
    Arg::new("path").required(true).help(help.to_string())
}

fn recursive_arg(help: &str) -> Arg {
    Arg::new("recursive")
        .short('r')
        .long("recursive")
        .action(ArgAction::SetTrue)
        .help(help.to_string())
}

fn arg<'a>(matches: &'a clap::ArgMatches, name: &str) -> &'a str {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .unwrap_or_default()
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        LevelFilter::Error
    } else if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .init();
}
