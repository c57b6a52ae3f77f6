//! Exit codes: 0 success; 1 non-fatal scan or link errors; 2 command line
//! syntax error; 3 out of memory; 8 fatal link-pass failure that left a
//! `.kDepBackup` file behind.

use getopts::Options;
use kdedup::*;
use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};

static CTRL_C_BREAKS: AtomicU32 = AtomicU32::new(0);

fn main() {
    let mut opts = Options::new();
    opts.optflag("H", "dereference-command-line", "Follow symbolic links on the command line");
    opts.optflag("", "no-dereference-command-line", "Reverses the effect of -H");
    opts.optflag("L", "dereference", "Follow symbolic links to files while scanning (default)");
    opts.optflag("P", "no-dereference", "Do not follow symbolic links to files while scanning");
    opts.optflag("r", "recursive", "Recurse into subdirectories, but do not follow links to them");
    opts.optflag("R", "dereference-recursive", "Same as -r, but also follow symlinked subdirectories");
    opts.optflag("", "no-recursive", "Do not recurse into subdirectories");
    opts.optflag("x", "one-file-system", "Do not consider other file systems, either down through a mount point or via a symbolic link to a directory");
    opts.optflag("", "no-one-file-system", "Reverses the effect of --one-file-system");
    opts.optflag("", "cross-file-systems", "Same as --no-one-file-system");
    opts.optflag("q", "quiet", "Hide regular progress output");
    opts.optflagmulti("v", "verbose", "Print one line per finding; may be repeated");
    opts.optflag("", "hardlink-duplicates", "Hardlink duplicate files to save space. By default no action is taken and only analysis is done");
    #[cfg(feature = "json")]
    opts.optflag("", "json", "Print the result as JSON");
    opts.optflag("h", "help", "This help text");
    opts.optflag("?", "", "Same as --help");
    opts.optflag("V", "version", "Print the version and exit");

    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| env!("CARGO_PKG_NAME").to_owned());

    let matches = match opts.parse(args) {
        Ok(matches) => matches,
        Err(err) => {
            eprintln!("{}: syntax error: {}", program, err);
            process::exit(2);
        }
    };

    if matches.opt_present("h") || matches.opt_present("?") {
        println!(
            "Finds duplicate files, optionally hardlinking them (v{}).\n\n{}",
            env!("CARGO_PKG_VERSION"),
            opts.usage(&(opts.short_usage(&program) + " <path>...")),
        );
        return;
    }
    if matches.opt_present("V") {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let quiet = matches.opt_present("q");
    let verbosity = matches.opt_count("v") as u32;

    let recursive_via_symlinks =
        matches.opt_present("R") && !matches.opt_present("no-recursive");
    let walk = WalkOptions {
        recursive: (matches.opt_present("r") || matches.opt_present("R"))
            && !matches.opt_present("no-recursive"),
        follow_symlinked_dirs: recursive_via_symlinks,
        follow_symlinked_files: !matches.opt_present("P"),
        one_file_system: matches.opt_present("x")
            && !(matches.opt_present("no-one-file-system") || matches.opt_present("cross-file-systems")),
        dereference_command_line: matches.opt_present("H")
            && !matches.opt_present("no-dereference-command-line"),
    };

    ctrlc::set_handler(move || {
        CTRL_C_BREAKS.fetch_add(1, Ordering::SeqCst);
    })
    .ok();

    let mut scanner = Scanner::new();
    scanner.settings.walk = walk;
    scanner.settings.break_on = Some(&CTRL_C_BREAKS);

    #[cfg(feature = "json")]
    let json_output = matches.opt_present("json");
    #[cfg(not(feature = "json"))]
    let json_output = false;

    if json_output {
        #[cfg(feature = "json")]
        scanner.set_listener(Box::new(JsonOutput::new()));
    } else if !quiet {
        scanner.set_listener(Box::new(TextUserInterface::new(verbosity)));
    }
    // Quiet mode keeps the no-op listener the scanner starts with.

    let hardlink_dups = matches.opt_present("hardlink-duplicates");
    for arg in matches.free {
        scanner.enqueue(PathBuf::from(arg));
    }
    scanner.flush();

    let mut exit_code = if scanner.had_errors() || scanner.interrupted() { 1 } else { 0 };

    if hardlink_dups && !scanner.interrupted() {
        match scanner.hardlink_duplicates() {
            Ok(link_stats) => {
                if link_stats.failed > 0 {
                    exit_code = 1;
                }
            }
            Err(fatal) => {
                eprintln!("{}: fatal: {}", program, fatal);
                process::exit(8);
            }
        }
    }

    process::exit(exit_code);
}
