//! Command-line front end.
//!
//! Options are parsed in two passes: the early pass only reads the
//! config file path, the config file then applies through the same
//! schema, and the normal pass finally overrides it with the remaining
//! command-line options.

use std::io::Write;
use std::path::Path;

use tracing::info;

use barrow_compress::CompressAlgorithm;

use crate::config::ConfigDocument;
use crate::options::{
    DeprecatedTarget, OptionDef, OptionKind, OptionSchema, OptionValue, OptionValues, BYTE_UNITS,
    PRIORITY_EARLY, PRIORITY_NORMAL,
};

pub const DEFAULT_CONFIG_FILE: &str = "/etc/barrow/barrow.cfg";

fn parse_compress_algorithm(
    _option: &str,
    value: Option<&str>,
    values: &mut OptionValues,
) -> Result<(), String> {
    let raw = value.ok_or_else(|| "missing algorithm name".to_string())?;
    let algorithm: CompressAlgorithm = raw.parse().map_err(|error| format!("{error}"))?;
    values.store(
        "compress-algorithm",
        OptionValue::String(algorithm.to_string()),
    );
    Ok(())
}

static OPTIONS: &[OptionDef] = &[
    OptionDef {
        name: "config",
        short: None,
        kind: OptionKind::String,
        priority: PRIORITY_EARLY,
        default: None,
        help: "configuration file to read",
    },
    OptionDef {
        name: "archive-size",
        short: None,
        kind: OptionKind::Integer64 {
            min: 0,
            max: i64::MAX,
            units: BYTE_UNITS,
        },
        priority: PRIORITY_NORMAL,
        default: None,
        help: "approximate part size of archive files",
    },
    OptionDef {
        name: "compress-algorithm",
        short: None,
        kind: OptionKind::Special {
            parse: parse_compress_algorithm,
            hint: "<algorithm>",
        },
        priority: PRIORITY_NORMAL,
        default: Some("none"),
        help: "compression algorithm and level\n(none, zip0..zip9, lzma1..lzma9, lz4-0..lz4-16, zstd0..zstd19)",
    },
    OptionDef {
        name: "compress",
        short: None,
        kind: OptionKind::Deprecated {
            target: DeprecatedTarget::Forward("compress-algorithm"),
            note: "use '--compress-algorithm' instead",
        },
        priority: PRIORITY_NORMAL,
        default: None,
        help: "",
    },
    OptionDef {
        name: "bandwidth-limit",
        short: None,
        kind: OptionKind::Integer64 {
            min: 0,
            max: i64::MAX,
            units: BYTE_UNITS,
        },
        priority: PRIORITY_NORMAL,
        default: None,
        help: "storage write budget in bytes per second (0 disables the limit)",
    },
    OptionDef {
        name: "max-connections",
        short: None,
        kind: OptionKind::Integer {
            min: 1,
            max: 64,
            units: &[],
        },
        priority: PRIORITY_NORMAL,
        default: Some("2"),
        help: "concurrent server sessions per host",
    },
    OptionDef {
        name: "write-mode",
        short: None,
        kind: OptionKind::Select {
            choices: &[("stop", 0), ("append", 1), ("overwrite", 2)],
        },
        priority: PRIORITY_NORMAL,
        default: Some("stop"),
        help: "behaviour when the archive file already exists",
    },
    OptionDef {
        name: "full",
        short: Some('f'),
        kind: OptionKind::Enum {
            group: "archive-type",
            value: 1,
        },
        priority: PRIORITY_NORMAL,
        default: None,
        help: "create a full archive",
    },
    OptionDef {
        name: "incremental",
        short: Some('i'),
        kind: OptionKind::Enum {
            group: "archive-type",
            value: 2,
        },
        priority: PRIORITY_NORMAL,
        default: None,
        help: "create an incremental archive",
    },
    OptionDef {
        name: "pre-command",
        short: None,
        kind: OptionKind::String,
        priority: PRIORITY_NORMAL,
        default: None,
        help: "shell template run before writing an archive part\n(%file, %directory and %number are substituted)",
    },
    OptionDef {
        name: "post-command",
        short: None,
        kind: OptionKind::String,
        priority: PRIORITY_NORMAL,
        default: None,
        help: "shell template run after writing an archive part",
    },
    OptionDef {
        name: "continuous-database",
        short: None,
        kind: OptionKind::String,
        priority: PRIORITY_NORMAL,
        default: Some("/var/lib/barrow/continuous.db"),
        help: "location of the continuous change store",
    },
    OptionDef {
        name: "verbose",
        short: Some('v'),
        kind: OptionKind::Increment { max: 6 },
        priority: PRIORITY_NORMAL,
        default: None,
        help: "increase verbosity",
    },
    OptionDef {
        name: "quiet",
        short: None,
        kind: OptionKind::Boolean,
        priority: PRIORITY_NORMAL,
        default: None,
        help: "suppress any output",
    },
    OptionDef {
        name: "help",
        short: Some('h'),
        kind: OptionKind::Boolean,
        priority: PRIORITY_NORMAL,
        default: None,
        help: "print this help",
    },
    OptionDef {
        name: "version",
        short: None,
        kind: OptionKind::Boolean,
        priority: PRIORITY_NORMAL,
        default: None,
        help: "print the version",
    },
];

/// The process option schema. Panics on schema mistakes, which are
/// programmer errors caught by the tests.
pub fn schema() -> OptionSchema {
    OptionSchema::new(OPTIONS).expect("option schema is statically valid")
}

/// Parse argv (without the program name) plus the config file into a
/// value store. Diagnostics go to `sink`.
pub fn parse(args: &[String], sink: &mut dyn Write) -> Result<OptionValues, ()> {
    let schema = schema();
    let mut values = schema.values();

    if !schema.parse_args(args, PRIORITY_EARLY, PRIORITY_EARLY, &mut values, sink) {
        return Err(());
    }

    let config_path = values.string("config").to_string();
    let config_path = if config_path.is_empty() {
        DEFAULT_CONFIG_FILE.to_string()
    } else {
        config_path
    };
    if Path::new(&config_path).exists() {
        let document = match ConfigDocument::load(Path::new(&config_path)) {
            Ok(document) => document,
            Err(cause) => {
                let _ = writeln!(sink, "Cannot read config file '{config_path}': {cause}!");
                return Err(());
            }
        };
        if !document.apply(&schema, &mut values, sink) {
            return Err(());
        }
    }

    if !schema.parse_args(
        args,
        PRIORITY_NORMAL,
        schema.max_priority(),
        &mut values,
        sink,
    ) {
        return Err(());
    }
    Ok(values)
}

/// Map verbosity options to a tracing filter directive.
fn log_directive(values: &OptionValues) -> &'static str {
    if values.boolean("quiet") {
        return "error";
    }
    match values.increment("verbose") {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Run the command line and return the process exit code.
pub fn run(args: &[String]) -> i32 {
    let mut stderr = std::io::stderr();
    let Ok(values) = parse(args, &mut stderr) else {
        return exitcode::USAGE;
    };

    let directive = log_directive(&values);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive));
    // A second init (from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    if values.boolean("help") {
        let mut stdout = std::io::stdout();
        let _ = writeln!(stdout, "Usage: barrow [options] [--] <archive> <files...>");
        let _ = writeln!(stdout);
        schema().print_help(&mut stdout);
        return exitcode::OK;
    }
    if values.boolean("version") {
        println!("barrow {}", env!("CARGO_PKG_VERSION"));
        return exitcode::OK;
    }

    info!(
        message = "Startup.",
        archive_size = values.integer("archive-size"),
        compress_algorithm = values.string("compress-algorithm"),
        arguments = values.positionals().len(),
    );

    // Archive creation itself sits above this systems core; without a
    // positional command there is nothing further to do.
    if values.positionals().is_empty() {
        let _ = writeln!(
            stderr,
            "No archive given. Run 'barrow --help' for a summary of options."
        );
        return exitcode::USAGE;
    }
    exitcode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(args: &[&str]) -> OptionValues {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let mut sink = Vec::new();
        match parse(&args, &mut sink) {
            Ok(values) => values,
            Err(()) => panic!(
                "parse failed: {}",
                String::from_utf8_lossy(&sink)
            ),
        }
    }

    #[test]
    fn schema_is_valid() {
        schema();
    }

    #[test]
    fn archive_options_parse_end_to_end() {
        let values = parse_ok(&[
            "--archive-size=2M",
            "--compress-algorithm=zip9",
            "-v",
            "out.bar",
            "/etc",
        ]);
        assert_eq!(values.integer("archive-size"), 2 * 1024 * 1024);
        assert_eq!(values.string("compress-algorithm"), "zip9");
        assert_eq!(values.increment("verbose"), 1);
        assert_eq!(
            values.positionals(),
            &["out.bar".to_string(), "/etc".to_string()]
        );
    }

    #[test]
    fn compress_algorithm_rejects_unknown_names() {
        let args = vec!["--compress-algorithm=snappy".to_string()];
        let mut sink = Vec::new();
        assert!(parse(&args, &mut sink).is_err());
        let text = String::from_utf8(sink).unwrap();
        assert!(text.contains("snappy"));
    }

    #[test]
    fn deprecated_compress_option_still_works() {
        let args = vec!["--compress=lzma6".to_string()];
        let mut sink = Vec::new();
        let values = parse(&args, &mut sink).unwrap();
        assert_eq!(values.string("compress-algorithm"), "lzma6");
        assert!(String::from_utf8(sink).unwrap().contains("deprecated"));
    }

    #[test]
    fn verbosity_maps_to_log_directives() {
        assert_eq!(log_directive(&parse_ok(&[])), "warn");
        assert_eq!(log_directive(&parse_ok(&["-vv"])), "debug");
        assert_eq!(log_directive(&parse_ok(&["--quiet"])), "error");
    }
}
