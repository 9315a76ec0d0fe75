// ─────────────────────────────────────────────────────────────────────────────
//  fbuild  —  embedded firmware build orchestrator CLI
//
//  A thin shell over the `fbuild` library: parses arguments, wires Ctrl-C to
//  a CancelFlag, and renders a BuildResult. No build logic lives here.
//
//  USAGE
//  ─────
//    fbuild build   [--env NAME] [--clean] [-v]  [PROJECT_DIR]
//    fbuild clean   [--env NAME]                 [PROJECT_DIR]
//    fbuild boards
//    fbuild lib install <spec>
//    fbuild lib search  <query>
//    fbuild lib list
//    fbuild lib info    <name>
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use fbuild::board::Board;
use fbuild::cache::Cache;
use fbuild::library::LibraryManager;
use fbuild::orchestrator::{self, BuildOptions, CancelFlag};

#[derive(Parser)]
#[command(
    name = "fbuild",
    version = env!("CARGO_PKG_VERSION"),
    about = "Embedded firmware build orchestrator for Arduino-style sketches",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Print every compiler/linker/archiver invocation
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Build one environment (or every configured environment)
    Build(BuildArgs),
    /// Remove cached build artifacts for an environment, or the whole project
    Clean(CleanArgs),
    /// List every board this crate knows how to target
    Boards,
    /// Manage Arduino library dependencies
    Lib(LibArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Project directory (contains platformio.ini)
    #[arg(default_value = ".")]
    project_dir: PathBuf,

    /// Environment to build (default: project's default_envs, or all)
    #[arg(long, short = 'e')]
    env: Option<String>,

    /// Remove the environment's build tree before compiling
    #[arg(long)]
    clean: bool,
}

#[derive(Args)]
struct CleanArgs {
    #[arg(default_value = ".")]
    project_dir: PathBuf,

    /// Clean only this environment's build tree (default: the whole .fbuild/build)
    #[arg(long, short = 'e')]
    env: Option<String>,
}

#[derive(Args)]
struct LibArgs {
    #[command(subcommand)]
    command: LibCmd,
}

#[derive(Subcommand)]
enum LibCmd {
    /// Download and cache a library dependency
    Install {
        /// URL / owner/name[@version] / name[@version]
        spec: String,
    },
    /// Search the Arduino library registry
    Search { query: String },
    /// List every library cached by a previous `lib install`
    List,
    /// Show the recorded provenance of a cached library
    Info { name: String },
}

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let code = match cli.command {
        Cmd::Build(args) => cmd_build(args, cli.verbose),
        Cmd::Clean(args) => cmd_clean(args),
        Cmd::Boards => {
            cmd_boards();
            0
        }
        Cmd::Lib(args) => cmd_lib(args, cli.verbose),
    };

    std::process::exit(code);
}

/// Exit codes: 0 success, 1 build failure, 130 user interrupt (SIGINT),
/// 2 argument or project-structure error.
fn cmd_build(args: BuildArgs, verbose: bool) -> i32 {
    let cancel = CancelFlag::new();
    let handler_cancel = cancel.clone();
    if ctrlc::set_handler(move || handler_cancel.cancel()).is_err() {
        log::warn!("failed to install Ctrl-C handler; interrupts will not cancel in-flight builds");
    }

    let opts = BuildOptions { env: args.env, clean: args.clean, verbose };

    println!("{} {}", "Building".cyan().bold(), args.project_dir.display());
    println!("{}", "─".repeat(60).dimmed());

    match orchestrator::build(&args.project_dir, &opts, &cancel) {
        Ok(result) if result.success => {
            println!(
                "{} {} built in {:.2}s",
                "✓".green().bold(),
                result.environment.bold(),
                result.build_time.as_secs_f64()
            );
            if let Some(hex) = &result.hex_path {
                println!("  {} {}", "hex:".dimmed(), hex.display());
            }
            if let Some(bin) = &result.bin_path {
                println!("  {} {}", "bin:".dimmed(), bin.display());
            }
            if let Some(report) = &result.size_report {
                println!(
                    "  {} flash {}/{} bytes ({:.1}%)  ram {}/{} bytes ({:.1}%)",
                    "size:".dimmed(),
                    report.flash_used(),
                    report.max_flash,
                    report.flash_percent(),
                    report.ram_used(),
                    report.max_ram,
                    report.ram_percent(),
                );
            }
            0
        }
        Ok(result) => {
            eprintln!("{} {}", "✗".red().bold(), result.message);
            1
        }
        Err(fbuild::FbuildError::Interrupted) => {
            eprintln!("{} build interrupted", "!".yellow().bold());
            130
        }
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            2
        }
    }
}

fn cmd_clean(args: CleanArgs) -> i32 {
    let cache = match Cache::new(Some(&args.project_dir)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            return 2;
        }
    };

    let result = match &args.env {
        Some(env) => cache.clean_build(env),
        None => std::fs::remove_dir_all(&cache.build_root).or_else(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Ok(())
            } else {
                Err(e.into())
            }
        }),
    };

    match result {
        Ok(()) => {
            println!("{} cleaned {}", "✓".green().bold(), cache.build_root.display());
            0
        }
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            2
        }
    }
}

fn cmd_boards() {
    println!("{:<20} {:<28} {:<10} {:>10} {:>9}", "ID", "NAME", "MCU", "FLASH", "RAM");
    println!("{}", "─".repeat(80).dimmed());
    for b in Board::catalog() {
        println!(
            "{:<20} {:<28} {:<10} {:>8}KB {:>7}KB",
            b.id.bold(),
            b.name,
            b.mcu,
            b.max_flash_bytes / 1024,
            b.max_ram_bytes / 1024,
        );
    }
}

fn cmd_lib(args: LibArgs, verbose: bool) -> i32 {
    let cache = match Cache::new(None) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            return 2;
        }
    };
    let libs_root = cache.cache_root.join("user_libs");
    let registry_cache_dir = cache.libraries_dir();
    if let Err(e) = std::fs::create_dir_all(&libs_root) {
        eprintln!("{} {e}", "✗".red().bold());
        return 2;
    }
    let mgr = LibraryManager::new(&libs_root, &registry_cache_dir, verbose);

    match args.command {
        LibCmd::Install { spec } => match mgr.ensure_library(&spec) {
            Ok((name, install_dir, url, version)) => {
                println!("{} {} {} ({url} @ {version})", "✓".green().bold(), "installed".cyan(), name.bold());
                println!("  {} {}", "path:".dimmed(), install_dir.display());
                0
            }
            Err(e) => {
                eprintln!("{} {}", "✗".red().bold(), e);
                1
            }
        },
        LibCmd::Search { query } => match mgr.search_registry(&query) {
            Ok(entries) => {
                for entry in entries.iter().take(50) {
                    println!("{:<32} {}", entry.name.bold(), entry.version.dimmed());
                }
                if entries.is_empty() {
                    println!("{} no matches for '{query}'", "!".yellow());
                }
                0
            }
            Err(e) => {
                eprintln!("{} {}", "✗".red().bold(), e);
                1
            }
        },
        LibCmd::List => {
            let Ok(entries) = std::fs::read_dir(&libs_root) else {
                println!("{} no libraries installed yet", "!".yellow());
                return 0;
            };
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    println!("{}", entry.file_name().to_string_lossy().bold());
                }
            }
            0
        }
        LibCmd::Info { name } => {
            let info_path = libs_root.join(&name).join("info.json");
            match std::fs::read_to_string(&info_path) {
                Ok(data) => {
                    println!("{data}");
                    0
                }
                Err(e) => {
                    eprintln!("{} no cached library named '{name}' ({e})", "✗".red().bold());
                    1
                }
            }
        }
    }
}
