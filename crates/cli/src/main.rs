//! The `pyro` command-line driver.
//!
//! `pyro [flags] [file] [args...]` runs a script (then its `$main()` if
//! defined) or opens the REPL; `pyro check` compiles without executing;
//! `pyro test` runs `$test_*` functions; `pyro time` benchmarks `$time_*`
//! functions.
//!
//! Exit codes: 0 on success, 1 on a user panic (or whatever `$exit()`
//! requested), 2 on an argument-parsing failure.

mod repl;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use pyro_vm::{Halt, Vm};

#[derive(Parser, Debug)]
#[command(
    name = "pyro",
    version,
    about = "The Pyro programming language",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Script file to run. With no file, opens the REPL.
    file: Option<PathBuf>,

    /// Arguments passed to the script as $args.
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,

    #[command(flatten)]
    options: SharedOptions,
}

#[derive(Parser, Debug, Clone)]
struct SharedOptions {
    /// Adds a directory to the list checked when importing modules.
    /// Repeatable.
    #[arg(short = 'i', long = "import-root", value_name = "DIR", global = true)]
    import_roots: Vec<String>,

    /// Sets the maximum memory allocation, e.g. 64K, 10M, 1G.
    #[arg(short = 'm', long = "max-memory", value_name = "BYTES", global = true)]
    max_memory: Option<String>,

    /// Sets the value-stack size in bytes.
    #[arg(short = 's', long = "stack-size", value_name = "BYTES", global = true)]
    stack_size: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compiles files without executing them; exits 1 if any fails.
    Check { files: Vec<PathBuf> },

    /// Executes each file, then runs its $test_* functions.
    Test { files: Vec<PathBuf> },

    /// Executes each file, then times its $time_* functions.
    Time {
        files: Vec<PathBuf>,

        /// The number of runs to average over.
        #[arg(long = "num-runs", value_name = "N", default_value_t = 10)]
        num_runs: usize,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let options = cli.options;
    let result = match cli.command {
        Some(Command::Check { files }) => cmd_check(&files, &options),
        Some(Command::Test { files }) => cmd_test(&files, &options),
        Some(Command::Time { files, num_runs }) => cmd_time(&files, num_runs, &options),
        None => match cli.file {
            Some(file) => cmd_run(&file, &cli.args, &options),
            None => repl::run(&options),
        },
    };

    match result {
        Ok(code) => code,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::from(2)
        }
    }
}

/// Parses a byte count with an optional K/M/G suffix.
fn parse_byte_size(text: &str) -> Result<usize, String> {
    let text = text.trim();
    let (digits, multiplier) = match text.chars().last() {
        Some('K') | Some('k') => (&text[..text.len() - 1], 1024),
        Some('M') | Some('m') => (&text[..text.len() - 1], 1024 * 1024),
        Some('G') | Some('g') => (&text[..text.len() - 1], 1024 * 1024 * 1024),
        _ => (text, 1),
    };
    digits
        .parse::<usize>()
        .map(|n| n * multiplier)
        .map_err(|_| format!("invalid byte count '{text}'"))
}

/// Builds a VM configured from the shared options, the
/// `PYRO_IMPORT_ROOTS` environment variable, and the script location.
pub(crate) fn build_vm(options: &SharedOptions, script: Option<&Path>) -> Result<Vm, String> {
    let mut vm = Vm::new();

    if let Some(max_memory) = &options.max_memory {
        vm.set_max_memory(parse_byte_size(max_memory)?);
    }
    if let Some(stack_size) = &options.stack_size {
        let bytes = parse_byte_size(stack_size)?;
        vm.set_stack_limit(bytes / std::mem::size_of::<pyro_vm::Value>());
    }

    // Root zero: the script's own directory, or the CWD for the REPL.
    let first_root = match script.and_then(|path| path.parent()) {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().into_owned(),
        _ => ".".to_string(),
    };
    add_root(&mut vm, &first_root)?;

    for root in &options.import_roots {
        add_root(&mut vm, root)?;
    }
    if let Ok(env_roots) = std::env::var("PYRO_IMPORT_ROOTS") {
        for root in env_roots.split(':').filter(|root| !root.is_empty()) {
            add_root(&mut vm, root)?;
        }
    }

    Ok(vm)
}

fn add_root(vm: &mut Vm, root: &str) -> Result<(), String> {
    vm.add_import_root(root)
        .map_err(|_| "out of memory while configuring import roots".to_string())
}

fn halt_exit_code(halt: &Halt) -> ExitCode {
    match halt {
        Halt::Exit(code) => ExitCode::from((*code & 0xFF) as u8),
        Halt::Panic(_) => ExitCode::from(1),
    }
}

fn cmd_run(file: &Path, args: &[String], options: &SharedOptions) -> Result<ExitCode, String> {
    log::debug!("running {}", file.display());
    let mut vm = build_vm(options, Some(file))?;

    let mut all_args = vec![file.to_string_lossy().into_owned()];
    all_args.extend_from_slice(args);
    if vm.set_args(&all_args).is_err() {
        return Err("out of memory while setting $args".to_string());
    }

    if let Err(halt) = vm.exec_file_as_main(&file.to_string_lossy()) {
        return Ok(halt_exit_code(&halt));
    }
    if let Err(halt) = vm.run_main_func() {
        return Ok(halt_exit_code(&halt));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_check(files: &[PathBuf], options: &SharedOptions) -> Result<ExitCode, String> {
    let mut failed = false;
    for file in files {
        let mut vm = build_vm(options, Some(file))?;
        if vm.try_compile_file(&file.to_string_lossy()).is_err() {
            failed = true;
        } else {
            println!("  OK {}", file.display());
        }
    }
    Ok(if failed {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn cmd_test(files: &[PathBuf], options: &SharedOptions) -> Result<ExitCode, String> {
    let mut total_passed = 0;
    let mut total_failed = 0;

    for file in files {
        println!("{}", file.display());
        let mut vm = build_vm(options, Some(file))?;

        if let Err(halt) = vm.exec_file_as_main(&file.to_string_lossy()) {
            if matches!(halt, Halt::Exit(_)) {
                return Ok(halt_exit_code(&halt));
            }
            println!("  FAIL (file failed to execute)");
            total_failed += 1;
            continue;
        }

        match vm.run_test_funcs() {
            Ok((passed, failed)) => {
                println!("  {passed} passed, {failed} failed");
                total_passed += passed;
                total_failed += failed;
            }
            Err(halt) => return Ok(halt_exit_code(&halt)),
        }
    }

    println!("\n{total_passed} passed, {total_failed} failed");
    Ok(if total_failed > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn cmd_time(files: &[PathBuf], num_runs: usize, options: &SharedOptions) -> Result<ExitCode, String> {
    for file in files {
        println!("{}", file.display());
        let mut vm = build_vm(options, Some(file))?;

        if let Err(halt) = vm.exec_file_as_main(&file.to_string_lossy()) {
            return Ok(halt_exit_code(&halt));
        }
        if let Err(halt) = vm.run_time_funcs(num_runs) {
            return Ok(halt_exit_code(&halt));
        }
    }
    Ok(ExitCode::SUCCESS)
}
