// abcvm CLI - Command Line Interface
// Usage: abcvm FILE [OPTIONS]

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;
use log::info;
use parking_lot::Mutex;

use abcvm_core::abc::{self, DoAbcTag};
use abcvm_core::config::VmConfig;
use abcvm_core::error::{runtime_error, VmResult};
use abcvm_core::vm::{AbcContext, AbcVm};
use abcvm_core::Runtime;

/// abcvm - run ActionScript Byte Code
#[derive(Parser)]
#[command(name = "abcvm")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Load, link and run ActionScript Byte Code", long_about = None)]
struct Cli {
    /// ABC file to run (or a DoABC tag body with --tag)
    file: PathBuf,

    /// JSON configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Input is the body of a DoABC tag (flags, name, then ABC)
    #[arg(long = "tag")]
    tag: bool,

    /// Print a JSON summary of the tables instead of running
    #[arg(long = "dump")]
    dump: bool,

    /// Disable the compiled tier
    #[arg(long = "no-jit")]
    no_jit: bool,

    /// Interpret on the calling thread, without the dispatcher or compiled tier
    #[arg(long = "interpreter-only")]
    interpreter_only: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!("{}", e.format());
        process::exit(1);
    }
}

fn run(cli: &Cli) -> VmResult<()> {
    let mut config = match &cli.config {
        Some(path) => VmConfig::from_json(&read(path)?)?,
        None => VmConfig::default(),
    };
    if cli.no_jit || cli.interpreter_only {
        config.use_jit = false;
        config.use_interpreter = true;
    }

    let bytes = fs::read(&cli.file)
        .map_err(|e| runtime_error(format!("Cannot read {}: {}", cli.file.display(), e)))?;
    let (name, lazy, abc_bytes) = if cli.tag {
        let tag = DoAbcTag::parse_body(&bytes)?;
        (tag.name.clone(), tag.lazy(), tag.abc)
    } else {
        (display_name(&cli.file), false, &bytes[..])
    };

    let file = abc::load(abc_bytes)?;
    if cli.dump {
        let summary = serde_json::to_string_pretty(&file.summary())
            .map_err(|e| runtime_error(format!("Cannot serialize the summary: {}", e)))?;
        println!("{}", summary);
        return Ok(());
    }

    let context = AbcContext::with_lazy(file, name, lazy);
    if cli.interpreter_only {
        let mut rt = Runtime::new(config);
        return rt.exec(context);
    }
    run_on_dispatcher(config, context)
}

/// Run the scripts on the worker and wait for them before shutting down
fn run_on_dispatcher(config: VmConfig, context: Arc<AbcContext>) -> VmResult<()> {
    let mut vm = AbcVm::new(config);
    vm.start()?;
    info!("Running {}", context.name);

    let outcome: Arc<Mutex<VmResult<()>>> = Arc::new(Mutex::new(Ok(())));
    let slot = outcome.clone();
    vm.handle().synchronize(move |rt| {
        *slot.lock() = rt.exec(context);
    })?;
    vm.shutdown()?;

    let result = std::mem::replace(&mut *outcome.lock(), Ok(()));
    result
}

fn read(path: &Path) -> VmResult<String> {
    fs::read_to_string(path).map_err(|e| runtime_error(format!("Cannot read {}: {}", path.display(), e)))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
