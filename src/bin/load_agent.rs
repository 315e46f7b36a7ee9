//! `jvmmon-load`: inject the jvmmon agent library into a running JVM.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;

use jvmmon::attach::AgentLoader;

#[derive(Parser)]
#[command(
    name = "jvmmon-load",
    about = "Inject the jvmmon agent into a running JVM",
    version
)]
struct Args {
    /// Target JVM process id
    pid: String,

    /// Path to the agent shared library (libjvmmon.so)
    agent_path: PathBuf,

    /// Agent options, e.g. "include=com.example.*;exclude=com.example.gen.*"
    #[arg(long, default_value = "")]
    options: String,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("JVMMON_LOG", "warn")).init();
    match run(Args::parse()) {
        Ok(()) => {
            println!("agent loaded successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("ERROR: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let pid: i32 = args
        .pid
        .parse()
        .ok()
        .filter(|pid| *pid > 0)
        .with_context(|| format!("invalid pid: {}", args.pid))?;
    if !args.agent_path.is_file() {
        bail!("agent library not found: {}", args.agent_path.display());
    }
    AgentLoader::load(pid, &args.agent_path.to_string_lossy(), &args.options)
        .with_context(|| format!("could not load agent into pid {pid}"))?;
    Ok(())
}
