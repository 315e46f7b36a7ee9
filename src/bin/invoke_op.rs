//! `jvmmon-invoke`: run one control operation against an agent-loaded JVM.

use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;

use jvmmon::attach::{local_connector_address, VirtualMachine};
use jvmmon::control::invoke_remote_operation;

#[derive(Parser)]
#[command(
    name = "jvmmon-invoke",
    about = "Invoke a management operation on a JVM running the jvmmon agent",
    version
)]
struct Args {
    /// Target JVM process id
    pid: String,

    /// Bean name: Profiler, Threading or JobManager
    bean: String,

    /// Operation, e.g. getMeasurements, dump, setFilter
    operation: String,

    /// Operation arguments, comma separated
    #[arg(long, value_delimiter = ',')]
    args: Vec<String>,

    /// Argument type names, comma separated; must match --args in count
    #[arg(long, value_delimiter = ',')]
    signature: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("JVMMON_LOG", "warn")).init();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
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
    if args.args.len() != args.signature.len() {
        bail!(
            "{} argument(s) but {} signature entr{}; counts must match",
            args.args.len(),
            args.signature.len(),
            if args.signature.len() == 1 { "y" } else { "ies" }
        );
    }

    let session = VirtualMachine::attach(pid).with_context(|| format!("attach to {pid}"))?;
    let address = local_connector_address(&session)
        .context("resolve connector address (is the agent loaded?)")?;
    let value = invoke_remote_operation(
        &address,
        &args.bean,
        &args.operation,
        &args.args,
        &args.signature,
    )
    .with_context(|| format!("invoke {}.{}", args.bean, args.operation))?;
    session.detach().context("detach")?;

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
