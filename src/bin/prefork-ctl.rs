use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;

use prefork_server::lifecycle::{pidfile::read_pid, ServerControl};

#[derive(Parser)]
#[command(name = "prefork-ctl")]
#[command(about = "Control a running prefork-server through signals", long_about = None)]
struct Cli {
    /// Pid file written by the server
    #[arg(long, default_value = "prefork-server.pid")]
    pidfile: PathBuf,

    /// Target this pid instead of reading the pid file
    #[arg(long)]
    pid: Option<i32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Graceful stop (SIGTERM)
    Stop,
    /// Stop without waiting for workers (SIGTERM twice)
    ForceStop,
    /// Graceful restart (SIGHUP)
    Reload,
    /// Add one HTTP worker (SIGTTIN)
    ScaleUp,
    /// Remove one HTTP worker (SIGTTOU)
    ScaleDown,
    /// Log a dump of workers or threads (SIGQUIT)
    Dump,
    /// Log registry statistics (SIGUSR1)
    Stats,
    /// Print whether the server is running
    Status,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let pid = match cli.pid {
        Some(pid) => pid,
        None => read_pid(&cli.pidfile)?,
    };
    let control = ServerControl::for_pid(pid);

    match cli.command {
        Commands::Stop => control.stop()?,
        Commands::ForceStop => {
            control.stop()?;
            std::thread::sleep(Duration::from_millis(100));
            control.stop()?;
        }
        Commands::Reload => control.restart()?,
        Commands::ScaleUp => control.scale_up()?,
        Commands::ScaleDown => control.scale_down()?,
        Commands::Dump => control.dump()?,
        Commands::Stats => control.stats()?,
        Commands::Status => {
            let status = json!({ "pid": pid, "running": control.is_running() });
            println!("{}", serde_json::to_string_pretty(&status)?);
            if !control.is_running() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
