use std::path::PathBuf;
use std::process::ExitCode;

use callgate_correlator::StopSignal;
use callgate_scenarios::{Config, ScenarioKind};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "callgate", about = "Scripted call flows against a call-control service")]
struct Cli {
    /// Config file (defaults to $CALLGATE_CONF, then ./callgate.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// ALICE calls BOB, waits and hangs up.
    MakeCall,
    /// ALICE conferences a call from CHARLIE into her call with BOB.
    Conference,
    /// Route point parks an inbound call, dials BOB, and the CTI port
    /// transfers the two together.
    DialViaOffice,
    /// CTI port answers an inbound call and plays media to it.
    PlayMedia,
    /// Pushes XML objects to ALICE's phone display.
    SendData,
    /// Logs device state changes of MONITOR_DEVICE_NAME until Ctrl-C.
    DeviceState,
}

impl From<Command> for ScenarioKind {
    fn from(command: Command) -> Self {
        match command {
            Command::MakeCall => ScenarioKind::MakeCall,
            Command::Conference => ScenarioKind::Conference,
            Command::DialViaOffice => ScenarioKind::DialViaOffice,
            Command::PlayMedia => ScenarioKind::PlayMedia,
            Command::SendData => ScenarioKind::SendData,
            Command::DeviceState => ScenarioKind::DeviceState,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _guard = callgate_log::init();
    let cli = Cli::parse();
    let kind = ScenarioKind::from(cli.command);

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("config: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let stop = StopSignal::new();
    let scenario_stop = stop.clone();
    let task_name = kind.to_string();
    let task = callgate_task::spawn_task(&task_name, move || {
        callgate_scenarios::run(kind, &config, scenario_stop)
    });
    tokio::pin!(task);

    let result = tokio::select! {
        result = &mut task => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, stopping {kind}");
            stop.raise();
            task.await
        }
    };

    match result.and_then(|outcome| outcome) {
        Ok(report) => {
            info!("{} finished in {:?}", report.scenario, report.elapsed);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{kind} failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}
