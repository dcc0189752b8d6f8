use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use tabflow::backend::client::DEFAULT_SERVER_URL;
use tabflow::bridge::{adb, emulator};
use tabflow::model::CaseStatus;
use tabflow::{DeviceSpec, Engine, RunOptions, TestCase};

#[derive(Parser)]
#[command(name = "tabflow")]
#[command(version = "0.1.0")]
#[command(about = "Tabular test execution engine for mobile app automation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run already-parsed test cases (JSON) against a device
    Run {
        /// Path to a JSON file of parsed test cases
        cases: PathBuf,

        /// Device serial to run against
        #[arg(short, long)]
        device: Option<String>,

        /// Virtual device profile to launch when nothing is connected
        #[arg(long)]
        avd: Option<String>,

        /// Automation server address
        #[arg(long, default_value = DEFAULT_SERVER_URL)]
        server: String,

        /// App id under test
        #[arg(short, long)]
        app: Option<String>,

        /// App binary to install when the app is missing
        #[arg(long)]
        app_binary: Option<PathBuf>,

        /// Output directory for screenshots and result snapshots
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// Keep attempting steps after a failure
        #[arg(long, default_value = "false")]
        skip_on_fail: bool,

        /// Disable screenshot capture
        #[arg(long, default_value = "false")]
        no_screenshots: bool,

        /// Do not launch a virtual device when none is connected
        #[arg(long, default_value = "false")]
        no_auto_launch: bool,

        /// Reuse one automation session across all cases
        #[arg(long, default_value = "false")]
        keep_session: bool,

        /// Uninstall the app from the device at teardown
        #[arg(long, default_value = "false")]
        uninstall: bool,
    },

    /// List connected devices and virtual device profiles
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            cases,
            device,
            avd,
            server,
            app,
            app_binary,
            output,
            skip_on_fail,
            no_screenshots,
            no_auto_launch,
            keep_session,
            uninstall,
        } => {
            let raw = std::fs::read_to_string(&cases)
                .with_context(|| format!("could not read {}", cases.display()))?;
            let mut test_cases: Vec<TestCase> =
                serde_json::from_str(&raw).context("test case file is not valid JSON")?;
            if test_cases.is_empty() {
                anyhow::bail!("no test cases in {}", cases.display());
            }

            println!(
                "{} Running {} case(s) from {}",
                "▶".green().bold(),
                test_cases.len(),
                cases.display()
            );
            if let Some(ref serial) = device {
                println!("  Device: {}", serial.cyan());
            }
            println!("  Server: {}", server.cyan());
            println!("  Output: {}", output.display().to_string().cyan());
            if skip_on_fail {
                println!("  Skip on fail: {}", "Enabled".yellow());
            }

            let options = RunOptions {
                auto_launch_device: !no_auto_launch,
                skip_on_fail,
                screenshots_enabled: !no_screenshots,
                app_id: app,
                app_binary_path: app_binary,
                keep_session_alive: keep_session,
                uninstall_on_teardown: uninstall,
                output_dir: output.clone(),
            };
            let spec = DeviceSpec {
                selector: device,
                preferred_avd: avd,
                server_url: server,
            };

            let engine = Engine::new(options);
            engine.cancel_token().install_ctrlc_handler();
            let results = engine.run_suite(&mut test_cases, &spec).await;

            // Persist the snapshots for external report generators
            let snapshot_path = output.join("results.json");
            if let Err(e) = std::fs::create_dir_all(&output).and_then(|_| {
                std::fs::write(
                    &snapshot_path,
                    serde_json::to_string_pretty(&results).unwrap_or_default(),
                )
            }) {
                log::warn!("could not write {}: {}", snapshot_path.display(), e);
            } else {
                println!("  Results: {}", snapshot_path.display().to_string().cyan());
            }

            let failed = results
                .iter()
                .filter(|r| r.status == CaseStatus::Failed)
                .count();
            if failed > 0 {
                std::process::exit(1);
            }
        }

        Commands::Devices => {
            let devices = adb::devices().await?;
            if devices.is_empty() {
                println!("{} No connected devices", "ℹ".blue());
            } else {
                println!("Connected devices:");
                for d in devices {
                    println!("  {} [{}]", d.serial.cyan(), d.state.as_str());
                }
            }

            match emulator::list_avds().await {
                Ok(avds) if !avds.is_empty() => {
                    println!("Virtual device profiles:");
                    for avd in avds {
                        println!("  {}", avd);
                    }
                }
                Ok(_) => println!("{} No virtual device profiles", "ℹ".blue()),
                Err(e) => log::debug!("could not list virtual devices: {:#}", e),
            }
        }
    }

    Ok(())
}
