// sensegate: command-line driver for the sensing bridge
//
// Runs the core against a simulated device so permission flows, activity
// sessions and mailbox contents can be exercised and inspected from a shell.

mod config;
mod sim;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use sensegate_core::activity::{ACTIVITY_DATA_KEY, ACTIVITY_NAMESPACE};
use sensegate_core::location::{LOCATION_STATUS_KEY, LOCATION_STATUS_NAMESPACE};
use sensegate_core::permission::{ACTIVITY_RECOGNITION, ACTIVITY_RECOGNITION_REQUEST_CODE};
use sensegate_core::{
    Mailbox, MailboxValue, PermissionResult, PermissionStore, PlatformHandles, SensingCore,
    SessionCallbacks,
};
use sim::{DialogOutcome, SimulatedPlatform};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sensegate")]
#[command(about = "SenseGate: permission-gated activity and location sensing", long_about = None)]
#[command(version)]
struct Cli {
    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show stored permissions and relayed status
    Status,
    /// Inspect and request permissions
    Permission {
        #[command(subcommand)]
        action: PermissionAction,
    },
    /// Read or write mailbox slots directly
    Mailbox {
        #[command(subcommand)]
        action: MailboxAction,
    },
    /// Run an activity session against scripted samples
    Simulate {
        /// Samples as TYPE:CONFIDENCE, e.g. RUNNING:80 or 8:80
        #[arg(short, long)]
        sample: Vec<String>,
        /// Also toggle location providers
        #[arg(short, long)]
        location: bool,
        /// Grant activity recognition before starting
        #[arg(short, long)]
        grant: bool,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum PermissionAction {
    List,
    Check {
        #[arg(default_value = ACTIVITY_RECOGNITION)]
        permission: String,
    },
    Request {
        #[arg(default_value = ACTIVITY_RECOGNITION)]
        permission: String,
        #[arg(short, long, default_value_t = ACTIVITY_RECOGNITION_REQUEST_CODE)]
        code: i32,
        /// grant, deny, deny-forever or dismiss
        #[arg(short, long, default_value = "grant")]
        outcome: DialogOutcome,
    },
}

#[derive(Subcommand)]
enum MailboxAction {
    Get {
        namespace: String,
        key: String,
    },
    Publish {
        namespace: String,
        key: String,
        value: String,
        /// Store the value as text even if it looks like a boolean
        #[arg(short, long)]
        text: bool,
    },
    Clear {
        namespace: String,
        key: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Status => cmd_status(),
        Commands::Permission { action } => cmd_permission(action).await,
        Commands::Mailbox { action } => cmd_mailbox(action),
        Commands::Simulate {
            sample,
            location,
            grant,
        } => cmd_simulate(sample, location, grant),
        Commands::Config { action } => cmd_config(action),
    }
}

/// Core over the configured store, with a simulated device attached
fn open_core() -> Result<(Arc<SensingCore>, Arc<SimulatedPlatform>)> {
    let config = config::Config::load()?;
    let data_dir = config::Config::data_dir()?;
    let settings = config.bridge_settings(&data_dir);

    let core = SensingCore::new(settings).context("Failed to open sensing core")?;
    let platform = Arc::new(SimulatedPlatform::new(config.os_version));
    platform.seed_from(&PermissionStore::persistent(core.backend()))?;
    core.attach(PlatformHandles::from_bridge(platform.clone()))
        .context("Failed to attach simulated device")?;

    Ok((Arc::new(core), platform))
}

fn paint(result: PermissionResult) -> ColoredString {
    match result {
        PermissionResult::Granted => result.as_str().green(),
        PermissionResult::Denied => result.as_str().yellow(),
        PermissionResult::PermanentlyDenied => result.as_str().red(),
    }
}

fn cmd_status() -> Result<()> {
    let (core, _platform) = open_core()?;

    println!("{}", "SenseGate Status".bold());
    println!();
    println!(
        "  Store:     {}",
        core.settings()
            .storage_path
            .as_deref()
            .unwrap_or("(memory)")
            .bright_cyan()
    );
    println!(
        "  Interval:  {}ms",
        core.settings().detection_interval_ms
    );

    let activity = Mailbox::open(core.backend(), ACTIVITY_NAMESPACE);
    match activity.get(ACTIVITY_DATA_KEY)? {
        Some(value) => println!("  Activity:  {}", value.to_string().bright_green()),
        None => println!("  Activity:  {}", "(none relayed)".dimmed()),
    }

    let location = Mailbox::open(core.backend(), LOCATION_STATUS_NAMESPACE);
    match location.get(LOCATION_STATUS_KEY)? {
        Some(value) => println!("  Location:  {}", value.to_string().bright_green()),
        None => println!("  Location:  {}", "(none relayed)".dimmed()),
    }

    println!();
    print_permissions(&PermissionStore::persistent(core.backend()))?;
    Ok(())
}

fn print_permissions(store: &PermissionStore) -> Result<()> {
    let entries = store.list()?;
    if entries.is_empty() {
        println!("{}", "No permission results stored.".dimmed());
        return Ok(());
    }

    println!("{} ({} total)", "Permissions".bold(), entries.len());
    for (permission, result) in entries {
        println!("  {} {:<50} {}", "•".bright_green(), permission, paint(result));
    }
    Ok(())
}

async fn cmd_permission(action: PermissionAction) -> Result<()> {
    let (core, platform) = open_core()?;

    match action {
        PermissionAction::List => {
            print_permissions(&PermissionStore::persistent(core.backend()))?;
        }

        PermissionAction::Check { permission } => {
            let result = core.check_permission(&permission)?;
            println!("{} {}", permission.bright_cyan(), paint(result));
        }

        PermissionAction::Request {
            permission,
            code,
            outcome,
        } => {
            let pending = core.request_permission(&permission, code)?;

            // The dialog "closes" right away with the scripted answer
            platform.answer_dialog(&permission, outcome);
            let handled = core.on_request_permissions_result(
                code,
                &[permission.clone()],
                &outcome.grant_results(),
            );
            if !handled {
                tracing::debug!("No dialog was shown for {}", permission);
            }

            match pending.outcome().await {
                Ok(result) => println!("{} {}", permission.bright_cyan(), paint(result)),
                Err(code) => println!("{} {}", "✗".red(), code.to_string().red()),
            }
        }
    }

    Ok(())
}

fn parse_mailbox_value(value: &str, text: bool) -> MailboxValue {
    if !text {
        if let Ok(b) = value.parse::<bool>() {
            return MailboxValue::Bool(b);
        }
    }
    MailboxValue::Text(value.to_string())
}

fn cmd_mailbox(action: MailboxAction) -> Result<()> {
    let config = config::Config::load()?;
    let data_dir = config::Config::data_dir()?;
    let core = SensingCore::new(config.bridge_settings(&data_dir))
        .context("Failed to open sensing core")?;

    match action {
        MailboxAction::Get { namespace, key } => {
            let mailbox = Mailbox::open(core.backend(), &namespace);
            match mailbox.get(&key)? {
                Some(value) => println!("{} = {}", key.bright_cyan(), value),
                None => println!("{} {}", key.bright_cyan(), "(empty)".dimmed()),
            }
        }

        MailboxAction::Publish {
            namespace,
            key,
            value,
            text,
        } => {
            let mailbox = Mailbox::open(core.backend(), &namespace);
            if mailbox.publish(&key, parse_mailbox_value(&value, text))? {
                println!("{} Published {} = {}", "✓".green(), key.bright_cyan(), value);
            } else {
                println!("{} {} unchanged", "•".dimmed(), key.bright_cyan());
            }
        }

        MailboxAction::Clear { namespace, key } => {
            Mailbox::open(core.backend(), &namespace).clear(&key)?;
            println!("{} Cleared {}", "✓".green(), key.bright_cyan());
        }
    }

    Ok(())
}

fn cmd_simulate(samples: Vec<String>, location: bool, grant: bool) -> Result<()> {
    let script = if samples.is_empty() {
        sim::default_script()
    } else {
        samples
            .iter()
            .map(|s| sim::parse_sample(s).map(|sample| vec![sample]))
            .collect::<Result<Vec<_>>>()?
    };

    let (core, platform) = open_core()?;
    if grant {
        platform.grant(ACTIVITY_RECOGNITION);
    }

    println!("{}", "Simulating activity session".bold());
    println!();

    let callbacks = SessionCallbacks::new(
        |json| println!("  {} {}", "→".bright_green(), json),
        || println!("  {} Activity updates running", "✓".green()),
        |code| println!("  {} {}", "✗".red(), code.to_string().red()),
    );
    if let Err(e) = core.start_activity_updates(callbacks) {
        println!("  {} {}", "✗".red(), e.to_string().red());
        println!(
            "  Try {} or {}",
            "sensegate simulate --grant".bright_green(),
            "sensegate permission request".bright_green()
        );
        return Ok(());
    }

    // Results come from a separate context that only shares the store
    let worker = core.activity_worker();
    let producer = std::thread::spawn(move || -> Result<()> {
        for batch in script {
            if !worker.handle_result(&batch)? {
                println!("  {} unchanged, nothing relayed", "•".dimmed());
            }
            std::thread::sleep(Duration::from_millis(200));
        }
        Ok(())
    });
    producer
        .join()
        .map_err(|_| anyhow::anyhow!("Activity producer panicked"))??;

    core.stop_activity_updates(SessionCallbacks::new(
        |_| {},
        || println!("  {} Activity updates stopped", "✓".green()),
        |code| println!("  {} {}", "✗".red(), code.to_string().red()),
    ))?;

    if location {
        simulate_location(&core, &platform)?;
    }

    Ok(())
}

fn simulate_location(core: &SensingCore, platform: &SimulatedPlatform) -> Result<()> {
    println!();
    println!("{}", "Simulating location providers".bold());
    println!();

    core.start_location_status(|enabled| {
        let state = if enabled {
            "enabled".green()
        } else {
            "disabled".red()
        };
        println!("  {} Location service {}", "→".bright_green(), state);
    })?;

    let worker = core.location_status_worker()?;
    for (gps, network) in [(true, true), (false, true), (false, false), (false, false), (true, false)] {
        println!(
            "  {} gps={} network={}",
            "•".dimmed(),
            gps,
            network
        );
        platform.set_providers(gps, network);
        platform.broadcast_providers_changed();
        worker.wait_idle(Duration::from_secs(2));
        std::thread::sleep(Duration::from_millis(100));
    }

    core.stop_location_status()?;
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<32} {}", key.bright_cyan(), value);
            }

            println!();
            println!(
                "  {:<32} {}",
                "config_file".bright_cyan(),
                config::Config::config_file()?.display()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_value_parsing() {
        assert_eq!(parse_mailbox_value("true", false), MailboxValue::Bool(true));
        assert_eq!(
            parse_mailbox_value("true", true),
            MailboxValue::Text("true".into())
        );
        assert_eq!(
            parse_mailbox_value("STILL", false),
            MailboxValue::Text("STILL".into())
        );
    }

    #[test]
    fn test_cli_parses_permission_request() {
        let cli = Cli::try_parse_from([
            "sensegate",
            "permission",
            "request",
            "--outcome",
            "deny-forever",
        ])
        .unwrap();
        match cli.command {
            Commands::Permission {
                action:
                    PermissionAction::Request {
                        permission,
                        code,
                        outcome,
                    },
            } => {
                assert_eq!(permission, ACTIVITY_RECOGNITION);
                assert_eq!(code, 200);
                assert_eq!(outcome, DialogOutcome::DenyForever);
            }
            _ => panic!("unexpected command"),
        }
    }
}
