// src/main.rs
//
// =============================================================================
// SLAWIZARD: COMMANDER & ENTRY POINT (v 0.4 )
// =============================================================================
//
// Drives wizards against the simulated printer.
//
// Modes:
// 1. RUN:  Builds a wizard, optionally answers every checkpoint, waits for the end.
// 2. SHOW: Prints a persisted result document and verifies its digest.
// 3. LIST: Prints the known wizard names.
//
// Ctrl+C aborts the running wizard (STOPPED, nothing persisted).

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

use slawizard::checks::mm;
use slawizard::hardware::sim::{SimExposureImage, SimUvMeter, SimulatedHardware};
use slawizard::{
    wizards, HwConfig, HwConfigStore, PrinterModel, ResultStore, RuntimeConfig, Wizard,
    WizardDataPackage, WizardEvent, WizardId, WizardOptions, WizardState,
};

/// Surface the simulated platform stops on during calibration.
const SIM_CALIBRATION_SURFACE_NM: i64 = mm(22);
/// Cleaning adaptor top in the simulated tank.
const SIM_CLEANING_ADAPTOR_NM: i64 = mm(25);

// ============================================================================
// 1. CLI DEFINITION
// ============================================================================

#[derive(Parser)]
#[command(
    name = "slawizard",
    version = "0.4",
    about = "Resin printer wizard engine (simulated hardware)"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Model {
    Sl1,
    Sl1s,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a wizard against the simulated printer.
    Run {
        /// Wizard name (see `list`).
        wizard: String,

        /// Answer every checkpoint and report as an unattended operator would.
        #[arg(long)]
        auto_confirm: bool,

        /// Directory for result documents.
        #[arg(long, default_value = "./wizard-data")]
        data_dir: PathBuf,

        /// Hardware config YAML. In-memory defaults when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "sl1")]
        model: Model,

        /// Simulate a kit printer.
        #[arg(long)]
        kit: bool,

        #[arg(long)]
        erase_projects: bool,

        #[arg(long)]
        display_replaced: bool,

        #[arg(long)]
        led_module_replaced: bool,
    },

    /// Print and verify the stored result document of a wizard.
    Show {
        wizard: String,

        #[arg(long, default_value = "./wizard-data")]
        data_dir: PathBuf,
    },

    /// List wizard names.
    List,
}

// ============================================================================
// 2. ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            wizard,
            auto_confirm,
            data_dir,
            config,
            model,
            kit,
            erase_projects,
            display_replaced,
            led_module_replaced,
        } => {
            let options = WizardOptions {
                erase_projects,
                display_replaced,
                led_module_replaced,
            };
            let setup = SimSetup {
                data_dir,
                config,
                model,
                kit,
            };
            run_wizard(parse_wizard(&wizard)?, setup, options, auto_confirm).await
        }
        Commands::Show { wizard, data_dir } => show_wizard(parse_wizard(&wizard)?, data_dir),
        Commands::List => {
            for id in WizardId::ALL {
                println!("{}", id.name());
            }
            Ok(())
        }
    }
}

fn parse_wizard(name: &str) -> Result<WizardId> {
    WizardId::from_name(name).ok_or_else(|| anyhow!("Unknown wizard '{}'", name))
}

// ============================================================================
// 3. RUN
// ============================================================================

struct SimSetup {
    data_dir: PathBuf,
    config: Option<PathBuf>,
    model: Model,
    kit: bool,
}

impl SimSetup {
    fn package(self, id: WizardId) -> Result<WizardDataPackage> {
        let model = match self.model {
            Model::Sl1 => PrinterModel::sl1(),
            Model::Sl1s => PrinterModel::sl1s(),
        };
        let hw = Arc::new(SimulatedHardware::new(model));
        hw.set_kit(self.kit);
        match id {
            WizardId::Calibration => hw.set_tower_obstacle(Some(SIM_CALIBRATION_SURFACE_NM)),
            WizardId::TankSurfaceCleaner => hw.set_tower_obstacle(Some(SIM_CLEANING_ADAPTOR_NM)),
            _ => {}
        }

        let store = match &self.config {
            Some(path) => HwConfigStore::open(path, None)
                .with_context(|| format!("Failed to open hardware config {:?}", path))?,
            None => HwConfigStore::in_memory(HwConfig::default()),
        };
        let store = Arc::new(store);

        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create {:?}", self.data_dir))?;
        let runtime = RuntimeConfig::testing(&self.data_dir);

        let meter = Arc::new(SimUvMeter::new(Arc::clone(&hw)));
        Ok(WizardDataPackage::new(hw, store.writer(), runtime)
            .with_exposure_image(Arc::new(SimExposureImage::default()))
            .with_uv_meter(meter))
    }
}

async fn run_wizard(
    id: WizardId,
    setup: SimSetup,
    options: WizardOptions,
    auto_confirm: bool,
) -> Result<()> {
    let package = setup.package(id)?;
    let wizard = Arc::new(wizards::build(id, package, options));
    log::info!(
        "Running {} (run {}, cancelable: {})",
        wizard.id(),
        wizard.run_id(),
        wizard.is_cancelable()
    );

    let responder = tokio::spawn(respond(Arc::clone(&wizard), auto_confirm));
    let interrupt = async {
        if signal::ctrl_c().await.is_ok() {
            log::warn!("Ctrl+C received, aborting {}", wizard.id());
            wizard.abort();
        }
        std::future::pending::<Infallible>().await
    };
    let state = tokio::select! {
        state = wizard.run() => state,
        never = interrupt => match never {},
    };
    responder.abort();

    println!("{} -> {}", wizard.id(), state);
    for (check, snapshot) in wizard.check_data() {
        println!("  {:<28} {:?}", check.to_string(), snapshot.state);
    }
    for warning in wizard.warnings() {
        println!("  warning: {}", warning);
    }
    match (state, wizard.exception()) {
        (WizardState::Done, _) => Ok(()),
        (_, Some(e)) => Err(anyhow!("{} ended in {}: {}", wizard.id(), state, e)),
        _ => Err(anyhow!("{} ended in {}", wizard.id(), state)),
    }
}

/// Prints every state change; answers requests when `auto_confirm` is set.
async fn respond(wizard: Arc<Wizard>, auto_confirm: bool) {
    let mut events = wizard.subscribe();
    loop {
        let actions = match events.recv().await {
            Ok(WizardEvent::StateChanged(state)) => {
                println!("[{}] {}", wizard.id(), state);
                continue;
            }
            Ok(WizardEvent::ActionsChanged(actions)) => actions,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                log::debug!("Skipped {} wizard events", skipped);
                wizard.broker().registered_actions()
            }
            Err(RecvError::Closed) => return,
        };
        if !auto_confirm {
            if !actions.is_empty() {
                println!("[{}] waiting for {:?}", wizard.id(), actions);
            }
            continue;
        }
        for action in actions {
            if let Some(payload) = action.auto_response() {
                log::info!("Auto-confirming {:?}", action);
                if let Err(e) = wizard.trigger(action, payload) {
                    log::debug!("Auto-confirm {:?} ignored: {}", action, e);
                }
            }
        }
    }
}

// ============================================================================
// 4. SHOW
// ============================================================================

fn show_wizard(id: WizardId, data_dir: PathBuf) -> Result<()> {
    let store = ResultStore::new(&data_dir);
    let document = store
        .load(id)?
        .ok_or_else(|| anyhow!("No stored data for {} in {:?}", id, data_dir))?;
    println!("{}", document.to_json()?);
    if document.verify() {
        println!("digest: OK");
        Ok(())
    } else {
        Err(anyhow!("Stored data for {} failed verification", id))
    }
}
