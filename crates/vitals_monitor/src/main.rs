//! # Vitals Monitor
//!
//! Conecta ao sensor ESP32_MAX30102, mantém o link e imprime cada leitura
//! (texto ou JSON lines). Enter ou fim do stdin encerra.
//!
//! ## Uso
//! ```bash
//! vitals_monitor --simulate            # Sensor simulado, sem rádio
//! vitals_monitor --json                # BLE real (feature ble-central)
//! vitals_monitor --config ./vitals.toml
//! ```

#[cfg(feature = "ble-central")]
mod ble_adapter;
mod output;
mod simulator;

use clap::Parser;
use crossbeam_channel::{Receiver, bounded, select};
use output::{OutputFormat, render_event, render_reading, render_summary};
use simulator::FrameFeeder;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use vitals_core::alerts::evaluate_alerts;
use vitals_core::permission::{PlatformKind, StaticPlatform};
use vitals_core::simulated::SimulatedAdapter;
use vitals_core::supervisor::SupervisorEvent;
use vitals_core::{AppConfig, PeripheralIdentity, VitalsService, WirelessAdapter};

#[derive(Parser, Debug)]
#[command(name = "vitals_monitor", version, about = "Monitor BLE de sinais vitais (ESP32_MAX30102)")]
struct Cli {
    /// Arquivo de configuração (padrão: vitals.toml ao lado do executável)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Usa um sensor simulado em memória em vez do rádio
    #[arg(long)]
    simulate: bool,

    /// Saída em JSON lines (sobrepõe monitor.output)
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    // ── Logging ──
    // Logs vão para stderr: stdout fica só com as leituras
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // ── Carregar config ──
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!("Config inválida: {problem}");
        }
        return ExitCode::FAILURE;
    }

    let format = OutputFormat::resolve(&config.monitor.output, cli.json);

    if cli.simulate {
        run_simulated(&config, format)
    } else {
        run_radio(&config, format)
    }
}

#[cfg(feature = "ble-central")]
fn run_radio(config: &AppConfig, format: OutputFormat) -> ExitCode {
    match ble_adapter::BtleplugAdapter::new() {
        Ok(adapter) => run(Arc::new(adapter), config, format),
        Err(e) => {
            error!("Bluetooth indisponível: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(not(feature = "ble-central"))]
fn run_radio(_config: &AppConfig, _format: OutputFormat) -> ExitCode {
    error!("Compilado sem a feature ble-central; use --simulate");
    ExitCode::FAILURE
}

fn run_simulated(config: &AppConfig, format: OutputFormat) -> ExitCode {
    let sim = Arc::new(SimulatedAdapter::with_sensor(&PeripheralIdentity::ESP32_MAX30102));
    let feeder = FrameFeeder::spawn(
        sim.clone(),
        Duration::from_millis(config.monitor.simulate_interval_ms.max(1)),
        config.monitor.simulate_drop_every,
    );
    let mut feeder = match feeder {
        Ok(feeder) => feeder,
        Err(e) => {
            error!("Falha ao iniciar simulador: {e}");
            return ExitCode::FAILURE;
        }
    };

    let code = run(sim, config, format);
    feeder.stop();
    code
}

fn run<A: WirelessAdapter + 'static>(adapter: Arc<A>, config: &AppConfig, format: OutputFormat) -> ExitCode {
    let service = VitalsService::new(
        adapter,
        StaticPlatform::granting(PlatformKind::Other),
        config.supervisor.clone(),
    );
    let (token, readings) = service.subscribe_channel(config.monitor.reading_buffer);
    let events = service.events();

    let quit = match spawn_stdin_watcher() {
        Ok(quit) => quit,
        Err(e) => {
            error!("Falha ao observar stdin: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = service.start() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    // ── Banner ──
    let identity = PeripheralIdentity::ESP32_MAX30102;
    if format == OutputFormat::Text {
        println!();
        println!("══════════════════════════════════════════════");
        println!("   ♥ VITALS MONITOR – ATIVO");
        println!("══════════════════════════════════════════════");
        println!("  Sensor:  {}", identity.advertised_name);
        println!("  Serviço: {}", identity.service);
        println!("  Retry:   {:.1}s", config.supervisor.retry_delay_secs);
        println!("  Enter encerra");
        println!("══════════════════════════════════════════════");
        println!();
    }

    // ── Loop principal ──
    let mut code = ExitCode::SUCCESS;
    loop {
        select! {
            recv(readings) -> reading => {
                let Ok(reading) = reading else { break };
                let alerts = if config.monitor.alerts_enabled {
                    evaluate_alerts(&reading, &config.alerts)
                } else {
                    Vec::new()
                };
                println!("{}", render_reading(format, &reading, &alerts));
            }
            recv(events) -> event => {
                let Ok(event) = event else { break };
                println!("{}", render_event(format, &event));
                if matches!(event, SupervisorEvent::PermissionDenied(_)) {
                    code = ExitCode::FAILURE;
                    break;
                }
            }
            recv(quit) -> _ => {
                info!("Encerrando a pedido do usuário");
                break;
            }
        }
    }

    service.unsubscribe(token);
    service.teardown();
    println!("{}", render_summary(format, &service.latest()));
    code
}

/// Thread que espera uma linha (ou EOF) no stdin.
fn spawn_stdin_watcher() -> std::io::Result<Receiver<()>> {
    let (tx, rx) = bounded(1);
    std::thread::Builder::new()
        .name("stdin-watch".into())
        .spawn(move || {
            let mut line = String::new();
            let _ = std::io::stdin().lock().read_line(&mut line);
            let _ = tx.send(());
        })?;
    Ok(rx)
}
