//! Configuração unificada via TOML.
//!
//! A identidade do sensor é constante de compilação
//! ([`crate::types::PeripheralIdentity`]) e não aparece aqui.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Intervalo de nova tentativa do firmware de referência (segundos).
pub const DEFAULT_RETRY_DELAY_SECS: f64 = 3.0;

/// Configuração do supervisor de conexão.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Espera fixa entre uma falha e o próximo scan (segundos).
    /// Não cresce e não tem limite de tentativas.
    pub retry_delay_secs: f64,
    /// Intervalo de consulta do estado do rádio antes do scan (ms)
    pub power_poll_ms: u64,
    /// Buffer do channel de eventos do supervisor
    pub event_buffer: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            power_poll_ms: 200,
            event_buffer: 64,
        }
    }
}

impl SupervisorConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs.max(0.0))
    }

    pub fn power_poll(&self) -> Duration {
        Duration::from_millis(self.power_poll_ms.max(1))
    }
}

/// Thresholds de alerta dos sinais vitais.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub heart_rate_low_warning: f64,
    pub heart_rate_low_critical: f64,
    pub heart_rate_high_warning: f64,
    pub heart_rate_high_critical: f64,
    pub spo2_warning: f64,
    pub spo2_critical: f64,
    pub glucose_low_warning: f64,
    pub glucose_low_critical: f64,
    pub glucose_high_warning: f64,
    pub glucose_high_critical: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            heart_rate_low_warning: 50.0,
            heart_rate_low_critical: 40.0,
            heart_rate_high_warning: 110.0,
            heart_rate_high_critical: 130.0,
            spo2_warning: 94.0,
            spo2_critical: 90.0,
            glucose_low_warning: 70.0,
            glucose_low_critical: 54.0,
            glucose_high_warning: 180.0,
            glucose_high_critical: 250.0,
        }
    }
}

/// Configuração do monitor (binário consumidor).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Saída: "text" ou "json"
    pub output: String,
    /// Avaliar thresholds a cada leitura
    pub alerts_enabled: bool,
    /// Buffer do channel de leituras do monitor
    pub reading_buffer: usize,
    /// Modo simulado: intervalo entre frames (ms)
    pub simulate_interval_ms: u64,
    /// Modo simulado: derruba o link a cada N frames (0 = nunca)
    pub simulate_drop_every: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            output: "text".into(),
            alerts_enabled: true,
            reading_buffer: 64,
            simulate_interval_ms: 1000,
            simulate_drop_every: 30,
        }
    }
}

/// Erros ao salvar a configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro ao serializar config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Erro de I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuração raiz.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub supervisor: SupervisorConfig,
    pub monitor: MonitorConfig,
    pub alerts: AlertThresholds,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    ///
    /// Arquivo ausente ou inválido cai para o padrão.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Caminho padrão do `vitals.toml`, ao lado do executável.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("vitals.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let retry = self.supervisor.retry_delay_secs;
        if !(retry > 0.0 && retry <= 60.0) {
            errors.push(format!("Intervalo de retry inválido: {retry} (0–60s, exclusivo em 0)"));
        }
        if self.supervisor.power_poll_ms == 0 {
            errors.push("power_poll_ms não pode ser 0".into());
        }
        if self.supervisor.event_buffer == 0 {
            errors.push("event_buffer não pode ser 0".into());
        }
        if self.monitor.reading_buffer == 0 {
            errors.push("reading_buffer não pode ser 0".into());
        }
        if self.monitor.output != "text" && self.monitor.output != "json" {
            errors.push(format!(
                "Saída desconhecida: {:?} (use \"text\" ou \"json\")",
                self.monitor.output
            ));
        }

        let a = &self.alerts;
        if a.heart_rate_low_critical > a.heart_rate_low_warning
            || a.heart_rate_high_warning > a.heart_rate_high_critical
        {
            errors.push("Thresholds de BPM fora de ordem".into());
        }
        if a.spo2_critical > a.spo2_warning {
            errors.push("Thresholds de SpO2 fora de ordem".into());
        }
        if a.glucose_low_critical > a.glucose_low_warning
            || a.glucose_high_warning > a.glucose_high_critical
        {
            errors.push("Thresholds de glicemia fora de ordem".into());
        }

        errors
    }
}
