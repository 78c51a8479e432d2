//! # Vitals Core
//!
//! Cliente BLE de telemetria dos sinais vitais: encontra o sensor
//! ESP32_MAX30102, mantém o link vivo e entrega cada leitura decodificada
//! aos consumidores.
//!
//! ## Módulos
//! - [`types`] – Identidade do sensor, leituras e estados
//! - [`protocol`] – Decoder dos frames `bpm,spo2,glicemia`
//! - [`permission`] – Gate de permissões Bluetooth por plataforma
//! - [`adapter`] – Contrato com o rádio BLE da plataforma
//! - [`simulated`] – Rádio e sensor simulados em memória
//! - [`session`] – Conectar, descobrir, assinar e fechar
//! - [`supervisor`] – Máquina de estados com retry fixo
//! - [`hub`] – Pub/sub das leituras e últimos valores
//! - [`service`] – Fachada usada pelo app
//! - [`config`] – Configuração unificada via TOML
//! - [`alerts`] – Thresholds e níveis de alerta

pub mod types;
pub mod protocol;
pub mod permission;
pub mod adapter;
pub mod simulated;
pub mod session;
pub mod supervisor;
pub mod hub;
pub mod service;
pub mod config;
pub mod alerts;

// Re-exports convenientes
pub use types::{LatestValues, PeripheralIdentity, SensorReading, SupervisorState};
pub use protocol::{decode_frame, DecodeError};
pub use adapter::{AdapterEvent, WirelessAdapter};
pub use supervisor::{Fault, SupervisorEvent};
pub use service::{ServiceError, VitalsService};
pub use config::{AppConfig, MonitorConfig, SupervisorConfig};
