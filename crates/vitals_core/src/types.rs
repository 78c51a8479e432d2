//! Tipos compartilhados entre decoder, sessão BLE, supervisor e hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ──────────────────────────────────────────────
// Identidade do periférico
// ──────────────────────────────────────────────

/// Identidade fixa do periférico alvo.
///
/// Constante de compilação: usada para filtrar o scan (nome anunciado) e
/// para endereçar o canal de notificações (service + characteristic).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeripheralIdentity {
    /// Nome anunciado, comparado de forma exata (case-sensitive)
    pub advertised_name: &'static str,
    /// UUID do serviço GATT
    pub service: Uuid,
    /// UUID da characteristic que notifica os frames
    pub characteristic: Uuid,
}

impl PeripheralIdentity {
    /// Sensor ESP32 + MAX30102 (batimentos, SpO2 e glicemia).
    pub const ESP32_MAX30102: PeripheralIdentity = PeripheralIdentity {
        advertised_name: "ESP32_MAX30102",
        service: Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b),
        characteristic: Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8),
    };

    /// `true` se o nome anunciado bate exatamente com o esperado.
    pub fn matches(&self, name: Option<&str>) -> bool {
        name == Some(self.advertised_name)
    }
}

impl Default for PeripheralIdentity {
    fn default() -> Self {
        Self::ESP32_MAX30102
    }
}

/// Referência a um periférico encontrado no scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralRef {
    /// Identificador opaco do adaptador (endereço MAC, UUID do CoreBluetooth…)
    pub id: String,
    /// Nome anunciado, se o advertisement trouxe um
    pub name: Option<String>,
}

impl PeripheralRef {
    pub fn new(id: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_owned),
        }
    }
}

// ──────────────────────────────────────────────
// Conexão
// ──────────────────────────────────────────────

/// Identificador monotônico de um link. Nunca é reaproveitado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Um link vivo com uma instância específica do periférico.
///
/// Não implementa `Clone`: pertence exclusivamente ao supervisor e é
/// invalidado no disconnect. Um novo scan sempre gera um handle novo.
#[derive(Debug, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub link: LinkId,
    pub peripheral: PeripheralRef,
}

// ──────────────────────────────────────────────
// Leituras
// ──────────────────────────────────────────────

/// Uma leitura completa do sensor.
///
/// Só é produzida a partir de um frame íntegro: os três valores vêm juntos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Batimentos por minuto
    pub heart_rate: i32,
    /// Saturação de oxigênio (%)
    pub oxygen_saturation: f64,
    /// Glicemia (mg/dL)
    pub glucose_level: f64,
    /// Momento em que o frame foi decodificado
    pub observed_at: DateTime<Utc>,
}

/// Últimos valores conhecidos, para consumidores que só exibem o estado atual.
///
/// Cada valor fica `None` até a primeira leitura. Não são zerados no
/// disconnect e não há marcação de "valor antigo".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatestValues {
    pub heart_rate: Option<i32>,
    pub oxygen_saturation: Option<f64>,
    pub glucose_level: Option<f64>,
    pub observed_at: Option<DateTime<Utc>>,
    pub is_connected: bool,
}

// ──────────────────────────────────────────────
// Estado do supervisor
// ──────────────────────────────────────────────

/// Estados da máquina de conexão.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupervisorState {
    Idle,
    AwaitingPermission,
    Scanning,
    Connecting,
    Discovering,
    Monitoring,
    Recovering,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Idle => "idle",
            SupervisorState::AwaitingPermission => "awaiting-permission",
            SupervisorState::Scanning => "scanning",
            SupervisorState::Connecting => "connecting",
            SupervisorState::Discovering => "discovering",
            SupervisorState::Monitoring => "monitoring",
            SupervisorState::Recovering => "recovering",
        };
        f.write_str(name)
    }
}
