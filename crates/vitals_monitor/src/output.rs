//! Renderização das leituras e eventos no terminal (texto ou JSON lines).

use serde::Serialize;
use vitals_core::alerts::{Alert, AlertLevel, Bound};
use vitals_core::supervisor::{Fault, SupervisorEvent};
use vitals_core::{LatestValues, SensorReading};

/// Formato de saída do monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    /// Resolve a partir da config; `--json` tem prioridade.
    pub fn resolve(configured: &str, force_json: bool) -> Self {
        if force_json || configured == "json" {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Uma linha da saída JSON.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonLine<'a> {
    Reading {
        #[serde(flatten)]
        reading: &'a SensorReading,
        alerts: &'a [Alert],
    },
    Event {
        event: &'a SupervisorEvent,
    },
    Summary {
        #[serde(flatten)]
        latest: &'a LatestValues,
    },
}

pub fn render_reading(format: OutputFormat, reading: &SensorReading, alerts: &[Alert]) -> String {
    match format {
        OutputFormat::Json => to_json(&JsonLine::Reading { reading, alerts }),
        OutputFormat::Text => {
            let mut line = format!(
                "{}  BPM {:>3} | SpO2 {:>5.1}% | Glicemia {:>5.1} mg/dL",
                reading.observed_at.format("%H:%M:%S"),
                reading.heart_rate,
                reading.oxygen_saturation,
                reading.glucose_level
            );
            for alert in alerts {
                line.push_str("  ");
                line.push_str(&alert_badge(alert));
            }
            line
        }
    }
}

pub fn render_event(format: OutputFormat, event: &SupervisorEvent) -> String {
    match format {
        OutputFormat::Json => to_json(&JsonLine::Event { event }),
        OutputFormat::Text => match event {
            SupervisorEvent::StateChanged { from, to } => format!("── estado: {from} → {to}"),
            SupervisorEvent::PermissionDenied(reason) => format!("✖ permissão negada: {reason}"),
            SupervisorEvent::Fault(fault) => format!("⚠ {}", describe_fault(fault)),
        },
    }
}

pub fn render_summary(format: OutputFormat, latest: &LatestValues) -> String {
    match format {
        OutputFormat::Json => to_json(&JsonLine::Summary { latest }),
        OutputFormat::Text => format!(
            "Últimos valores → BPM: {} | SpO2: {} | Glicemia: {}",
            or_dash(latest.heart_rate),
            or_dash(latest.oxygen_saturation),
            or_dash(latest.glucose_level)
        ),
    }
}

fn describe_fault(fault: &Fault) -> String {
    match fault {
        Fault::ScanError(reason) => format!("erro no scan: {reason}"),
        Fault::ConnectFailure(reason)
        | Fault::DiscoverFailure(reason)
        | Fault::SubscribeFailure(reason) => reason.clone(),
        Fault::LinkDropped => "link com o sensor perdido".into(),
    }
}

fn alert_badge(alert: &Alert) -> String {
    let icon = match alert.level {
        AlertLevel::Critical => "‼",
        AlertLevel::Warning => "!",
        AlertLevel::Normal => "",
    };
    let side = match alert.bound {
        Bound::Low => "baixo",
        Bound::High => "alto",
    };
    format!("[{icon} {} {side}]", alert.label)
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".into(), |v| v.to_string())
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("{{\"type\":\"error\",\"message\":\"{e}\"}}"))
}
