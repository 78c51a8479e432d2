//! Sistema de alertas – faixas dos sinais vitais.
//!
//! O decoder repassa qualquer valor numérico; a interpretação de faixa
//! acontece aqui, do lado do consumidor.

use crate::config::AlertThresholds;
use crate::types::SensorReading;
use serde::{Deserialize, Serialize};

/// Nível de alerta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertLevel {
    Normal,
    Warning,
    Critical,
}

/// Lado da faixa que foi violado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Bound {
    Low,
    High,
}

/// Um alerta disparado.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub metric: &'static str,
    pub label: &'static str,
    pub value: f64,
    pub unit: &'static str,
    pub bound: Bound,
    pub level: AlertLevel,
}

/// Avalia uma leitura contra os thresholds e retorna alertas.
pub fn evaluate_alerts(reading: &SensorReading, t: &AlertThresholds) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let bpm = f64::from(reading.heart_rate);

    // BPM: bradicardia e taquicardia
    check_low(
        &mut alerts,
        ("heart_rate", "BPM", "bpm"),
        bpm,
        t.heart_rate_low_warning,
        t.heart_rate_low_critical,
    );
    check_high(
        &mut alerts,
        ("heart_rate", "BPM", "bpm"),
        bpm,
        t.heart_rate_high_warning,
        t.heart_rate_high_critical,
    );

    // SpO2: só o limite inferior importa
    check_low(
        &mut alerts,
        ("oxygen_saturation", "SpO2", "%"),
        reading.oxygen_saturation,
        t.spo2_warning,
        t.spo2_critical,
    );

    // Glicemia: hipo e hiper
    check_low(
        &mut alerts,
        ("glucose_level", "Glicemia", "mg/dL"),
        reading.glucose_level,
        t.glucose_low_warning,
        t.glucose_low_critical,
    );
    check_high(
        &mut alerts,
        ("glucose_level", "Glicemia", "mg/dL"),
        reading.glucose_level,
        t.glucose_high_warning,
        t.glucose_high_critical,
    );

    alerts
}

type Metric = (&'static str, &'static str, &'static str);

fn check_high(alerts: &mut Vec<Alert>, metric: Metric, value: f64, warn: f64, crit: f64) {
    if value <= 0.0 {
        return; // Sensor sem contato com o dedo reporta 0
    }
    let level = level_for_high(value, warn, crit);
    push(alerts, metric, value, Bound::High, level);
}

fn check_low(alerts: &mut Vec<Alert>, metric: Metric, value: f64, warn: f64, crit: f64) {
    if value <= 0.0 {
        return;
    }
    let level = level_for_low(value, warn, crit);
    push(alerts, metric, value, Bound::Low, level);
}

fn push(alerts: &mut Vec<Alert>, metric: Metric, value: f64, bound: Bound, level: AlertLevel) {
    if level == AlertLevel::Normal {
        return;
    }
    let (metric, label, unit) = metric;
    alerts.push(Alert {
        metric,
        label,
        value,
        unit,
        bound,
        level,
    });
}

/// Nível para métricas em que valor alto é ruim.
pub fn level_for_high(value: f64, warn: f64, crit: f64) -> AlertLevel {
    if value >= crit {
        AlertLevel::Critical
    } else if value >= warn {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}

/// Nível para métricas em que valor baixo é ruim.
pub fn level_for_low(value: f64, warn: f64, crit: f64) -> AlertLevel {
    if value <= crit {
        AlertLevel::Critical
    } else if value <= warn {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}
