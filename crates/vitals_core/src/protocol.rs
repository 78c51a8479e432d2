//! Decodificação dos frames notificados pelo sensor.
//!
//! O firmware do ESP32 notifica texto ASCII, sem terminador, checksum ou
//! número de sequência:
//!
//! ```text
//! <bpm_inteiro>,<spo2_decimal>,<glicemia_decimal>
//! 72,97.5,110.0
//! ```
//!
//! Um frame só vira [`SensorReading`] se os três campos forem válidos.
//! Não há validação de faixa fisiológica aqui: isso é papel do consumidor
//! (ver [`crate::alerts`]).
//!
//! Adaptadores recebem o valor cru da characteristic. Os que falam com
//! btleplug ou com o simulador entregam bytes e chamam [`decode_frame`];
//! adaptadores externos cuja stack repassa o valor em base64 entram por
//! [`decode_base64_frame`].

use crate::types::SensorReading;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};

/// Número de campos em um frame.
pub const FIELD_COUNT: usize = 3;

/// Separador entre campos.
pub const FIELD_SEPARATOR: char = ',';

/// Erros de decodificação de um frame.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Payload não é UTF-8 válido")]
    InvalidUtf8,

    #[error("Frame vazio")]
    Empty,

    #[error("Esperados {FIELD_COUNT} campos, recebidos {0}")]
    FieldCount(usize),

    #[error("Campo {field} inválido: {token:?}")]
    InvalidField { field: &'static str, token: String },

    #[error("Base64 inválido: {0}")]
    Base64(String),
}

/// Decodifica um payload recebido, carimbando a leitura com o instante atual.
pub fn decode_frame(payload: &[u8]) -> Result<SensorReading, DecodeError> {
    decode_frame_at(payload, Utc::now())
}

/// Decodifica um payload com timestamp explícito. Função pura.
pub fn decode_frame_at(
    payload: &[u8],
    observed_at: DateTime<Utc>,
) -> Result<SensorReading, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::InvalidUtf8)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    let tokens: Vec<&str> = text.split(FIELD_SEPARATOR).map(str::trim).collect();
    if tokens.len() != FIELD_COUNT {
        return Err(DecodeError::FieldCount(tokens.len()));
    }

    let heart_rate = tokens[0]
        .parse::<i32>()
        .map_err(|_| invalid("heart_rate", tokens[0]))?;
    let oxygen_saturation = parse_decimal("oxygen_saturation", tokens[1])?;
    let glucose_level = parse_decimal("glucose_level", tokens[2])?;

    Ok(SensorReading {
        heart_rate,
        oxygen_saturation,
        glucose_level,
        observed_at,
    })
}

/// Decodifica um valor de characteristic entregue em base64.
///
/// Algumas stacks BLE (ex.: bridges JS) repassam o valor já codificado;
/// aqui ele é desembrulhado e segue para [`decode_frame`].
pub fn decode_base64_frame(value: &str) -> Result<SensorReading, DecodeError> {
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|e| DecodeError::Base64(e.to_string()))?;
    decode_frame(&bytes)
}

/// Renderiza uma leitura no formato de fio.
pub fn format_frame(reading: &SensorReading) -> String {
    format!(
        "{}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}",
        reading.heart_rate, reading.oxygen_saturation, reading.glucose_level
    )
}

fn parse_decimal(field: &'static str, token: &str) -> Result<f64, DecodeError> {
    match token.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(invalid(field, token)),
    }
}

fn invalid(field: &'static str, token: &str) -> DecodeError {
    DecodeError::InvalidField {
        field,
        token: token.to_owned(),
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
