//! Autorizações de plataforma exigidas antes de usar o rádio.
//!
//! Android 12+ (API 31) exige `BLUETOOTH_SCAN`, `BLUETOOTH_CONNECT` e
//! localização fina; versões anteriores só localização. Nas demais
//! plataformas não há consentimento em runtime e o gate libera direto.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// API do Android a partir da qual as permissões BLE são separadas.
pub const ANDROID_SPLIT_BLE_PERMISSIONS_API: u32 = 31;

/// Uma autorização de runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Authorization {
    BluetoothScan,
    BluetoothConnect,
    FineLocation,
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Authorization::BluetoothScan => "BLUETOOTH_SCAN",
            Authorization::BluetoothConnect => "BLUETOOTH_CONNECT",
            Authorization::FineLocation => "ACCESS_FINE_LOCATION",
        };
        f.write_str(name)
    }
}

/// Plataforma em que o cliente roda.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    Android { api_level: u32 },
    /// Linux, macOS, Windows, iOS: consentimento fica a cargo do SO/stack BLE.
    Other,
}

/// Conjunto de autorizações a pedir em cada plataforma.
pub fn required_authorizations(platform: PlatformKind) -> Vec<Authorization> {
    match platform {
        PlatformKind::Android { api_level } if api_level >= ANDROID_SPLIT_BLE_PERMISSIONS_API => vec![
            Authorization::BluetoothScan,
            Authorization::BluetoothConnect,
            Authorization::FineLocation,
        ],
        PlatformKind::Android { .. } => vec![Authorization::FineLocation],
        PlatformKind::Other => Vec::new(),
    }
}

/// Erro ao exibir o pedido de permissão.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Falha ao solicitar permissões: {0}")]
pub struct PlatformError(pub String);

/// API de permissões da plataforma.
pub trait PermissionPlatform: Send + Sync {
    fn kind(&self) -> PlatformKind;

    /// Solicita o conjunto e devolve, por autorização, se foi concedida.
    fn request_authorizations(
        &self,
        set: &[Authorization],
    ) -> Result<BTreeMap<Authorization, bool>, PlatformError>;
}

/// Resultado de [`PermissionGate::ensure_authorized`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied(String),
}

/// Gate idempotente de permissões.
///
/// Depois de uma concessão não pergunta de novo; depois de uma negação
/// pergunta a cada chamada (o usuário pode ter mudado de ideia).
pub struct PermissionGate<P> {
    platform: P,
    granted: AtomicBool,
}

impl<P: PermissionPlatform> PermissionGate<P> {
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            granted: AtomicBool::new(false),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn ensure_authorized(&self) -> PermissionOutcome {
        if self.granted.load(Ordering::Acquire) {
            debug!("Permissões já concedidas");
            return PermissionOutcome::Granted;
        }

        let required = required_authorizations(self.platform.kind());
        if required.is_empty() {
            self.granted.store(true, Ordering::Release);
            return PermissionOutcome::Granted;
        }

        let answers = match self.platform.request_authorizations(&required) {
            Ok(answers) => answers,
            Err(e) => {
                warn!("{e}");
                return PermissionOutcome::Denied(e.to_string());
            }
        };

        let missing: Vec<String> = required
            .iter()
            .filter(|auth| !answers.get(*auth).copied().unwrap_or(false))
            .map(ToString::to_string)
            .collect();

        if missing.is_empty() {
            info!("Permissões BLE concedidas");
            self.granted.store(true, Ordering::Release);
            PermissionOutcome::Granted
        } else {
            let reason = format!("Permissões Bluetooth necessárias: {}", missing.join(", "));
            warn!("{reason}");
            PermissionOutcome::Denied(reason)
        }
    }
}

/// Plataforma com respostas fixas.
///
/// Serve ao desktop (onde nada é perguntado) e aos testes, que trocam a
/// decisão do "usuário" com [`StaticPlatform::set_decision`].
pub struct StaticPlatform {
    kind: PlatformKind,
    denied: Mutex<Vec<Authorization>>,
    prompts: AtomicUsize,
}

impl StaticPlatform {
    /// Concede tudo o que for pedido.
    pub fn granting(kind: PlatformKind) -> Self {
        Self::denying(kind, &[])
    }

    /// Nega as autorizações listadas.
    pub fn denying(kind: PlatformKind, denied: &[Authorization]) -> Self {
        Self {
            kind,
            denied: Mutex::new(denied.to_vec()),
            prompts: AtomicUsize::new(0),
        }
    }

    /// Muda as autorizações que serão negadas nos próximos pedidos.
    pub fn set_decision(&self, denied: &[Authorization]) {
        *self.denied.lock().unwrap_or_else(|e| e.into_inner()) = denied.to_vec();
    }

    /// Quantas vezes o usuário foi perguntado.
    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::Acquire)
    }
}

impl PermissionPlatform for StaticPlatform {
    fn kind(&self) -> PlatformKind {
        self.kind
    }

    fn request_authorizations(
        &self,
        set: &[Authorization],
    ) -> Result<BTreeMap<Authorization, bool>, PlatformError> {
        self.prompts.fetch_add(1, Ordering::AcqRel);
        let denied = self.denied.lock().unwrap_or_else(|e| e.into_inner());
        Ok(set.iter().map(|a| (*a, !denied.contains(a))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANDROID_14: PlatformKind = PlatformKind::Android { api_level: 34 };

    #[test]
    fn android_12_plus_needs_three_authorizations() {
        assert_eq!(required_authorizations(ANDROID_14).len(), 3);
        assert_eq!(
            required_authorizations(PlatformKind::Android { api_level: 30 }),
            vec![Authorization::FineLocation]
        );
        assert!(required_authorizations(PlatformKind::Other).is_empty());
    }

    #[test]
    fn grant_is_cached() {
        let gate = PermissionGate::new(StaticPlatform::granting(ANDROID_14));
        assert_eq!(gate.ensure_authorized(), PermissionOutcome::Granted);
        assert_eq!(gate.ensure_authorized(), PermissionOutcome::Granted);
        assert_eq!(gate.platform().prompt_count(), 1);
    }

    #[test]
    fn denial_prompts_again() {
        let gate = PermissionGate::new(StaticPlatform::denying(
            ANDROID_14,
            &[Authorization::BluetoothConnect],
        ));
        match gate.ensure_authorized() {
            PermissionOutcome::Denied(reason) => assert!(reason.contains("BLUETOOTH_CONNECT")),
            other => panic!("esperado Denied, veio {other:?}"),
        }

        gate.platform().set_decision(&[]);
        assert_eq!(gate.ensure_authorized(), PermissionOutcome::Granted);
        assert_eq!(gate.platform().prompt_count(), 2);
    }

    #[test]
    fn desktop_never_prompts() {
        let gate = PermissionGate::new(StaticPlatform::granting(PlatformKind::Other));
        assert_eq!(gate.ensure_authorized(), PermissionOutcome::Granted);
        assert_eq!(gate.platform().prompt_count(), 0);
    }

    struct BrokenPlatform;

    impl PermissionPlatform for BrokenPlatform {
        fn kind(&self) -> PlatformKind {
            ANDROID_14
        }

        fn request_authorizations(
            &self,
            _set: &[Authorization],
        ) -> Result<BTreeMap<Authorization, bool>, PlatformError> {
            Err(PlatformError("activity destruída".into()))
        }
    }

    #[test]
    fn platform_error_counts_as_denial() {
        let gate = PermissionGate::new(BrokenPlatform);
        assert!(matches!(
            gate.ensure_authorized(),
            PermissionOutcome::Denied(reason) if reason.contains("activity")
        ));
    }
}
