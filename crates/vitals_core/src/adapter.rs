//! Contrato com o adaptador BLE da plataforma.
//!
//! O core não implementa rádio: consome um [`WirelessAdapter`]. As chamadas
//! são bloqueantes (o supervisor roda em thread própria) e tudo o que chega
//! de forma assíncrona (advertisements, notificações, quedas de link) é
//! empurrado como [`AdapterEvent`] no channel entregue pelo supervisor.

use crate::types::{ConnectionHandle, LinkId, PeripheralRef};
use crossbeam_channel::Sender;
use uuid::Uuid;

/// Estado de energia do rádio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unknown,
    PoweredOff,
    PoweredOn,
}

/// Serviço GATT exposto pelo periférico, com suas characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Eventos assíncronos produzidos pelo adaptador.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    /// Um periférico apareceu durante o scan.
    Discovered(PeripheralRef),
    /// O scan falhou depois de iniciado.
    ScanFailed(String),
    /// Frame notificado na characteristic assinada.
    Notification { link: LinkId, value: Vec<u8> },
    /// O link caiu.
    Disconnected { link: LinkId },
}

/// Erros reportados pelo adaptador.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdapterError {
    #[error("Nenhum adaptador Bluetooth disponível")]
    NotAvailable,

    #[error("Bluetooth desligado")]
    PoweredOff,

    #[error("Periférico desconhecido: {0}")]
    UnknownPeripheral(String),

    #[error("{0}")]
    Backend(String),
}

/// Capacidade de rádio BLE consumida pelo supervisor.
pub trait WirelessAdapter: Send + Sync {
    /// Estado atual do rádio.
    fn state(&self) -> AdapterState;

    /// Inicia um scan sem timeout. Cada advertisement vira
    /// [`AdapterEvent::Discovered`] em `events`.
    fn start_scan(&self, events: Sender<AdapterEvent>) -> Result<(), AdapterError>;

    /// Para o scan. Deve ser seguro chamar sem scan ativo.
    fn stop_scan(&self) -> Result<(), AdapterError>;

    /// Estabelece o link de transporte com `handle.peripheral`. O handle já
    /// carrega o [`LinkId`] novo que marcará os eventos deste link.
    ///
    /// A partir do connect, a queda do link chega em `events` como
    /// [`AdapterEvent::Disconnected`], inclusive durante a descoberta.
    fn connect(&self, handle: &ConnectionHandle, events: Sender<AdapterEvent>) -> Result<(), AdapterError>;

    /// Enumera serviços e characteristics expostos pelo periférico conectado.
    fn discover(&self, handle: &ConnectionHandle) -> Result<Vec<ServiceDescriptor>, AdapterError>;

    /// Assina notificações. Frames chegam como [`AdapterEvent::Notification`]
    /// marcados com `handle.link`.
    fn subscribe_notifications(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        events: Sender<AdapterEvent>,
    ) -> Result<(), AdapterError>;

    /// Encerra o link.
    fn disconnect(&self, handle: &ConnectionHandle) -> Result<(), AdapterError>;

    /// Libera o recurso do adaptador (teardown).
    fn release(&self);
}
