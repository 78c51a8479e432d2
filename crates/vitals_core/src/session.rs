//! Sessão com o periférico: conectar, descobrir, assinar e fechar.
//!
//! Cada etapa falha de forma independente e o erro sobe para o supervisor.
//! Nada aqui faz retry: a política de nova tentativa mora uma camada acima.

use crate::adapter::{AdapterError, AdapterEvent, WirelessAdapter};
use crate::types::{ConnectionHandle, LinkId, PeripheralIdentity, PeripheralRef};
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Contador global: um `LinkId` nunca se repete dentro do processo.
static NEXT_LINK: AtomicU64 = AtomicU64::new(1);

/// Erros das etapas da sessão.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinkError {
    #[error("Falha ao conectar: {0}")]
    Connect(AdapterError),

    #[error("Falha na descoberta de serviços: {0}")]
    Discover(AdapterError),

    #[error("Serviço {0} não encontrado no periférico")]
    ServiceMissing(Uuid),

    #[error("Characteristic {0} não encontrada no serviço")]
    CharacteristicMissing(Uuid),

    #[error("Falha ao assinar notificações: {0}")]
    Subscribe(AdapterError),

    #[error("Falha ao desconectar: {0}")]
    Disconnect(AdapterError),
}

/// Assinatura ativa no canal de notificações.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub link: LinkId,
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// Dono do link com o periférico.
pub struct LinkSession<A> {
    adapter: Arc<A>,
    identity: PeripheralIdentity,
    live: Option<(LinkId, PeripheralRef)>,
}

impl<A: WirelessAdapter> LinkSession<A> {
    pub fn new(adapter: Arc<A>, identity: PeripheralIdentity) -> Self {
        Self {
            adapter,
            identity,
            live: None,
        }
    }

    /// Link atualmente aberto, se houver.
    pub fn live_link(&self) -> Option<LinkId> {
        self.live.as_ref().map(|(link, _)| *link)
    }

    /// Abre o link de transporte. Cada sucesso gera um handle novo; quedas
    /// do link chegam em `events`.
    pub fn open(
        &mut self,
        peripheral: PeripheralRef,
        events: Sender<AdapterEvent>,
    ) -> Result<ConnectionHandle, LinkError> {
        if let Some((link, peripheral)) = self.live.take() {
            warn!("{link} ainda aberto ao conectar de novo, fechando antes");
            let stale = ConnectionHandle { link, peripheral };
            if let Err(e) = self.adapter.disconnect(&stale) {
                warn!("{}", LinkError::Disconnect(e));
            }
        }

        let handle = ConnectionHandle {
            link: LinkId(NEXT_LINK.fetch_add(1, Ordering::Relaxed)),
            peripheral,
        };
        self.adapter.connect(&handle, events).map_err(LinkError::Connect)?;

        info!("Conectado a {} ({})", handle.peripheral.id, handle.link);
        self.live = Some((handle.link, handle.peripheral.clone()));
        Ok(handle)
    }

    /// Confirma que o serviço e a characteristic esperados existem.
    pub fn discover_capabilities(&self, handle: &ConnectionHandle) -> Result<(), LinkError> {
        let services = self.adapter.discover(handle).map_err(LinkError::Discover)?;
        debug!("{}: {} serviço(s) descoberto(s)", handle.link, services.len());

        let service = services
            .iter()
            .find(|s| s.uuid == self.identity.service)
            .ok_or(LinkError::ServiceMissing(self.identity.service))?;

        if !service.characteristics.contains(&self.identity.characteristic) {
            return Err(LinkError::CharacteristicMissing(self.identity.characteristic));
        }
        Ok(())
    }

    /// Abre o stream de notificações; frames chegam em `frames`.
    pub fn subscribe(
        &self,
        handle: &ConnectionHandle,
        frames: Sender<AdapterEvent>,
    ) -> Result<Subscription, LinkError> {
        self.adapter
            .subscribe_notifications(
                handle,
                self.identity.service,
                self.identity.characteristic,
                frames,
            )
            .map_err(LinkError::Subscribe)?;

        info!("Monitorando notificações em {}", handle.link);
        Ok(Subscription {
            link: handle.link,
            service: self.identity.service,
            characteristic: self.identity.characteristic,
        })
    }

    /// Libera o link. Idempotente: handles já fechados ou que nunca
    /// abriram são ignorados.
    pub fn close(&mut self, handle: &ConnectionHandle) -> Result<(), LinkError> {
        if self.live_link() != Some(handle.link) {
            debug!("{} já estava fechado", handle.link);
            return Ok(());
        }
        self.live = None;
        self.adapter.disconnect(handle).map_err(LinkError::Disconnect)
    }
}
