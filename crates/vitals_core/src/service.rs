//! Fachada de alto nível: permissão + supervisor + hub atrás de uma API
//! simples para o app.

use crate::adapter::WirelessAdapter;
use crate::config::SupervisorConfig;
use crate::hub::{ReadingHub, SubscriptionToken};
use crate::permission::{PermissionGate, PermissionPlatform};
use crate::supervisor::{ConnectionSupervisor, SupervisorEvent, SupervisorHandle};
use crate::types::{LatestValues, PeripheralIdentity, SensorReading, SupervisorState};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Serviço já encerrado")]
    TornDown,

    #[error("Falha ao criar thread do supervisor: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Default)]
struct Worker {
    handle: Option<SupervisorHandle>,
    torn_down: bool,
}

type StateCell = Arc<Mutex<SupervisorState>>;

/// Serviço de telemetria dos sinais vitais.
///
/// Uma instância controla um único supervisor por vez. Depois do
/// `teardown` a instância não volta a operar.
pub struct VitalsService<A, P> {
    adapter: Arc<A>,
    gate: Arc<PermissionGate<P>>,
    hub: Arc<ReadingHub>,
    identity: PeripheralIdentity,
    config: SupervisorConfig,
    events_tx: Sender<SupervisorEvent>,
    events_rx: Receiver<SupervisorEvent>,
    worker: Mutex<Worker>,
    /// Espelho do estado do supervisor atual, lido sem passar por `worker`.
    state: Mutex<Option<StateCell>>,
}

impl<A, P> VitalsService<A, P>
where
    A: WirelessAdapter + 'static,
    P: PermissionPlatform + 'static,
{
    pub fn new(adapter: Arc<A>, platform: P, config: SupervisorConfig) -> Self {
        Self::with_identity(adapter, platform, PeripheralIdentity::ESP32_MAX30102, config)
    }

    pub fn with_identity(
        adapter: Arc<A>,
        platform: P,
        identity: PeripheralIdentity,
        config: SupervisorConfig,
    ) -> Self {
        let (events_tx, events_rx) = bounded(config.event_buffer.max(1));
        Self {
            adapter,
            gate: Arc::new(PermissionGate::new(platform)),
            hub: Arc::new(ReadingHub::new()),
            identity,
            config,
            events_tx,
            events_rx,
            worker: Mutex::new(Worker::default()),
            state: Mutex::new(None),
        }
    }

    fn worker(&self) -> MutexGuard<'_, Worker> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inicia o supervisor. Sem efeito se ele já está rodando; depois de
    /// uma permissão negada, inicia de novo (e pede permissão de novo).
    pub fn start(&self) -> Result<(), ServiceError> {
        let mut worker = self.worker();
        if worker.torn_down {
            return Err(ServiceError::TornDown);
        }
        if worker.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Supervisor já está rodando");
            return Ok(());
        }

        let handle = ConnectionSupervisor::spawn(
            self.adapter.clone(),
            self.gate.clone(),
            self.hub.clone(),
            self.identity,
            self.config.clone(),
            self.events_tx.clone(),
        )?;
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle.state_cell());
        worker.handle = Some(handle);
        info!("Serviço de sinais vitais iniciado");
        Ok(())
    }

    /// Encerra o serviço: para scan, fecha o link e libera o adaptador.
    /// Idempotente.
    /// O join da thread do supervisor acontece fora do lock de `worker`.
    pub fn teardown(&self) {
        let handle = {
            let mut worker = self.worker();
            if worker.torn_down {
                return;
            }
            worker.torn_down = true;
            worker.handle.take()
        };

        match handle {
            Some(mut handle) if !handle.is_finished() => handle.teardown(),
            // Supervisor nunca rodou ou parou na permissão: adaptador ainda preso
            _ => self.adapter.release(),
        }
        self.hub.set_connected(false);
        info!("Serviço de sinais vitais encerrado");
    }

    pub fn is_torn_down(&self) -> bool {
        self.worker().torn_down
    }

    /// Estado atual do supervisor.
    pub fn state(&self) -> SupervisorState {
        let cell = self.state.lock().unwrap_or_else(|e| e.into_inner()).clone();
        cell.map_or(SupervisorState::Idle, |cell| {
            *cell.lock().unwrap_or_else(|e| e.into_inner())
        })
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionToken
    where
        F: Fn(&SensorReading) + Send + Sync + 'static,
    {
        self.hub.subscribe(callback)
    }

    pub fn subscribe_channel(&self, capacity: usize) -> (SubscriptionToken, Receiver<SensorReading>) {
        self.hub.subscribe_channel(capacity)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.hub.unsubscribe(token)
    }

    /// Últimos valores conhecidos, mesmo sem link.
    pub fn latest(&self) -> LatestValues {
        self.hub.latest()
    }

    /// Canal de eventos do supervisor (estados, falhas, permissão negada).
    ///
    /// Todos os clones compartilham a mesma fila: cada evento vai para um
    /// único receptor.
    pub fn events(&self) -> Receiver<SupervisorEvent> {
        self.events_rx.clone()
    }

    pub fn hub(&self) -> &Arc<ReadingHub> {
        &self.hub
    }

    pub fn gate(&self) -> &PermissionGate<P> {
        &self.gate
    }
}
