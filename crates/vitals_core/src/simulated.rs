//! Adaptador BLE simulado, em memória.
//!
//! Faz o papel do rádio e do ESP32 ao mesmo tempo: periféricos "em alcance"
//! aparecem no scan, conexões e assinaturas podem ser forçadas a falhar, e
//! frames ou quedas de link são injetados por quem controla o simulador.
//! Usado nos testes do supervisor e no modo `--simulate` do monitor.

use crate::adapter::{AdapterError, AdapterEvent, AdapterState, ServiceDescriptor, WirelessAdapter};
use crate::types::{ConnectionHandle, LinkId, PeripheralIdentity, PeripheralRef};
use crossbeam_channel::Sender;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Chamada registrada no simulador, na ordem em que ocorreu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    StartScan,
    StopScan,
    Connect(LinkId),
    Discover(LinkId),
    Subscribe(LinkId),
    Disconnect(LinkId),
    Release,
}

#[derive(Default)]
struct SimState {
    power: Option<AdapterState>,
    in_range: Vec<PeripheralRef>,
    services: Vec<ServiceDescriptor>,
    scan_tx: Option<Sender<AdapterEvent>>,
    connected: Option<LinkId>,
    link_tx: Option<Sender<AdapterEvent>>,
    drop_on_discover: bool,
    subscription: Option<(LinkId, Sender<AdapterEvent>)>,
    failing_scans: u32,
    failing_connects: u32,
    failing_subscribes: u32,
    released: bool,
    calls: Vec<AdapterCall>,
}

/// Rádio + periférico simulados.
pub struct SimulatedAdapter {
    state: Mutex<SimState>,
}

impl SimulatedAdapter {
    /// Rádio ligado, sem nenhum periférico em alcance.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                power: Some(AdapterState::PoweredOn),
                ..Default::default()
            }),
        }
    }

    /// Rádio ligado com o sensor `identity` anunciando e expondo seu serviço.
    pub fn with_sensor(identity: &PeripheralIdentity) -> Self {
        let adapter = Self::new();
        {
            let mut st = adapter.lock();
            st.in_range
                .push(PeripheralRef::new("sim-esp32", Some(identity.advertised_name)));
            st.services = vec![ServiceDescriptor {
                uuid: identity.service,
                characteristics: vec![identity.characteristic],
            }];
        }
        adapter
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Altera o estado de energia do rádio.
    pub fn set_power(&self, state: AdapterState) {
        self.lock().power = Some(state);
    }

    /// Substitui os serviços GATT expostos pelo periférico.
    pub fn set_services(&self, services: Vec<ServiceDescriptor>) {
        self.lock().services = services;
    }

    /// As próximas `n` tentativas de iniciar o scan falham.
    pub fn fail_next_scans(&self, n: u32) {
        self.lock().failing_scans = n;
    }

    /// As próximas `n` conexões falham.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().failing_connects = n;
    }

    /// As próximas `n` assinaturas de notificação falham.
    pub fn fail_next_subscribes(&self, n: u32) {
        self.lock().failing_subscribes = n;
    }

    /// O link cai durante a próxima descoberta. A descoberta ainda responde
    /// com o cache GATT, como fazem as pilhas reais.
    pub fn drop_during_next_discover(&self) {
        self.lock().drop_on_discover = true;
    }

    /// Coloca um periférico em alcance. Se houver scan ativo, ele é anunciado
    /// imediatamente.
    pub fn advertise(&self, peripheral: PeripheralRef) {
        let mut st = self.lock();
        if let Some(tx) = &st.scan_tx {
            let _ = tx.send(AdapterEvent::Discovered(peripheral.clone()));
        }
        st.in_range.push(peripheral);
    }

    /// Reporta uma falha assíncrona no scan em andamento.
    pub fn fail_scan(&self, reason: &str) -> bool {
        match &self.lock().scan_tx {
            Some(tx) => tx.send(AdapterEvent::ScanFailed(reason.into())).is_ok(),
            None => false,
        }
    }

    /// Notifica um frame no link assinado. Retorna `false` se não há
    /// assinatura ativa ou ninguém mais escuta.
    pub fn notify(&self, value: &[u8]) -> bool {
        match &self.lock().subscription {
            Some((link, tx)) => tx
                .send(AdapterEvent::Notification {
                    link: *link,
                    value: value.to_vec(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Derruba o link atual, como se o sensor saísse de alcance.
    pub fn drop_link(&self) -> bool {
        let mut st = self.lock();
        let Some(link) = st.connected.take() else {
            return false;
        };
        st.subscription = None;
        match st.link_tx.take() {
            Some(tx) => tx.send(AdapterEvent::Disconnected { link }).is_ok(),
            None => true,
        }
    }

    /// Chamadas recebidas até agora.
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.lock().calls.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scan_tx.is_some()
    }

    /// `true` quando há assinatura de notificações ativa.
    pub fn is_streaming(&self) -> bool {
        self.lock().subscription.is_some()
    }

    pub fn connected_link(&self) -> Option<LinkId> {
        self.lock().connected
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }

    fn has_channel(services: &[ServiceDescriptor], service: Uuid, characteristic: Uuid) -> bool {
        services
            .iter()
            .any(|s| s.uuid == service && s.characteristics.contains(&characteristic))
    }
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn take_failure(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

impl WirelessAdapter for SimulatedAdapter {
    fn state(&self) -> AdapterState {
        self.lock().power.unwrap_or(AdapterState::Unknown)
    }

    fn start_scan(&self, events: Sender<AdapterEvent>) -> Result<(), AdapterError> {
        let mut st = self.lock();
        st.calls.push(AdapterCall::StartScan);
        if st.power != Some(AdapterState::PoweredOn) {
            return Err(AdapterError::PoweredOff);
        }
        if take_failure(&mut st.failing_scans) {
            return Err(AdapterError::Backend("scan simulado falhou".into()));
        }
        for peripheral in &st.in_range {
            let _ = events.send(AdapterEvent::Discovered(peripheral.clone()));
        }
        st.scan_tx = Some(events);
        debug!("Simulador: scan iniciado ({} em alcance)", st.in_range.len());
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), AdapterError> {
        let mut st = self.lock();
        st.calls.push(AdapterCall::StopScan);
        st.scan_tx = None;
        Ok(())
    }

    fn connect(&self, handle: &ConnectionHandle, events: Sender<AdapterEvent>) -> Result<(), AdapterError> {
        let mut st = self.lock();
        st.calls.push(AdapterCall::Connect(handle.link));
        if take_failure(&mut st.failing_connects) {
            return Err(AdapterError::Backend("conexão simulada recusada".into()));
        }
        if !st.in_range.iter().any(|p| p.id == handle.peripheral.id) {
            return Err(AdapterError::UnknownPeripheral(handle.peripheral.id.clone()));
        }
        st.connected = Some(handle.link);
        st.link_tx = Some(events);
        Ok(())
    }

    fn discover(&self, handle: &ConnectionHandle) -> Result<Vec<ServiceDescriptor>, AdapterError> {
        let mut st = self.lock();
        st.calls.push(AdapterCall::Discover(handle.link));
        if st.connected != Some(handle.link) {
            return Err(AdapterError::Backend(format!("{} não está conectado", handle.link)));
        }
        if std::mem::take(&mut st.drop_on_discover) {
            if let Some(tx) = &st.link_tx {
                let _ = tx.send(AdapterEvent::Disconnected { link: handle.link });
            }
        }
        Ok(st.services.clone())
    }

    fn subscribe_notifications(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        events: Sender<AdapterEvent>,
    ) -> Result<(), AdapterError> {
        let mut st = self.lock();
        st.calls.push(AdapterCall::Subscribe(handle.link));
        if take_failure(&mut st.failing_subscribes) {
            return Err(AdapterError::Backend("CCCD simulado recusou notify".into()));
        }
        if st.connected != Some(handle.link) {
            return Err(AdapterError::Backend(format!("{} não está conectado", handle.link)));
        }
        if !Self::has_channel(&st.services, service, characteristic) {
            return Err(AdapterError::Backend(format!(
                "characteristic {characteristic} ausente"
            )));
        }
        st.subscription = Some((handle.link, events));
        Ok(())
    }

    fn disconnect(&self, handle: &ConnectionHandle) -> Result<(), AdapterError> {
        let mut st = self.lock();
        st.calls.push(AdapterCall::Disconnect(handle.link));
        if st.connected == Some(handle.link) {
            st.connected = None;
            st.link_tx = None;
        }
        if matches!(st.subscription, Some((link, _)) if link == handle.link) {
            st.subscription = None;
        }
        Ok(())
    }

    fn release(&self) {
        let mut st = self.lock();
        st.calls.push(AdapterCall::Release);
        st.scan_tx = None;
        st.subscription = None;
        st.connected = None;
        st.link_tx = None;
        st.released = true;
    }
}
