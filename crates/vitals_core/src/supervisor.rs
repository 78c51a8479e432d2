//! Máquina de estados da conexão com o sensor.
//!
//! ```text
//! Idle ─► AwaitingPermission ─► Scanning ─► Connecting ─► Discovering ─► Monitoring
//!   ▲            │ negada            ▲            │              │              │
//!   └────────────┘                   │            ▼              ▼              ▼
//!                                    └──────────────────── Recovering ◄─────────┘
//! ```
//!
//! Roda em thread própria. Eventos do rádio chegam por um channel e são
//! tratados um de cada vez, então nenhuma transição corre em paralelo com
//! outra. Qualquer falha de link passa por `Recovering`, espera o intervalo
//! fixo e volta ao scan, sem limite de tentativas. O teardown interrompe
//! scan e espera na hora; connect e discover terminam antes de ele ser
//! atendido.

use crate::adapter::{AdapterEvent, AdapterState, WirelessAdapter};
use crate::config::SupervisorConfig;
use crate::hub::ReadingHub;
use crate::permission::{PermissionGate, PermissionOutcome, PermissionPlatform};
use crate::protocol::decode_frame;
use crate::session::LinkSession;
use crate::types::{ConnectionHandle, PeripheralIdentity, PeripheralRef, SupervisorState};
use crossbeam_channel::{Receiver, Sender, TryRecvError, after, bounded, select, unbounded};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Falhas reportadas pelo supervisor. Nenhuma é fatal: todas levam de volta
/// ao scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Fault {
    ScanError(String),
    ConnectFailure(String),
    DiscoverFailure(String),
    SubscribeFailure(String),
    LinkDropped,
}

/// Eventos publicados no canal de reporte.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SupervisorEvent {
    StateChanged {
        from: SupervisorState,
        to: SupervisorState,
    },
    /// Permissão negada: exige novo `start` explícito.
    PermissionDenied(String),
    Fault(Fault),
}

enum Command {
    Teardown,
}

/// Estado interno, com os dados de cada fase.
enum Phase {
    Scanning,
    Connecting(PeripheralRef),
    Discovering(ConnectionHandle),
    Monitoring(ConnectionHandle),
    Recovering(Option<ConnectionHandle>),
}

impl Phase {
    fn state(&self) -> SupervisorState {
        match self {
            Phase::Scanning => SupervisorState::Scanning,
            Phase::Connecting(_) => SupervisorState::Connecting,
            Phase::Discovering(_) => SupervisorState::Discovering,
            Phase::Monitoring(_) => SupervisorState::Monitoring,
            Phase::Recovering(_) => SupervisorState::Recovering,
        }
    }

    fn into_handle(self) -> Option<ConnectionHandle> {
        match self {
            Phase::Discovering(h) | Phase::Monitoring(h) => Some(h),
            Phase::Recovering(h) => h,
            Phase::Scanning | Phase::Connecting(_) => None,
        }
    }
}

/// Próximo passo da máquina.
enum Flow {
    Next(Phase),
    /// Teardown pedido; carrega o handle que ainda precisa ser fechado.
    Teardown(Option<ConnectionHandle>),
}

/// Handle da thread do supervisor.
///
/// Soltar o handle equivale a `teardown`.
pub struct SupervisorHandle {
    commands: Sender<Command>,
    state: Arc<Mutex<SupervisorState>>,
    thread: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    /// Estado atual (espelho somente leitura).
    pub fn state(&self) -> SupervisorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Célula compartilhada do espelho de estado.
    pub fn state_cell(&self) -> Arc<Mutex<SupervisorState>> {
        self.state.clone()
    }

    /// `true` quando a thread já terminou (teardown ou permissão negada).
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Para o supervisor e espera ele chegar em `Idle`.
    pub fn teardown(&mut self) {
        let _ = self.commands.try_send(Command::Teardown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Thread do supervisor terminou em pânico");
            }
        }
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Supervisor de conexão: dono exclusivo do estado e do link.
pub struct ConnectionSupervisor<A, P> {
    adapter: Arc<A>,
    gate: Arc<PermissionGate<P>>,
    session: LinkSession<A>,
    hub: Arc<ReadingHub>,
    identity: PeripheralIdentity,
    config: SupervisorConfig,
    state: SupervisorState,
    state_mirror: Arc<Mutex<SupervisorState>>,
    reporter: Sender<SupervisorEvent>,
    commands: Receiver<Command>,
    events_tx: Sender<AdapterEvent>,
    events_rx: Receiver<AdapterEvent>,
}

impl<A, P> ConnectionSupervisor<A, P>
where
    A: WirelessAdapter + 'static,
    P: PermissionPlatform + 'static,
{
    /// Cria o supervisor e inicia a thread (`Idle → AwaitingPermission`).
    pub fn spawn(
        adapter: Arc<A>,
        gate: Arc<PermissionGate<P>>,
        hub: Arc<ReadingHub>,
        identity: PeripheralIdentity,
        config: SupervisorConfig,
        reporter: Sender<SupervisorEvent>,
    ) -> std::io::Result<SupervisorHandle> {
        let (cmd_tx, cmd_rx) = bounded(1);
        let (events_tx, events_rx) = unbounded();
        let state_mirror = Arc::new(Mutex::new(SupervisorState::Idle));

        let supervisor = ConnectionSupervisor {
            session: LinkSession::new(adapter.clone(), identity),
            adapter,
            gate,
            hub,
            identity,
            config,
            state: SupervisorState::Idle,
            state_mirror: state_mirror.clone(),
            reporter,
            commands: cmd_rx,
            events_tx,
            events_rx,
        };

        let thread = std::thread::Builder::new()
            .name("ble-supervisor".into())
            .spawn(move || supervisor.run())?;

        Ok(SupervisorHandle {
            commands: cmd_tx,
            state: state_mirror,
            thread: Some(thread),
        })
    }

    fn run(mut self) {
        self.enter(SupervisorState::AwaitingPermission);
        if let PermissionOutcome::Denied(reason) = self.gate.ensure_authorized() {
            self.report(SupervisorEvent::PermissionDenied(reason));
            self.enter(SupervisorState::Idle);
            return;
        }

        let mut phase = Phase::Scanning;
        loop {
            if self.teardown_requested() {
                self.shutdown(phase.into_handle());
                return;
            }
            self.enter(phase.state());

            let flow = match phase {
                Phase::Scanning => self.scan(),
                Phase::Connecting(peripheral) => self.connect(peripheral),
                Phase::Discovering(handle) => self.discover(handle),
                Phase::Monitoring(handle) => self.monitor(handle),
                Phase::Recovering(handle) => self.recover(handle),
            };

            phase = match flow {
                Flow::Next(next) => next,
                Flow::Teardown(handle) => {
                    self.shutdown(handle);
                    return;
                }
            };
        }
    }

    // ──────────────────────────────────────────
    // Fases
    // ──────────────────────────────────────────

    fn scan(&mut self) -> Flow {
        loop {
            match self.adapter.state() {
                AdapterState::PoweredOn => break,
                other => {
                    debug!("Rádio em {other:?}, aguardando PoweredOn");
                    if self.wait(self.config.power_poll()) {
                        return Flow::Teardown(None);
                    }
                }
            }
        }

        // Descobertas de scans anteriores não valem mais
        while self.events_rx.try_recv().is_ok() {}

        if let Err(e) = self.adapter.start_scan(self.events_tx.clone()) {
            warn!("Erro no scan: {e}");
            self.report(SupervisorEvent::Fault(Fault::ScanError(e.to_string())));
            if self.wait(self.config.retry_delay()) {
                return Flow::Teardown(None);
            }
            return Flow::Next(Phase::Scanning);
        }
        info!("Scan iniciado, procurando {}", self.identity.advertised_name);

        loop {
            select! {
                recv(self.commands) -> _ => return Flow::Teardown(None),
                recv(self.events_rx) -> event => match event {
                    Ok(AdapterEvent::Discovered(peripheral))
                        if self.identity.matches(peripheral.name.as_deref()) =>
                    {
                        info!("Encontrado: {} ({})", self.identity.advertised_name, peripheral.id);
                        self.stop_scan();
                        return Flow::Next(Phase::Connecting(peripheral));
                    }
                    Ok(AdapterEvent::Discovered(peripheral)) => {
                        debug!("Ignorando {:?} ({})", peripheral.name, peripheral.id);
                    }
                    Ok(AdapterEvent::ScanFailed(reason)) => {
                        warn!("Erro no scan: {reason}");
                        self.report(SupervisorEvent::Fault(Fault::ScanError(reason)));
                    }
                    Ok(other) => debug!("Evento fora de hora ignorado: {other:?}"),
                    Err(_) => return Flow::Teardown(None),
                },
            }
        }
    }

    fn connect(&mut self, peripheral: PeripheralRef) -> Flow {
        match self.session.open(peripheral, self.events_tx.clone()) {
            Ok(handle) => {
                self.hub.set_connected(true);
                Flow::Next(Phase::Discovering(handle))
            }
            Err(e) => {
                warn!("{e}");
                self.report(SupervisorEvent::Fault(Fault::ConnectFailure(e.to_string())));
                Flow::Next(Phase::Recovering(None))
            }
        }
    }

    fn discover(&mut self, handle: ConnectionHandle) -> Flow {
        match self.session.discover_capabilities(&handle) {
            Ok(()) => Flow::Next(Phase::Monitoring(handle)),
            Err(e) => {
                warn!("{e}");
                self.report(SupervisorEvent::Fault(Fault::DiscoverFailure(e.to_string())));
                Flow::Next(Phase::Recovering(Some(handle)))
            }
        }
    }

    fn monitor(&mut self, handle: ConnectionHandle) -> Flow {
        if let Err(e) = self.session.subscribe(&handle, self.events_tx.clone()) {
            warn!("{e}");
            self.report(SupervisorEvent::Fault(Fault::SubscribeFailure(e.to_string())));
            return Flow::Next(Phase::Recovering(Some(handle)));
        }

        loop {
            select! {
                recv(self.commands) -> _ => return Flow::Teardown(Some(handle)),
                recv(self.events_rx) -> event => match event {
                    Ok(AdapterEvent::Notification { link, value }) if link == handle.link => {
                        self.handle_frame(&value);
                    }
                    Ok(AdapterEvent::Disconnected { link }) if link == handle.link => {
                        warn!("Link perdido com {} ({link})", handle.peripheral.id);
                        self.report(SupervisorEvent::Fault(Fault::LinkDropped));
                        return Flow::Next(Phase::Recovering(Some(handle)));
                    }
                    Ok(other) => debug!("Evento de outro link ignorado: {other:?}"),
                    Err(_) => return Flow::Teardown(Some(handle)),
                },
            }
        }
    }

    fn recover(&mut self, handle: Option<ConnectionHandle>) -> Flow {
        self.hub.set_connected(false);
        if let Some(handle) = handle {
            if let Err(e) = self.session.close(&handle) {
                debug!("{e}");
            }
        }

        let delay = self.config.retry_delay();
        info!("Nova tentativa em {:.1}s", delay.as_secs_f64());
        if self.wait(delay) {
            return Flow::Teardown(None);
        }
        Flow::Next(Phase::Scanning)
    }

    fn shutdown(&mut self, handle: Option<ConnectionHandle>) {
        self.stop_scan();
        if let Some(handle) = handle {
            if let Err(e) = self.session.close(&handle) {
                warn!("{e}");
            }
        }
        self.adapter.release();
        self.hub.set_connected(false);
        self.enter(SupervisorState::Idle);
        info!("Supervisor encerrado");
    }

    // ──────────────────────────────────────────
    // Helpers
    // ──────────────────────────────────────────

    fn handle_frame(&self, value: &[u8]) {
        match decode_frame(value) {
            Ok(reading) => {
                debug!(
                    "Dados recebidos → BPM:{} | SpO2:{} | GLC:{}",
                    reading.heart_rate, reading.oxygen_saturation, reading.glucose_level
                );
                self.hub.publish(&reading);
            }
            Err(e) => debug!("Frame descartado ({e}): {:?}", String::from_utf8_lossy(value)),
        }
    }

    fn stop_scan(&self) {
        if let Err(e) = self.adapter.stop_scan() {
            debug!("Falha ao parar scan: {e}");
        }
    }

    /// Espera `delay` ou um teardown. Retorna `true` se veio teardown.
    fn wait(&self, delay: Duration) -> bool {
        select! {
            recv(self.commands) -> _ => true,
            recv(after(delay)) -> _ => false,
        }
    }

    fn teardown_requested(&self) -> bool {
        match self.commands.try_recv() {
            Ok(Command::Teardown) | Err(TryRecvError::Disconnected) => true,
            Err(TryRecvError::Empty) => false,
        }
    }

    fn enter(&mut self, to: SupervisorState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("Estado: {from} → {to}");
        self.state = to;
        *self.state_mirror.lock().unwrap_or_else(|e| e.into_inner()) = to;
        self.report(SupervisorEvent::StateChanged { from, to });
    }

    fn report(&self, event: SupervisorEvent) {
        if self.reporter.try_send(event).is_err() {
            debug!("Channel de eventos cheio, descartando");
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ServiceDescriptor;
    use crate::permission::{Authorization, PlatformKind, StaticPlatform};
    use crate::simulated::{AdapterCall, SimulatedAdapter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    const RETRY: Duration = Duration::from_millis(50);
    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Rig {
        sim: Arc<SimulatedAdapter>,
        hub: Arc<ReadingHub>,
        events: Receiver<SupervisorEvent>,
        handle: SupervisorHandle,
    }

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            retry_delay_secs: RETRY.as_secs_f64(),
            power_poll_ms: 5,
            event_buffer: 1024,
        }
    }

    fn rig_with(sim: SimulatedAdapter, platform: StaticPlatform) -> Rig {
        let sim = Arc::new(sim);
        let hub = Arc::new(ReadingHub::new());
        let (tx, events) = bounded(1024);
        let handle = ConnectionSupervisor::spawn(
            sim.clone(),
            Arc::new(PermissionGate::new(platform)),
            hub.clone(),
            PeripheralIdentity::ESP32_MAX30102,
            fast_config(),
            tx,
        )
        .unwrap();
        Rig {
            sim,
            hub,
            events,
            handle,
        }
    }

    fn rig(sim: SimulatedAdapter) -> Rig {
        rig_with(sim, StaticPlatform::granting(PlatformKind::Android { api_level: 34 }))
    }

    fn sensor() -> SimulatedAdapter {
        SimulatedAdapter::with_sensor(&PeripheralIdentity::ESP32_MAX30102)
    }

    /// Consome eventos até `pred` casar; devolve tudo o que foi visto.
    fn collect_until(
        events: &Receiver<SupervisorEvent>,
        pred: impl Fn(&SupervisorEvent) -> bool,
    ) -> Vec<SupervisorEvent> {
        let deadline = Instant::now() + TIMEOUT;
        let mut seen = Vec::new();
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let event = events
                .recv_timeout(left)
                .unwrap_or_else(|_| panic!("timeout esperando evento; vistos: {seen:?}"));
            let done = pred(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    fn entered(to: SupervisorState) -> impl Fn(&SupervisorEvent) -> bool {
        move |e| matches!(e, SupervisorEvent::StateChanged { to: t, .. } if *t == to)
    }

    fn states(events: &[SupervisorEvent]) -> Vec<SupervisorState> {
        events
            .iter()
            .filter_map(|e| match e {
                SupervisorEvent::StateChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }

    fn wait_until(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + TIMEOUT;
        while !cond() {
            assert!(Instant::now() < deadline, "condição não atingida a tempo");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn reaches_monitoring_and_publishes_readings() {
        let rig = rig(sensor());
        let seen = collect_until(&rig.events, entered(SupervisorState::Monitoring));
        wait_until(|| rig.sim.is_streaming());
        assert_eq!(
            states(&seen),
            vec![
                SupervisorState::AwaitingPermission,
                SupervisorState::Scanning,
                SupervisorState::Connecting,
                SupervisorState::Discovering,
                SupervisorState::Monitoring,
            ]
        );

        assert!(rig.sim.notify(b"72,97.5,110.0"));
        wait_until(|| rig.hub.latest().heart_rate == Some(72));

        let latest = rig.hub.latest();
        assert_eq!(latest.oxygen_saturation, Some(97.5));
        assert_eq!(latest.glucose_level, Some(110.0));
        assert!(latest.is_connected);
        assert_eq!(rig.handle.state(), SupervisorState::Monitoring);
    }

    #[test]
    fn malformed_frame_is_dropped_without_state_change() {
        let rig = rig(sensor());
        collect_until(&rig.events, entered(SupervisorState::Monitoring));
        wait_until(|| rig.sim.is_streaming());

        let published = Arc::new(AtomicUsize::new(0));
        let counter = published.clone();
        rig.hub.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(rig.sim.notify(b"72,97.5,110.0"));
        assert!(rig.sim.notify(b"72,97.5"));
        assert!(rig.sim.notify(b"lixo"));
        // A queda chega depois dos frames, no mesmo channel
        assert!(rig.sim.drop_link());

        let seen = collect_until(&rig.events, entered(SupervisorState::Recovering));
        assert_eq!(seen.len(), 2, "apenas LinkDropped e Recovering: {seen:?}");
        assert_eq!(seen[0], SupervisorEvent::Fault(Fault::LinkDropped));

        assert_eq!(published.load(Ordering::SeqCst), 1);
        let latest = rig.hub.latest();
        assert_eq!(latest.heart_rate, Some(72));
        assert_eq!(latest.glucose_level, Some(110.0));
    }

    #[test]
    fn permission_denied_never_scans() {
        let rig = rig_with(
            sensor(),
            StaticPlatform::denying(
                PlatformKind::Android { api_level: 34 },
                &[Authorization::BluetoothScan],
            ),
        );
        let seen = collect_until(&rig.events, entered(SupervisorState::Idle));

        assert!(seen.iter().any(|e| matches!(e, SupervisorEvent::PermissionDenied(_))));
        assert!(!states(&seen).contains(&SupervisorState::Scanning));
        assert!(!rig.sim.calls().contains(&AdapterCall::StartScan));
        wait_until(|| rig.handle.is_finished());
        assert_eq!(rig.handle.state(), SupervisorState::Idle);
    }

    #[test]
    fn link_drop_goes_through_one_recovery_then_scanning() {
        let rig = rig(sensor());
        collect_until(&rig.events, entered(SupervisorState::Monitoring));
        wait_until(|| rig.sim.is_streaming());

        let dropped_at = Instant::now();
        assert!(rig.sim.drop_link());
        let seen = collect_until(&rig.events, entered(SupervisorState::Scanning));
        let elapsed = dropped_at.elapsed();

        assert_eq!(
            states(&seen),
            vec![SupervisorState::Recovering, SupervisorState::Scanning]
        );
        let drops = seen
            .iter()
            .filter(|e| **e == SupervisorEvent::Fault(Fault::LinkDropped))
            .count();
        assert_eq!(drops, 1);
        assert!(elapsed >= RETRY, "backoff curto demais: {elapsed:?}");

        // Sensor continua em alcance: volta a monitorar com link novo
        let seen = collect_until(&rig.events, entered(SupervisorState::Monitoring));
        assert_eq!(
            states(&seen),
            vec![
                SupervisorState::Connecting,
                SupervisorState::Discovering,
                SupervisorState::Monitoring,
            ]
        );
        let connects = rig
            .sim
            .calls()
            .iter()
            .filter(|c| matches!(c, AdapterCall::Connect(_)))
            .count();
        assert_eq!(connects, 2);
    }

    #[test]
    fn link_drop_during_discovery_still_recovers() {
        let sim = sensor();
        sim.drop_during_next_discover();
        let rig = rig(sim);

        let seen = collect_until(&rig.events, entered(SupervisorState::Recovering));
        assert!(seen.contains(&SupervisorEvent::Fault(Fault::LinkDropped)));
        let first = rig.sim.calls().iter().find_map(|c| match c {
            AdapterCall::Connect(link) => Some(*link),
            _ => None,
        });

        collect_until(&rig.events, entered(SupervisorState::Monitoring));
        assert!(first.is_some());
        assert_ne!(rig.sim.connected_link(), first);
    }

    #[test]
    fn teardown_while_scanning_stops_everything() {
        let mut rig = rig(SimulatedAdapter::new());
        collect_until(&rig.events, entered(SupervisorState::Scanning));
        wait_until(|| rig.sim.is_scanning());

        rig.handle.teardown();

        assert_eq!(rig.handle.state(), SupervisorState::Idle);
        assert!(!rig.sim.is_scanning());
        let calls = rig.sim.calls();
        assert!(calls.contains(&AdapterCall::StopScan));
        assert_eq!(calls.last(), Some(&AdapterCall::Release));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        rig.hub.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Sensor aparece depois do teardown: nada acontece
        rig.sim
            .advertise(PeripheralRef::new("late", Some("ESP32_MAX30102")));
        std::thread::sleep(RETRY);
        assert!(!rig.sim.calls().iter().any(|c| matches!(c, AdapterCall::Connect(_))));
        assert!(!rig.sim.notify(b"72,97.5,110.0"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let seen: Vec<_> = rig.events.try_iter().collect();
        assert_eq!(states(&seen), vec![SupervisorState::Idle]);
    }

    #[test]
    fn teardown_while_monitoring_closes_link() {
        let mut rig = rig(sensor());
        collect_until(&rig.events, entered(SupervisorState::Monitoring));
        let link = rig.sim.connected_link().unwrap();

        rig.handle.teardown();

        assert!(rig.sim.calls().contains(&AdapterCall::Disconnect(link)));
        assert!(rig.sim.is_released());
        assert_eq!(rig.sim.connected_link(), None);
        assert!(!rig.hub.latest().is_connected);
        assert_eq!(rig.handle.state(), SupervisorState::Idle);
    }

    #[test]
    fn teardown_interrupts_backoff() {
        let sim = sensor();
        sim.fail_next_connects(1);
        let sim = Arc::new(sim);
        let hub = Arc::new(ReadingHub::new());
        let (tx, events) = bounded(64);
        let mut config = fast_config();
        config.retry_delay_secs = 30.0;
        let mut handle = ConnectionSupervisor::spawn(
            sim.clone(),
            Arc::new(PermissionGate::new(StaticPlatform::granting(PlatformKind::Other))),
            hub,
            PeripheralIdentity::ESP32_MAX30102,
            config,
            tx,
        )
        .unwrap();

        collect_until(&events, entered(SupervisorState::Recovering));
        let started = Instant::now();
        handle.teardown();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(handle.state(), SupervisorState::Idle);
    }

    #[test]
    fn connect_failures_are_retried_without_ceiling() {
        let sim = sensor();
        sim.fail_next_connects(4);
        let rig = rig(sim);

        let seen = collect_until(&rig.events, entered(SupervisorState::Monitoring));
        let failures = seen
            .iter()
            .filter(|e| matches!(e, SupervisorEvent::Fault(Fault::ConnectFailure(_))))
            .count();
        let recoveries = states(&seen)
            .iter()
            .filter(|s| **s == SupervisorState::Recovering)
            .count();
        assert_eq!(failures, 4);
        assert_eq!(recoveries, 4);
    }

    #[test]
    fn missing_service_is_retried_and_each_handle_closed() {
        let sim = sensor();
        sim.set_services(vec![ServiceDescriptor {
            uuid: uuid::Uuid::from_u128(0x180d),
            characteristics: vec![],
        }]);
        let mut rig = rig(sim);

        let is_discover_failure =
            |e: &SupervisorEvent| matches!(e, SupervisorEvent::Fault(Fault::DiscoverFailure(_)));
        collect_until(&rig.events, is_discover_failure);
        collect_until(&rig.events, is_discover_failure);
        collect_until(&rig.events, entered(SupervisorState::Scanning));
        rig.handle.teardown();

        let calls = rig.sim.calls();
        let connects: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                AdapterCall::Connect(link) => Some(*link),
                _ => None,
            })
            .collect();
        assert!(connects.len() >= 2);
        assert_ne!(connects[0], connects[1], "handles nunca são reaproveitados");
        for link in &connects[..2] {
            assert!(calls.contains(&AdapterCall::Disconnect(*link)));
        }
    }

    #[test]
    fn subscribe_failure_recovers() {
        let sim = sensor();
        sim.fail_next_subscribes(1);
        let rig = rig(sim);

        let seen = collect_until(&rig.events, entered(SupervisorState::Recovering));
        assert!(seen
            .iter()
            .any(|e| matches!(e, SupervisorEvent::Fault(Fault::SubscribeFailure(_)))));
        collect_until(&rig.events, entered(SupervisorState::Monitoring));
        wait_until(|| rig.sim.is_streaming());
        assert!(rig.sim.notify(b"60,99,90"));
        wait_until(|| rig.hub.latest().heart_rate == Some(60));
    }

    #[test]
    fn scan_start_failure_retries_within_scanning() {
        let sim = sensor();
        sim.fail_next_scans(2);
        let rig = rig(sim);

        let seen = collect_until(&rig.events, entered(SupervisorState::Monitoring));
        let scan_errors = seen
            .iter()
            .filter(|e| matches!(e, SupervisorEvent::Fault(Fault::ScanError(_))))
            .count();
        assert_eq!(scan_errors, 2);
        assert!(!states(&seen).contains(&SupervisorState::Recovering));
    }

    #[test]
    fn async_scan_error_keeps_scanning() {
        let rig = rig(SimulatedAdapter::new());
        collect_until(&rig.events, entered(SupervisorState::Scanning));
        wait_until(|| rig.sim.is_scanning());

        assert!(rig.sim.fail_scan("rádio ocupado"));
        collect_until(&rig.events, |e| {
            matches!(e, SupervisorEvent::Fault(Fault::ScanError(_)))
        });
        assert_eq!(rig.handle.state(), SupervisorState::Scanning);
        assert!(rig.sim.is_scanning());
    }

    #[test]
    fn waits_for_radio_power_before_scanning() {
        let sim = sensor();
        sim.set_power(AdapterState::PoweredOff);
        let rig = rig(sim);

        collect_until(&rig.events, entered(SupervisorState::Scanning));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!rig.sim.calls().contains(&AdapterCall::StartScan));

        rig.sim.set_power(AdapterState::PoweredOn);
        collect_until(&rig.events, entered(SupervisorState::Monitoring));
    }

    #[test]
    fn only_the_named_peripheral_is_connected() {
        let rig = rig(SimulatedAdapter::new());
        collect_until(&rig.events, entered(SupervisorState::Scanning));
        wait_until(|| rig.sim.is_scanning());

        rig.sim.advertise(PeripheralRef::new("aa", Some("Mi Band")));
        rig.sim.advertise(PeripheralRef::new("bb", Some("esp32_max30102")));
        rig.sim.advertise(PeripheralRef::new("cc", None));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(rig.handle.state(), SupervisorState::Scanning);

        rig.sim.advertise(PeripheralRef::new("dd", Some("ESP32_MAX30102")));
        collect_until(&rig.events, entered(SupervisorState::Connecting));
        let connects = rig
            .sim
            .calls()
            .iter()
            .filter(|c| matches!(c, AdapterCall::Connect(_)))
            .count();
        assert_eq!(connects, 1);
        // Scan parado antes de conectar
        let calls = rig.sim.calls();
        let stop = calls.iter().position(|c| *c == AdapterCall::StopScan).unwrap();
        let connect = calls
            .iter()
            .position(|c| matches!(c, AdapterCall::Connect(_)))
            .unwrap();
        assert!(stop < connect);
    }
}
