//! Adaptador BLE real (BlueZ, CoreBluetooth, WinRT) via btleplug.
//!
//! btleplug é assíncrono; o supervisor é uma thread bloqueante. O adaptador
//! tem um runtime tokio próprio: as chamadas do trait fazem `block_on` e os
//! streams (advertisements, notificações, desconexão) rodam como tasks que
//! empurram [`AdapterEvent`] no channel do supervisor.

use btleplug::api::{Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use crossbeam_channel::Sender;
use futures::StreamExt;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vitals_core::adapter::{AdapterError, AdapterEvent, AdapterState, ServiceDescriptor, WirelessAdapter};
use vitals_core::types::{ConnectionHandle, LinkId, PeripheralRef};

/// BlueZ pode segurar o `Connect` indefinidamente.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DISCOVER_TIMEOUT: Duration = Duration::from_secs(15);

type Known = Arc<Mutex<HashMap<String, Peripheral>>>;

#[derive(Default)]
struct Inner {
    scan_task: Option<JoinHandle<()>>,
    link: Option<(LinkId, Peripheral)>,
    link_tasks: Vec<JoinHandle<()>>,
}

pub struct BtleplugAdapter {
    runtime: Runtime,
    adapter: Adapter,
    known: Known,
    inner: Mutex<Inner>,
}

fn backend(e: impl Display) -> AdapterError {
    AdapterError::Backend(e.to_string())
}

fn lock_known(known: &Known) -> MutexGuard<'_, HashMap<String, Peripheral>> {
    known.lock().unwrap_or_else(|e| e.into_inner())
}

impl BtleplugAdapter {
    /// Abre o primeiro adaptador Bluetooth do sistema.
    pub fn new() -> Result<Self, AdapterError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("ble-io")
            .enable_all()
            .build()
            .map_err(backend)?;

        let adapter = runtime.block_on(async {
            let manager = Manager::new().await.map_err(backend)?;
            let adapters = manager.adapters().await.map_err(backend)?;
            adapters.into_iter().next().ok_or(AdapterError::NotAvailable)
        })?;

        match runtime.block_on(adapter.adapter_info()) {
            Ok(info) => info!("Adaptador Bluetooth: {info}"),
            Err(e) => debug!("Sem informações do adaptador: {e}"),
        }

        Ok(Self {
            runtime,
            adapter,
            known: Arc::new(Mutex::new(HashMap::new())),
            inner: Mutex::new(Inner::default()),
        })
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn linked(&self, handle: &ConnectionHandle) -> Result<Peripheral, AdapterError> {
        match &self.inner().link {
            Some((link, peripheral)) if *link == handle.link => Ok(peripheral.clone()),
            _ => Err(AdapterError::Backend(format!("{} não está conectado", handle.link))),
        }
    }

    fn abort_link_tasks(inner: &mut Inner) {
        for task in inner.link_tasks.drain(..) {
            task.abort();
        }
    }
}

impl WirelessAdapter for BtleplugAdapter {
    fn state(&self) -> AdapterState {
        match self.runtime.block_on(self.adapter.adapter_state()) {
            Ok(CentralState::PoweredOn) => AdapterState::PoweredOn,
            Ok(CentralState::PoweredOff) => AdapterState::PoweredOff,
            Ok(_) => AdapterState::Unknown,
            Err(e) => {
                debug!("adapter_state(): {e}");
                AdapterState::Unknown
            }
        }
    }

    fn start_scan(&self, events: Sender<AdapterEvent>) -> Result<(), AdapterError> {
        let mut stream = self.runtime.block_on(self.adapter.events()).map_err(backend)?;
        self.runtime
            .block_on(self.adapter.start_scan(ScanFilter::default()))
            .map_err(backend)?;

        let adapter = self.adapter.clone();
        let known = self.known.clone();
        let task = self.runtime.spawn(async move {
            while let Some(event) = stream.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let peripheral = match adapter.peripheral(&id).await {
                    Ok(p) => p,
                    Err(e) => {
                        debug!("Periférico {id:?} sumiu: {e}");
                        continue;
                    }
                };
                let name = peripheral
                    .properties()
                    .await
                    .ok()
                    .flatten()
                    .and_then(|props| props.local_name);

                let found = PeripheralRef {
                    id: id.to_string(),
                    name,
                };
                lock_known(&known).insert(found.id.clone(), peripheral);
                if events.send(AdapterEvent::Discovered(found)).is_err() {
                    return;
                }
            }
            let _ = events.send(AdapterEvent::ScanFailed(
                "Stream de eventos do adaptador encerrado".into(),
            ));
        });

        if let Some(previous) = self.inner().scan_task.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), AdapterError> {
        if let Some(task) = self.inner().scan_task.take() {
            task.abort();
        }
        self.runtime.block_on(self.adapter.stop_scan()).map_err(backend)
    }

    fn connect(&self, handle: &ConnectionHandle, events: Sender<AdapterEvent>) -> Result<(), AdapterError> {
        let peripheral = lock_known(&self.known)
            .get(&handle.peripheral.id)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownPeripheral(handle.peripheral.id.clone()))?;

        // O stream de eventos abre antes do connect para não perder uma queda
        // logo após o link subir.
        let mut central = self.runtime.block_on(self.adapter.events()).map_err(backend)?;
        self.runtime
            .block_on(tokio::time::timeout(CONNECT_TIMEOUT, peripheral.connect()))
            .map_err(|_| AdapterError::Backend(format!("connect() sem resposta em {CONNECT_TIMEOUT:?}")))?
            .map_err(backend)?;

        let link = handle.link;
        let peripheral_id = peripheral.id();
        let watch_task = self.runtime.spawn(async move {
            while let Some(event) = central.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == peripheral_id {
                        debug!("{link}: DeviceDisconnected");
                        let _ = events.send(AdapterEvent::Disconnected { link });
                        return;
                    }
                }
            }
        });

        let mut inner = self.inner();
        Self::abort_link_tasks(&mut inner);
        inner.link = Some((link, peripheral));
        inner.link_tasks.push(watch_task);
        Ok(())
    }

    fn discover(&self, handle: &ConnectionHandle) -> Result<Vec<ServiceDescriptor>, AdapterError> {
        let peripheral = self.linked(handle)?;
        self.runtime
            .block_on(tokio::time::timeout(DISCOVER_TIMEOUT, peripheral.discover_services()))
            .map_err(|_| {
                AdapterError::Backend(format!("discover_services() sem resposta em {DISCOVER_TIMEOUT:?}"))
            })?
            .map_err(backend)?;

        Ok(peripheral
            .services()
            .into_iter()
            .map(|service| ServiceDescriptor {
                uuid: service.uuid,
                characteristics: service.characteristics.iter().map(|c| c.uuid).collect(),
            })
            .collect())
    }

    fn subscribe_notifications(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        events: Sender<AdapterEvent>,
    ) -> Result<(), AdapterError> {
        let peripheral = self.linked(handle)?;
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == characteristic)
            .ok_or_else(|| AdapterError::Backend(format!("characteristic {characteristic} ausente")))?;

        self.runtime.block_on(peripheral.subscribe(&target)).map_err(backend)?;
        let mut notifications = self
            .runtime
            .block_on(peripheral.notifications())
            .map_err(backend)?;

        let link = handle.link;
        let notify_task = self.runtime.spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                let event = AdapterEvent::Notification {
                    link,
                    value: notification.value,
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            // Fim do stream sem abort: o periférico fechou o link.
            debug!("{link}: stream de notificações encerrado");
            let _ = events.send(AdapterEvent::Disconnected { link });
        });

        self.inner().link_tasks.push(notify_task);
        Ok(())
    }

    fn disconnect(&self, handle: &ConnectionHandle) -> Result<(), AdapterError> {
        let peripheral = {
            let mut inner = self.inner();
            match &inner.link {
                Some((link, _)) if *link == handle.link => {}
                _ => return Ok(()),
            }
            Self::abort_link_tasks(&mut inner);
            inner.link.take().map(|(_, p)| p)
        };

        if let Some(peripheral) = peripheral {
            self.runtime.block_on(peripheral.disconnect()).map_err(backend)?;
        }
        Ok(())
    }

    fn release(&self) {
        let (scan, link) = {
            let mut inner = self.inner();
            Self::abort_link_tasks(&mut inner);
            (inner.scan_task.take(), inner.link.take())
        };
        if let Some(task) = scan {
            task.abort();
        }
        if let Err(e) = self.runtime.block_on(self.adapter.stop_scan()) {
            debug!("stop_scan() no release: {e}");
        }
        if let Some((link, peripheral)) = link {
            if let Err(e) = self.runtime.block_on(peripheral.disconnect()) {
                warn!("Falha ao desconectar {link} no release: {e}");
            }
        }
        lock_known(&self.known).clear();
        info!("Adaptador Bluetooth liberado");
    }
}
