//! Sensor simulado: alimenta o [`SimulatedAdapter`] com frames plausíveis e
//! derruba o link de tempos em tempos para exercitar a recuperação.

use crossbeam_channel::{Sender, bounded, select, after};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};
use vitals_core::protocol::format_frame;
use vitals_core::simulated::SimulatedAdapter;
use vitals_core::SensorReading;

/// Gera a leitura `tick` de uma série lenta e determinística.
pub fn synthetic_reading(tick: u64) -> SensorReading {
    let t = tick as f64;
    let heart_rate = 72.0 + 6.0 * (t / 7.0).sin();
    let spo2 = 97.0 + 1.5 * (t / 11.0).cos();
    let glucose = 105.0 + 20.0 * (t / 40.0).sin();

    SensorReading {
        heart_rate: heart_rate.round() as i32,
        oxygen_saturation: (spo2 * 10.0).round() / 10.0,
        glucose_level: (glucose * 10.0).round() / 10.0,
        observed_at: chrono::Utc::now(),
    }
}

/// Thread que injeta frames no simulador.
pub struct FrameFeeder {
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl FrameFeeder {
    /// Envia um frame a cada `interval`. Com `drop_every > 0`, derruba o
    /// link depois de cada `drop_every` frames entregues.
    pub fn spawn(
        sim: Arc<SimulatedAdapter>,
        interval: Duration,
        drop_every: u32,
    ) -> std::io::Result<Self> {
        let (stop, stop_rx) = bounded::<()>(1);
        let thread = std::thread::Builder::new()
            .name("sim-feeder".into())
            .spawn(move || {
                let mut tick = 0u64;
                let mut delivered = 0u32;
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(after(interval)) -> _ => {}
                    }

                    let frame = format_frame(&synthetic_reading(tick));
                    tick += 1;
                    if !sim.notify(frame.as_bytes()) {
                        // Sem assinatura: supervisor ainda procurando ou reconectando
                        continue;
                    }
                    debug!("Simulador → {frame}");
                    delivered += 1;

                    if drop_every > 0 && delivered % drop_every == 0 {
                        info!("Simulador: derrubando link após {delivered} frames");
                        sim.drop_link();
                    }
                }
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Thread do simulador terminou em pânico");
            }
        }
    }
}

impl Drop for FrameFeeder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitals_core::protocol::decode_frame;
    use vitals_core::PeripheralIdentity;
    use vitals_core::adapter::{AdapterEvent, WirelessAdapter};
    use vitals_core::types::{ConnectionHandle, LinkId, PeripheralRef};

    #[test]
    fn synthetic_frames_decode_back() {
        for tick in 0..100 {
            let reading = synthetic_reading(tick);
            let decoded = decode_frame(format_frame(&reading).as_bytes()).unwrap();
            assert_eq!(decoded.heart_rate, reading.heart_rate);
            assert!((60..=80).contains(&decoded.heart_rate));
            assert!(decoded.oxygen_saturation <= 100.0);
        }
    }

    #[test]
    fn feeder_streams_and_drops_link() {
        let identity = PeripheralIdentity::ESP32_MAX30102;
        let sim = Arc::new(SimulatedAdapter::with_sensor(&identity));
        let handle = ConnectionHandle {
            link: LinkId(7),
            peripheral: PeripheralRef::new("sim-esp32", Some(identity.advertised_name)),
        };
        let (tx, rx) = crossbeam_channel::unbounded();
        sim.connect(&handle, tx.clone()).unwrap();
        sim.subscribe_notifications(&handle, identity.service, identity.characteristic, tx)
            .unwrap();

        let mut feeder = FrameFeeder::spawn(sim.clone(), Duration::from_millis(1), 3).unwrap();
        let mut frames = 0;
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                AdapterEvent::Notification { link, .. } => {
                    assert_eq!(link, LinkId(7));
                    frames += 1;
                }
                AdapterEvent::Disconnected { link } => {
                    assert_eq!(link, LinkId(7));
                    break;
                }
                other => panic!("evento inesperado: {other:?}"),
            }
        }
        feeder.stop();
        assert_eq!(frames, 3);
        assert_eq!(sim.connected_link(), None);
    }
}
