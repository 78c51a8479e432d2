//! Distribuição das leituras para os consumidores (UI, persistência…).
//!
//! O hub guarda também os últimos valores conhecidos, para quem só quer
//! exibir o estado atual sem acompanhar o stream.

use crate::types::{LatestValues, SensorReading};
use crossbeam_channel::{Receiver, bounded};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Callback registrado no hub.
pub type ReadingCallback = Arc<dyn Fn(&SensorReading) + Send + Sync>;

/// Identifica uma inscrição para o `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

#[derive(Default)]
struct HubInner {
    next_token: u64,
    subscribers: Vec<(SubscriptionToken, ReadingCallback)>,
    latest: LatestValues,
}

/// Pub/sub em processo das leituras decodificadas.
///
/// Inscrição e remoção podem vir de qualquer thread. A publicação vem da
/// thread do supervisor, então cada inscrito recebe as leituras na ordem
/// em que foram publicadas.
#[derive(Default)]
pub struct ReadingHub {
    inner: Mutex<HubInner>,
}

impl ReadingHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registra um callback para novas leituras.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionToken
    where
        F: Fn(&SensorReading) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        inner.next_token += 1;
        let token = SubscriptionToken(inner.next_token);
        inner.subscribers.push((token, Arc::new(callback)));
        debug!("Inscrito {token:?} ({} no total)", inner.subscribers.len());
        token
    }

    /// Inscreve um channel com buffer `capacity`.
    ///
    /// Consumidor lento perde leituras em vez de travar o supervisor.
    pub fn subscribe_channel(&self, capacity: usize) -> (SubscriptionToken, Receiver<SensorReading>) {
        let (tx, rx) = bounded(capacity);
        let token = self.subscribe(move |reading| {
            if tx.try_send(reading.clone()).is_err() {
                debug!("Channel de leituras cheio, descartando");
            }
        });
        (token, rx)
    }

    /// Remove uma inscrição. Retorna `false` se o token não existia.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(t, _)| *t != token);
        inner.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Atualiza os últimos valores e entrega a leitura a cada inscrito.
    ///
    /// Os callbacks rodam fora do lock: podem se inscrever ou sair do hub
    /// sem deadlock.
    pub fn publish(&self, reading: &SensorReading) {
        let targets: Vec<ReadingCallback> = {
            let mut inner = self.lock();
            inner.latest.heart_rate = Some(reading.heart_rate);
            inner.latest.oxygen_saturation = Some(reading.oxygen_saturation);
            inner.latest.glucose_level = Some(reading.glucose_level);
            inner.latest.observed_at = Some(reading.observed_at);
            inner.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
        };

        for callback in targets {
            callback(reading);
        }
    }

    /// Marca se há link ativo. Não mexe nos valores já conhecidos.
    pub fn set_connected(&self, connected: bool) {
        self.lock().latest.is_connected = connected;
    }

    /// Últimos valores conhecidos.
    pub fn latest(&self) -> LatestValues {
        self.lock().latest.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn reading(bpm: i32) -> SensorReading {
        SensorReading {
            heart_rate: bpm,
            oxygen_saturation: 97.5,
            glucose_level: 110.0,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn publish_reaches_every_subscriber() {
        let hub = ReadingHub::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            hub.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        hub.publish(&reading(72));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub = ReadingHub::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let token = hub.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        hub.publish(&reading(70));
        assert!(hub.unsubscribe(token));
        assert!(!hub.unsubscribe(token));
        hub.publish(&reading(71));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn channel_subscriber_sees_publish_order() {
        let hub = ReadingHub::new();
        let (_token, rx) = hub.subscribe_channel(16);
        for bpm in 60..70 {
            hub.publish(&reading(bpm));
        }
        let seen: Vec<i32> = rx.try_iter().map(|r| r.heart_rate).collect();
        assert_eq!(seen, (60..70).collect::<Vec<_>>());
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let hub = ReadingHub::new();
        let (_token, rx) = hub.subscribe_channel(2);
        for bpm in 0..5 {
            hub.publish(&reading(bpm));
        }
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn latest_tracks_last_publish_and_survives_disconnect() {
        let hub = ReadingHub::new();
        assert_eq!(hub.latest().heart_rate, None);

        hub.set_connected(true);
        hub.publish(&reading(72));
        hub.publish(&reading(75));
        hub.set_connected(false);

        let latest = hub.latest();
        assert_eq!(latest.heart_rate, Some(75));
        assert_eq!(latest.oxygen_saturation, Some(97.5));
        assert_eq!(latest.glucose_level, Some(110.0));
        assert!(!latest.is_connected);
    }

    #[test]
    fn concurrent_subscribers_from_many_threads() {
        let hub = Arc::new(ReadingHub::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let hub = hub.clone();
                std::thread::spawn(move || {
                    let token = hub.subscribe(|_| {});
                    hub.publish(&reading(80));
                    token
                })
            })
            .collect();
        let tokens: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(hub.subscriber_count(), 8);
        for token in tokens {
            assert!(hub.unsubscribe(token));
        }
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn callback_may_unsubscribe_itself() {
        let hub = Arc::new(ReadingHub::new());
        let slot: Arc<Mutex<Option<SubscriptionToken>>> = Arc::new(Mutex::new(None));
        let (hub2, slot2) = (hub.clone(), slot.clone());
        let token = hub.subscribe(move |_| {
            if let Some(t) = *slot2.lock().unwrap() {
                hub2.unsubscribe(t);
            }
        });
        *slot.lock().unwrap() = Some(token);
        hub.publish(&reading(72));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
