//! Reverse geocoding against a Nominatim-style endpoint.
//!
//! Lookups are coalesced through a bounded, insertion-ordered cache keyed by
//! the coordinates rounded to 4 decimals, and outbound requests are spaced at
//! least one second apart process-wide (the endpoint's usage policy). The
//! state lock is held across the spacing sleep and the request, which is what
//! serializes concurrent lookups.

use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::atomic::{
        AtomicBool,
        Ordering,
    },
    time::{
        Duration,
        Instant,
    },
};

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::util::http_client;

pub const DEFAULT_ENDPOINT: &str = "https://nominatim.openstreetmap.org/reverse";

const CACHE_CAPACITY: usize = 100;
const EVICTION_BATCH: usize = 20;

const MIN_REQUEST_SPACING: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
}

#[derive(Debug)]
pub struct Geocoder {
    endpoint: String,
    enabled: AtomicBool,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    cache: Cache,
    last_request: Option<Instant>,
}

impl Geocoder {
    pub fn new(endpoint: impl Into<String>, enabled: bool) -> Self {
        Self {
            endpoint: endpoint.into(),
            enabled: AtomicBool::new(enabled),
            state: Mutex::new(State::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Flips the toggle and returns the new state.
    pub fn toggle(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::Relaxed)
    }

    pub async fn cache_size(&self) -> usize {
        self.state.lock().await.cache.len()
    }

    /// Resolves coordinates to a human-readable address.
    ///
    /// Returns the empty string when disabled, and a short error description
    /// on lookup failure. Failures are never cached.
    pub async fn lookup(&self, latitude: f64, longitude: f64) -> String {
        if !self.is_enabled() {
            return String::new();
        }

        let key = Cache::key(latitude, longitude);

        let mut state = self.state.lock().await;

        if let Some(address) = state.cache.get(&key) {
            return address.to_owned();
        }

        let wait = spacing_delay(state.last_request);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let result = http_client()
            .get(&self.endpoint)
            .query(&[
                ("format", "json".to_owned()),
                ("lat", latitude.to_string()),
                ("lon", longitude.to_string()),
                ("zoom", "18".to_owned()),
                ("addressdetails", "1".to_owned()),
                ("accept-language", "es".to_owned()),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await;
        state.last_request = Some(Instant::now());

        let response = match result {
            Ok(response) => response,
            Err(error) if error.is_timeout() => return "geocoding timeout".to_owned(),
            Err(error) => {
                tracing::warn!(?error, "reverse geocoding request failed");
                return "geocoding network error".to_owned();
            }
        };

        if !response.status().is_success() {
            return format!("geocoding error: http {}", response.status().as_u16());
        }

        match response.json::<ReverseResponse>().await {
            Ok(ReverseResponse {
                display_name: Some(address),
            }) => {
                state.cache.insert(key, address.clone());
                address
            }
            Ok(ReverseResponse { display_name: None }) => "address not found".to_owned(),
            Err(error) => {
                tracing::warn!(?error, "reverse geocoding response was not json");
                "geocoding decode error".to_owned()
            }
        }
    }
}

/// How long the next outbound request has to wait to honor the spacing.
fn spacing_delay(last_request: Option<Instant>) -> Duration {
    last_request
        .map(|last| MIN_REQUEST_SPACING.saturating_sub(last.elapsed()))
        .unwrap_or(Duration::ZERO)
}

/// Insertion-ordered address cache. When an insert would exceed the capacity
/// the oldest [`EVICTION_BATCH`] entries are dropped as a single step.
#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<String, String>,
    order: VecDeque<String>,
}

impl Cache {
    fn key(latitude: f64, longitude: f64) -> String {
        format!("{latitude:.4},{longitude:.4}")
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn insert(&mut self, key: String, address: String) {
        if !self.entries.contains_key(&key) {
            if self.entries.len() >= CACHE_CAPACITY {
                for _ in 0..EVICTION_BATCH {
                    if let Some(oldest) = self.order.pop_front() {
                        self.entries.remove(&oldest);
                    }
                }
            }
            self.order.push_back(key.clone());
        }
        self.entries.insert(key, address);
    }
}

#[cfg(test)]
mod tests {
    use std::time::{
        Duration,
        Instant,
    };

    use super::{
        CACHE_CAPACITY,
        Cache,
        EVICTION_BATCH,
        Geocoder,
        MIN_REQUEST_SPACING,
        spacing_delay,
    };

    #[test]
    fn keys_are_rounded_to_four_decimals() {
        assert_eq!(
            Cache::key(-34.652_258_4, -58.533_800_3),
            "-34.6523,-58.5338"
        );
    }

    #[test]
    fn the_cache_never_exceeds_its_capacity() {
        let mut cache = Cache::default();
        for i in 0..CACHE_CAPACITY {
            cache.insert(format!("key-{i}"), "address".to_owned());
        }
        assert_eq!(cache.len(), CACHE_CAPACITY);

        // the overflowing insert drops the 20 oldest as a batch
        cache.insert("overflow".to_owned(), "address".to_owned());
        assert_eq!(cache.len(), CACHE_CAPACITY - EVICTION_BATCH + 1);

        for i in 0..EVICTION_BATCH {
            assert!(cache.get(&format!("key-{i}")).is_none());
        }
        assert!(cache.get(&format!("key-{EVICTION_BATCH}")).is_some());
        assert!(cache.get("overflow").is_some());
    }

    #[test]
    fn reinserting_a_key_does_not_grow_the_order() {
        let mut cache = Cache::default();
        cache.insert("a".to_owned(), "1".to_owned());
        cache.insert("a".to_owned(), "2".to_owned());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.order.len(), 1);
        assert_eq!(cache.get("a"), Some("2"));
    }

    #[test]
    fn the_toggle_flips_and_reports_the_new_state() {
        let geocoder = Geocoder::new("http://localhost/reverse", true);
        assert!(geocoder.is_enabled());
        assert!(!geocoder.toggle());
        assert!(!geocoder.is_enabled());
        assert!(geocoder.toggle());
    }

    #[test]
    fn requests_are_spaced_at_least_a_second_apart() {
        assert_eq!(spacing_delay(None), Duration::ZERO);

        // a request that just went out forces (nearly) the full spacing
        assert!(spacing_delay(Some(Instant::now())) > MIN_REQUEST_SPACING - Duration::from_millis(100));

        // an old request admits the next one immediately
        if let Some(long_ago) = Instant::now().checked_sub(2 * MIN_REQUEST_SPACING) {
            assert_eq!(spacing_delay(Some(long_ago)), Duration::ZERO);
        }
    }

    #[tokio::test]
    async fn disabled_lookups_do_not_touch_the_network_or_cache() {
        let geocoder = Geocoder::new("http://localhost/reverse", false);
        assert_eq!(geocoder.lookup(-34.6522, -58.5338).await, "");
        assert_eq!(geocoder.cache_size().await, 0);
    }
}
