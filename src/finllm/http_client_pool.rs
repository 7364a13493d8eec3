//! Shared HTTP clients with persistent connections.
//!
//! Every component that talks to an external HTTP API fetches its client
//! here, one pooled `reqwest::Client` per base URL, so repeated calls reuse
//! connections instead of paying DNS and TLS setup each time.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

lazy_static! {
    /// Cache of HTTP clients indexed by base URL.
    static ref CLIENT_POOL: Mutex<HashMap<String, reqwest::Client>> = Mutex::new(HashMap::new());
}

/// Creates or retrieves the shared HTTP client for the given base URL.
///
/// `reqwest::Client` is internally reference counted, so the returned clone
/// shares the connection pool with every other holder.
pub fn get_or_create_client(base_url: &str) -> reqwest::Client {
    let mut pool = CLIENT_POOL.lock().unwrap();
    pool.entry(base_url.to_string())
        .or_insert_with(create_pooled_client)
        .clone()
}

/// Connection pooling with idle keepalive. The per-request timeout is left
/// to the caller since streaming responses can legitimately run for minutes.
fn create_pooled_client() -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_base_url_reuses_the_pooled_client() {
        let url = "https://generativelanguage.googleapis.com/v1beta";
        let _first = get_or_create_client(url);
        let _second = get_or_create_client(url);
        assert!(CLIENT_POOL.lock().unwrap().contains_key(url));
    }

    #[test]
    fn test_distinct_base_urls_get_distinct_entries() {
        let gemini = "https://generativelanguage.googleapis.com/v1beta";
        let search = "https://www.googleapis.com/customsearch/v1";
        let _a = get_or_create_client(gemini);
        let _b = get_or_create_client(search);
        let pool = CLIENT_POOL.lock().unwrap();
        assert!(pool.contains_key(gemini));
        assert!(pool.contains_key(search));
    }
}
