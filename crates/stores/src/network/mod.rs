//! Network store - deliver batches to a remote peer
//!
//! The peer is either a fixed `remote_host`/`remote_port` or a named
//! `smc_service` resolved through [`ServiceDiscovery`]. With
//! `use_conn_pool = "yes"` stores share one pooled connection per peer;
//! otherwise each store owns a private connection.
//!
//! A batch is accepted only when the peer answers OK. `TRY_LATER` and
//! transport failures leave the entries the peer has not taken with the
//! caller. Entries too large to frame are dropped and counted as lost.

mod discovery;
mod pool;
mod transport;

pub use discovery::{ServiceCache, ServiceDiscovery, StaticDiscovery};
pub use pool::{Connection, ConnectionPool, SendResult, Threshold};
pub use transport::{Connector, Peer, TcpConnector, TcpTransport, Transport, TransportError};

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use sluice_config::StoreConf;
use sluice_protocol::MessageBatch;

use crate::{Store, StoreContext, StoreCore, StoreType};

pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_SERVICE_CACHE_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone)]
struct NetworkSettings {
    use_conn_pool: bool,
    service: Option<String>,
    service_options: String,
    service_cache_timeout: Duration,
    remote_host: String,
    remote_port: u64,
    timeout: Duration,
    threshold: Threshold,
    threshold_delta: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            use_conn_pool: false,
            service: None,
            service_options: String::new(),
            service_cache_timeout: Duration::from_secs(DEFAULT_SERVICE_CACHE_TIMEOUT_SECS),
            remote_host: String::new(),
            remote_port: 0,
            timeout: Duration::from_millis(DEFAULT_SOCKET_TIMEOUT_MS),
            threshold: Threshold::Unset,
            threshold_delta: 0,
        }
    }
}

#[derive(Debug)]
struct NetworkState {
    /// Guards against double closes, which would unbalance pool refcounts
    opened: bool,
    pool_key: Option<String>,
    unpooled: Option<Connection>,
    services: ServiceCache,
}

impl NetworkState {
    fn new(cache_timeout: Duration) -> Self {
        Self {
            opened: false,
            pool_key: None,
            unpooled: None,
            services: ServiceCache::new(cache_timeout),
        }
    }
}

/// Store forwarding batches to a remote peer
#[derive(Debug)]
pub struct NetworkStore {
    core: StoreCore,
    settings: NetworkSettings,
    state: Mutex<NetworkState>,
}

impl NetworkStore {
    pub fn new(ctx: StoreContext, category: &str, multi_category: bool) -> Self {
        let settings = NetworkSettings::default();
        Self {
            core: StoreCore::new(ctx, StoreType::Network, category, multi_category),
            state: Mutex::new(NetworkState::new(settings.service_cache_timeout)),
            settings,
        }
    }

    /// Peer to connect to, or `None` with the status set
    fn resolve_peer(&self, state: &mut NetworkState) -> Option<Peer> {
        let settings = &self.settings;
        if let Some(service) = &settings.service {
            let discovery = self.core.ctx().discovery().clone();
            let servers =
                state
                    .services
                    .servers(discovery.as_ref(), service, &settings.service_options);
            if servers.is_empty() {
                tracing::error!(
                    category = %self.core.category(),
                    service = %service,
                    "failed to get servers for service"
                );
                self.core.set_status("Could not get list of servers from smc");
                return None;
            }
            return Some(Peer::service(service.clone(), servers.to_vec()));
        }

        let port = u16::try_from(settings.remote_port).unwrap_or(0);
        if port == 0 || settings.remote_host.is_empty() {
            tracing::error!(
                category = %self.core.category(),
                host = %settings.remote_host,
                port = settings.remote_port,
                "bad config - won't attempt to connect"
            );
            self.core.set_status("Bad config - invalid location for remote server");
            return None;
        }
        Some(Peer::host(settings.remote_host.clone(), port))
    }

    fn open_unpooled(&self, state: &mut NetworkState, peer: Peer) -> bool {
        if let Some(conn) = state.unpooled.as_ref()
            && conn.is_open()
        {
            return true;
        }

        let ctx = self.core.ctx();
        let transport = ctx.connector().transport(&peer, self.settings.timeout);
        let mut conn = Connection::new(
            peer,
            transport,
            self.settings.threshold,
            self.settings.threshold_delta,
            ctx.stats().clone(),
        );
        let opened = conn.open();
        state.unpooled = Some(conn);
        opened
    }
}

impl Store for NetworkStore {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn copy(&self, category: &str) -> Box<dyn Store> {
        Box::new(Self {
            core: self.core.rebind(category),
            settings: self.settings.clone(),
            state: Mutex::new(NetworkState::new(self.settings.service_cache_timeout)),
        })
    }

    fn configure(&mut self, conf: &StoreConf) {
        let settings = &mut self.settings;

        // a service takes precedence over host and port
        if let Some(service) = conf.get_string("smc_service") {
            settings.service = Some(service);
            if let Some(options) = conf.get_string("service_options") {
                settings.service_options = options;
            }
            if let Some(secs) = conf.get_unsigned("service_cache_timeout") {
                settings.service_cache_timeout = Duration::from_secs(secs);
            }
        } else {
            settings.service = None;
            if let Some(host) = conf.get_string("remote_host") {
                settings.remote_host = host;
            }
            if let Some(port) = conf.get_unsigned("remote_port") {
                settings.remote_port = port;
            }
        }

        settings.timeout = conf
            .get_int("timeout")
            .and_then(|ms| u64::try_from(ms).ok())
            .map_or(Duration::from_millis(DEFAULT_SOCKET_TIMEOUT_MS), Duration::from_millis);
        settings.use_conn_pool = conf.get_string("use_conn_pool").as_deref() == Some("yes");
        settings.threshold = Threshold::from_config(conf.get_unsigned("max_msg_before_reconnect"));
        settings.threshold_delta = conf.get_unsigned("msg_threshold_delta").unwrap_or(0);

        if settings.use_conn_pool {
            let pool = self.core.ctx().pool();
            match &settings.service {
                Some(_) => pool.merge_reconnect_thresholds(
                    &HashMap::new(),
                    settings.threshold,
                    settings.threshold_delta,
                ),
                None => {
                    let key = format!("{}:{}", settings.remote_host, settings.remote_port);
                    pool.merge_reconnect_thresholds(
                        &HashMap::from([(key, settings.threshold)]),
                        Threshold::Unset,
                        settings.threshold_delta,
                    );
                }
            }
        }

        *self.state.get_mut() = NetworkState::new(settings.service_cache_timeout);
    }

    fn open(&self) -> bool {
        let mut state = self.state.lock();
        let Some(peer) = self.resolve_peer(&mut state) else {
            return false;
        };

        let opened = if self.settings.use_conn_pool {
            let pool = self.core.ctx().pool();
            // give back our reference before taking a new one
            if state.opened
                && let Some(key) = state.pool_key.take()
            {
                pool.close(&key);
            }
            let opened = pool.open(&peer, self.settings.timeout);
            state.pool_key = opened.then(|| peer.key());
            opened
        } else {
            self.open_unpooled(&mut state, peer)
        };

        state.opened = opened;
        if opened {
            self.core.clear_status();
        } else {
            self.core.set_status("Failed to connect");
        }
        opened
    }

    fn is_open(&self) -> bool {
        self.state.lock().opened
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if !state.opened {
            return;
        }
        state.opened = false;

        if self.settings.use_conn_pool {
            if let Some(key) = state.pool_key.take() {
                self.core.ctx().pool().close(&key);
            }
        } else if let Some(conn) = state.unpooled.as_mut() {
            conn.close();
        }
    }

    fn flush(&self) {}

    fn handle_messages(&self, batch: &mut MessageBatch) -> bool {
        let mut state = self.state.lock();
        if !state.opened {
            tracing::error!(
                category = %self.core.category(),
                "logic error: handle_messages called on closed network store"
            );
            return false;
        }

        let result = if self.settings.use_conn_pool {
            let key = state.pool_key.clone();
            // pool sends lock only the connection
            drop(state);
            match key {
                Some(key) => self.core.ctx().pool().send(&key, batch),
                None => SendResult::Fatal,
            }
        } else {
            match state.unpooled.as_mut() {
                Some(conn) => conn.send(batch),
                None => {
                    tracing::error!(
                        category = %self.core.category(),
                        "logic error: no private connection"
                    );
                    SendResult::Fatal
                }
            }
        };

        result == SendResult::Ok
    }
}

impl Drop for NetworkStore {
    fn drop(&mut self) {
        Store::close(self);
    }
}
