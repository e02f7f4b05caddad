// src/core/cluster/control.rs

//! The control connection: one dedicated connection that bootstraps the
//! driver's view of the cluster, keeps the host registry and schema catalog
//! fresh, and listens for topology, status and schema push events.
//!
//! All registry and metadata mutations triggered by server events flow
//! through this module's single event-loop task, so concurrent changes are
//! serialized by construction.

use crate::connection::connection::{Connection, ConnectionOptions};
use crate::core::cluster::host::{HostInfo, HostRef, HostState};
use crate::core::cluster::metadata::Metadata;
use crate::core::cluster::registry::{HostRegistry, PoolingContext};
use crate::core::cluster::schema::{
    self, KeyspaceMetadata, RowSet, SchemaShape, TableRows,
};
use crate::core::errors::ZirconError;
use crate::core::events::{ClusterEvent, EventBus};
use crate::core::policies::address::AddressTranslator;
use crate::core::policies::load_balancing::{LoadBalancingPolicy, QueryContext};
use crate::core::protocol::frame::ProtocolVersion;
use crate::core::protocol::request::{QueryParameters, Request};
use crate::core::protocol::response::{
    CqlResult, Response, SchemaChange, SchemaChangeTarget, ServerEvent, decode_row_values,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Page size for control queries; peers and schema tables are small but the
/// columns table of a wide cluster is not.
const CONTROL_PAGE_SIZE: i32 = 5000;
/// Grace period before re-reading peers after a NEW_NODE event, giving the
/// node time to finish joining.
const TOPOLOGY_REFRESH_DELAY: Duration = Duration::from_secs(1);
/// How often the event loop verifies the control connection is still alive.
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Fixed inputs of the control connection.
pub struct ControlConfig {
    pub contact_points: Vec<SocketAddr>,
    pub max_protocol_version: ProtocolVersion,
    pub connection_options: ConnectionOptions,
    /// Quarantine before a host announced UP is probed and published.
    pub status_up_delay: Duration,
    /// When false, schema refreshes only happen on demand.
    pub metadata_sync_enabled: bool,
}

struct ControlShared {
    config: ControlConfig,
    registry: Arc<HostRegistry>,
    metadata: Arc<Metadata>,
    event_bus: Arc<EventBus>,
    translator: Arc<dyn AddressTranslator>,
    load_balancing: Arc<dyn LoadBalancingPolicy>,
    pooling: RwLock<Option<PoolingContext>>,
    connection: RwLock<Option<Connection>>,
    schema_shape: RwLock<SchemaShape>,
    shutdown: AtomicBool,
}

/// Handle to the control subsystem.
#[derive(Clone)]
pub struct ControlConnection {
    shared: Arc<ControlShared>,
}

impl ControlConnection {
    /// Bootstraps against the contact points, seeds registry and metadata,
    /// subscribes to events and spawns the event loop. Returns the handle
    /// and the negotiated protocol version, which every other connection of
    /// the driver reuses.
    pub async fn connect(
        config: ControlConfig,
        registry: Arc<HostRegistry>,
        metadata: Arc<Metadata>,
        event_bus: Arc<EventBus>,
        translator: Arc<dyn AddressTranslator>,
        load_balancing: Arc<dyn LoadBalancingPolicy>,
    ) -> Result<(ControlConnection, ProtocolVersion), ZirconError> {
        let shared = Arc::new(ControlShared {
            config,
            registry,
            metadata,
            event_bus,
            translator,
            load_balancing,
            pooling: RwLock::new(None),
            connection: RwLock::new(None),
            schema_shape: RwLock::new(SchemaShape::V3),
            shutdown: AtomicBool::new(false),
        });
        let control = ControlConnection { shared };

        // All contact points become hosts up front; bootstrap then walks
        // them in order until one answers.
        for &contact_point in &control.shared.config.contact_points {
            control
                .shared
                .registry
                .add_host(contact_point, contact_point, true);
        }

        let mut errors: HashMap<SocketAddr, String> = HashMap::new();
        for &contact_point in &control.shared.config.contact_points {
            match control.bootstrap_host(contact_point).await {
                Ok(version) => {
                    let events = control.subscribe_events().await?;
                    tokio::spawn(event_loop(control.shared.clone(), events));
                    return Ok((control, version));
                }
                Err(e) => {
                    warn!("Control bootstrap via {} failed: {}", contact_point, e);
                    errors.insert(contact_point, e.to_string());
                }
            }
        }
        Err(ZirconError::NoHostAvailable { errors })
    }

    /// Opens the control connection to one candidate host and runs the full
    /// bootstrap: negotiate, read local/peers, read the schema.
    async fn bootstrap_host(&self, addr: SocketAddr) -> Result<ProtocolVersion, ZirconError> {
        let connection = Connection::negotiate(
            addr,
            self.shared.config.max_protocol_version,
            &self.shared.config.connection_options,
        )
        .await?;
        let version = connection.version();
        info!(
            "Control connection established to {} using protocol {}",
            addr, version
        );
        *self.shared.connection.write() = Some(connection);

        self.refresh_hosts().await?;
        if self.shared.config.metadata_sync_enabled {
            self.refresh_full_schema().await?;
        }
        if let Some(host) = self.shared.registry.host(addr) {
            host.set_state(HostState::Up);
        }
        Ok(version)
    }

    /// Supplies the pooling context once the session has built it; distances
    /// are applied to all currently known hosts.
    pub fn attach_pooling(&self, ctx: PoolingContext) {
        self.shared
            .registry
            .apply_distances(self.shared.load_balancing.as_ref(), &ctx);
        *self.shared.pooling.write() = Some(ctx);
    }

    pub fn connection(&self) -> Option<Connection> {
        self.shared.connection.read().clone()
    }

    pub fn schema_shape(&self) -> SchemaShape {
        *self.shared.schema_shape.read()
    }

    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(connection) = self.connection() {
            connection.close();
        }
    }

    async fn subscribe_events(&self) -> Result<broadcast::Receiver<ServerEvent>, ZirconError> {
        let connection = self
            .connection()
            .ok_or(ZirconError::ConnectionClosed)?;
        connection
            .register_events(&["TOPOLOGY_CHANGE", "STATUS_CHANGE", "SCHEMA_CHANGE"])
            .await
    }

    /// Reads `system.local` and `system.peers`, reconciling the registry:
    /// new peers are added, vanished peers removed, placement data updated,
    /// and the token ring rebuilt when token ownership moved.
    pub async fn refresh_hosts(&self) -> Result<(), ZirconError> {
        let connection = self
            .connection()
            .ok_or(ZirconError::ConnectionClosed)?;
        let control_addr = connection.addr();

        let local = query_rows(&connection, "SELECT * FROM system.local").await?;
        let peers = query_rows(&connection, "SELECT * FROM system.peers").await?;

        let mut tokens_changed = false;
        let mut live_addresses: Vec<SocketAddr> = Vec::new();

        if let Some(local_row) = local.views().next() {
            if let Some(partitioner) = local_row.string("partitioner") {
                if self.shared.metadata.partitioner().as_deref() != Some(partitioner.as_str()) {
                    self.shared.metadata.set_partitioner(&partitioner);
                    tokens_changed = true;
                }
            }
            if let Some(cluster_name) = local_row.string("cluster_name") {
                self.shared.metadata.set_cluster_name(cluster_name);
            }
            if let Some(release_version) = local_row.str("release_version") {
                *self.shared.schema_shape.write() =
                    SchemaShape::from_release_version(release_version);
            }

            let (host, _) = self
                .shared
                .registry
                .add_host(control_addr, control_addr, false);
            tokens_changed |= host.update_info(host_info_from_row(&local_row));
            live_addresses.push(control_addr);
        }

        for peer_row in peers.views() {
            let Some((broadcast, dial)) =
                peer_addresses(&peer_row, control_addr, self.shared.translator.as_ref())
            else {
                continue;
            };
            let (host, added) = self.shared.registry.add_host(dial, broadcast, false);
            tokens_changed |= host.update_info(host_info_from_row(&peer_row)) || added;
            live_addresses.push(dial);
            if added {
                if let Some(ctx) = self.shared.pooling.read().clone() {
                    let distance = self.shared.load_balancing.distance(&host);
                    self.shared.registry.ensure_pool(dial, distance, &ctx);
                }
            }
        }

        // Anything known but no longer present is gone (contact points are
        // kept by the registry regardless).
        for host in self.shared.registry.hosts() {
            if !live_addresses.contains(&host.address()) {
                tokens_changed |= self.shared.registry.remove_host(host.address());
            }
        }

        if tokens_changed {
            self.shared
                .metadata
                .rebuild_ring(&self.shared.registry.hosts());
        } else {
            self.shared.metadata.invalidate_replica_maps();
        }
        Ok(())
    }

    /// Reads the entire schema catalog for the current shape.
    pub async fn refresh_full_schema(&self) -> Result<(), ZirconError> {
        let connection = self
            .connection()
            .ok_or(ZirconError::ConnectionClosed)?;
        let shape = self.schema_shape();
        let catalog = fetch_full_schema(&connection, shape).await?;
        self.shared.metadata.replace_keyspaces(catalog);
        debug!("Schema refreshed ({} keyspaces)", self.shared.metadata.keyspace_names().len());
        Ok(())
    }

    /// Refreshes one keyspace (strategy and all its objects), with a
    /// single-flight guard: a refresh racing with an identical one waits,
    /// observes the bumped epoch, and skips the duplicate fetch.
    pub async fn refresh_keyspace(&self, keyspace: &str) -> Result<(), ZirconError> {
        let lock = self.shared.metadata.refresh_lock(keyspace);
        let epoch_before = self.shared.metadata.schema_epoch();
        let _guard = lock.lock().await;
        if self.shared.metadata.schema_epoch() != epoch_before {
            // Someone else refreshed while we waited.
            return Ok(());
        }
        let connection = self
            .connection()
            .ok_or(ZirconError::ConnectionClosed)?;
        let shape = self.schema_shape();
        match fetch_keyspace(&connection, shape, keyspace).await? {
            Some(ks) => self.shared.metadata.put_keyspace(ks),
            None => self.shared.metadata.remove_keyspace(keyspace),
        }
        Ok(())
    }
}

// --- Row helpers ---

/// Runs a control query, following paging until exhausted, and decodes every
/// row with the response's own metadata.
pub async fn query_rows(connection: &Connection, cql: &str) -> Result<RowSet, ZirconError> {
    let mut result = RowSet::default();
    let mut paging_state = None;
    loop {
        let request = Request::Query {
            query: cql.to_owned(),
            params: QueryParameters {
                page_size: Some(CONTROL_PAGE_SIZE),
                paging_state: paging_state.take(),
                ..Default::default()
            },
        };
        let (response, _) = connection.send(&request).await?;
        match response {
            Response::Result(boxed) => match *boxed {
                CqlResult::Rows(raw) => {
                    if result.columns.is_empty() {
                        result.columns = raw.metadata.columns.clone();
                    }
                    let rows = decode_row_values(&raw, &result.columns, connection.version())?;
                    result.rows.extend(rows);
                    match raw.metadata.paging_state {
                        Some(state) => paging_state = Some(state),
                        None => return Ok(result),
                    }
                }
                CqlResult::Void => return Ok(result),
                other => {
                    return Err(ZirconError::Protocol(format!(
                        "Control query returned an unexpected result: {other:?}"
                    )));
                }
            },
            Response::Error { error, message } => {
                return Err(ZirconError::Db { error, message });
            }
            other => {
                return Err(ZirconError::Protocol(format!(
                    "Unexpected response to control query: {other:?}"
                )));
            }
        }
    }
}

fn host_info_from_row(row: &schema::RowView<'_>) -> HostInfo {
    HostInfo {
        host_id: row.uuid("host_id"),
        datacenter: row.string("data_center"),
        rack: row.string("rack"),
        tokens: row.string_list("tokens").unwrap_or_default(),
        release_version: row.string("release_version"),
        schema_version: row.uuid("schema_version"),
    }
}

/// Extracts (broadcast, dial) addresses from one peers row. A peer whose
/// `rpc_address` is 0.0.0.0 is dialed at its broadcast address; that address
/// bypasses translation since it was never broadcast by the peer itself.
fn peer_addresses(
    row: &schema::RowView<'_>,
    control_addr: SocketAddr,
    translator: &dyn AddressTranslator,
) -> Option<(SocketAddr, SocketAddr)> {
    let port = control_addr.port();
    let broadcast_ip = row.inet("peer")?;
    let broadcast = SocketAddr::new(broadcast_ip, port);

    let rpc_ip = row.inet("rpc_address").unwrap_or(broadcast_ip);
    if rpc_ip == IpAddr::V4(Ipv4Addr::UNSPECIFIED) {
        warn!(
            "Peer {} reports rpc_address 0.0.0.0; using its broadcast address instead",
            broadcast_ip
        );
        return Some((broadcast, broadcast));
    }
    let dial = translator.translate(SocketAddr::new(rpc_ip, port));
    Some((broadcast, dial))
}

// --- Schema fetching ---

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

async fn fetch_full_schema(
    connection: &Connection,
    shape: SchemaShape,
) -> Result<HashMap<String, KeyspaceMetadata>, ZirconError> {
    let ks_table = match shape {
        SchemaShape::V3 => "system_schema.keyspaces",
        _ => "system.schema_keyspaces",
    };
    let keyspace_rows = query_rows(connection, &format!("SELECT * FROM {ks_table}")).await?;

    let mut catalog: HashMap<String, KeyspaceMetadata> = HashMap::new();
    for row in keyspace_rows.views() {
        match schema::parse_keyspace_row(shape, &row) {
            Ok(ks) => {
                catalog.insert(ks.name.clone(), ks);
            }
            Err(e) => warn!("Skipping malformed keyspace row: {}", e),
        }
    }

    let (tables_table, columns_table) = match shape {
        SchemaShape::V3 => ("system_schema.tables", "system_schema.columns"),
        _ => ("system.schema_columnfamilies", "system.schema_columns"),
    };
    let tables = query_rows(connection, &format!("SELECT * FROM {tables_table}")).await?;
    let columns = query_rows(connection, &format!("SELECT * FROM {columns_table}")).await?;
    let indexes = if shape == SchemaShape::V3 {
        Some(query_rows(connection, "SELECT * FROM system_schema.indexes").await?)
    } else {
        None
    };

    let tables_by_ks = partition_by_keyspace(&tables);
    let columns_by_ks = partition_by_keyspace(&columns);
    let indexes_by_ks = indexes.as_ref().map(partition_by_keyspace);

    for (name, keyspace) in catalog.iter_mut() {
        let empty = RowSet {
            columns: tables.columns.clone(),
            rows: Vec::new(),
        };
        let empty_columns = RowSet {
            columns: columns.columns.clone(),
            rows: Vec::new(),
        };
        let rows = TableRows {
            tables: tables_by_ks.get(name).unwrap_or(&empty),
            columns: columns_by_ks.get(name).unwrap_or(&empty_columns),
            indexes: indexes_by_ks
                .as_ref()
                .and_then(|by_ks| by_ks.get(name)),
        };
        keyspace.tables = schema::parse_tables(shape, name, &rows)?;
    }

    if shape == SchemaShape::V3 {
        let views = query_rows(connection, "SELECT * FROM system_schema.views").await?;
        let types = query_rows(connection, "SELECT * FROM system_schema.types").await?;
        let functions = query_rows(connection, "SELECT * FROM system_schema.functions").await?;
        let aggregates = query_rows(connection, "SELECT * FROM system_schema.aggregates").await?;
        let views_by_ks = partition_by_keyspace(&views);
        let types_by_ks = partition_by_keyspace(&types);
        let functions_by_ks = partition_by_keyspace(&functions);
        let aggregates_by_ks = partition_by_keyspace(&aggregates);

        for (name, keyspace) in catalog.iter_mut() {
            if let Some(rows) = views_by_ks.get(name) {
                keyspace.views =
                    schema::parse_views(name, rows, columns_by_ks.get(name).unwrap_or(rows));
            }
            if let Some(rows) = types_by_ks.get(name) {
                keyspace.user_types = schema::parse_user_types(name, rows);
            }
            if let Some(rows) = functions_by_ks.get(name) {
                keyspace.functions = schema::parse_functions(name, rows);
            }
            if let Some(rows) = aggregates_by_ks.get(name) {
                keyspace.aggregates = schema::parse_aggregates(name, rows);
            }
        }
    }
    Ok(catalog)
}

/// Fetches one keyspace; `None` when it no longer exists (dropped).
async fn fetch_keyspace(
    connection: &Connection,
    shape: SchemaShape,
    keyspace: &str,
) -> Result<Option<KeyspaceMetadata>, ZirconError> {
    let quoted = quote_string(keyspace);
    let ks_table = match shape {
        SchemaShape::V3 => "system_schema.keyspaces",
        _ => "system.schema_keyspaces",
    };
    let keyspace_rows = query_rows(
        connection,
        &format!("SELECT * FROM {ks_table} WHERE keyspace_name = {quoted}"),
    )
    .await?;
    let Some(row) = keyspace_rows.views().next() else {
        return Ok(None);
    };
    let mut ks = schema::parse_keyspace_row(shape, &row)?;

    let (tables_table, columns_table) = match shape {
        SchemaShape::V3 => ("system_schema.tables", "system_schema.columns"),
        _ => ("system.schema_columnfamilies", "system.schema_columns"),
    };
    let tables = query_rows(
        connection,
        &format!("SELECT * FROM {tables_table} WHERE keyspace_name = {quoted}"),
    )
    .await?;
    let columns = query_rows(
        connection,
        &format!("SELECT * FROM {columns_table} WHERE keyspace_name = {quoted}"),
    )
    .await?;
    let indexes = if shape == SchemaShape::V3 {
        Some(
            query_rows(
                connection,
                &format!("SELECT * FROM system_schema.indexes WHERE keyspace_name = {quoted}"),
            )
            .await?,
        )
    } else {
        None
    };
    ks.tables = schema::parse_tables(
        shape,
        keyspace,
        &TableRows {
            tables: &tables,
            columns: &columns,
            indexes: indexes.as_ref(),
        },
    )?;

    if shape == SchemaShape::V3 {
        let views = query_rows(
            connection,
            &format!("SELECT * FROM system_schema.views WHERE keyspace_name = {quoted}"),
        )
        .await?;
        let types = query_rows(
            connection,
            &format!("SELECT * FROM system_schema.types WHERE keyspace_name = {quoted}"),
        )
        .await?;
        let functions = query_rows(
            connection,
            &format!("SELECT * FROM system_schema.functions WHERE keyspace_name = {quoted}"),
        )
        .await?;
        let aggregates = query_rows(
            connection,
            &format!("SELECT * FROM system_schema.aggregates WHERE keyspace_name = {quoted}"),
        )
        .await?;
        ks.views = schema::parse_views(keyspace, &views, &columns);
        ks.user_types = schema::parse_user_types(keyspace, &types);
        ks.functions = schema::parse_functions(keyspace, &functions);
        ks.aggregates = schema::parse_aggregates(keyspace, &aggregates);
    }
    Ok(Some(ks))
}

fn partition_by_keyspace(rows: &RowSet) -> HashMap<String, RowSet> {
    let mut by_keyspace: HashMap<String, RowSet> = HashMap::new();
    for (index, view) in rows.views().enumerate() {
        let Some(keyspace) = view.string("keyspace_name") else {
            continue;
        };
        by_keyspace
            .entry(keyspace)
            .or_insert_with(|| RowSet {
                columns: rows.columns.clone(),
                rows: Vec::new(),
            })
            .rows
            .push(rows.rows[index].clone());
    }
    by_keyspace
}

// --- Event loop ---

async fn event_loop(shared: Arc<ControlShared>, mut events: broadcast::Receiver<ServerEvent>) {
    let control = ControlConnection {
        shared: shared.clone(),
    };
    let mut liveness = tokio::time::interval(LIVENESS_CHECK_INTERVAL);
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return;
        }
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => handle_server_event(&control, event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Control event stream lagged by {} events; refreshing hosts", skipped);
                        if let Err(e) = control.refresh_hosts().await {
                            warn!("Host refresh after event lag failed: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // Connection died; fall through to failover below.
                        match failover(&control).await {
                            Some(new_events) => events = new_events,
                            None => return,
                        }
                    }
                }
            }
            _ = liveness.tick() => {
                let alive = control.connection().is_some_and(|c| !c.is_closed());
                if !alive {
                    match failover(&control).await {
                        Some(new_events) => events = new_events,
                        None => return,
                    }
                }
            }
        }
    }
}

/// Picks a new live control host through the load balancing policy and
/// re-runs the bootstrap (without contact-point resolution). Returns the new
/// event subscription, or `None` when shutting down.
async fn failover(control: &ControlConnection) -> Option<broadcast::Receiver<ServerEvent>> {
    let shared = &control.shared;
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return None;
        }
        if let Some(old) = control.connection() {
            shared.registry.mark_down(old.addr());
        }
        *shared.connection.write() = None;

        let hosts = shared.registry.hosts();
        let mut plan = shared
            .load_balancing
            .new_plan(&hosts, &QueryContext::default());
        while let Some(candidate) = plan.next() {
            if candidate.state() == HostState::Down {
                continue;
            }
            info!("Control connection failing over to {}", candidate.address());
            match control.bootstrap_host(candidate.address()).await {
                Ok(_) => match control.subscribe_events().await {
                    Ok(events) => return Some(events),
                    Err(e) => {
                        warn!("Event registration on {} failed: {}", candidate.address(), e);
                    }
                },
                Err(e) => {
                    warn!(
                        "Control failover candidate {} failed: {}",
                        candidate.address(),
                        e
                    );
                }
            }
        }
        error!("Control connection could not fail over to any host; retrying shortly");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn handle_server_event(control: &ControlConnection, event: ServerEvent) {
    let shared = &control.shared;
    match event {
        ServerEvent::TopologyChange { change, address } => {
            debug!("Topology change {} for {}", change, address);
            // Peer tables lag the event slightly; give the cluster a moment
            // and then reconcile against the tables, which are the truth.
            tokio::time::sleep(TOPOLOGY_REFRESH_DELAY).await;
            if let Err(e) = control.refresh_hosts().await {
                warn!("Host refresh after topology change failed: {}", e);
            }
        }
        ServerEvent::StatusChange { change, address } => match change.as_str() {
            "DOWN" => {
                if let Some(host) = shared.registry.host_by_broadcast(address) {
                    shared.registry.mark_down(host.address());
                }
            }
            "UP" => {
                let delay = shared.config.status_up_delay;
                let shared = shared.clone();
                // Quarantine: probe only after the node had time to finish
                // starting, then publish host_up once the pool connects.
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if shared.shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    let Some(host) = shared.registry.host_by_broadcast(address) else {
                        return;
                    };
                    if let Err(e) = shared.registry.mark_up(host.address()).await {
                        warn!("Host {} announced UP but probe failed: {}", host.address(), e);
                    }
                });
            }
            other => debug!("Ignoring unknown status change '{}'", other),
        },
        ServerEvent::SchemaChange(change) => {
            handle_schema_change(control, change).await;
        }
    }
}

async fn handle_schema_change(control: &ControlConnection, change: SchemaChange) {
    let shared = &control.shared;
    if !shared.config.metadata_sync_enabled {
        shared
            .event_bus
            .publish(ClusterEvent::SchemaChanged(change));
        return;
    }
    // Keyspace-level changes can alter replication (the replica map drops
    // with the refresh); table-level and finer changes refresh only the
    // owning keyspace's objects. Both funnel through the single-flight
    // guard, which coalesces event bursts.
    let keyspace = change.target.keyspace().to_owned();
    if matches!(&change.target, SchemaChangeTarget::Keyspace { .. }) {
        debug!("Keyspace-level schema change for {}", keyspace);
    }
    match control.refresh_keyspace(&keyspace).await {
        Ok(()) => shared
            .event_bus
            .publish(ClusterEvent::SchemaChanged(change)),
        Err(e) => warn!("Schema refresh for {} failed: {}", keyspace, e),
    }
}
