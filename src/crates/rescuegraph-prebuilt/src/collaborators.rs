//! External collaborators of the dispatch workflow
//!
//! Steps never talk to the outside world directly. They hold these traits as
//! `Arc<dyn ..>` and call them inside recorded effects, so each geocode, route or
//! device command runs at most once per instance.
//!
//! The static implementations here back the CLI and tests; production deployments
//! plug in their own mapping provider and device gateway.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

use crate::allocation::{haversine_km, GeoPoint};
use crate::error::{DeviceError, DispatchError, Result};

/// Routed distance and duration between two points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteEstimate {
    pub distance_km: f64,
    pub duration_secs: f64,
}

/// Geocoding and routing
#[async_trait]
pub trait MappingService: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<GeoPoint>;

    async fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<RouteEstimate>;
}

/// Command sent to a physical unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchCommand {
    pub unit_id: String,
    pub task_id: String,
    pub destination: GeoPoint,
    pub instructions: String,
}

/// Acknowledgment returned by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchAck {
    pub unit_id: String,
    pub command_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<f64>,
}

/// Sends control commands to units
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    async fn dispatch(&self, command: &DispatchCommand) -> std::result::Result<DispatchAck, DeviceError>;
}

/// Read-only lookup of reference material (hazards, protocols, site notes)
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn query(&self, query: &str, limit: usize) -> Result<Vec<Value>>;
}

/// Lookup-table geocoder with straight-line routing
///
/// Route distance is the great-circle distance times a detour factor; duration
/// assumes a constant speed.
#[derive(Debug, Clone)]
pub struct StaticMappingService {
    places: HashMap<String, GeoPoint>,
    speed_kmh: f64,
    detour_factor: f64,
}

impl Default for StaticMappingService {
    fn default() -> Self {
        Self {
            places: HashMap::new(),
            speed_kmh: 50.0,
            detour_factor: 1.3,
        }
    }
}

impl StaticMappingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_place(mut self, name: &str, point: GeoPoint) -> Self {
        self.places.insert(normalize(name), point);
        self
    }

    pub fn with_speed_kmh(mut self, speed_kmh: f64) -> Self {
        self.speed_kmh = speed_kmh;
        self
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

#[async_trait]
impl MappingService for StaticMappingService {
    async fn geocode(&self, address: &str) -> Result<GeoPoint> {
        self.places
            .get(&normalize(address))
            .copied()
            .ok_or_else(|| DispatchError::Mapping(format!("unknown address '{}'", address)))
    }

    async fn route(&self, from: GeoPoint, to: GeoPoint) -> Result<RouteEstimate> {
        if self.speed_kmh <= 0.0 {
            return Err(DispatchError::Mapping("speed must be positive".into()));
        }
        let distance_km = haversine_km(from, to) * self.detour_factor;
        Ok(RouteEstimate {
            distance_km,
            duration_secs: distance_km / self.speed_kmh * 3600.0,
        })
    }
}

/// Gateway that acknowledges every command and logs it
#[derive(Debug, Clone, Default)]
pub struct LoggingGateway;

#[async_trait]
impl DeviceGateway for LoggingGateway {
    async fn dispatch(&self, command: &DispatchCommand) -> std::result::Result<DispatchAck, DeviceError> {
        info!(
            unit_id = %command.unit_id,
            task_id = %command.task_id,
            lat = command.destination.lat,
            lng = command.destination.lng,
            "Dispatch command sent"
        );
        Ok(DispatchAck {
            unit_id: command.unit_id.clone(),
            command_id: format!("{}:{}", command.task_id, command.unit_id),
            eta_secs: None,
        })
    }
}

/// Keyword-matched in-memory documents
#[derive(Debug, Clone, Default)]
pub struct StaticKnowledgeStore {
    documents: Vec<(String, Value)>,
}

impl StaticKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document searchable by `text`
    pub fn with_document(mut self, text: impl Into<String>, document: Value) -> Self {
        self.documents.push((text.into().to_lowercase(), document));
        self
    }
}

#[async_trait]
impl KnowledgeStore for StaticKnowledgeStore {
    async fn query(&self, query: &str, limit: usize) -> Result<Vec<Value>> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        Ok(self
            .documents
            .iter()
            .filter(|(text, _)| terms.iter().any(|term| text.contains(term.as_str())))
            .take(limit)
            .map(|(_, document)| document.clone())
            .collect())
    }
}
