//! # rescuegraph-prebuilt - Ready-Made Response Workflows
//!
//! Building blocks and a complete workflow for incident response on top of
//! `rescuegraph-core`:
//!
//! - **[Allocation](allocation)** - rank mobile units by capability tier and distance,
//!   then refine by routed travel time
//! - **[Collaborators](collaborators)** - traits for the mapping service, device
//!   gateway and knowledge store, plus static implementations
//! - **[Rescue dispatch](dispatch)** - intake, allocation, travel estimates, human
//!   approval, bounded dispatch retries and a report, as one durable graph
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use rescuegraph_core::{EngineConfig, StartOptions, WorkflowEngine};
//! use rescuegraph_prebuilt::{
//!     initial_state, rescue_dispatch_graph, DispatchServices, DispatchSettings,
//!     LoggingGateway, StaticMappingService,
//! };
//!
//! let engine = WorkflowEngine::new(EngineConfig::default());
//! let services = DispatchServices::new(
//!     Arc::new(StaticMappingService::new()),
//!     Arc::new(LoggingGateway),
//! );
//! engine.register(rescue_dispatch_graph(services, DispatchSettings::default()).compile()?);
//!
//! let outcome = engine
//!     .start_workflow("rescue_dispatch", initial_state("inc-1", "c", "t", &task, &units)?, Default::default())
//!     .await?;
//! assert!(outcome.is_suspended());
//! ```

pub mod allocation;
pub mod collaborators;
pub mod dispatch;
pub mod error;
pub mod settings;

pub use allocation::{
    classify, haversine_km, rank_candidates, refine_with_travel_times, Assignment,
    CapabilityMatch, GeoPoint, RankKey, RankMetric, ResourceCandidate, EARTH_RADIUS_KM,
};
pub use collaborators::{
    DeviceGateway, DispatchAck, DispatchCommand, KnowledgeStore, LoggingGateway, MappingService,
    RouteEstimate, StaticKnowledgeStore, StaticMappingService,
};
pub use dispatch::{
    initial_state, keys, rescue_dispatch_graph, DispatchServices, TaskRequest, GRAPH_NAME,
};
pub use error::{DeviceError, DispatchError, Result};
pub use settings::{DispatchSettings, DISPATCH_ENV_PREFIX};
