//! Constructs for the CVAT deployment stack. Each construct emits its
//! resources into a [`cvat_core::Template`] and returns a handle holding
//! the logical ids and endpoints that later constructs wire against.

pub mod analytics;
pub mod cache;
pub mod cdn;
pub mod cluster;
pub mod connections;
pub mod database;
pub mod endpoint;
pub mod filesystem;
pub mod iam;
pub mod image;
pub mod load_balancer;
pub mod network;
pub mod secrets;
pub mod service;

pub use analytics::Analytics;
pub use cache::RedisCluster;
pub use cdn::Cdn;
pub use cluster::Cluster;
pub use connections::{Connections, SecurityGroup};
pub use database::ServerlessCluster;
pub use endpoint::Endpoint;
pub use filesystem::{AccessPoint, FileSystem};
pub use image::{AssetManifest, ContainerImage, ImageAsset, ImageAssetProps};
pub use load_balancer::{Listener, LoadBalancer, RoutingTable, TargetGroup};
pub use network::Vpc;
pub use secrets::{OauthSecret, Secret};
pub use service::{FargateService, HttpService, WorkerService};
