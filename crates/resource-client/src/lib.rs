//! Resource Client
//!
//! A small client library for working with one Kubernetes resource type in one
//! namespace, without compile-time knowledge of the resource schema.
//! Provides list, get, create, patch and watch over dynamic objects.
//!
//! # Example
//!
//! ```no_run
//! use resource_client::{KubeResourceClient, ResourceClient, ResourcePatch, ResourceType};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let deployments = KubeResourceClient::new(
//!     client,
//!     "apps/v1.Deployment".parse::<ResourceType>()?,
//!     "default",
//! );
//!
//! // List everything of this type
//! let list = deployments.list().await?;
//! println!("{} deployments at {:?}", list.items.len(), list.resource_version());
//!
//! // Merge a partial document into one of them
//! deployments
//!     .patch("web", ResourcePatch::Merge(serde_json::json!({"metadata": {"labels": {"a": "b"}}})))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod resource_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeResourceClient;
pub use error::ResourceClientError;
pub use models::*;
pub use resource_trait::{ResourceClient, WatchStream};
#[cfg(feature = "test-util")]
pub use mock::MockResourceClient;
