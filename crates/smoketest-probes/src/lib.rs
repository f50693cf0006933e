//! Smoke test probes
//!
//! One probe per external dependency. Every probe is a short sequential
//! script of named steps over a vendor seam (a trait), so it runs against the
//! real client in production and against an in-memory fake in tests.
//!
//! Vendor clients sit behind cargo features (`postgres`, `mysql`, `redis`,
//! `rabbitmq`, `kubernetes`, `s3`), all enabled by default.

pub mod bindings;
pub mod broker;
pub mod cache;
pub mod file_share;
pub mod identity;
pub mod kubernetes;
pub mod me;
pub mod misconfigured;
pub mod object_store;
pub mod sql;

pub use bindings::{Binding, BindingError, ServiceBindings, VolumeMount};
pub use broker::{BrokerProbe, BrokerSettings};
pub use cache::{CacheProbe, CacheSettings};
pub use file_share::FileShareProbe;
pub use identity::{IdentityProbe, IdentitySettings};
pub use kubernetes::{IngressMismatch, IngressRule, KubernetesProbe, KubernetesSettings};
pub use me::MeProbe;
pub use misconfigured::MisconfiguredProbe;
pub use object_store::{ObjectStoreProbe, ObjectStoreSettings};
pub use sql::{SqlProbe, SqlSettings};
