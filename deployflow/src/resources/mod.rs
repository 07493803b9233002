//! Declarative resource descriptors and their typed generation.
//!
//! This module provides:
//! - Immutable [`ResourceDescriptor`] values with validated identity
//! - Label and object selectors
//! - Programmatic manifest builders for the deployed application

mod descriptor;
pub mod manifests;

pub use descriptor::{
    LabelSelector, ResourceDescriptor, ResourceId, ResourceKind, Selector, MANAGED_BY_LABEL,
    MANAGED_BY_VALUE,
};
