//! Core data model for annotation graphs.

pub mod anchor;
pub mod annotation;
pub mod change;
pub mod confidence;
pub mod layer;
pub mod schema;

pub use anchor::{Anchor, AnchorId};
pub use annotation::{Annotation, AnnotationId};
pub use change::{Change, ChangeState, ChangeTracker, Field, Operation, Target};
pub use confidence::Confidence;
pub use layer::{Alignment, Layer, LayerId};
pub use schema::{Schema, SchemaError};
