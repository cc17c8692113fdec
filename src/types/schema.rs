//! The schema: an ordered forest of layers plus the distinguished layers
//! that give a graph its speaker-turn structure.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::layer::{Layer, LayerId};

/// Error raised for malformed layer definitions.
///
/// These are caller-misuse errors (bad configuration), distinct from data
/// errors the validator repairs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// A layer names a parent layer that has not been defined.
    #[error("layer {layer} declares unknown parent layer {parent}")]
    UnknownParentLayer {
        /// The offending layer.
        layer: LayerId,
        /// The missing parent.
        parent: LayerId,
    },
    /// A layer id was defined twice.
    #[error("layer {0} is already defined")]
    DuplicateLayer(LayerId),
}

/// Layer definitions for a graph, with the distinguished layer ids several
/// algorithms use to recognize speaker-turn structure.
///
/// The layer hierarchy is a forest rooted at layers with no parent. Parents
/// must be defined before their children, which makes cycles impossible.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    layers: BTreeMap<LayerId, Layer>,
    /// Insertion order of layer definitions.
    order: Vec<LayerId>,
    /// Layer holding one annotation per participant.
    pub participant_layer: Option<LayerId>,
    /// Layer holding speaker turns.
    pub turn_layer: Option<LayerId>,
    /// Layer partitioning turns into utterances (lines).
    pub utterance_layer: Option<LayerId>,
    /// Layer holding word tokens.
    pub word_layer: Option<LayerId>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer definition.
    ///
    /// The parent layer, if any, must already be defined.
    pub fn add_layer(&mut self, layer: Layer) -> Result<(), SchemaError> {
        if self.layers.contains_key(&layer.id) {
            return Err(SchemaError::DuplicateLayer(layer.id.clone()));
        }
        if let Some(parent) = &layer.parent {
            if !self.layers.contains_key(parent) {
                return Err(SchemaError::UnknownParentLayer {
                    layer: layer.id.clone(),
                    parent: parent.clone(),
                });
            }
        }
        self.order.push(layer.id.clone());
        self.layers.insert(layer.id.clone(), layer);
        Ok(())
    }

    /// Designate the participant layer.
    pub fn set_participant_layer(&mut self, id: impl Into<LayerId>) {
        self.participant_layer = Some(id.into());
    }

    /// Designate the turn layer.
    pub fn set_turn_layer(&mut self, id: impl Into<LayerId>) {
        self.turn_layer = Some(id.into());
    }

    /// Designate the utterance layer.
    pub fn set_utterance_layer(&mut self, id: impl Into<LayerId>) {
        self.utterance_layer = Some(id.into());
    }

    /// Designate the word layer.
    pub fn set_word_layer(&mut self, id: impl Into<LayerId>) {
        self.word_layer = Some(id.into());
    }

    /// Look up a layer definition.
    pub fn layer(&self, id: &LayerId) -> Option<&Layer> {
        self.layers.get(id)
    }

    /// All layers in definition order.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.order.iter().filter_map(|id| self.layers.get(id))
    }

    /// Direct child layers of the given layer, in definition order.
    pub fn child_layers(&self, id: &LayerId) -> Vec<&Layer> {
        self.layers()
            .filter(|l| l.parent.as_ref() == Some(id))
            .collect()
    }

    /// Ancestor layer ids of the given layer, nearest first.
    pub fn ancestors(&self, id: &LayerId) -> Vec<LayerId> {
        let mut result = Vec::new();
        let mut current = self.layers.get(id).and_then(|l| l.parent.clone());
        while let Some(parent) = current {
            current = self.layers.get(&parent).and_then(|l| l.parent.clone());
            result.push(parent);
        }
        result
    }

    /// Whether `ancestor` is an ancestor layer of `id`.
    pub fn is_ancestor(&self, id: &LayerId, ancestor: &LayerId) -> bool {
        self.ancestors(id).contains(ancestor)
    }

    /// Layer ids in parent-before-child order.
    pub fn top_down(&self) -> Vec<LayerId> {
        let mut result = Vec::new();
        let mut stack: Vec<&Layer> = self
            .layers()
            .filter(|l| l.parent.is_none())
            .collect::<Vec<_>>();
        stack.reverse();
        while let Some(layer) = stack.pop() {
            result.push(layer.id.clone());
            let mut children = self.child_layers(&layer.id);
            children.reverse();
            stack.extend(children);
        }
        result
    }

    /// Layer ids in child-before-parent order.
    pub fn bottom_up(&self) -> Vec<LayerId> {
        let mut result = self.top_down();
        result.reverse();
        result
    }

    /// Aligned layers with no aligned ancestor, in top-down order.
    ///
    /// These are the roots the reversed-anchor pass iterates from.
    pub fn top_aligned_layers(&self) -> Vec<LayerId> {
        let mut result: Vec<LayerId> = Vec::new();
        for id in self.top_down() {
            let Some(layer) = self.layer(&id) else { continue };
            if !layer.aligned() {
                continue;
            }
            if self.ancestors(&id).iter().any(|a| result.contains(a)) {
                continue;
            }
            result.push(id);
        }
        result
    }
}
