//! Print layer inference from toolhead Z positions.

use crate::types::FileMetadata;

/// Infers the current layer from observed Z heights.
///
/// A single Z change is not trusted: z-hops move the nozzle up and back
/// down within one layer. Only the second change after a quiet period is
/// turned into a layer number.
#[derive(Debug, Clone, Default)]
pub struct LayerDetector {
    layer: i64,
    last_z: f64,
    active: bool,
    layer_height: f64,
    first_layer_height: f64,
    max_layers: Option<i64>,
    check_next: bool,
}

impl LayerDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(&self) -> i64 {
        self.layer
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Resets and arms the detector for a new job. It stays inactive when
    /// the metadata carries no layer height.
    pub fn start(&mut self, metadata: &FileMetadata) {
        self.reset();
        let Some(lh) = metadata.layer_height.filter(|h| *h > 0.0) else {
            return;
        };
        let flh = metadata.first_layer_height.unwrap_or(lh);
        self.active = true;
        self.layer_height = lh;
        self.first_layer_height = flh;
        self.max_layers = match (metadata.layer_count, metadata.object_height) {
            (Some(count), _) => Some(count),
            (None, Some(height)) => Some(((height - flh) / lh + 0.5).floor() as i64),
            (None, None) => None,
        };
    }

    /// Feeds an observed Z position.
    pub fn update(&mut self, z: f64) {
        if !self.active || z == self.last_z {
            return;
        }
        self.last_z = z;
        if !self.check_next {
            self.check_next = true;
            return;
        }
        self.check_next = false;
        let layer = 1 + ((z - self.first_layer_height) / self.layer_height + 0.5).floor() as i64;
        self.layer = match self.max_layers {
            Some(max) => layer.min(max),
            None => layer,
        };
    }

    pub fn resume(&mut self) {
        self.active = true;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
