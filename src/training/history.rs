use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};

/// Per-epoch metric sequences produced by a training run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    pub loss: Vec<f32>,
    pub accuracy: Vec<f32>,
    pub val_loss: Vec<f32>,
    pub val_accuracy: Vec<f32>,
    pub learning_rate: Vec<f32>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed epochs.
    pub fn len(&self) -> usize {
        self.loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loss.is_empty()
    }

    pub fn push(
        &mut self,
        loss: f32,
        accuracy: f32,
        val_loss: f32,
        val_accuracy: f32,
        learning_rate: f32,
    ) {
        self.loss.push(loss);
        self.accuracy.push(accuracy);
        self.val_loss.push(val_loss);
        self.val_accuracy.push(val_accuracy);
        self.learning_rate.push(learning_rate);
    }

    /// Writes the history as pretty-printed JSON.
    pub fn save_json(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_keeps_sequences_aligned() {
        let mut history = History::new();
        history.push(1.0, 0.5, 1.2, 0.4, 1e-3);
        history.push(0.8, 0.6, 1.0, 0.5, 1e-3);
        assert_eq!(history.len(), 2);
        assert_eq!(history.accuracy.len(), 2);
        assert_eq!(history.learning_rate.len(), 2);
    }

    #[test]
    fn json_roundtrip() {
        let mut history = History::new();
        history.push(1.0, 0.5, 1.2, 0.4, 1e-3);
        let json = serde_json::to_string(&history).unwrap();
        let back: History = serde_json::from_str(&json).unwrap();
        assert_eq!(back.loss, history.loss);
    }
}
